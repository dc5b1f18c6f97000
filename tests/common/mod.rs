#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    /// Parse the last stdout line as JSON.
    pub fn json(&self) -> serde_json::Value {
        let line = self
            .stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_else(|| panic!("no stdout; log: {}", self.log_path.display()));
        serde_json::from_str(line)
            .unwrap_or_else(|e| panic!("stdout is not JSON ({e}); log: {}", self.log_path.display()))
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_shrev") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "shrev.exe" } else { "shrev" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve shrev binary path for integration test"),
    }
}

/// Write a config whose every path lives under `dir`.
pub fn write_config(dir: &Path, run_section: &str) -> PathBuf {
    let path = dir.join("config.toml");
    let data = dir.join("data");
    let body = format!(
        "[run]\n{run_section}\n\n\
         [state]\nbackend = \"file\"\n\n\
         [paths]\n\
         state_file = \"{state}\"\n\
         state_db = \"{state_db}\"\n\
         activity_db = \"{activity}\"\n\
         jsonl_log = \"{jsonl}\"\n\
         report_file = \"{report}\"\n\
         lock_file = \"{lock}\"\n\n\
         [notifications]\nenabled = false\n",
        state = data.join("state.json").display(),
        state_db = data.join("state.sqlite3").display(),
        activity = data.join("activity.sqlite3").display(),
        jsonl = data.join("activity.jsonl").display(),
        report = data.join("report.json").display(),
        lock = data.join("run.lock").display(),
    );
    fs::write(&path, body).expect("write test config");
    path
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let home = std::env::temp_dir().join("shrev-test-home");
    fs::create_dir_all(&home).expect("create temp home");
    run_cli_case_in(case_name, args, &home)
}

/// Run the binary with `HOME` pointed at `home` and no inherited shrev settings.
pub fn run_cli_case_in(case_name: &str, args: &[&str], home: &Path) -> CmdResult {
    run_cli_case_with_env(case_name, args, home, &[])
}

/// Like [`run_cli_case_in`], then sets `envs` on top of the cleaned environment.
pub fn run_cli_case_with_env(
    case_name: &str,
    args: &[&str],
    home: &Path,
    envs: &[(&str, &str)],
) -> CmdResult {
    let root = std::env::temp_dir().join("shrev-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("HOME", home)
        .env("RUST_BACKTRACE", "1")
        .env_remove("SHR_OUTPUT_FORMAT");
    for (name, _) in std::env::vars() {
        if name.starts_with("SHR_") {
            command.env_remove(name);
        }
    }
    command.envs(envs.iter().copied());
    let output = command.output().expect("execute shrev command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
