//! Configuration system: TOML file + env var overrides + defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ShrError};
use crate::daemon::notifications::NotificationConfig;

/// Full shrev configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub run: RunConfig,
    pub backend: BackendConfig,
    pub state: StateConfig,
    pub paths: PathsConfig,
    pub notifications: NotificationConfig,
}

/// Run shape: who to revoke and how to slice the work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Principals whose permissions get removed, processed in order.
    pub target_addresses: Vec<String>,
    /// Files requested per search page (one page per batch).
    pub batch_size: usize,
    /// Wall-clock ceiling for a single batch.
    pub max_execution_secs: u64,
    /// Delay before the next batch is due.
    pub retry_delay_secs: u64,
    /// Serialized outcome-log size (chars) that triggers truncation.
    pub max_log_size: usize,
    /// Overrides the acting account reported by the backend.
    pub acting_address: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target_addresses: Vec::new(),
            batch_size: 15,
            max_execution_secs: 280,
            retry_delay_secs: 5,
            max_log_size: 8_000,
            acting_address: None,
        }
    }
}

/// Storage backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    pub api_base: String,
    /// Bearer token. Prefer `access_token_file` or `SHR_ACCESS_TOKEN`.
    pub access_token: Option<String>,
    pub access_token_file: Option<PathBuf>,
    pub request_timeout_secs: u64,
    pub include_shared_drives: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base: "https://www.googleapis.com/drive/v3".to_string(),
            access_token: None,
            access_token_file: None,
            request_timeout_secs: 30,
            include_shared_drives: true,
        }
    }
}

impl BackendConfig {
    /// Resolve the bearer token from the inline value or the token file.
    pub fn resolve_access_token(&self) -> Result<String> {
        if let Some(token) = self.access_token.as_deref().map(str::trim)
            && !token.is_empty()
        {
            return Ok(token.to_string());
        }
        if let Some(path) = &self.access_token_file {
            let raw = fs::read_to_string(path).map_err(|source| ShrError::io(path, source))?;
            let token = raw.trim();
            if !token.is_empty() {
                return Ok(token.to_string());
            }
            return Err(ShrError::InvalidConfig {
                details: format!("backend.access_token_file {} is empty", path.display()),
            });
        }
        Err(ShrError::InvalidConfig {
            details: "no access token: set backend.access_token, backend.access_token_file, \
                      or SHR_ACCESS_TOKEN"
                .to_string(),
        })
    }
}

/// Which repository persists the run cursor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StateBackendKind {
    Sqlite,
    File,
}

impl StateBackendKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(Self::Sqlite),
            "file" | "json" => Some(Self::File),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::File => "file",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StateConfig {
    pub backend: StateBackendKind,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: if cfg!(feature = "sqlite") {
                StateBackendKind::Sqlite
            } else {
                StateBackendKind::File
            },
        }
    }
}

/// Filesystem paths used by shrev.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub state_file: PathBuf,
    pub state_db: PathBuf,
    pub activity_db: PathBuf,
    pub jsonl_log: PathBuf,
    pub report_file: PathBuf,
    pub lock_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[SHR-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("shrev").join("config.toml");
        let data = home_dir.join(".local").join("share").join("shrev");
        Self {
            config_file: cfg,
            state_file: data.join("state.json"),
            state_db: data.join("state.sqlite3"),
            activity_db: data.join("activity.sqlite3"),
            jsonl_log: data.join("activity.jsonl"),
            report_file: data.join("last-report.json"),
            lock_file: data.join("run.lock"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| ShrError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(ShrError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the run-start log line.
    ///
    /// FNV-1a over the canonical JSON; the access token is excluded.
    pub fn stable_hash(&self) -> Result<String> {
        let mut redacted = self.clone();
        redacted.backend.access_token = None;
        let canonical = serde_json::to_string(&redacted)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Copy with secrets blanked, for `config show`.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.backend.access_token.is_some() {
            copy.backend.access_token = Some("<redacted>".to_string());
        }
        copy
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // run
        if let Some(raw) = lookup("SHR_RUN_TARGET_ADDRESSES") {
            self.run.target_addresses = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        set_usize(&mut lookup, "SHR_RUN_BATCH_SIZE", &mut self.run.batch_size)?;
        set_u64(
            &mut lookup,
            "SHR_RUN_MAX_EXECUTION_SECS",
            &mut self.run.max_execution_secs,
        )?;
        set_u64(
            &mut lookup,
            "SHR_RUN_RETRY_DELAY_SECS",
            &mut self.run.retry_delay_secs,
        )?;
        set_usize(&mut lookup, "SHR_RUN_MAX_LOG_SIZE", &mut self.run.max_log_size)?;
        if let Some(raw) = lookup("SHR_RUN_ACTING_ADDRESS") {
            self.run.acting_address = Some(raw.trim().to_string());
        }

        // backend
        if let Some(raw) = lookup("SHR_ACCESS_TOKEN") {
            self.backend.access_token = Some(raw);
        }
        if let Some(raw) = lookup("SHR_BACKEND_API_BASE") {
            self.backend.api_base = raw;
        }
        set_u64(
            &mut lookup,
            "SHR_BACKEND_REQUEST_TIMEOUT_SECS",
            &mut self.backend.request_timeout_secs,
        )?;
        if let Some(raw) = lookup("SHR_BACKEND_INCLUDE_SHARED_DRIVES") {
            self.backend.include_shared_drives =
                parse_env_bool("SHR_BACKEND_INCLUDE_SHARED_DRIVES", &raw)?;
        }

        // state
        if let Some(raw) = lookup("SHR_STATE_BACKEND") {
            self.state.backend =
                StateBackendKind::parse(&raw).ok_or_else(|| ShrError::InvalidConfig {
                    details: format!("SHR_STATE_BACKEND={raw:?}: expected \"sqlite\" or \"file\""),
                })?;
        }

        Ok(())
    }

    /// Trim stray whitespace from addresses and the trailing slash from the API base.
    fn normalize(&mut self) {
        for address in &mut self.run.target_addresses {
            let trimmed = address.trim();
            if trimmed.len() != address.len() {
                *address = trimmed.to_string();
            }
        }
        if let Some(acting) = &mut self.run.acting_address {
            *acting = acting.trim().to_string();
        }
        while self.backend.api_base.ends_with('/') {
            self.backend.api_base.pop();
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(1..=1_000).contains(&self.run.batch_size) {
            return Err(ShrError::InvalidConfig {
                details: format!(
                    "run.batch_size must be in [1, 1000], got {}",
                    self.run.batch_size
                ),
            });
        }
        if self.run.max_execution_secs == 0 {
            return Err(ShrError::InvalidConfig {
                details: "run.max_execution_secs must be > 0".to_string(),
            });
        }
        if self.run.max_log_size < 512 {
            return Err(ShrError::InvalidConfig {
                details: format!(
                    "run.max_log_size must be >= 512, got {}",
                    self.run.max_log_size
                ),
            });
        }
        if self.backend.request_timeout_secs == 0 {
            return Err(ShrError::InvalidConfig {
                details: "backend.request_timeout_secs must be > 0".to_string(),
            });
        }
        if !(self.backend.api_base.starts_with("https://")
            || self.backend.api_base.starts_with("http://"))
        {
            return Err(ShrError::InvalidConfig {
                details: format!(
                    "backend.api_base must be an http(s) URL, got {:?}",
                    self.backend.api_base
                ),
            });
        }
        if self.state.backend == StateBackendKind::Sqlite && !cfg!(feature = "sqlite") {
            return Err(ShrError::InvalidConfig {
                details: "state.backend = \"sqlite\" requires the sqlite feature".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_u64<F>(lookup: &mut F, name: &str, slot: &mut u64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<u64>().map_err(|error| ShrError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_usize<F>(lookup: &mut F, name: &str, slot: &mut usize) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw
            .trim()
            .parse::<usize>()
            .map_err(|error| ShrError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.trim()
        .parse::<bool>()
        .map_err(|error| ShrError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

#[cfg(test)]
mod tests {
    use super::{Config, ShrError, StateBackendKind};
    use std::collections::HashMap;
    use std::path::Path;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    fn apply(cfg: &mut Config, pairs: &[(&str, &str)]) -> super::Result<()> {
        let env = vars(pairs);
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.run.batch_size, 15);
        assert_eq!(cfg.run.max_execution_secs, 280);
        assert_eq!(cfg.run.retry_delay_secs, 5);
        assert_eq!(cfg.run.max_log_size, 8_000);
    }

    #[test]
    fn batch_size_bounds_enforced() {
        let mut cfg = Config::default();
        cfg.run.batch_size = 0;
        assert!(cfg.validate().is_err());
        cfg.run.batch_size = 1_001;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
        cfg.run.batch_size = 1_000;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn tiny_log_budget_rejected() {
        let mut cfg = Config::default();
        cfg.run.max_log_size = 100;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("512"));
    }

    #[test]
    fn zero_timeouts_rejected() {
        let mut cfg = Config::default();
        cfg.run.max_execution_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.backend.request_timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_http_api_base_rejected() {
        let mut cfg = Config::default();
        cfg.backend.api_base = "ftp://example.com".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_target_list_is_comma_separated() {
        let mut cfg = Config::default();
        apply(
            &mut cfg,
            &[("SHR_RUN_TARGET_ADDRESSES", "a@x.com, b@x.com,,c@x.com ")],
        )
        .unwrap();
        assert_eq!(cfg.run.target_addresses, vec!["a@x.com", "b@x.com", "c@x.com"]);
    }

    #[test]
    fn env_numeric_overrides_apply() {
        let mut cfg = Config::default();
        apply(
            &mut cfg,
            &[
                ("SHR_RUN_BATCH_SIZE", "50"),
                ("SHR_RUN_MAX_EXECUTION_SECS", "60"),
                ("SHR_RUN_RETRY_DELAY_SECS", "1"),
                ("SHR_RUN_MAX_LOG_SIZE", "4096"),
                ("SHR_BACKEND_INCLUDE_SHARED_DRIVES", "false"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.run.batch_size, 50);
        assert_eq!(cfg.run.max_execution_secs, 60);
        assert_eq!(cfg.run.retry_delay_secs, 1);
        assert_eq!(cfg.run.max_log_size, 4_096);
        assert!(!cfg.backend.include_shared_drives);
    }

    #[test]
    fn env_invalid_number_rejected() {
        let mut cfg = Config::default();
        let err = apply(&mut cfg, &[("SHR_RUN_BATCH_SIZE", "lots")]).unwrap_err();
        assert!(matches!(err, ShrError::ConfigParse { .. }));
    }

    #[test]
    fn env_state_backend_parsed() {
        let mut cfg = Config::default();
        apply(&mut cfg, &[("SHR_STATE_BACKEND", "file")]).unwrap();
        assert_eq!(cfg.state.backend, StateBackendKind::File);

        let err = apply(&mut cfg, &[("SHR_STATE_BACKEND", "redis")]).unwrap_err();
        assert_eq!(err.code(), "SHR-1001");
    }

    #[test]
    fn env_access_token_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "from-file\n").unwrap();

        let mut cfg = Config::default();
        cfg.backend.access_token_file = Some(token_path);
        assert_eq!(cfg.backend.resolve_access_token().unwrap(), "from-file");

        apply(&mut cfg, &[("SHR_ACCESS_TOKEN", "from-env")]).unwrap();
        assert_eq!(cfg.backend.resolve_access_token().unwrap(), "from-env");
    }

    #[test]
    fn missing_token_is_config_error() {
        let cfg = Config::default();
        let err = cfg.backend.resolve_access_token().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn normalize_trims_addresses_and_api_base() {
        let mut cfg = Config::default();
        cfg.run.target_addresses = vec![" a@x.com".to_string(), "B@x.com ".to_string()];
        cfg.backend.api_base = "http://localhost:8080/drive/v3//".to_string();
        cfg.normalize();
        assert_eq!(cfg.run.target_addresses, vec!["a@x.com", "B@x.com"]);
        assert_eq!(cfg.backend.api_base, "http://localhost:8080/drive/v3");
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/shrev/config.toml")));
        let err = result.unwrap_err();
        assert!(matches!(err, ShrError::MissingConfig { .. }));
    }

    #[test]
    fn load_reads_toml_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[run]
target_addresses = ["gone@example.com"]
batch_size = 25

[state]
backend = "file"

[notifications]
channels = ["journal"]
"#,
        )
        .unwrap();

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.run.target_addresses, vec!["gone@example.com"]);
        assert_eq!(cfg.run.batch_size, 25);
        assert_eq!(cfg.run.retry_delay_secs, 5);
        assert_eq!(cfg.state.backend, StateBackendKind::File);
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn unknown_state_backend_in_toml_fails_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[state]\nbackend = \"redis\"\n").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert_eq!(err.code(), "SHR-1003");
    }

    #[test]
    fn stable_hash_ignores_token() {
        let mut cfg = Config::default();
        let before = cfg.stable_hash().unwrap();
        cfg.backend.access_token = Some("secret".to_string());
        assert_eq!(before, cfg.stable_hash().unwrap());
        cfg.run.batch_size = 16;
        assert_ne!(before, cfg.stable_hash().unwrap());
    }

    #[test]
    fn redacted_hides_token() {
        let mut cfg = Config::default();
        cfg.backend.access_token = Some("secret".to_string());
        let shown = toml::to_string(&cfg.redacted()).unwrap();
        assert!(!shown.contains("secret"));
        assert!(shown.contains("<redacted>"));
    }
}
