//! Top-level CLI definition and dispatch.

use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use share_revoker::backend::StorageBackend;
use share_revoker::backend::drive::DriveBackend;
use share_revoker::core::address::{TargetAddress, validate_targets};
use share_revoker::core::config::Config;
use share_revoker::core::errors::ShrError;
use share_revoker::daemon::notifications::NotificationManager;
use share_revoker::daemon::runner::{DriveExit, RunLoop, RunnerSettings, TickOutcome};
use share_revoker::daemon::scheduler::{ContinuationState, continuation_state};
use share_revoker::daemon::signals::SignalHandler;
use share_revoker::logger::dual::{ActivityLoggerHandle, DualLoggerConfig, spawn_logger};
use share_revoker::logger::sqlite::SqliteLogger;
use share_revoker::logger::stats::{StatsEngine, WindowStats};
use share_revoker::report::render::{render_text, subject};
use share_revoker::report::summary::Summary;
use share_revoker::scanner::batch::{
    BatchScanner, BatchSettings, BatchStatus, ResumeOutcome, discard_run,
};
use share_revoker::scanner::classify::classify;
use share_revoker::scanner::mutator::PermissionMutator;
use share_revoker::scanner::query::SearchQuery;
use share_revoker::state::cursor::ScanCursor;
use share_revoker::state::lock::RunLock;
use share_revoker::state::store::{InitOutcome, StateStore};

/// Share Revoker: bulk removal of file-sharing permissions for departed principals.
#[derive(Debug, Parser)]
#[command(
    name = "shrev",
    author,
    version,
    about = "Share Revoker - bulk sharing-permission cleanup",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Start a revocation run over the configured target addresses.
    Start(StartArgs),
    /// Continue a stored run from its saved position.
    Resume(ResumeArgs),
    /// Run at most one due batch and exit (for cron or timer units).
    Tick,
    /// Show the stored run and its pending continuation.
    Status,
    /// Discard the stored run and cancel its continuation.
    Stop,
    /// List files shared with the targets without changing anything.
    Preview(PreviewArgs),
    /// Verify configuration, credentials and state storage.
    Check,
    /// Print the report of the last completed run.
    Report,
    /// Show recent runs and activity from the activity database.
    History(HistoryArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct StartArgs {
    /// Only record the run and its first continuation; do not drive batches.
    #[arg(long)]
    no_run: bool,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ResumeArgs {
    /// Reactivate a run that halted on an error.
    #[arg(long)]
    retry: bool,
}

#[derive(Debug, Clone, Args, Serialize)]
struct PreviewArgs {
    /// Preview one address instead of the configured targets.
    #[arg(long, value_name = "EMAIL")]
    address: Option<String>,
    /// Maximum files listed per address.
    #[arg(long, default_value_t = 25, value_name = "N")]
    limit: usize,
    /// Also look up the matching permission on each file.
    #[arg(long)]
    permissions: bool,
}

impl Default for PreviewArgs {
    fn default() -> Self {
        Self {
            address: None,
            limit: 25,
            permissions: false,
        }
    }
}

#[derive(Debug, Clone, Args, Serialize)]
struct HistoryArgs {
    /// Number of runs and activity rows to show.
    #[arg(long, default_value_t = 10, value_name = "N")]
    limit: u32,
}

impl Default for HistoryArgs {
    fn default() -> Self {
        Self { limit: 10 }
    }
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration (secrets redacted).
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<ShrError> for CliError {
    fn from(error: ShrError) -> Self {
        if error.is_config_error()
            || matches!(
                error,
                ShrError::NoActiveRun | ShrError::RunAlreadyActive { .. }
            )
        {
            Self::User(error.to_string())
        } else if matches!(error, ShrError::Serialization { .. }) {
            Self::Internal(error.to_string())
        } else {
            Self::Runtime(error.to_string())
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Start(args) => run_start(cli, args),
        Command::Resume(args) => run_resume(cli, args),
        Command::Tick => run_tick(cli),
        Command::Status => run_status(cli),
        Command::Stop => run_stop(cli),
        Command::Preview(args) => run_preview(cli, args),
        Command::Check => run_check(cli),
        Command::Report => run_report(cli),
        Command::History(args) => run_history(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Session wiring
// ---------------------------------------------------------------------------

/// Logger thread that is flushed and joined when the command ends.
struct LoggerGuard {
    handle: ActivityLoggerHandle,
    join: Option<JoinHandle<()>>,
}

impl Drop for LoggerGuard {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn start_logger(config: &Config) -> Option<LoggerGuard> {
    match spawn_logger(DualLoggerConfig::from_config(config)) {
        Ok((handle, join)) => Some(LoggerGuard {
            handle,
            join: Some(join),
        }),
        Err(e) => {
            eprintln!("[SHR-CLI] activity logging disabled: {e}");
            None
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

fn drive_backend(config: &Config) -> Result<Arc<DriveBackend>, CliError> {
    Ok(Arc::new(DriveBackend::from_config(config)?))
}

/// The configured override, or the account the credentials act as.
fn acting_address(config: &Config, backend: &dyn StorageBackend) -> Result<String, CliError> {
    if let Some(address) = config
        .run
        .acting_address
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
    {
        return Ok(address.to_string());
    }
    backend
        .acting_address()
        .map_err(|e| CliError::Runtime(format!("cannot determine the acting account: {e}")))
}

fn open_run_loop(
    config: &Config,
    backend: Arc<dyn StorageBackend>,
    logger: Option<&LoggerGuard>,
) -> Result<RunLoop, CliError> {
    let store = StateStore::open(config)?;
    let mut scanner = BatchScanner::new(backend, store, BatchSettings::from_config(config))
        .with_notifier(NotificationManager::from_config(&config.notifications));
    if let Some(guard) = logger {
        scanner = scanner.with_logger(guard.handle.clone());
    }
    Ok(RunLoop::new(
        scanner,
        SignalHandler::new(),
        RunnerSettings::from_config(config),
    ))
}

// ---------------------------------------------------------------------------
// Run control: start, resume, tick, stop
// ---------------------------------------------------------------------------

fn run_start(cli: &Cli, args: &StartArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    // Format and duplicate checks need no network round trip.
    validate_targets(&config.run.target_addresses, None)?;

    let backend = drive_backend(&config)?;
    let acting = acting_address(&config, backend.as_ref())?;
    let targets = validate_targets(&config.run.target_addresses, Some(&acting))?;
    let hash = config.stable_hash()?;
    let logger = start_logger(&config);
    let mut run_loop = open_run_loop(&config, backend, logger.as_ref())?;
    let mode = output_mode(cli);

    let cursor = match run_loop.start(targets, &hash).map_err(lock_busy)? {
        InitOutcome::Started(cursor) => cursor,
        InitOutcome::AlreadyActive(existing) => {
            return Err(CliError::User(format!(
                "a run started at {} is already recorded ({}); use `shrev status`, \
                 `shrev resume` or `shrev stop`",
                existing.started_at.to_rfc3339(),
                if existing.running { "running" } else { "halted" },
            )));
        }
    };

    if mode == OutputMode::Human {
        note(
            cli,
            format!(
                "Started run over {} address(es) as {acting}.",
                cursor.targets.len()
            ),
        );
        if cli.verbose {
            println!("  Config hash: {hash}");
            println!("  State: {}", run_loop.scanner_mut().store().describe());
        }
    }

    if args.no_run {
        match mode {
            OutputMode::Human => note(
                cli,
                "First batch is due now; run `shrev resume` or `shrev tick` to process it.",
            ),
            OutputMode::Json => write_json_line(&json!({
                "command": "start",
                "outcome": "scheduled",
                "acting_address": acting,
                "targets": target_list(&cursor),
                "config_hash": hash,
            }))?,
        }
        return Ok(());
    }

    drive_and_report(cli, &mut run_loop, "start")
}

fn run_resume(cli: &Cli, args: &ResumeArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let backend = drive_backend(&config)?;
    let logger = start_logger(&config);
    let mut run_loop = open_run_loop(&config, backend, logger.as_ref())?;

    match run_loop.resume(args.retry).map_err(lock_busy)? {
        ResumeOutcome::NeedsRetry(cursor) => Err(CliError::User(format!(
            "run halted: {}; fix the cause and re-run with `shrev resume --retry`",
            cursor.last_error.as_deref().unwrap_or("unknown error"),
        ))),
        ResumeOutcome::Rescheduled(cursor) => {
            if output_mode(cli) == OutputMode::Human {
                note(
                    cli,
                    format!(
                        "Resuming at address {}/{} ({} files processed so far).",
                        (cursor.address_index + 1).min(cursor.targets.len()),
                        cursor.targets.len(),
                        cursor.processed_count,
                    ),
                );
            }
            drive_and_report(cli, &mut run_loop, "resume")
        }
    }
}

fn drive_and_report(cli: &Cli, run_loop: &mut RunLoop, command: &str) -> Result<(), CliError> {
    let exit = run_loop.drive()?;
    let batches = run_loop.batches_run();
    let mode = output_mode(cli);

    match exit {
        DriveExit::Completed(summary) => {
            match mode {
                OutputMode::Human => {
                    if !cli.quiet {
                        println!("{}", subject(&summary).green().bold());
                        println!();
                        print!("{}", render_text(&summary));
                    }
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": command,
                    "outcome": "completed",
                    "batches": batches,
                    "summary": serde_json::to_value(&*summary)?,
                }))?,
            }
            Ok(())
        }
        DriveExit::Failed { code, message } => {
            if mode == OutputMode::Json {
                write_json_line(&json!({
                    "command": command,
                    "outcome": "failed",
                    "batches": batches,
                    "code": code,
                    "error": message,
                }))?;
            }
            Err(CliError::Runtime(format!(
                "run halted: {message}; fix the cause and run `shrev resume --retry`"
            )))
        }
        DriveExit::Halted { last_error } => Err(CliError::Runtime(format!(
            "run is halted: {}; run `shrev resume --retry` or `shrev stop`",
            last_error.as_deref().unwrap_or("unknown error"),
        ))),
        DriveExit::Unscheduled => Err(CliError::Partial(
            "run is active but has no pending continuation; run `shrev resume`".to_string(),
        )),
        DriveExit::NoRun => {
            match mode {
                OutputMode::Human => note(cli, "Run was stopped; nothing left to do."),
                OutputMode::Json => write_json_line(&json!({
                    "command": command,
                    "outcome": "stopped",
                    "batches": batches,
                }))?,
            }
            Ok(())
        }
        DriveExit::Interrupted => {
            if mode == OutputMode::Json {
                write_json_line(&json!({
                    "command": command,
                    "outcome": "interrupted",
                    "batches": batches,
                }))?;
            }
            Err(CliError::Partial(
                "interrupted; progress is saved, continue with `shrev resume`".to_string(),
            ))
        }
    }
}

fn run_tick(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let backend = drive_backend(&config)?;
    let logger = start_logger(&config);
    let mut run_loop = open_run_loop(&config, backend, logger.as_ref())?;
    let outcome = run_loop.tick()?;
    let mode = output_mode(cli);

    let label = match &outcome {
        TickOutcome::Ran(status) => status.label(),
        TickOutcome::NotDue(_) => "not_due",
        TickOutcome::Unscheduled => "unscheduled",
        TickOutcome::Halted => "halted",
        TickOutcome::NoRun => "no_run",
        TickOutcome::Busy => "busy",
    };

    if mode == OutputMode::Json {
        let mut payload = json!({ "command": "tick", "outcome": label });
        match &outcome {
            TickOutcome::NotDue(remaining) => {
                payload["due_in_ms"] = json!(duration_ms(*remaining));
            }
            TickOutcome::Ran(BatchStatus::Completed(summary)) => {
                payload["summary"] = serde_json::to_value(&**summary)?;
            }
            TickOutcome::Ran(BatchStatus::Failed { code, message }) => {
                payload["code"] = json!(code);
                payload["error"] = json!(message);
            }
            _ => {}
        }
        write_json_line(&payload)?;
    }

    match outcome {
        TickOutcome::Ran(BatchStatus::Completed(summary)) => {
            if mode == OutputMode::Human && !cli.quiet {
                println!("{}", subject(&summary).green().bold());
                println!();
                print!("{}", render_text(&summary));
            }
            Ok(())
        }
        TickOutcome::Ran(BatchStatus::Failed { message, .. }) => Err(CliError::Runtime(format!(
            "run halted: {message}; fix the cause and run `shrev resume --retry`"
        ))),
        TickOutcome::Ran(status) => {
            if mode == OutputMode::Human {
                note(cli, format!("Batch finished: {}.", status.label()));
            }
            Ok(())
        }
        TickOutcome::NotDue(remaining) => {
            if mode == OutputMode::Human {
                note(
                    cli,
                    format!("Next batch is due in {}.", format_duration(remaining)),
                );
            }
            Ok(())
        }
        TickOutcome::Busy => {
            if mode == OutputMode::Human {
                note(cli, "Another batch is running; nothing to do.");
            }
            Ok(())
        }
        TickOutcome::NoRun => {
            if mode == OutputMode::Human {
                note(cli, "No run in progress.");
            }
            Ok(())
        }
        TickOutcome::Halted => Err(CliError::Runtime(
            "run is halted; see `shrev status`, then `shrev resume --retry` or `shrev stop`"
                .to_string(),
        )),
        TickOutcome::Unscheduled => Err(CliError::Partial(
            "run is active but has no pending continuation; run `shrev resume`".to_string(),
        )),
    }
}

fn run_stop(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mut store = StateStore::open(&config)?;
    let _lock = RunLock::acquire(&config.paths.lock_file).map_err(lock_busy)?;
    let logger = start_logger(&config);
    let notifier = NotificationManager::from_config(&config.notifications);

    let stopped = discard_run(
        &mut store,
        logger.as_ref().map(|g| &g.handle),
        &notifier,
        "stopped by operator",
    )?;

    match output_mode(cli) {
        OutputMode::Human => match &stopped {
            Some(cursor) => note(
                cli,
                format!(
                    "Stopped run started {} after {} files; pending continuation cancelled.",
                    cursor.started_at.to_rfc3339(),
                    cursor.processed_count,
                ),
            ),
            None => note(cli, "No run in progress."),
        },
        OutputMode::Json => write_json_line(&json!({
            "command": "stop",
            "stopped": stopped.is_some(),
            "processed": stopped.as_ref().map(|c| c.processed_count),
        }))?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Status and reporting
// ---------------------------------------------------------------------------

fn continuation_label(state: ContinuationState) -> String {
    match state {
        ContinuationState::Due => "due now".to_string(),
        ContinuationState::Waiting(remaining) => format!("due in {}", format_duration(remaining)),
        ContinuationState::None => "none pending".to_string(),
        ContinuationState::Halted => "halted".to_string(),
    }
}

fn run_status(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let store = StateStore::open(&config)?;
    let cursor = store.load()?;
    let last_report = match Summary::load(&config.paths.report_file) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("[SHR-CLI] ignoring unreadable report: {e}");
            None
        }
    };
    let version = env!("CARGO_PKG_VERSION");

    match output_mode(cli) {
        OutputMode::Human => {
            println!("Share Revoker v{version}");
            println!("  Config: {}", config.paths.config_file.display());
            println!("  State:  {}", store.describe());
            match &cursor {
                None => println!("\n{}", "No run in progress.".dimmed()),
                Some(cursor) => print_cursor_human(cursor),
            }
            if let Some(report) = &last_report {
                println!(
                    "\nLast report ({}): {}",
                    report.finished_at.to_rfc3339(),
                    subject(report)
                );
            }
        }
        OutputMode::Json => {
            let now = Utc::now();
            let continuation = cursor
                .as_ref()
                .map(|c| continuation_label(continuation_state(c, now)));
            let elapsed_ms = cursor
                .as_ref()
                .map(|c| duration_ms(run_elapsed(c, now)));
            write_json_line(&json!({
                "command": "status",
                "version": version,
                "state": store.describe(),
                "active": cursor.is_some(),
                "cursor": cursor.as_ref().map(serde_json::to_value).transpose()?,
                "continuation": continuation,
                "elapsed_ms": elapsed_ms,
                "last_report": last_report.as_ref().map(|r| json!({
                    "finished_at": r.finished_at.to_rfc3339(),
                    "subject": subject(r),
                })),
            }))?;
        }
    }
    Ok(())
}

fn print_cursor_human(cursor: &ScanCursor) {
    let state = if cursor.running {
        "RUNNING".green().bold()
    } else {
        "HALTED".red().bold()
    };
    println!("\nRun: {state}");
    println!("  Started:      {}", cursor.started_at.to_rfc3339());
    println!("  Elapsed:      {}", format_duration(run_elapsed(cursor, Utc::now())));
    println!("  Last update:  {}", cursor.updated_at.to_rfc3339());
    println!(
        "  Address:      {}/{} {}",
        (cursor.address_index + 1).min(cursor.targets.len()),
        cursor.targets.len(),
        cursor.current_address.as_deref().unwrap_or("(finishing)"),
    );
    println!(
        "  Page token:   {}",
        cursor.page_token.as_deref().unwrap_or("(first page)")
    );
    println!("  Processed:    {} files", cursor.processed_count);
    println!("  Batches:      {}", cursor.batch_count);
    println!(
        "  Continuation: {}",
        continuation_label(continuation_state(cursor, Utc::now()))
    );

    let t = cursor.tallies.totals();
    println!(
        "  Outcomes:     {} removed, {} blocked, {} skipped, {} errors, {} no match",
        t.removed, t.blocked, t.skipped, t.errors, t.no_match
    );
    println!(
        "  Log:          {} entries retained, {} dropped",
        cursor.outcome_log.len(),
        cursor.dropped_log_entries
    );
    if let Some(err) = &cursor.last_error {
        println!("  {} {err}", "Last error:".red());
        println!("  Continue with `shrev resume --retry` or discard with `shrev stop`.");
    }
}

fn run_report(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let Some(summary) = Summary::load(&config.paths.report_file)? else {
        return Err(CliError::User(format!(
            "no report at {}; a report is written when a run completes",
            config.paths.report_file.display()
        )));
    };

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{}", subject(&summary).bold());
            println!();
            print!("{}", render_text(&summary));
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "report",
            "path": config.paths.report_file.to_string_lossy(),
            "summary": serde_json::to_value(&summary)?,
        }))?,
    }
    Ok(())
}

fn run_history(cli: &Cli, args: &HistoryArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mode = output_mode(cli);

    if !config.paths.activity_db.exists() {
        match mode {
            OutputMode::Human => println!("No activity recorded yet."),
            OutputMode::Json => write_json_line(&json!({
                "command": "history",
                "runs": [],
                "activity": [],
                "stats": null,
            }))?,
        }
        return Ok(());
    }

    let db = SqliteLogger::open(&config.paths.activity_db)
        .map_err(|e| CliError::Runtime(format!("open activity database: {e}")))?;
    let runs = db.recent_runs(args.limit)?;
    let activity = db.recent_activity(args.limit)?;
    let stats = StatsEngine::new(&db);

    match mode {
        OutputMode::Human => {
            println!("Recent runs:");
            if runs.is_empty() {
                println!("  (none)");
            }
            for run in &runs {
                let outcome = match run.outcome.as_str() {
                    "completed" => run.outcome.green(),
                    "failed" => run.outcome.red(),
                    _ => run.outcome.yellow(),
                };
                println!(
                    "  {}  {:<9}  {} processed, {} removed, {} blocked, {} skipped, {} errors  [{}]",
                    run.started_at,
                    outcome,
                    run.processed,
                    run.removed,
                    run.blocked,
                    run.skipped,
                    run.errors,
                    run.targets,
                );
            }

            println!("\nActivity windows:");
            for ws in &stats.summary()? {
                print_window_stats_human(ws);
            }

            println!("\nRecent activity:");
            if activity.is_empty() {
                println!("  (none)");
            }
            for row in &activity {
                let target = match (&row.address, &row.file_name) {
                    (Some(address), Some(file)) => format!("{address} on {file}"),
                    (Some(address), None) => address.clone(),
                    _ => String::new(),
                };
                let detail = row
                    .error_message
                    .as_deref()
                    .or(row.details.as_deref())
                    .unwrap_or("");
                println!(
                    "  {}  {:<18}  {target}  {detail}",
                    row.timestamp, row.event_type
                );
            }
        }
        OutputMode::Json => {
            let runs_json: Vec<Value> = runs
                .iter()
                .map(|r| {
                    json!({
                        "started_at": r.started_at,
                        "finished_at": r.finished_at,
                        "targets": r.targets,
                        "processed": r.processed,
                        "removed": r.removed,
                        "blocked": r.blocked,
                        "skipped": r.skipped,
                        "errors": r.errors,
                        "outcome": r.outcome,
                    })
                })
                .collect();
            let activity_json: Vec<Value> = activity
                .iter()
                .map(|a| {
                    json!({
                        "timestamp": a.timestamp,
                        "event_type": a.event_type,
                        "severity": a.severity,
                        "address": a.address,
                        "file_id": a.file_id,
                        "file_name": a.file_name,
                        "role": a.role,
                        "link": a.link,
                        "success": a.success != 0,
                        "error_code": a.error_code,
                        "error_message": a.error_message,
                    })
                })
                .collect();
            write_json_line(&json!({
                "command": "history",
                "runs": runs_json,
                "activity": activity_json,
                "stats": stats.export_json()?,
            }))?;
        }
    }
    Ok(())
}

fn print_window_stats_human(ws: &WindowStats) {
    println!(
        "  {:>4}: {} removed, {} blocked, {} skipped, {} failed, {} runs started",
        ws.label, ws.removed, ws.blocked, ws.skipped, ws.failed, ws.runs_started
    );
}

// ---------------------------------------------------------------------------
// Probes: preview and check
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct PreviewRow {
    address: String,
    file_id: String,
    name: String,
    category: String,
    link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

fn run_preview(cli: &Cli, args: &PreviewArgs) -> Result<(), CliError> {
    if args.limit == 0 {
        return Err(CliError::User("--limit must be at least 1".to_string()));
    }
    let config = load_config(cli)?;
    let targets = match &args.address {
        Some(address) => vec![TargetAddress::parse(address)?],
        None => validate_targets(&config.run.target_addresses, None)?,
    };
    let backend = drive_backend(&config)?;
    let mutator = PermissionMutator::new(backend.clone());

    let mut rows = Vec::new();
    let mut truncated = Vec::new();
    for target in &targets {
        let query = SearchQuery::shared_with(target);
        let mut token: Option<String> = None;
        let mut listed = 0_usize;
        loop {
            let page_size = (args.limit - listed).min(config.run.batch_size);
            let page = backend
                .search_files(&query, page_size, token.as_deref())
                .map_err(|e| CliError::Runtime(format!("search for {target} failed: {e}")))?;
            for file in page.files.into_iter().take(args.limit - listed) {
                let role = if args.permissions {
                    Some(match mutator.find_match(&file, target.as_str()) {
                        Ok(Some(entry)) => entry.role.to_string(),
                        Ok(None) => "none".to_string(),
                        Err(e) => format!("unreadable ({e})"),
                    })
                } else {
                    None
                };
                rows.push(PreviewRow {
                    address: target.as_str().to_string(),
                    category: classify(&file.mime_type).label().to_string(),
                    file_id: file.id,
                    name: file.name,
                    link: file.link,
                    role,
                });
                listed += 1;
            }
            token = page.next_page_token.filter(|t| !t.is_empty());
            if listed >= args.limit {
                if token.is_some() {
                    truncated.push(target.as_str().to_string());
                }
                break;
            }
            if token.is_none() {
                break;
            }
        }
    }

    match output_mode(cli) {
        OutputMode::Human => {
            for target in &targets {
                let mine: Vec<&PreviewRow> =
                    rows.iter().filter(|r| r.address == target.as_str()).collect();
                println!("{} ({} file(s))", target.as_str().bold(), mine.len());
                for row in mine {
                    let role = row
                        .role
                        .as_deref()
                        .map(|r| format!(" [{r}]"))
                        .unwrap_or_default();
                    println!("  {:<18} {}{role}", row.category, row.name);
                    if cli.verbose {
                        println!("  {:<18} {}", "", row.link);
                    }
                }
                if truncated.iter().any(|t| t == target.as_str()) {
                    println!("  {}", format!("... more files beyond --limit {}", args.limit).dimmed());
                }
            }
            note(cli, "Preview only; no permissions were changed.");
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "preview",
            "limit": args.limit,
            "files": serde_json::to_value(&rows)?,
            "truncated": truncated,
        }))?,
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct CheckItem {
    name: &'static str,
    ok: bool,
    detail: String,
}

impl CheckItem {
    fn pass(name: &'static str, detail: impl Display) -> Self {
        Self {
            name,
            ok: true,
            detail: detail.to_string(),
        }
    }

    fn fail(name: &'static str, detail: impl Display) -> Self {
        Self {
            name,
            ok: false,
            detail: detail.to_string(),
        }
    }
}

fn run_check(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mut items = vec![CheckItem::pass(
        "config",
        format!("{} (hash {})", config.paths.config_file.display(), config.stable_hash()?),
    )];

    let acting = match DriveBackend::from_config(&config) {
        Ok(backend) => match acting_address(&config, &backend) {
            Ok(address) => {
                items.push(CheckItem::pass("credentials", format!("acting as {address}")));
                Some(address)
            }
            Err(e) => {
                items.push(CheckItem::fail("credentials", e));
                None
            }
        },
        Err(e) => {
            items.push(CheckItem::fail("credentials", e));
            None
        }
    };

    items.push(
        match validate_targets(&config.run.target_addresses, acting.as_deref()) {
            Ok(targets) => CheckItem::pass("targets", format!("{} address(es)", targets.len())),
            Err(e) => CheckItem::fail("targets", e),
        },
    );

    items.push(match StateStore::open(&config) {
        Ok(store) => match store.load() {
            Ok(Some(cursor)) if cursor.is_failed() => CheckItem::fail(
                "state",
                format!(
                    "{}: run halted ({})",
                    store.describe(),
                    cursor.last_error.as_deref().unwrap_or("unknown error")
                ),
            ),
            Ok(Some(_)) => CheckItem::pass("state", format!("{}: run in progress", store.describe())),
            Ok(None) => CheckItem::pass("state", format!("{}: idle", store.describe())),
            Err(e) => CheckItem::fail("state", e),
        },
        Err(e) => CheckItem::fail("state", e),
    });

    let notifier = NotificationManager::from_config(&config.notifications);
    items.push(CheckItem::pass(
        "notifications",
        if notifier.is_enabled() {
            notifier.channel_names().join(", ")
        } else {
            "disabled".to_string()
        },
    ));

    let failed = items.iter().filter(|i| !i.ok).count();
    match output_mode(cli) {
        OutputMode::Human => {
            for item in &items {
                let mark = if item.ok { "ok".green() } else { "FAIL".red().bold() };
                println!("  [{mark:>4}] {:<14} {}", item.name, item.detail);
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "check",
            "ok": failed == 0,
            "checks": serde_json::to_value(&items)?,
        }))?,
    }

    if failed > 0 {
        return Err(CliError::Runtime(format!("{failed} check(s) failed")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?.redacted();

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                let targets = config.run.target_addresses.len();

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Targets: {targets}");
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "targets": targets,
                            "hash": hash,
                        }))?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                        }))?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn target_list(cursor: &ScanCursor) -> Vec<&str> {
    cursor.targets.iter().map(TargetAddress::as_str).collect()
}

/// Human-mode informational line, suppressed by `--quiet`.
fn note(cli: &Cli, message: impl Display) {
    if !cli.quiet {
        println!("{message}");
    }
}

/// A held run lock means a batch is executing in another process.
fn lock_busy(e: ShrError) -> CliError {
    match e {
        ShrError::LockHeld { .. } => {
            CliError::Runtime(format!("{e}; a batch is in progress, retry shortly"))
        }
        other => other.into(),
    }
}

fn run_elapsed(cursor: &ScanCursor, now: chrono::DateTime<Utc>) -> Duration {
    now.signed_duration_since(cursor.started_at)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3_600 {
        format!("{}h{:02}m", secs / 3_600, (secs % 3_600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{secs}s")
    } else {
        format!("{}ms", d.as_millis())
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("SHR_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "shrev",
            "--config",
            "/tmp/shrev.toml",
            "--json",
            "--no-color",
            "-v",
            "status",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["shrev", "status", "--json", "--no-color", "-v"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_every_subcommand() {
        let cases = [
            vec!["shrev", "start"],
            vec!["shrev", "start", "--no-run"],
            vec!["shrev", "resume", "--retry"],
            vec!["shrev", "tick"],
            vec!["shrev", "stop"],
            vec!["shrev", "preview", "--address", "a@x.com", "--limit", "5", "--permissions"],
            vec!["shrev", "check"],
            vec!["shrev", "report"],
            vec!["shrev", "history", "--limit", "3"],
            vec!["shrev", "config", "path"],
            vec!["shrev", "config", "show"],
            vec!["shrev", "config", "validate"],
        ];

        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["shrev", "-v", "-q", "status"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["shrev", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(
            resolve_output_mode(false, Some("auto"), true),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn error_mapping_follows_exit_code_contract() {
        assert_eq!(CliError::from(ShrError::NoTargets).exit_code(), 1);
        assert_eq!(CliError::from(ShrError::NoActiveRun).exit_code(), 1);
        assert_eq!(
            CliError::from(ShrError::Runtime {
                details: "x".to_string()
            })
            .exit_code(),
            2
        );
        assert_eq!(CliError::Partial(String::new()).exit_code(), 4);
    }

    #[test]
    fn durations_format_compactly() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m05s");
        assert_eq!(format_duration(Duration::from_secs(3_720)), "1h02m");
    }

    #[test]
    fn elapsed_counts_from_run_start() {
        let started = Utc::now() - chrono::Duration::minutes(90);
        let cursor = ScanCursor::new(vec![TargetAddress::parse("a@x.com").unwrap()], started);
        let now = started + chrono::Duration::minutes(90);
        assert_eq!(run_elapsed(&cursor, now), Duration::from_secs(5_400));
        assert_eq!(format_duration(run_elapsed(&cursor, now)), "1h30m");
        // Clock skew never yields a negative elapsed time.
        assert_eq!(run_elapsed(&cursor, started - chrono::Duration::seconds(5)), Duration::ZERO);
    }

    #[test]
    fn held_lock_maps_to_runtime_error() {
        let err = lock_busy(ShrError::LockHeld {
            path: PathBuf::from("/tmp/run.lock"),
        });
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("in progress"));
    }
}
