//! Run notifications: file, journal, webhook and email channels.
//!
//! Each channel filters by level and is fire-and-forget. A channel that
//! fails to deliver never affects the run.

#![allow(missing_docs)]

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::report::render::{render_text, subject};
use crate::report::summary::Summary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    RunStarted {
        targets: Vec<String>,
    },
    RunCompleted {
        summary: Box<Summary>,
    },
    RunFailed {
        code: String,
        message: String,
    },
    RunStopped {
        reason: String,
        processed: u64,
    },
}

impl NotificationEvent {
    /// Completed runs with blocked or failed files need attention.
    #[must_use]
    pub fn level(&self) -> NotificationLevel {
        match self {
            Self::RunStarted { .. } => NotificationLevel::Info,
            Self::RunCompleted { summary } => {
                if summary.totals.blocked > 0 || summary.totals.errors > 0 {
                    NotificationLevel::Warning
                } else {
                    NotificationLevel::Info
                }
            }
            Self::RunStopped { .. } => NotificationLevel::Warning,
            Self::RunFailed { .. } => NotificationLevel::Error,
        }
    }

    /// One-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::RunStarted { targets } => {
                format!("revocation run started for {} address(es)", targets.len())
            }
            Self::RunCompleted { summary } => {
                let t = &summary.totals;
                format!(
                    "revocation run complete: {} files, {} removed, {} blocked, {} skipped, {} errors",
                    t.processed, t.removed, t.blocked, t.skipped, t.errors
                )
            }
            Self::RunFailed { code, message } => format!("revocation run failed: [{code}] {message}"),
            Self::RunStopped { reason, processed } => {
                format!("revocation run stopped ({reason}) after {processed} files")
            }
        }
    }

    fn addresses(&self) -> Option<String> {
        match self {
            Self::RunStarted { targets } => Some(targets.join(", ")),
            Self::RunCompleted { summary } => Some(summary.targets.join(", ")),
            Self::RunFailed { .. } | Self::RunStopped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    /// Channel names to activate: `file`, `journal`, `webhook`, `email`.
    pub channels: Vec<String>,
    pub file: FileConfig,
    pub journal: JournalConfig,
    pub webhook: WebhookConfig,
    pub email: EmailConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: vec!["journal".to_string(), "file".to_string()],
            file: FileConfig::default(),
            journal: JournalConfig::default(),
            webhook: WebhookConfig::default(),
            email: EmailConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub path: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        Self {
            path: home
                .join(".local")
                .join("share")
                .join("shrev")
                .join("notifications.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JournalConfig {
    pub min_level: NotificationLevel,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            min_level: NotificationLevel::Info,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
    pub min_level: NotificationLevel,
    /// Body template; `${SUMMARY}`, `${LEVEL}` and `${ADDRESSES}` are substituted.
    pub template: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            min_level: NotificationLevel::Warning,
            template: r#"{"text": "shrev: ${SUMMARY}"}"#.to_string(),
        }
    }
}

/// Operator mail via a local `sendmail -t`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub recipients: Vec<String>,
    pub from: String,
    pub sendmail_path: PathBuf,
    pub min_level: NotificationLevel,
    pub subject_prefix: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            recipients: Vec::new(),
            from: "shrev@localhost".to_string(),
            sendmail_path: PathBuf::from("/usr/sbin/sendmail"),
            min_level: NotificationLevel::Info,
            subject_prefix: "[shrev]".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct NotificationRecord<'a> {
    ts: String,
    level: NotificationLevel,
    summary: String,
    #[serde(flatten)]
    event: &'a NotificationEvent,
}

trait Channel: Send + Sync {
    fn name(&self) -> &'static str;
    fn send(&self, event: &NotificationEvent);
}

// ──── File (append-only JSONL) ────

struct FileChannel {
    path: PathBuf,
}

impl Channel for FileChannel {
    fn name(&self) -> &'static str {
        "file"
    }

    fn send(&self, event: &NotificationEvent) {
        let record = NotificationRecord {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: event.level(),
            summary: event.summary(),
            event,
        };
        let Ok(json) = serde_json::to_string(&record) else {
            return;
        };
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        let file = {
            let mut opts = OpenOptions::new();
            opts.create(true).append(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o600);
            }
            opts.open(&self.path)
        };
        if let Ok(mut f) = file {
            let _ = writeln!(f, "{json}");
        }
    }
}

// ──── Journal (stderr, captured by systemd) ────

struct JournalChannel {
    min_level: NotificationLevel,
}

impl Channel for JournalChannel {
    fn name(&self) -> &'static str {
        "journal"
    }

    fn send(&self, event: &NotificationEvent) {
        let level = event.level();
        if level < self.min_level {
            return;
        }
        let priority = match level {
            NotificationLevel::Error => "ERR",
            NotificationLevel::Warning => "WARNING",
            NotificationLevel::Info => "INFO",
        };
        eprintln!("[SHR-NOTIFY] [{priority}] {}", event.summary());
    }
}

// ──── Webhook (HTTP POST via curl) ────

struct WebhookChannel {
    url: String,
    min_level: NotificationLevel,
    template: String,
}

impl WebhookChannel {
    fn render_body(&self, event: &NotificationEvent) -> String {
        let esc = |s: &str| {
            s.replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('\n', "\\n")
        };
        let addresses = event.addresses().unwrap_or_else(|| "N/A".to_string());
        self.template
            .replace("${SUMMARY}", &esc(&event.summary()))
            .replace("${LEVEL}", &esc(&event.level().to_string()))
            .replace("${ADDRESSES}", &esc(&addresses))
    }
}

impl Channel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn send(&self, event: &NotificationEvent) {
        if event.level() < self.min_level || self.url.is_empty() {
            return;
        }
        let body = self.render_body(event);
        let _ = Command::new("curl")
            .arg("--silent")
            .arg("--max-time")
            .arg("5")
            .arg("--header")
            .arg("Content-Type: application/json")
            .arg("--data")
            .arg(&body)
            .arg(&self.url)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
    }
}

// ──── Email (sendmail -t) ────

struct EmailChannel {
    config: EmailConfig,
}

impl EmailChannel {
    /// RFC 822 message with headers; `sendmail -t` reads recipients from `To:`.
    fn render_message(&self, event: &NotificationEvent) -> String {
        let subject_line = match event {
            NotificationEvent::RunCompleted { summary } => subject(summary),
            other => other.summary(),
        };
        let body = match event {
            NotificationEvent::RunCompleted { summary } => render_text(summary),
            NotificationEvent::RunFailed { code, message } => format!(
                "The revocation run stopped on a fatal error.\n\n[{code}] {message}\n\n\
                 The cursor was kept. Run `shrev resume --retry` to continue from it,\n\
                 or `shrev stop` to discard it.\n"
            ),
            other => format!("{}\n", other.summary()),
        };
        format!(
            "To: {}\nFrom: {}\nSubject: {} {}\nContent-Type: text/plain; charset=utf-8\n\n{}",
            self.config.recipients.join(", "),
            self.config.from,
            self.config.subject_prefix,
            subject_line.replace('\n', " "),
            body
        )
    }
}

impl Channel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    fn send(&self, event: &NotificationEvent) {
        if event.level() < self.config.min_level || self.config.recipients.is_empty() {
            return;
        }
        let message = self.render_message(event);
        let child = Command::new(&self.config.sendmail_path)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let Ok(mut child) = child else {
            eprintln!(
                "[SHR-NOTIFY] cannot run {}",
                self.config.sendmail_path.display()
            );
            return;
        };
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(message.as_bytes());
        }
        let _ = child.wait();
    }
}

/// Dispatches events to every active channel.
pub struct NotificationManager {
    channels: Vec<Box<dyn Channel>>,
    enabled: bool,
}

impl NotificationManager {
    #[must_use]
    pub fn from_config(config: &NotificationConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let mut channels: Vec<Box<dyn Channel>> = Vec::new();
        for channel_name in &config.channels {
            match channel_name.as_str() {
                "file" => channels.push(Box::new(FileChannel {
                    path: config.file.path.clone(),
                })),
                "journal" => channels.push(Box::new(JournalChannel {
                    min_level: config.journal.min_level,
                })),
                "webhook" if config.webhook.enabled => channels.push(Box::new(WebhookChannel {
                    url: config.webhook.url.clone(),
                    min_level: config.webhook.min_level,
                    template: config.webhook.template.clone(),
                })),
                "email" if config.email.enabled => channels.push(Box::new(EmailChannel {
                    config: config.email.clone(),
                })),
                _ => {}
            }
        }

        Self {
            channels,
            enabled: true,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            channels: Vec::new(),
            enabled: false,
        }
    }

    pub fn notify(&self, event: &NotificationEvent) {
        if !self.enabled {
            return;
        }
        for channel in &self.channels {
            channel.send(event);
        }
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }
}
