//! Per-file, per-address outcome of a revocation attempt.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::backend::{FileRef, Role};

/// Terminal classification for one (file, address) pair.
///
/// Exactly one variant applies, so "removed", "blocked" and "skipped" can never
/// be set together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The address holds no permission on the file.
    NoMatch,
    /// The address's permission was deleted.
    Removed { role: Role },
    /// A matching permission exists but the backend refused to delete it.
    FoundButBlocked { role: Role, message: String },
    /// The file's permissions could not be listed.
    Skipped { reason: String },
    /// Any other failure while listing or deleting.
    Failed {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
    },
}

impl Outcome {
    #[must_use]
    pub const fn removed(&self) -> bool {
        matches!(self, Self::Removed { .. })
    }

    #[must_use]
    pub const fn found_but_blocked(&self) -> bool {
        matches!(self, Self::FoundButBlocked { .. })
    }

    #[must_use]
    pub const fn skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// Error text for failures; `None` for every other outcome.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Role observed on the matching permission, when one was found.
    #[must_use]
    pub const fn matched_role(&self) -> Option<Role> {
        match self {
            Self::Removed { role } | Self::FoundButBlocked { role, .. } => Some(*role),
            Self::Failed { role, .. } => *role,
            Self::NoMatch | Self::Skipped { .. } => None,
        }
    }

    /// Short status label for logs and tables.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NoMatch => "no_match",
            Self::Removed { .. } => "removed",
            Self::FoundButBlocked { .. } => "blocked",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

/// An [`Outcome`] with the file and address it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub address: String,
    pub file: FileRef,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub recorded_at: String,
}

impl OutcomeRecord {
    #[must_use]
    pub fn new(address: &str, file: FileRef, outcome: Outcome) -> Self {
        Self {
            address: address.to_string(),
            file,
            outcome,
            recorded_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }
    }
}
