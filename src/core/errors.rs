//! SHR-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::backend::BackendError;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, ShrError>;

/// Top-level error type for the share revoker.
#[derive(Debug, Error)]
pub enum ShrError {
    #[error("[SHR-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[SHR-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[SHR-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[SHR-1101] invalid target address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("[SHR-1102] target list includes the acting account {address}")]
    SelfTarget { address: String },

    #[error("[SHR-1103] target address listed more than once: {address}")]
    DuplicateTarget { address: String },

    #[error("[SHR-1104] no target addresses configured")]
    NoTargets,

    #[error("[SHR-2001] a run is already active (started {started_at})")]
    RunAlreadyActive { started_at: String },

    #[error("[SHR-2002] no active run")]
    NoActiveRun,

    #[error("[SHR-2003] another batch holds the run lock {path}")]
    LockHeld { path: PathBuf },

    #[error("[SHR-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[SHR-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[SHR-2103] corrupt run state key {key}: {details}")]
    CorruptState { key: &'static str, details: String },

    #[error("[SHR-3001] storage backend failure during {operation}: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("[SHR-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SHR-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[SHR-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl ShrError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "SHR-1001",
            Self::MissingConfig { .. } => "SHR-1002",
            Self::ConfigParse { .. } => "SHR-1003",
            Self::InvalidAddress { .. } => "SHR-1101",
            Self::SelfTarget { .. } => "SHR-1102",
            Self::DuplicateTarget { .. } => "SHR-1103",
            Self::NoTargets => "SHR-1104",
            Self::RunAlreadyActive { .. } => "SHR-2001",
            Self::NoActiveRun => "SHR-2002",
            Self::LockHeld { .. } => "SHR-2003",
            Self::Serialization { .. } => "SHR-2101",
            Self::Sql { .. } => "SHR-2102",
            Self::CorruptState { .. } => "SHR-2103",
            Self::Backend { .. } => "SHR-3001",
            Self::Io { .. } => "SHR-3002",
            Self::ChannelClosed { .. } => "SHR-3003",
            Self::Runtime { .. } => "SHR-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Backend { source, .. } => source.is_transient(),
            Self::Io { .. }
            | Self::ChannelClosed { .. }
            | Self::LockHeld { .. }
            | Self::Sql { .. }
            | Self::Runtime { .. } => true,
            _ => false,
        }
    }

    /// Whether this is a configuration error that prevents a run from starting.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::MissingConfig { .. }
                | Self::ConfigParse { .. }
                | Self::InvalidAddress { .. }
                | Self::SelfTarget { .. }
                | Self::DuplicateTarget { .. }
                | Self::NoTargets
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap a backend error with the operation that produced it.
    #[must_use]
    pub const fn backend(operation: &'static str, source: BackendError) -> Self {
        Self::Backend { operation, source }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for ShrError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for ShrError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for ShrError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<ShrError> {
        vec![
            ShrError::InvalidConfig {
                details: String::new(),
            },
            ShrError::MissingConfig {
                path: PathBuf::new(),
            },
            ShrError::ConfigParse {
                context: "",
                details: String::new(),
            },
            ShrError::InvalidAddress {
                address: String::new(),
                reason: String::new(),
            },
            ShrError::SelfTarget {
                address: String::new(),
            },
            ShrError::DuplicateTarget {
                address: String::new(),
            },
            ShrError::NoTargets,
            ShrError::RunAlreadyActive {
                started_at: String::new(),
            },
            ShrError::NoActiveRun,
            ShrError::LockHeld {
                path: PathBuf::new(),
            },
            ShrError::Serialization {
                context: "",
                details: String::new(),
            },
            ShrError::Sql {
                context: "",
                details: String::new(),
            },
            ShrError::CorruptState {
                key: "",
                details: String::new(),
            },
            ShrError::Backend {
                operation: "search",
                source: BackendError::NotFound {
                    resource: String::new(),
                },
            },
            ShrError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            ShrError::ChannelClosed { component: "" },
            ShrError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_variants();
        let codes: Vec<&str> = errors.iter().map(ShrError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn error_codes_have_shr_prefix() {
        for err in &all_variants() {
            assert!(
                err.code().starts_with("SHR-"),
                "code {} must start with SHR-",
                err.code()
            );
        }
    }

    #[test]
    fn error_display_includes_code() {
        let err = ShrError::InvalidConfig {
            details: "bad value".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("SHR-1001"), "display should contain code: {msg}");
        assert!(msg.contains("bad value"), "display should contain details: {msg}");
    }

    #[test]
    fn backend_retryability_follows_source() {
        let transient = ShrError::backend(
            "search",
            BackendError::RateLimited {
                details: "slow down".to_string(),
            },
        );
        assert!(transient.is_retryable());

        let denied = ShrError::backend(
            "delete",
            BackendError::Forbidden {
                details: "insufficient permissions".to_string(),
            },
        );
        assert!(!denied.is_retryable());
    }

    #[test]
    fn config_errors_are_classified() {
        assert!(ShrError::NoTargets.is_config_error());
        assert!(
            ShrError::SelfTarget {
                address: "me@x.com".to_string()
            }
            .is_config_error()
        );
        assert!(!ShrError::NoActiveRun.is_config_error());
    }

    #[test]
    fn io_convenience_constructor() {
        let err = ShrError::io(
            "/tmp/state.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "SHR-3002");
        assert!(err.to_string().contains("/tmp/state.json"));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn from_rusqlite_error() {
        let sql_err =
            rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(1), Some("test".to_string()));
        let err: ShrError = sql_err.into();
        assert_eq!(err.code(), "SHR-2102");
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: ShrError = json_err.into();
        assert_eq!(err.code(), "SHR-2101");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: ShrError = toml_err.into();
        assert_eq!(err.code(), "SHR-1003");
    }
}
