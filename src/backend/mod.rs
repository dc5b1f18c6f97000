//! Storage backend abstraction: file search, permission listing, permission removal.
//!
//! [`StorageBackend`] is the only seam between the scan/mutate pipeline and the
//! remote service. [`drive::DriveBackend`] talks to the Drive v3 REST API;
//! [`memory::MemoryBackend`] is an in-process fake used by tests and dry runs.

#![allow(missing_docs)]

pub mod drive;
pub mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scanner::query::SearchQuery;

/// Shared `Result` alias for backend calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Prefix for links synthesized when the backend omits one.
pub const OPEN_LINK_PREFIX: &str = "https://drive.google.com/open?id=";

/// Classified failure from the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("unauthenticated: {details}")]
    Unauthenticated { details: String },

    #[error("forbidden: {details}")]
    Forbidden { details: String },

    #[error("not found: {resource}")]
    NotFound { resource: String },

    #[error("rate limited: {details}")]
    RateLimited { details: String },

    #[error("HTTP {status}: {details}")]
    Http { status: u16, details: String },

    #[error("transport failure: {details}")]
    Transport { details: String },

    #[error("malformed response: {details}")]
    Decode { details: String },
}

impl BackendError {
    /// Whether a later attempt could plausibly succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transport { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Listing or mutation was refused for this principal/file.
    #[must_use]
    pub const fn is_access_denied(&self) -> bool {
        matches!(self, Self::Forbidden { .. } | Self::NotFound { .. })
    }
}

/// A file visible to the acting account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub link: String,
}

impl FileRef {
    /// Build a file reference, synthesizing the link when none is supplied.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        link: Option<String>,
    ) -> Self {
        let id = id.into();
        let link = link
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| format!("{OPEN_LINK_PREFIX}{id}"));
        Self {
            id,
            name: name.into(),
            mime_type: mime_type.into(),
            link,
        }
    }
}

/// Access level a permission grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Owner,
    Organizer,
    FileOrganizer,
    Writer,
    Commenter,
    Reader,
    #[serde(other)]
    Other,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Organizer => "organizer",
            Self::FileOrganizer => "fileOrganizer",
            Self::Writer => "writer",
            Self::Commenter => "commenter",
            Self::Reader => "reader",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of principal a permission is granted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    User,
    Group,
    Domain,
    Anyone,
    #[serde(other)]
    Other,
}

/// One access grant on a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub id: String,
    /// Absent for `domain` and `anyone` grants.
    pub email_address: Option<String>,
    pub role: Role,
    pub kind: PrincipalKind,
}

impl PermissionEntry {
    /// Exact, case-sensitive principal match.
    #[must_use]
    pub fn matches(&self, address: &str) -> bool {
        self.email_address.as_deref() == Some(address)
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilePage {
    pub files: Vec<FileRef>,
    pub next_page_token: Option<String>,
}

/// Remote file store operations used by the scanner.
pub trait StorageBackend: Send + Sync {
    /// Short backend identifier for logs.
    fn name(&self) -> &'static str;

    /// Address of the account the credentials act as.
    fn acting_address(&self) -> BackendResult<String>;

    /// One page of files matching `query`.
    fn search_files(
        &self,
        query: &SearchQuery,
        page_size: usize,
        page_token: Option<&str>,
    ) -> BackendResult<FilePage>;

    /// Every permission on a file (all pages).
    fn list_permissions(&self, file_id: &str) -> BackendResult<Vec<PermissionEntry>>;

    /// Remove one permission from a file.
    fn delete_permission(&self, file_id: &str, permission_id: &str) -> BackendResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_link_synthesized_when_missing() {
        let f = FileRef::new("abc", "Doc", "text/plain", None);
        assert_eq!(f.link, "https://drive.google.com/open?id=abc");

        let f = FileRef::new("abc", "Doc", "text/plain", Some(String::new()));
        assert_eq!(f.link, "https://drive.google.com/open?id=abc");

        let f = FileRef::new("abc", "Doc", "text/plain", Some("https://x/view".to_string()));
        assert_eq!(f.link, "https://x/view");
    }

    #[test]
    fn role_parses_wire_names() {
        let role: Role = serde_json::from_str("\"fileOrganizer\"").unwrap();
        assert_eq!(role, Role::FileOrganizer);
        let role: Role = serde_json::from_str("\"somethingNew\"").unwrap();
        assert_eq!(role, Role::Other);
        assert_eq!(Role::Writer.to_string(), "writer");
    }

    #[test]
    fn permission_match_is_case_sensitive() {
        let p = PermissionEntry {
            id: "p1".to_string(),
            email_address: Some("a@x.com".to_string()),
            role: Role::Reader,
            kind: PrincipalKind::User,
        };
        assert!(p.matches("a@x.com"));
        assert!(!p.matches("A@x.com"));

        let anyone = PermissionEntry {
            id: "anyoneWithLink".to_string(),
            email_address: None,
            role: Role::Reader,
            kind: PrincipalKind::Anyone,
        };
        assert!(!anyone.matches(""));
    }

    #[test]
    fn transient_classification() {
        assert!(BackendError::RateLimited { details: String::new() }.is_transient());
        assert!(
            BackendError::Http {
                status: 503,
                details: String::new()
            }
            .is_transient()
        );
        assert!(
            !BackendError::Http {
                status: 400,
                details: String::new()
            }
            .is_transient()
        );
        assert!(!BackendError::Forbidden { details: String::new() }.is_transient());
        assert!(BackendError::NotFound { resource: String::new() }.is_access_denied());
    }
}
