//! Permission mutator: find a principal's grant on one file and delete it.
//!
//! One listing (all pages) and at most one delete call per file. No retries;
//! a file that fails here is revisited only if a later run searches again.

#![allow(missing_docs)]

use std::sync::Arc;

use crate::backend::{BackendError, BackendResult, FileRef, PermissionEntry, StorageBackend};
use crate::scanner::outcome::Outcome;

pub struct PermissionMutator {
    backend: Arc<dyn StorageBackend>,
}

impl PermissionMutator {
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Look up `address`'s permission on `file` without changing anything.
    pub fn find_match(&self, file: &FileRef, address: &str) -> BackendResult<Option<PermissionEntry>> {
        let permissions = self.backend.list_permissions(&file.id)?;
        Ok(permissions.into_iter().find(|p| p.matches(address)))
    }

    /// Revoke `address`'s access to `file` and classify what happened.
    pub fn process_file(&self, file: &FileRef, address: &str) -> Outcome {
        let entry = match self.find_match(file, address) {
            Ok(Some(entry)) => entry,
            Ok(None) => return Outcome::NoMatch,
            Err(err) if err.is_access_denied() => {
                return Outcome::Skipped {
                    reason: format!("cannot read permissions: {err}"),
                };
            }
            Err(err) => {
                return Outcome::Failed {
                    message: format!("listing permissions failed: {err}"),
                    role: None,
                };
            }
        };

        let role = entry.role;
        match self.backend.delete_permission(&file.id, &entry.id) {
            Ok(()) => Outcome::Removed { role },
            Err(BackendError::Forbidden { details }) => Outcome::FoundButBlocked {
                role,
                message: details,
            },
            Err(err) => Outcome::Failed {
                message: format!("deleting permission failed: {err}"),
                role: Some(role),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Role;
    use crate::backend::memory::MemoryBackend;

    fn file(id: &str) -> FileRef {
        FileRef::new(id, id, "application/pdf", None)
    }

    fn mutator(backend: MemoryBackend) -> (PermissionMutator, Arc<MemoryBackend>) {
        let backend = Arc::new(backend);
        (PermissionMutator::new(backend.clone()), backend)
    }

    #[test]
    fn absent_address_is_no_match() {
        let (m, backend) = mutator(
            MemoryBackend::new("me@x.com").with_file(file("f1"), &[("b@x.com", Role::Reader)]),
        );
        assert_eq!(m.process_file(&file("f1"), "a@x.com"), Outcome::NoMatch);
        assert_eq!(backend.calls().delete, 0);
    }

    #[test]
    fn match_is_removed_with_role() {
        let (m, backend) = mutator(
            MemoryBackend::new("me@x.com").with_file(file("f1"), &[("a@x.com", Role::Writer)]),
        );
        assert_eq!(
            m.process_file(&file("f1"), "a@x.com"),
            Outcome::Removed { role: Role::Writer }
        );
        assert_eq!(backend.calls().delete, 1);
        assert_eq!(backend.shared_count("a@x.com"), 0);
    }

    #[test]
    fn case_difference_is_not_a_match() {
        let (m, _) = mutator(
            MemoryBackend::new("me@x.com").with_file(file("f1"), &[("A@x.com", Role::Reader)]),
        );
        assert_eq!(m.process_file(&file("f1"), "a@x.com"), Outcome::NoMatch);
    }

    #[test]
    fn forbidden_delete_is_blocked_with_role() {
        let (m, backend) = mutator(
            MemoryBackend::new("me@x.com")
                .with_file(file("f1"), &[("a@x.com", Role::Owner)])
                .block_deletion("f1", "a@x.com"),
        );
        let outcome = m.process_file(&file("f1"), "a@x.com");
        assert!(outcome.found_but_blocked());
        assert_eq!(outcome.matched_role(), Some(Role::Owner));
        assert_eq!(backend.calls().delete, 1);
    }

    #[test]
    fn denied_listing_is_skipped() {
        let (m, backend) = mutator(
            MemoryBackend::new("me@x.com")
                .with_file(file("f1"), &[("a@x.com", Role::Reader)])
                .deny_listing("f1"),
        );
        assert!(m.process_file(&file("f1"), "a@x.com").skipped());
        assert_eq!(backend.calls().delete, 0);
    }

    #[test]
    fn vanished_file_is_skipped() {
        let (m, _) = mutator(MemoryBackend::new("me@x.com"));
        assert!(m.process_file(&file("gone"), "a@x.com").skipped());
    }

    #[test]
    fn other_delete_error_is_failed_with_role() {
        let (m, backend) = mutator(
            MemoryBackend::new("me@x.com")
                .with_file(file("f1"), &[("a@x.com", Role::Commenter)])
                .fail_deletion_with(
                    "f1",
                    "a@x.com",
                    BackendError::Http {
                        status: 500,
                        details: "backend error".to_string(),
                    },
                ),
        );
        let outcome = m.process_file(&file("f1"), "a@x.com");
        assert!(outcome.error().is_some_and(|e| e.contains("500")));
        assert_eq!(outcome.matched_role(), Some(Role::Commenter));
        assert_eq!(backend.calls().delete, 1);
    }

    #[test]
    fn find_match_does_not_mutate() {
        let (m, backend) = mutator(
            MemoryBackend::new("me@x.com").with_file(file("f1"), &[("a@x.com", Role::Reader)]),
        );
        let found = m.find_match(&file("f1"), "a@x.com").unwrap();
        assert_eq!(found.map(|p| p.role), Some(Role::Reader));
        assert_eq!(backend.calls().delete, 0);
        assert_eq!(backend.shared_count("a@x.com"), 1);
    }
}
