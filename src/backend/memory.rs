//! In-process storage backend for tests and offline dry runs.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;

use crate::backend::{
    BackendError, BackendResult, FilePage, FileRef, PermissionEntry, PrincipalKind, Role,
    StorageBackend,
};
use crate::scanner::query::SearchQuery;

#[derive(Debug, Clone)]
struct StoredFile {
    file: FileRef,
    permissions: Vec<PermissionEntry>,
}

#[derive(Debug, Default)]
struct Inner {
    files: BTreeMap<String, StoredFile>,
    deny_listing: HashSet<String>,
    block_deletion: HashSet<(String, String)>,
    search_failure: Option<BackendError>,
    delete_failures: HashMap<(String, String), BackendError>,
    calls: CallCounts,
    next_permission: u64,
}

/// Per-operation call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub search: usize,
    pub list: usize,
    pub delete: usize,
}

/// Fake file store with deterministic keyset pagination.
///
/// Search matches any file holding a permission whose address equals the
/// query's address exactly. Page tokens are the id of the last file returned,
/// so files removed from the result set mid-scan do not shift later pages.
pub struct MemoryBackend {
    acting: String,
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new(acting: impl Into<String>) -> Self {
        Self {
            acting: acting.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Add a file shared with each `(address, role)` pair.
    #[must_use]
    pub fn with_file(self, file: FileRef, grants: &[(&str, Role)]) -> Self {
        self.add_file(file, grants);
        self
    }

    /// Add a file after construction.
    pub fn add_file(&self, file: FileRef, grants: &[(&str, Role)]) {
        let mut inner = self.inner.lock();
        let mut permissions = Vec::with_capacity(grants.len() + 1);
        permissions.push(PermissionEntry {
            id: "owner".to_string(),
            email_address: Some(self.acting.clone()),
            role: Role::Owner,
            kind: PrincipalKind::User,
        });
        for (address, role) in grants {
            inner.next_permission += 1;
            permissions.push(PermissionEntry {
                id: format!("perm-{}", inner.next_permission),
                email_address: Some((*address).to_string()),
                role: *role,
                kind: PrincipalKind::User,
            });
        }
        inner
            .files
            .insert(file.id.clone(), StoredFile { file, permissions });
    }

    /// Permission listing on `file_id` returns `Forbidden`.
    #[must_use]
    pub fn deny_listing(self, file_id: &str) -> Self {
        self.inner.lock().deny_listing.insert(file_id.to_string());
        self
    }

    /// Deleting `address`'s permission on `file_id` returns `Forbidden`.
    #[must_use]
    pub fn block_deletion(self, file_id: &str, address: &str) -> Self {
        self.inner
            .lock()
            .block_deletion
            .insert((file_id.to_string(), address.to_string()));
        self
    }

    /// Deleting `address`'s permission on `file_id` fails with `error`.
    #[must_use]
    pub fn fail_deletion_with(self, file_id: &str, address: &str, error: BackendError) -> Self {
        self.inner
            .lock()
            .delete_failures
            .insert((file_id.to_string(), address.to_string()), error);
        self
    }

    /// Every search call fails with `error` until cleared.
    pub fn fail_search_with(&self, error: Option<BackendError>) {
        self.inner.lock().search_failure = error;
    }

    #[must_use]
    pub fn calls(&self) -> CallCounts {
        self.inner.lock().calls
    }

    /// Addresses still holding a permission on `file_id`.
    #[must_use]
    pub fn principals(&self, file_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .files
            .get(file_id)
            .map(|f| {
                f.permissions
                    .iter()
                    .filter_map(|p| p.email_address.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of files still shared with `address`.
    #[must_use]
    pub fn shared_count(&self, address: &str) -> usize {
        self.inner
            .lock()
            .files
            .values()
            .filter(|f| f.permissions.iter().any(|p| p.matches(address)))
            .count()
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn acting_address(&self) -> BackendResult<String> {
        Ok(self.acting.clone())
    }

    fn search_files(
        &self,
        query: &SearchQuery,
        page_size: usize,
        page_token: Option<&str>,
    ) -> BackendResult<FilePage> {
        let mut inner = self.inner.lock();
        inner.calls.search += 1;
        if let Some(err) = &inner.search_failure {
            return Err(err.clone());
        }

        let address = query.address();
        let lower = page_token.map_or(std::ops::Bound::Unbounded, |t| {
            std::ops::Bound::Excluded(t.to_string())
        });
        let mut matching = inner
            .files
            .range((lower, std::ops::Bound::Unbounded))
            .filter(|(_, f)| f.permissions.iter().any(|p| p.matches(address)))
            .map(|(_, f)| f.file.clone());

        let files: Vec<FileRef> = matching.by_ref().take(page_size).collect();
        let has_more = matching.next().is_some();
        let next_page_token = if has_more {
            files.last().map(|f| f.id.clone())
        } else {
            None
        };
        Ok(FilePage {
            files,
            next_page_token,
        })
    }

    fn list_permissions(&self, file_id: &str) -> BackendResult<Vec<PermissionEntry>> {
        let mut inner = self.inner.lock();
        inner.calls.list += 1;
        if inner.deny_listing.contains(file_id) {
            return Err(BackendError::Forbidden {
                details: format!("cannot list permissions on {file_id}"),
            });
        }
        inner
            .files
            .get(file_id)
            .map(|f| f.permissions.clone())
            .ok_or_else(|| BackendError::NotFound {
                resource: file_id.to_string(),
            })
    }

    fn delete_permission(&self, file_id: &str, permission_id: &str) -> BackendResult<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.calls.delete += 1;
        let stored = inner
            .files
            .get_mut(file_id)
            .ok_or_else(|| BackendError::NotFound {
                resource: file_id.to_string(),
            })?;
        let index = stored
            .permissions
            .iter()
            .position(|p| p.id == permission_id)
            .ok_or_else(|| BackendError::NotFound {
                resource: format!("{file_id}/{permission_id}"),
            })?;
        let address = stored.permissions[index]
            .email_address
            .clone()
            .unwrap_or_default();
        let key = (file_id.to_string(), address);
        if inner.block_deletion.contains(&key) {
            return Err(BackendError::Forbidden {
                details: "the acting account cannot change sharing on this file".to_string(),
            });
        }
        if let Some(err) = inner.delete_failures.get(&key) {
            return Err(err.clone());
        }
        stored.permissions.remove(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::TargetAddress;

    fn file(id: &str) -> FileRef {
        FileRef::new(id, format!("file {id}"), "text/plain", None)
    }

    fn query(addr: &str) -> SearchQuery {
        SearchQuery::shared_with(&TargetAddress::parse(addr).unwrap())
    }

    #[test]
    fn search_filters_by_exact_address() {
        let backend = MemoryBackend::new("me@x.com")
            .with_file(file("f1"), &[("a@x.com", Role::Reader)])
            .with_file(file("f2"), &[("A@x.com", Role::Reader)])
            .with_file(file("f3"), &[("b@x.com", Role::Writer)]);

        let page = backend.search_files(&query("a@x.com"), 10, None).unwrap();
        let ids: Vec<&str> = page.files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["f1"]);
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn keyset_pagination_walks_all_pages() {
        let backend = MemoryBackend::new("me@x.com");
        for i in 0..7 {
            backend.add_file(file(&format!("f{i:02}")), &[("a@x.com", Role::Reader)]);
        }

        let q = query("a@x.com");
        let p1 = backend.search_files(&q, 3, None).unwrap();
        assert_eq!(p1.files.len(), 3);
        let p2 = backend
            .search_files(&q, 3, p1.next_page_token.as_deref())
            .unwrap();
        assert_eq!(p2.files.len(), 3);
        let p3 = backend
            .search_files(&q, 3, p2.next_page_token.as_deref())
            .unwrap();
        assert_eq!(p3.files.len(), 1);
        assert!(p3.next_page_token.is_none());
        assert_eq!(backend.calls().search, 3);
    }

    #[test]
    fn exact_page_boundary_has_no_trailing_token() {
        let backend = MemoryBackend::new("me@x.com");
        for i in 0..3 {
            backend.add_file(file(&format!("f{i}")), &[("a@x.com", Role::Reader)]);
        }
        let page = backend.search_files(&query("a@x.com"), 3, None).unwrap();
        assert_eq!(page.files.len(), 3);
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn delete_removes_permission() {
        let backend = MemoryBackend::new("me@x.com").with_file(file("f1"), &[("a@x.com", Role::Writer)]);
        let perms = backend.list_permissions("f1").unwrap();
        let target = perms.iter().find(|p| p.matches("a@x.com")).unwrap();
        backend.delete_permission("f1", &target.id).unwrap();
        assert_eq!(backend.principals("f1"), vec!["me@x.com"]);
        assert_eq!(backend.shared_count("a@x.com"), 0);
    }

    #[test]
    fn blocked_deletion_is_forbidden_and_keeps_permission() {
        let backend = MemoryBackend::new("me@x.com")
            .with_file(file("f1"), &[("a@x.com", Role::Writer)])
            .block_deletion("f1", "a@x.com");
        let perms = backend.list_permissions("f1").unwrap();
        let target = perms.iter().find(|p| p.matches("a@x.com")).unwrap();
        let err = backend.delete_permission("f1", &target.id).unwrap_err();
        assert!(matches!(err, BackendError::Forbidden { .. }));
        assert_eq!(backend.shared_count("a@x.com"), 1);
    }

    #[test]
    fn denied_listing_and_search_failure() {
        let backend = MemoryBackend::new("me@x.com")
            .with_file(file("f1"), &[("a@x.com", Role::Reader)])
            .deny_listing("f1");
        assert!(matches!(
            backend.list_permissions("f1"),
            Err(BackendError::Forbidden { .. })
        ));
        assert!(matches!(
            backend.list_permissions("missing"),
            Err(BackendError::NotFound { .. })
        ));

        backend.fail_search_with(Some(BackendError::Unauthenticated {
            details: "expired".to_string(),
        }));
        assert!(backend.search_files(&query("a@x.com"), 5, None).is_err());
        backend.fail_search_with(None);
        assert!(backend.search_files(&query("a@x.com"), 5, None).is_ok());
    }
}
