//! Drive v3 REST backend over a blocking `reqwest` client.

#![allow(missing_docs)]

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::backend::{
    BackendError, BackendResult, FilePage, FileRef, PermissionEntry, PrincipalKind, Role,
    StorageBackend,
};
use crate::core::config::{BackendConfig, Config};
use crate::core::errors::{Result, ShrError};
use crate::scanner::query::SearchQuery;

const FILE_FIELDS: &str = "nextPageToken,files(id,name,mimeType,webViewLink)";
const PERMISSION_FIELDS: &str = "nextPageToken,permissions(id,emailAddress,role,type)";
const PERMISSION_PAGE_SIZE: &str = "100";

// ──────────────────── wire format ────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFileList {
    #[serde(default)]
    files: Vec<WireFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
    web_view_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePermissionList {
    #[serde(default)]
    permissions: Vec<WirePermission>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePermission {
    id: String,
    email_address: Option<String>,
    role: Role,
    #[serde(rename = "type")]
    kind: PrincipalKind,
}

#[derive(Debug, Deserialize)]
struct WireAbout {
    user: WireUser,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUser {
    email_address: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireErrorEnvelope {
    error: Option<WireErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct WireErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<WireErrorItem>,
}

#[derive(Debug, Default, Deserialize)]
struct WireErrorItem {
    #[serde(default)]
    reason: String,
}

impl From<WireFile> for FileRef {
    fn from(w: WireFile) -> Self {
        Self::new(w.id, w.name, w.mime_type, w.web_view_link)
    }
}

impl From<WirePermission> for PermissionEntry {
    fn from(w: WirePermission) -> Self {
        Self {
            id: w.id,
            email_address: w.email_address,
            role: w.role,
            kind: w.kind,
        }
    }
}

/// Map a non-success HTTP status and body to a [`BackendError`].
///
/// 403 is ambiguous in this API: quota exhaustion is reported as 403 with a
/// `rateLimitExceeded`/`userRateLimitExceeded` reason and is not an access denial.
#[must_use]
pub fn classify_status(status: u16, body: &str) -> BackendError {
    let envelope: WireErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let (message, reasons) = envelope.error.map_or_else(
        || (body.trim().to_string(), Vec::new()),
        |e| {
            let reasons: Vec<String> = e.errors.into_iter().map(|i| i.reason).collect();
            (e.message, reasons)
        },
    );
    let details = if message.is_empty() {
        format!("status {status}")
    } else {
        message
    };
    let rate_limited = reasons
        .iter()
        .any(|r| r == "rateLimitExceeded" || r == "userRateLimitExceeded");

    match status {
        401 => BackendError::Unauthenticated { details },
        403 if rate_limited => BackendError::RateLimited { details },
        403 => BackendError::Forbidden { details },
        404 => BackendError::NotFound { resource: details },
        429 => BackendError::RateLimited { details },
        _ => BackendError::Http { status, details },
    }
}

// ──────────────────── backend ────────────────────

/// Drive v3 client authenticated with a bearer token.
pub struct DriveBackend {
    client: Client,
    api_base: Url,
    token: String,
    include_shared_drives: bool,
}

impl DriveBackend {
    /// Build a client from backend settings and an already-resolved token.
    pub fn new(config: &BackendConfig, token: String) -> Result<Self> {
        let api_base = Url::parse(&config.api_base).map_err(|e| ShrError::InvalidConfig {
            details: format!("backend.api_base {:?}: {e}", config.api_base),
        })?;
        if api_base.cannot_be_a_base() {
            return Err(ShrError::InvalidConfig {
                details: format!("backend.api_base {:?} cannot be a base URL", config.api_base),
            });
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("shrev/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ShrError::Runtime {
                details: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            api_base,
            token,
            include_shared_drives: config.include_shared_drives,
        })
    }

    /// Build a client from the full configuration, resolving the token.
    pub fn from_config(config: &Config) -> Result<Self> {
        let token = config.backend.resolve_access_token()?;
        Self::new(&config.backend, token)
    }

    /// Join path segments onto the API base, percent-encoding each.
    fn endpoint(&self, segments: &[&str]) -> BackendResult<Url> {
        let mut url = self.api_base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| BackendError::Transport {
                details: format!("api base {} cannot carry a path", self.api_base),
            })?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn drive_scope_params(&self) -> Vec<(&'static str, String)> {
        if self.include_shared_drives {
            vec![("supportsAllDrives", "true".to_string())]
        } else {
            Vec::new()
        }
    }

    fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .map_err(|e| BackendError::Transport {
                details: e.to_string(),
            })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(classify_status(status.as_u16(), &body))
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        params: &[(&'static str, String)],
    ) -> BackendResult<T> {
        let response = self.send(self.client.get(url).query(params))?;
        response.json::<T>().map_err(|e| BackendError::Decode {
            details: e.to_string(),
        })
    }
}

impl StorageBackend for DriveBackend {
    fn name(&self) -> &'static str {
        "drive"
    }

    fn acting_address(&self) -> BackendResult<String> {
        let url = self.endpoint(&["about"])?;
        let about: WireAbout = self.get_json(url, &[("fields", "user(emailAddress)".to_string())])?;
        Ok(about.user.email_address)
    }

    fn search_files(
        &self,
        query: &SearchQuery,
        page_size: usize,
        page_token: Option<&str>,
    ) -> BackendResult<FilePage> {
        let url = self.endpoint(&["files"])?;
        let mut params = vec![
            ("q", query.render()),
            ("pageSize", page_size.to_string()),
            ("fields", FILE_FIELDS.to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        if self.include_shared_drives {
            params.push(("supportsAllDrives", "true".to_string()));
            params.push(("includeItemsFromAllDrives", "true".to_string()));
        }

        let list: WireFileList = self.get_json(url, &params)?;
        Ok(FilePage {
            files: list.files.into_iter().map(FileRef::from).collect(),
            next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    fn list_permissions(&self, file_id: &str) -> BackendResult<Vec<PermissionEntry>> {
        let url = self.endpoint(&["files", file_id, "permissions"])?;
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("fields", PERMISSION_FIELDS.to_string()),
                ("pageSize", PERMISSION_PAGE_SIZE.to_string()),
            ];
            params.extend(self.drive_scope_params());
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }
            let page: WirePermissionList = self.get_json(url.clone(), &params)?;
            entries.extend(page.permissions.into_iter().map(PermissionEntry::from));
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(entries)
    }

    fn delete_permission(&self, file_id: &str, permission_id: &str) -> BackendResult<()> {
        let url = self.endpoint(&["files", file_id, "permissions", permission_id])?;
        let params = self.drive_scope_params();
        self.send(self.client.delete(url).query(&params))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(api_base: &str) -> DriveBackend {
        let config = BackendConfig {
            api_base: api_base.to_string(),
            ..BackendConfig::default()
        };
        DriveBackend::new(&config, "token".to_string()).unwrap()
    }

    #[test]
    fn classify_unauthenticated() {
        let err = classify_status(401, r#"{"error":{"code":401,"message":"Invalid Credentials"}}"#);
        assert_eq!(
            err,
            BackendError::Unauthenticated {
                details: "Invalid Credentials".to_string()
            }
        );
    }

    #[test]
    fn classify_rate_limited_403() {
        let body = r#"{"error":{"code":403,"message":"User Rate Limit Exceeded",
            "errors":[{"domain":"usageLimits","reason":"userRateLimitExceeded"}]}}"#;
        assert!(matches!(
            classify_status(403, body),
            BackendError::RateLimited { .. }
        ));
    }

    #[test]
    fn classify_plain_403_is_forbidden() {
        let body = r#"{"error":{"code":403,"message":"The user does not have sufficient permissions for this file.",
            "errors":[{"reason":"insufficientFilePermissions"}]}}"#;
        let err = classify_status(403, body);
        assert!(matches!(err, BackendError::Forbidden { ref details } if details.contains("sufficient")));
    }

    #[test]
    fn classify_429_and_404_and_500() {
        assert!(matches!(classify_status(429, ""), BackendError::RateLimited { .. }));
        assert!(matches!(classify_status(404, "File not found"), BackendError::NotFound { .. }));
        let err = classify_status(500, "oops");
        assert_eq!(
            err,
            BackendError::Http {
                status: 500,
                details: "oops".to_string()
            }
        );
    }

    #[test]
    fn classify_empty_body_reports_status() {
        let err = classify_status(502, "");
        assert!(err.to_string().contains("status 502"));
    }

    #[test]
    fn endpoint_joins_and_escapes_segments() {
        let b = backend("https://www.googleapis.com/drive/v3");
        let url = b.endpoint(&["files", "a/b c", "permissions"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.googleapis.com/drive/v3/files/a%2Fb%20c/permissions"
        );
    }

    #[test]
    fn endpoint_tolerates_trailing_slash_base() {
        let b = backend("http://127.0.0.1:9/drive/v3/");
        let url = b.endpoint(&["about"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9/drive/v3/about");
    }

    #[test]
    fn invalid_api_base_rejected() {
        let config = BackendConfig {
            api_base: "not a url".to_string(),
            ..BackendConfig::default()
        };
        let err = DriveBackend::new(&config, String::new()).err().unwrap();
        assert_eq!(err.code(), "SHR-1001");
    }

    #[test]
    fn wire_file_list_decodes() {
        let raw = r#"{"nextPageToken":"t2","files":[
            {"id":"f1","name":"Plan","mimeType":"application/vnd.google-apps.document","webViewLink":"https://docs/f1"},
            {"id":"f2","name":"Scan","mimeType":"application/pdf"}]}"#;
        let list: WireFileList = serde_json::from_str(raw).unwrap();
        let files: Vec<FileRef> = list.files.into_iter().map(FileRef::from).collect();
        assert_eq!(list.next_page_token.as_deref(), Some("t2"));
        assert_eq!(files[0].link, "https://docs/f1");
        assert_eq!(files[1].link, "https://drive.google.com/open?id=f2");
    }

    #[test]
    fn wire_permissions_decode() {
        let raw = r#"{"permissions":[
            {"id":"p1","type":"user","emailAddress":"a@x.com","role":"writer"},
            {"id":"anyoneWithLink","type":"anyone","role":"reader"},
            {"id":"p3","type":"domain","role":"commenter"}]}"#;
        let list: WirePermissionList = serde_json::from_str(raw).unwrap();
        let perms: Vec<PermissionEntry> =
            list.permissions.into_iter().map(PermissionEntry::from).collect();
        assert_eq!(perms.len(), 3);
        assert_eq!(perms[0].role, Role::Writer);
        assert_eq!(perms[1].kind, PrincipalKind::Anyone);
        assert!(perms[1].email_address.is_none());
        assert!(list.next_page_token.is_none());
    }

    #[test]
    fn unreachable_server_is_transport_error() {
        let b = backend("http://127.0.0.1:9/drive/v3");
        let err = b.list_permissions("f1").unwrap_err();
        assert!(matches!(err, BackendError::Transport { .. }));
    }
}
