//! Purpose: The HTTP collaborator seam every controller, item and worker talks through.
//! Exports: `Transport`, `RemoteResponse`, `ApiResult`.
//! Role: Lets the same controller run against `RemoteClient` (ureq) or `MemoryStore`.
//! Invariants: `Err` means the request never produced a response (connectivity);
//! Invariants: any HTTP status, success or not, comes back as `Ok(RemoteResponse)`.
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::core::error::Error;
use crate::core::schema::{Document, FieldErrors};

pub type ApiResult<T> = Result<T, Error>;

#[derive(Clone, Debug, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: Value,
    pub etag: Option<String>,
}

impl RemoteResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            etag: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Documents under `_items`; empty when the body has none.
    pub fn items(&self) -> Vec<Document> {
        self.body
            .get("_items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|item| item.as_object().cloned()).collect())
            .unwrap_or_default()
    }

    pub fn total(&self) -> Option<u64> {
        self.body.pointer("/_meta/total").and_then(Value::as_u64)
    }

    /// The new version tag: `_etag` in the body wins over the `ETag` header.
    pub fn version(&self) -> Option<String> {
        self.body
            .get("_etag")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.etag.clone())
    }

    /// Human-readable reason for a failed response.
    pub fn error_message(&self) -> String {
        self.body
            .pointer("/_error/message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("remote status {}", self.status))
    }

    /// Eve's per-field `_issues`, normalised to lists of messages.
    pub fn issues(&self) -> FieldErrors {
        issues_from(&self.body)
    }
}

pub(crate) fn issues_from(body: &Value) -> FieldErrors {
    let mut out = FieldErrors::new();
    let Some(issues) = body.get("_issues").and_then(Value::as_object) else {
        return out;
    };
    for (field, issue) in issues {
        let messages = match issue {
            Value::String(message) => vec![message.clone()],
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(message) => message.clone(),
                    other => other.to_string(),
                })
                .collect(),
            other => vec![other.to_string()],
        };
        out.insert(field.clone(), messages);
    }
    out
}

/// Blocking HTTP operations against a base URL. Paths are relative to it.
pub trait Transport: Send + Sync {
    fn get(&self, path: &str, params: &[(String, String)], timeout: Duration)
    -> ApiResult<RemoteResponse>;

    fn post(&self, path: &str, body: &Value, timeout: Duration) -> ApiResult<RemoteResponse>;

    fn put(
        &self,
        path: &str,
        body: &Value,
        etag: Option<&str>,
        timeout: Duration,
    ) -> ApiResult<RemoteResponse>;

    fn patch(
        &self,
        path: &str,
        body: &Value,
        etag: Option<&str>,
        timeout: Duration,
    ) -> ApiResult<RemoteResponse>;

    fn delete(&self, path: &str, etag: Option<&str>, timeout: Duration)
    -> ApiResult<RemoteResponse>;

    /// An equivalent collaborator that shares no connection state with `self`.
    fn detached(&self) -> Arc<dyn Transport>;

    /// Where requests go, for logs and error messages.
    fn describe(&self) -> String;
}
