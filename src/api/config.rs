//! Purpose: Client configuration: where the API lives and how controllers page through it.
//! Exports: `ClientConfig`.
//! Role: One value threaded from the CLI (or library caller) into every controller.
//! Invariants: `items_per_page` and `workers` are at least 1 once built through the setters.
use std::time::Duration;

use serde_json::Value;
use url::Url;

use super::remote::RemoteClient;
use super::transport::ApiResult;
use crate::core::error::{Error, ErrorKind};
use crate::core::query::{DEFAULT_ITEMS_PER_PAGE, Timeouts};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeouts: Timeouts,
    pub items_per_page: u64,
    pub workers: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            timeouts: Timeouts::default(),
            items_per_page: DEFAULT_ITEMS_PER_PAGE,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Base URL for a server at `address` configured by an Eve settings document:
    /// `URL_PREFIX` and `API_VERSION` become path segments, in that order.
    pub fn from_app_settings(address: &str, settings: &Value) -> ApiResult<Self> {
        let mut url = Url::parse(address).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid server address")
                .with_source(err)
        })?;
        let mut segments: Vec<String> = url
            .path()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        for key in ["URL_PREFIX", "API_VERSION"] {
            match settings.get(key) {
                Some(Value::String(raw)) => segments.extend(
                    raw.split('/')
                        .filter(|segment| !segment.is_empty())
                        .map(str::to_string),
                ),
                Some(Value::Null) | None => {}
                Some(other) => {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message(format!("{key} must be a string, got {other}")));
                }
            }
        }
        url.set_path(&segments.join("/"));
        Ok(Self::new(url.as_str().trim_end_matches('/')))
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeouts(mut self, base: Duration, per_item: Duration) -> Self {
        self.timeouts = Timeouts { base, per_item };
        self
    }

    pub fn with_items_per_page(mut self, items_per_page: u64) -> ApiResult<Self> {
        if items_per_page == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("items per page must be at least 1"));
        }
        self.items_per_page = items_per_page;
        Ok(self)
    }

    pub fn with_workers(mut self, workers: usize) -> ApiResult<Self> {
        if workers == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("worker count must be at least 1"));
        }
        self.workers = workers;
        Ok(self)
    }

    pub fn remote_client(&self) -> ApiResult<RemoteClient> {
        let client = RemoteClient::new(self.base_url.clone())?;
        Ok(match &self.token {
            Some(token) => client.with_token(token.clone()),
            None => client,
        })
    }
}
