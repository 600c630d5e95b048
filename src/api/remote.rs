//! Purpose: Blocking HTTP client for Eve-style REST APIs.
//! Exports: `RemoteClient`.
//! Role: Production `Transport`: JSON in, JSON out, bearer auth, per-call timeouts.
//! Invariants: The base URL may carry a path prefix (`/api/v1`); resource paths join below it.
//! Invariants: HTTP error statuses are responses, not errors; only transport failures are `Err`.
#![allow(clippy::result_large_err)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;
use url::Url;

use super::transport::{ApiResult, RemoteResponse, Transport};
use crate::core::error::{Error, ErrorKind};

#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<RemoteClientInner>,
}

struct RemoteClientInner {
    base_url: Url,
    token: Option<String>,
    agent: ureq::Agent,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("token", &self.inner.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let agent = ureq::AgentBuilder::new().build();
        Ok(Self {
            inner: Arc::new(RemoteClientInner {
                base_url,
                token: None,
                agent,
            }),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.token = Some(token.into());
        } else {
            self.inner = Arc::new(RemoteClientInner {
                base_url: self.inner.base_url.clone(),
                token: Some(token.into()),
                agent: self.inner.agent.clone(),
            });
        }
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn url_for(&self, path: &str) -> ApiResult<Url> {
        build_url(&self.inner.base_url, path)
    }

    fn request(&self, method: &str, url: &Url, timeout: Duration) -> ureq::Request {
        let mut request = self
            .inner
            .agent
            .request(method, url.as_str())
            .timeout(timeout)
            .set("Accept", "application/json");
        if let Some(token) = &self.inner.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        request
    }

    fn send(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
        etag: Option<&str>,
        timeout: Duration,
    ) -> ApiResult<RemoteResponse> {
        let url = self.url_for(path)?;
        debug!(method, url = url.as_str(), "sending request");
        let mut request = self.request(method, &url, timeout);
        if let Some(etag) = etag {
            request = request.set("If-Match", etag);
        }
        let response = match body {
            Some(body) => request
                .set("Content-Type", "application/json")
                .send_string(&body.to_string()),
            None => request.call(),
        };
        self.finish(response, path)
    }

    fn finish(
        &self,
        response: Result<ureq::Response, ureq::Error>,
        path: &str,
    ) -> ApiResult<RemoteResponse> {
        match response {
            Ok(resp) => read_response(resp, path),
            Err(ureq::Error::Status(_, resp)) => read_response(resp, path),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Connectivity)
                .with_message("request failed")
                .with_path(path)
                .with_source(err)),
        }
    }
}

impl Transport for RemoteClient {
    fn get(
        &self,
        path: &str,
        params: &[(String, String)],
        timeout: Duration,
    ) -> ApiResult<RemoteResponse> {
        let url = self.url_for(path)?;
        debug!(url = url.as_str(), ?params, "sending GET");
        let mut request = self.request("GET", &url, timeout);
        for (key, value) in params {
            request = request.query(key, value);
        }
        self.finish(request.call(), path)
    }

    fn post(&self, path: &str, body: &Value, timeout: Duration) -> ApiResult<RemoteResponse> {
        self.send("POST", path, Some(body), None, timeout)
    }

    fn put(
        &self,
        path: &str,
        body: &Value,
        etag: Option<&str>,
        timeout: Duration,
    ) -> ApiResult<RemoteResponse> {
        self.send("PUT", path, Some(body), etag, timeout)
    }

    fn patch(
        &self,
        path: &str,
        body: &Value,
        etag: Option<&str>,
        timeout: Duration,
    ) -> ApiResult<RemoteResponse> {
        self.send("PATCH", path, Some(body), etag, timeout)
    }

    fn delete(
        &self,
        path: &str,
        etag: Option<&str>,
        timeout: Duration,
    ) -> ApiResult<RemoteResponse> {
        self.send("DELETE", path, None, etag, timeout)
    }

    fn detached(&self) -> Arc<dyn Transport> {
        Arc::new(Self {
            inner: Arc::new(RemoteClientInner {
                base_url: self.inner.base_url.clone(),
                token: self.inner.token.clone(),
                agent: ureq::AgentBuilder::new().build(),
            }),
        })
    }

    fn describe(&self) -> String {
        self.inner.base_url.to_string()
    }
}

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid remote base url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("remote base url must use http or https scheme"));
    }
    if url.cannot_be_a_base() {
        return Err(Error::new(ErrorKind::Usage).with_message("remote base url cannot be a base"));
    }
    // Joining only keeps the prefix when the path ends with a slash.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(base_url: &Url, path: &str) -> ApiResult<Url> {
    let relative = path.trim_start_matches('/');
    if relative.split('/').any(|segment| segment == "..") {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("resource path must not escape the base url")
            .with_path(path));
    }
    base_url.join(relative).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid resource path")
            .with_path(path)
            .with_source(err)
    })
}

fn read_response(response: ureq::Response, path: &str) -> ApiResult<RemoteResponse> {
    let status = response.status();
    let etag = response
        .header("ETag")
        .map(|value| value.trim_matches('"').to_string());
    let text = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Connectivity)
            .with_message("failed to read response body")
            .with_path(path)
            .with_source(err)
    })?;
    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        match serde_json::from_str::<Value>(&text) {
            Ok(body) => body,
            Err(err) if (200..300).contains(&status) => {
                return Err(Error::new(ErrorKind::Remote)
                    .with_message("invalid response json")
                    .with_path(path)
                    .with_status(status)
                    .with_source(err));
            }
            // Proxies and web servers answer errors in HTML; keep the text.
            Err(_) => Value::String(text),
        }
    };
    Ok(RemoteResponse { status, body, etag })
}

#[cfg(test)]
mod tests {
    use super::{RemoteClient, build_url, normalize_base_url};
    use crate::api::transport::Transport;
    use crate::core::error::ErrorKind;

    #[test]
    fn normalize_base_url_keeps_prefix() {
        let url = normalize_base_url("http://localhost:5000/api/v1".to_string()).expect("url");
        assert_eq!(url.as_str(), "http://localhost:5000/api/v1/");
        let url = normalize_base_url("http://localhost:5000".to_string()).expect("url");
        assert_eq!(url.as_str(), "http://localhost:5000/");
    }

    #[test]
    fn normalize_base_url_rejects_other_schemes() {
        let err = normalize_base_url("ftp://localhost".to_string()).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(normalize_base_url("not a url".to_string()).is_err());
    }

    #[test]
    fn build_url_joins_below_prefix() {
        let base = normalize_base_url("http://localhost:5000/api/v1?x=1".to_string()).expect("url");
        let url = build_url(&base, "/people/5f8d0d55b54764421b7156c3").expect("url");
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/api/v1/people/5f8d0d55b54764421b7156c3"
        );
        assert!(build_url(&base, "../admin").is_err());
    }

    #[test]
    fn debug_output_redacts_token() {
        let client = RemoteClient::new("http://localhost:5000")
            .expect("client")
            .with_token("secret");
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("secret"));
        assert_eq!(client.detached().describe(), "http://localhost:5000/");
    }

    #[test]
    fn unreachable_server_is_a_connectivity_error() {
        let client = RemoteClient::new("http://127.0.0.1:9").expect("client");
        let err = client
            .get("people", &[], std::time::Duration::from_millis(500))
            .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }
}
