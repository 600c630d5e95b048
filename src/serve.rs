//! Purpose: Serve the settings' resources over HTTP from an in-process `MemoryStore`.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum front end for local development and integration tests of the client.
//! Invariants: Requests outside `URL_PREFIX`/`API_VERSION` answer 404; `/healthz` is always open.
//! Invariants: Bodies and status codes are the store's; the document version travels in `ETag`.
//! Notes: Data lives in memory only and is dropped on shutdown.

use axum::body::Bytes;
use axum::extract::{Path as AxumPath, RawQuery, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

use evedata::api::{Document, Error, ErrorKind, MemoryStore, RemoteResponse, ResourceDef};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub settings: Value,
    /// Initial documents keyed by resource URL.
    pub seed: Option<Map<String, Value>>,
    pub token: Option<String>,
}

struct AppState {
    store: MemoryStore,
    prefix: Vec<String>,
    token: Option<String>,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    let store = build_store(&config)?;
    let state = Arc::new(AppState {
        store,
        prefix: url_prefix(&config.settings)?,
        token: config.token,
    });
    info!(
        bind = %config.bind,
        prefix = state.prefix.join("/").as_str(),
        collections = state.store.collections().len(),
        "serving resources"
    );

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to bind server")
                .with_source(err)
        })?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Internal).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/*path", any(dispatch))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_store(config: &ServeConfig) -> Result<MemoryStore, Error> {
    let store = MemoryStore::new();
    for def in ResourceDef::all_from_settings(&config.settings)? {
        store.register(&def.url);
    }
    let Some(seed) = &config.seed else {
        return Ok(store);
    };
    for (url, docs) in seed {
        let url = url.trim_matches('/');
        if !store.collections().iter().any(|known| known == url) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("seed names a resource that is not in the settings")
                .with_path(url));
        }
        let docs = match docs {
            Value::Array(docs) => docs
                .iter()
                .map(|doc| doc.as_object().cloned())
                .collect::<Option<Vec<Document>>>(),
            _ => None,
        };
        let Some(docs) = docs else {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("seed entries must be arrays of JSON objects")
                .with_path(url));
        };
        store.seed(url, docs)?;
    }
    Ok(store)
}

/// `URL_PREFIX` then `API_VERSION`, as path segments.
fn url_prefix(settings: &Value) -> Result<Vec<String>, Error> {
    let mut segments = Vec::new();
    for key in ["URL_PREFIX", "API_VERSION"] {
        match settings.get(key) {
            Some(Value::String(raw)) => segments.extend(
                raw.split('/')
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_string),
            ),
            Some(Value::Null) | None => {}
            Some(_) => {
                return Err(Error::new(ErrorKind::Usage).with_message(format!("{key} must be a string")));
            }
        }
    }
    Ok(segments)
}

/// The resource path below the prefix, or None when the request is outside it.
fn strip_prefix<'a>(path: &'a str, prefix: &[String]) -> Option<&'a str> {
    let mut rest = path.trim_start_matches('/');
    for segment in prefix {
        rest = rest.strip_prefix(segment.as_str())?;
        if !(rest.is_empty() || rest.starts_with('/')) {
            return None;
        }
        rest = rest.trim_start_matches('/');
    }
    Some(rest)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

fn authorize(headers: &HeaderMap, state: &AppState) -> Result<(), Response> {
    let Some(token) = state.token.as_ref() else {
        return Ok(());
    };
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if value != format!("Bearer {token}") {
        return Err(error_response(StatusCode::UNAUTHORIZED, "missing or invalid bearer token"));
    }
    Ok(())
}

async fn healthz() -> Response {
    Json(json!({ "ok": true })).into_response()
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    method: Method,
    AxumPath(path): AxumPath<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = authorize(&headers, &state) {
        return response;
    }
    let Some(resource_path) = strip_prefix(&path, &state.prefix) else {
        return error_response(
            StatusCode::NOT_FOUND,
            "The requested URL was not found on the server.",
        );
    };
    let params: Vec<(String, String)> = query
        .as_deref()
        .map(|raw| url::form_urlencoded::parse(raw.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let body = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(value) => Some(value),
            Err(err) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    &format!("request body is not valid JSON: {err}"),
                );
            }
        }
    };
    let etag = headers
        .get(header::IF_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_matches('"').to_string());

    let response = state.store.handle(
        method.as_str(),
        resource_path,
        &params,
        body.as_ref(),
        etag.as_deref(),
    );
    store_response(response)
}

fn store_response(response: RemoteResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut out = if response.body.is_null() {
        status.into_response()
    } else {
        (status, Json(response.body)).into_response()
    };
    if let Some(etag) = response.etag {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{etag}\"")) {
            out.headers_mut().insert(header::ETAG, value);
        }
    }
    out
}

/// Eve's error envelope: `{"_status": "ERR", "_error": {"code", "message"}}`.
#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    #[serde(rename = "_status")]
    status: &'static str,
    #[serde(rename = "_error")]
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let body = ErrorEnvelope {
        status: "ERR",
        error: ErrorBody {
            code: status.as_u16(),
            message: message.to_string(),
        },
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::{ServeConfig, build_store, strip_prefix, url_prefix};
    use evedata::api::ErrorKind;
    use serde_json::json;

    fn config(seed: Option<serde_json::Value>) -> ServeConfig {
        ServeConfig {
            bind: "127.0.0.1:0".parse().expect("bind"),
            settings: json!({
                "URL_PREFIX": "api",
                "API_VERSION": "v1",
                "DOMAIN": {"people": {"schema": {"name": {"type": "string"}}}}
            }),
            seed: seed.and_then(|seed| seed.as_object().cloned()),
            token: None,
        }
    }

    #[test]
    fn prefix_is_matched_by_whole_segments() {
        let prefix = url_prefix(&config(None).settings).expect("prefix");
        assert_eq!(prefix, vec!["api", "v1"]);
        assert_eq!(strip_prefix("api/v1/people", &prefix), Some("people"));
        assert_eq!(strip_prefix("/api/v1/people/abc", &prefix), Some("people/abc"));
        assert_eq!(strip_prefix("api/v10/people", &prefix), None);
        assert_eq!(strip_prefix("people", &prefix), None);
        assert_eq!(strip_prefix("people", &[]), Some("people"));
    }

    #[test]
    fn seed_fills_registered_collections() {
        let store = build_store(&config(Some(json!({"people": [{"name": "ada"}, {"name": "bob"}]}))))
            .expect("store");
        assert_eq!(store.len("people"), 2);

        let err = build_store(&config(Some(json!({"animals": []})))).expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = build_store(&config(Some(json!({"people": [1]})))).expect_err("not docs");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn non_string_prefix_is_rejected() {
        let err = url_prefix(&json!({"API_VERSION": 1})).expect_err("number");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
