//! Purpose: In-process Eve-compatible collection store implementing `Transport`.
//! Exports: `MemoryStore`.
//! Role: Backs `evedata serve` and lets controllers be exercised without a network.
//! Invariants: Every stored document carries `_id`, `_etag`, `_created`, `_updated`.
//! Invariants: Writes to an existing document require a matching `If-Match` etag.
//! Invariants: Bulk inserts are atomic; one invalid document rejects the whole batch.
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::transport::{ApiResult, RemoteResponse, Transport};
use crate::core::coerce::format_datetime;
use crate::core::error::{Error, ErrorKind};
use crate::core::objectid;
use crate::core::query::{Direction, Projection, ProjectionMode, Sort};
use crate::core::schema::Document;

const DEFAULT_MAX_RESULTS: u64 = 25;

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    collections: BTreeMap<String, Vec<Document>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an (empty) collection at `url`. Registering twice keeps the data.
    pub fn register(&self, url: &str) {
        let key = url.trim_matches('/').to_string();
        self.lock().collections.entry(key).or_default();
    }

    pub fn collections(&self) -> Vec<String> {
        self.lock().collections.keys().cloned().collect()
    }

    pub fn len(&self, url: &str) -> usize {
        self.lock()
            .collections
            .get(url.trim_matches('/'))
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self, url: &str) -> bool {
        self.len(url) == 0
    }

    /// Seed documents without going through the request path.
    pub fn seed(&self, url: &str, docs: Vec<Document>) -> ApiResult<()> {
        let mut state = self.lock();
        let collection = state.collections.entry(url.trim_matches('/').to_string()).or_default();
        for doc in docs {
            collection.push(stamp(doc, None)?);
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Serve one request. This is what both `Transport` and the HTTP front end call.
    pub fn handle(
        &self,
        method: &str,
        path: &str,
        params: &[(String, String)],
        body: Option<&Value>,
        etag: Option<&str>,
    ) -> RemoteResponse {
        let path = path.trim_matches('/');
        let mut state = self.lock();
        let Some((collection, id)) = state.route(path) else {
            return error_response(404, "The requested URL was not found on the server.");
        };
        debug!(method, collection = collection.as_str(), id = ?id, "memory store request");
        let result = match (method, id) {
            ("GET", None) => state.list(&collection, params),
            ("GET", Some(id)) => state.fetch(&collection, &id),
            ("POST", None) => state.insert(&collection, body),
            ("PUT", Some(id)) => state.replace(&collection, &id, body, etag),
            ("PATCH", Some(id)) => state.update(&collection, &id, body, etag),
            ("DELETE", Some(id)) => state.remove(&collection, &id, etag),
            ("DELETE", None) => state.clear(&collection),
            _ => Ok(error_response(405, "The method is not allowed for the requested URL.")),
        };
        result.unwrap_or_else(|err| {
            warn!(error = %err, "memory store request failed");
            error_response(500, err.message().unwrap_or("internal error"))
        })
    }
}

impl StoreState {
    /// Split a path into a registered collection and an optional document id.
    fn route(&self, path: &str) -> Option<(String, Option<String>)> {
        if self.collections.contains_key(path) {
            return Some((path.to_string(), None));
        }
        let (collection, id) = path.rsplit_once('/')?;
        self.collections
            .contains_key(collection)
            .then(|| (collection.to_string(), Some(id.to_string())))
    }

    fn docs(&self, collection: &str) -> &[Document] {
        self.collections.get(collection).map_or(&[], Vec::as_slice)
    }

    fn position(&self, collection: &str, id: &str) -> Option<usize> {
        self.docs(collection)
            .iter()
            .position(|doc| doc.get("_id").and_then(Value::as_str) == Some(id))
    }

    fn list(&self, collection: &str, params: &[(String, String)]) -> ApiResult<RemoteResponse> {
        let param = |name: &str| {
            params
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };
        let filter = match param("where") {
            Some(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(filter)) => filter,
                _ => return Ok(error_response(400, "Unable to parse `where` clause")),
            },
            None => Map::new(),
        };
        let projection = match param("projection") {
            Some(raw) => {
                let parsed = serde_json::from_str::<Value>(raw).ok();
                match parsed.as_ref().map(Projection::from_value) {
                    Some(Ok(projection)) => projection,
                    _ => return Ok(error_response(400, "Unable to parse `projection` clause")),
                }
            }
            None => Projection::default(),
        };
        let sort = match param("sort").map(Sort::parse) {
            Some(Ok(sort)) => sort,
            Some(Err(_)) => return Ok(error_response(400, "Unable to parse `sort` clause")),
            None => Sort::default(),
        };
        let max_results = match param("max_results").map(str::parse::<u64>) {
            Some(Ok(0)) | Some(Err(_)) => {
                return Ok(error_response(400, "max_results must be a positive integer"));
            }
            Some(Ok(value)) => value,
            None => DEFAULT_MAX_RESULTS,
        };
        let page = match param("page").map(str::parse::<u64>) {
            Some(Ok(0)) | Some(Err(_)) => {
                return Ok(error_response(400, "page must be a positive integer"));
            }
            Some(Ok(value)) => value,
            None => 1,
        };

        let mut matched: Vec<&Document> = self
            .docs(collection)
            .iter()
            .filter(|doc| matches(doc, &filter))
            .collect();
        if !sort.is_empty() {
            matched.sort_by(|a, b| compare_docs(a, b, &sort));
        }
        let total = matched.len() as u64;
        let skip = usize::try_from((page - 1).saturating_mul(max_results)).unwrap_or(usize::MAX);
        let take = usize::try_from(max_results).unwrap_or(usize::MAX);
        let items: Vec<Value> = matched
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|doc| Value::Object(project(doc, &projection)))
            .collect();
        Ok(RemoteResponse::new(
            200,
            json!({
                "_items": items,
                "_meta": {"page": page, "max_results": max_results, "total": total},
                "_links": {"self": {"href": collection}},
            }),
        ))
    }

    fn fetch(&self, collection: &str, id: &str) -> ApiResult<RemoteResponse> {
        let Some(idx) = self.position(collection, id) else {
            return Ok(error_response(404, "The requested URL was not found on the server."));
        };
        let doc = self.docs(collection)[idx].clone();
        let etag = doc.get("_etag").and_then(Value::as_str).unwrap_or_default().to_string();
        Ok(RemoteResponse::new(200, Value::Object(doc)).with_etag(etag))
    }

    fn insert(&mut self, collection: &str, body: Option<&Value>) -> ApiResult<RemoteResponse> {
        let (docs, bulk) = match body {
            Some(Value::Array(items)) => (items.clone(), true),
            Some(doc @ Value::Object(_)) => (vec![doc.clone()], false),
            _ => return Ok(error_response(400, "Request body must be a document or a list")),
        };
        if docs.is_empty() {
            return Ok(error_response(400, "Empty bulk insert"));
        }

        let mut stamped = Vec::with_capacity(docs.len());
        let mut statuses = Vec::with_capacity(docs.len());
        let mut failed = false;
        for doc in docs {
            let Value::Object(doc) = doc else {
                failed = true;
                statuses.push(json!({"_status": "ERR", "_issues": {"_": "document must be an object"}}));
                continue;
            };
            let duplicate = doc
                .get("_id")
                .and_then(Value::as_str)
                .is_some_and(|id| {
                    self.position(collection, id).is_some()
                        || stamped.iter().any(|seen: &Document| {
                            seen.get("_id").and_then(Value::as_str) == Some(id)
                        })
                });
            if duplicate {
                failed = true;
                statuses.push(json!({"_status": "ERR", "_issues": {"_id": "value is not unique"}}));
                continue;
            }
            let doc = stamp(doc, None)?;
            statuses.push(json!({
                "_status": "OK",
                "_id": doc["_id"],
                "_etag": doc["_etag"],
                "_updated": doc["_updated"],
                "_created": doc["_created"],
            }));
            stamped.push(doc);
        }

        if failed {
            return Ok(RemoteResponse::new(
                422,
                json!({
                    "_status": "ERR",
                    "_error": {"code": 422, "message": "Insertion failure: 1 document(s) contain(s) error(s)"},
                    "_items": statuses,
                }),
            ));
        }
        self.collections
            .entry(collection.to_string())
            .or_default()
            .extend(stamped);
        let body = if bulk {
            json!({"_status": "OK", "_items": statuses})
        } else {
            statuses.into_iter().next().unwrap_or(Value::Null)
        };
        Ok(RemoteResponse::new(201, body))
    }

    /// Compare `If-Match` (or a `_etag` in the body) against the stored etag.
    fn check_etag(current: &Document, body: Option<&Value>, etag: Option<&str>) -> Option<RemoteResponse> {
        let supplied = etag.or_else(|| body.and_then(|b| b.get("_etag")).and_then(Value::as_str));
        let stored = current.get("_etag").and_then(Value::as_str);
        match supplied {
            None => Some(error_response(428, "To edit a document its etag must be provided using the If-Match header")),
            Some(tag) if Some(tag) != stored => Some(error_response(412, "Client and server etags don't match")),
            Some(_) => None,
        }
    }

    fn replace(
        &mut self,
        collection: &str,
        id: &str,
        body: Option<&Value>,
        etag: Option<&str>,
    ) -> ApiResult<RemoteResponse> {
        let Some(Value::Object(fields)) = body else {
            return Ok(error_response(400, "Request body must be a document"));
        };
        let mut doc = strip_meta(fields);
        doc.insert("_id".to_string(), Value::from(id));
        match self.position(collection, id) {
            // Upsert on PUT, as Eve does by default.
            None => {
                let stored = stamp(doc, None)?;
                let response = write_response(201, &stored);
                self.collections.entry(collection.to_string()).or_default().push(stored);
                Ok(response)
            }
            Some(idx) => {
                let current = &self.docs(collection)[idx];
                if let Some(rejection) = Self::check_etag(current, body, etag) {
                    return Ok(rejection);
                }
                let stored = stamp(doc, current.get("_created").cloned())?;
                let response = write_response(200, &stored);
                if let Some(docs) = self.collections.get_mut(collection) {
                    docs[idx] = stored;
                }
                Ok(response)
            }
        }
    }

    fn update(
        &mut self,
        collection: &str,
        id: &str,
        body: Option<&Value>,
        etag: Option<&str>,
    ) -> ApiResult<RemoteResponse> {
        let Some(Value::Object(fields)) = body else {
            return Ok(error_response(400, "Request body must be a document"));
        };
        let Some(idx) = self.position(collection, id) else {
            return Ok(error_response(404, "The requested URL was not found on the server."));
        };
        let current = &self.docs(collection)[idx];
        if let Some(rejection) = Self::check_etag(current, body, etag) {
            return Ok(rejection);
        }
        let mut merged = strip_meta(current);
        merged.insert("_id".to_string(), Value::from(id));
        for (key, value) in strip_meta(fields) {
            merged.insert(key, value);
        }
        let stored = stamp(merged, current.get("_created").cloned())?;
        let response = write_response(200, &stored);
        if let Some(docs) = self.collections.get_mut(collection) {
            docs[idx] = stored;
        }
        Ok(response)
    }

    fn remove(&mut self, collection: &str, id: &str, etag: Option<&str>) -> ApiResult<RemoteResponse> {
        let Some(idx) = self.position(collection, id) else {
            return Ok(error_response(404, "The requested URL was not found on the server."));
        };
        if let Some(rejection) = Self::check_etag(&self.docs(collection)[idx], None, etag) {
            return Ok(rejection);
        }
        if let Some(docs) = self.collections.get_mut(collection) {
            docs.remove(idx);
        }
        Ok(RemoteResponse::new(204, Value::Null))
    }

    fn clear(&mut self, collection: &str) -> ApiResult<RemoteResponse> {
        if let Some(docs) = self.collections.get_mut(collection) {
            docs.clear();
        }
        Ok(RemoteResponse::new(204, Value::Null))
    }
}

impl Transport for MemoryStore {
    fn get(&self, path: &str, params: &[(String, String)], _timeout: Duration) -> ApiResult<RemoteResponse> {
        Ok(self.handle("GET", path, params, None, None))
    }

    fn post(&self, path: &str, body: &Value, _timeout: Duration) -> ApiResult<RemoteResponse> {
        Ok(self.handle("POST", path, &[], Some(body), None))
    }

    fn put(&self, path: &str, body: &Value, etag: Option<&str>, _timeout: Duration) -> ApiResult<RemoteResponse> {
        Ok(self.handle("PUT", path, &[], Some(body), etag))
    }

    fn patch(&self, path: &str, body: &Value, etag: Option<&str>, _timeout: Duration) -> ApiResult<RemoteResponse> {
        Ok(self.handle("PATCH", path, &[], Some(body), etag))
    }

    fn delete(&self, path: &str, etag: Option<&str>, _timeout: Duration) -> ApiResult<RemoteResponse> {
        Ok(self.handle("DELETE", path, &[], None, etag))
    }

    /// Shares the data, which is the point of a store; there is no connection to isolate.
    fn detached(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}

fn error_response(status: u16, message: &str) -> RemoteResponse {
    RemoteResponse::new(
        status,
        json!({"_status": "ERR", "_error": {"code": status, "message": message}}),
    )
}

fn write_response(status: u16, doc: &Document) -> RemoteResponse {
    let etag = doc.get("_etag").and_then(Value::as_str).unwrap_or_default().to_string();
    RemoteResponse::new(
        status,
        json!({
            "_status": "OK",
            "_id": doc["_id"],
            "_etag": doc["_etag"],
            "_updated": doc["_updated"],
            "_created": doc["_created"],
        }),
    )
    .with_etag(etag)
}

fn strip_meta(doc: &Document) -> Document {
    doc.iter()
        .filter(|(key, _)| !matches!(key.as_str(), "_etag" | "_created" | "_updated" | "_links"))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Fill in `_id`, timestamps and a fresh `_etag` computed over the user fields.
fn stamp(mut doc: Document, created: Option<Value>) -> ApiResult<Document> {
    if !doc.get("_id").is_some_and(Value::is_string) {
        doc.insert("_id".to_string(), Value::from(objectid::generate()?));
    }
    let now = format_datetime(OffsetDateTime::now_utc())
        .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("failed to format timestamp"))?;
    let mut payload = strip_meta(&doc);
    payload.insert("_updated".to_string(), Value::from(now.clone()));
    let digest = Sha256::digest(Value::Object(payload).to_string().as_bytes());
    let etag: String = digest.iter().take(20).map(|byte| format!("{byte:02x}")).collect();
    doc.insert("_updated".to_string(), Value::from(now.clone()));
    doc.insert("_created".to_string(), created.unwrap_or(Value::from(now)));
    doc.insert("_etag".to_string(), Value::from(etag));
    Ok(doc)
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

/// Evaluate a Mongo-style `where` filter.
fn matches(doc: &Document, filter: &Map<String, Value>) -> bool {
    filter.iter().all(|(key, condition)| match key.as_str() {
        "$and" => condition
            .as_array()
            .is_some_and(|parts| parts.iter().all(|part| part.as_object().is_some_and(|p| matches(doc, p)))),
        "$or" => condition
            .as_array()
            .is_some_and(|parts| parts.iter().any(|part| part.as_object().is_some_and(|p| matches(doc, p)))),
        "$nor" => condition
            .as_array()
            .is_some_and(|parts| !parts.iter().any(|part| part.as_object().is_some_and(|p| matches(doc, p)))),
        field => field_matches(lookup(doc, field), condition),
    })
}

fn field_matches(value: Option<&Value>, condition: &Value) -> bool {
    match condition {
        Value::Object(ops) if ops.keys().all(|key| key.starts_with('$')) && !ops.is_empty() => {
            ops.iter().all(|(op, arg)| operator_matches(value, op, arg))
        }
        expected => equals(value, expected),
    }
}

fn equals(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
        Some(value) => compare(value, expected) == Some(Ordering::Equal),
        None => expected.is_null(),
    }
}

fn operator_matches(value: Option<&Value>, op: &str, arg: &Value) -> bool {
    let ordered = |accept: fn(Ordering) -> bool| {
        value.and_then(|value| compare(value, arg)).is_some_and(accept)
    };
    match op {
        "$eq" => equals(value, arg),
        "$ne" => !equals(value, arg),
        "$gt" => ordered(|o| o == Ordering::Greater),
        "$gte" => ordered(|o| o != Ordering::Less),
        "$lt" => ordered(|o| o == Ordering::Less),
        "$lte" => ordered(|o| o != Ordering::Greater),
        "$in" => arg
            .as_array()
            .is_some_and(|options| options.iter().any(|option| equals(value, option))),
        "$nin" => arg
            .as_array()
            .is_none_or(|options| !options.iter().any(|option| equals(value, option))),
        "$exists" => arg.as_bool().unwrap_or(true) == value.is_some(),
        "$regex" => match (value.and_then(Value::as_str), arg.as_str()) {
            (Some(text), Some(pattern)) => regex::Regex::new(pattern).is_ok_and(|re| re.is_match(text)),
            _ => false,
        },
        "$not" => !field_matches(value, arg),
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (x, y) => (x == y).then_some(Ordering::Equal),
    }
}

/// Mongo's cross-type order for sorting: null < numbers < strings < objects < arrays < bools.
fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

fn compare_docs(a: &Document, b: &Document, sort: &Sort) -> Ordering {
    for key in sort.keys() {
        let (x, y) = (lookup(a, &key.field), lookup(b, &key.field));
        let ordering = type_rank(x).cmp(&type_rank(y)).then_with(|| match (x, y) {
            (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        });
        let ordering = match key.direction {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn project(doc: &Document, projection: &Projection) -> Document {
    const ALWAYS: [&str; 4] = ["_id", "_etag", "_created", "_updated"];
    match projection.mode() {
        Ok(Some(ProjectionMode::Include)) => doc
            .iter()
            .filter(|(key, _)| {
                ALWAYS.contains(&key.as_str())
                    || projection.fields().get(*key).and_then(Value::as_u64) == Some(1)
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        Ok(Some(ProjectionMode::Exclude)) => doc
            .iter()
            .filter(|(key, _)| ALWAYS.contains(&key.as_str()) || !projection.fields().contains_key(*key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        _ => doc.clone(),
    }
}
