//! Purpose: Bind a collection URL, its schema, a transport and timeouts together.
//! Exports: `Endpoint`.
//! Role: The shared handle that controllers, items, iterators and partition workers query through.
//! Invariants: A non-success list response reads as "no documents" (logged), never as data.
//! Invariants: The strict variants surface that status as an error instead.
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::warn;

use super::item::Item;
use super::transport::{ApiResult, Transport};
use crate::core::error::{Error, ErrorKind, kind_from_status};
use crate::core::query::{FindQuery, Projection, Timeouts};
use crate::core::schema::{Document, Schema};

#[derive(Clone)]
pub struct Endpoint {
    url: String,
    schema: Arc<Schema>,
    transport: Arc<dyn Transport>,
    timeouts: Timeouts,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field("transport", &self.transport.describe())
            .field("fields", &self.schema.names())
            .finish()
    }
}

impl Endpoint {
    pub fn new(
        url: impl Into<String>,
        schema: Arc<Schema>,
        transport: Arc<dyn Transport>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            url: url.into().trim_matches('/').to_string(),
            schema,
            transport,
            timeouts,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn schema_arc(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn item_path(&self, id: &str) -> String {
        format!("{}/{}", self.url, id)
    }

    /// Same collection, fresh transport. Used by partition workers.
    pub fn detached(&self) -> Self {
        Self {
            transport: self.transport.detached(),
            ..self.clone()
        }
    }

    /// Run a list query and return the raw documents.
    pub fn find_documents(&self, query: &FindQuery) -> ApiResult<Vec<Document>> {
        match self.fetch_documents(query) {
            Err(err) if err.status().is_some() => {
                warn!(
                    url = self.url.as_str(),
                    status = err.status().unwrap_or_default(),
                    page = query.page,
                    message = err.message().unwrap_or_default(),
                    "list request failed; treating as empty"
                );
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Like `find_documents`, but a non-success status is an error carrying that status.
    pub fn fetch_documents(&self, query: &FindQuery) -> ApiResult<Vec<Document>> {
        query.projection.mode()?;
        let timeout = self.timeouts.for_items(query.max_results);
        let response = self
            .transport
            .get(&self.url, &query.params(), timeout)
            .map_err(|err| err.with_path(self.url.clone()))?;
        if !response.is_success() {
            return Err(Error::new(kind_from_status(response.status))
                .with_message(response.error_message())
                .with_path(self.url.clone())
                .with_status(response.status));
        }
        Ok(response.items())
    }

    pub fn find(&self, query: &FindQuery) -> ApiResult<Vec<Item>> {
        self.find_documents(query)?
            .into_iter()
            .map(|doc| Item::construct(self.clone(), doc))
            .collect()
    }

    /// Strict `find`: see `fetch_documents`.
    pub fn find_strict(&self, query: &FindQuery) -> ApiResult<Vec<Item>> {
        self.fetch_documents(query)?
            .into_iter()
            .map(|doc| Item::construct(self.clone(), doc))
            .collect()
    }

    /// Server-side count for `filter`, read from `_meta.total` of a one-row query.
    pub fn total(&self, filter: &Document) -> ApiResult<u64> {
        let query = FindQuery {
            filter: filter.clone(),
            ..FindQuery::default()
        }
        .with_projection(Projection::include(["_id"]))
        .with_max_results(1);
        let response = self
            .transport
            .get(&self.url, &query.params(), self.timeouts.base)
            .map_err(|err| err.with_path(self.url.clone()))?;
        if !response.is_success() {
            return Err(Error::new(kind_from_status(response.status))
                .with_message(response.error_message())
                .with_path(self.url.clone())
                .with_status(response.status));
        }
        response.total().ok_or_else(|| {
            Error::new(ErrorKind::Remote)
                .with_message("list response has no _meta.total")
                .with_path(self.url.clone())
                .with_status(response.status)
        })
    }

    /// Fetch one document by id. `Ok(None)` when the store answers with an error status.
    pub fn fetch(&self, id: &str) -> ApiResult<Option<Document>> {
        let path = self.item_path(id);
        let response = self
            .transport
            .get(&path, &[], self.timeouts.base)
            .map_err(|err| err.with_path(path.clone()))?;
        if !response.is_success() {
            warn!(path = path.as_str(), status = response.status, "item fetch failed");
            return Ok(None);
        }
        match response.body {
            Value::Object(mut doc) => {
                if let Some(etag) = response.etag {
                    doc.entry("_etag").or_insert_with(|| json!(etag));
                }
                Ok(Some(doc))
            }
            _ => Ok(None),
        }
    }
}
