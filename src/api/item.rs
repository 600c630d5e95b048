//! Purpose: One document of a collection, typed by its resource schema.
//! Exports: `Item`, `WriteOutcome`.
//! Role: Local working copy with pull/push/patch/delete against the remote store.
//! Invariants: Only schema fields are stored; assignments are checked against the field spec.
//! Invariants: A successful write replaces the local `_etag` with the one the store returns.
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::endpoint::Endpoint;
use super::transport::{ApiResult, RemoteResponse};
use crate::core::error::{Error, ErrorKind};
use crate::core::objectid;
use crate::core::schema::{Document, FieldErrors, Schema};

/// How the store answered a write.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOutcome {
    Accepted { etag: Option<String> },
    /// The store refused because our `_etag` is missing or stale.
    Conflict { status: u16, message: String },
    Rejected {
        status: u16,
        message: String,
        issues: FieldErrors,
    },
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    fn from_response(response: &RemoteResponse) -> Self {
        if response.is_success() {
            return Self::Accepted {
                etag: response.version(),
            };
        }
        match response.status {
            409 | 412 | 428 => Self::Conflict {
                status: response.status,
                message: response.error_message(),
            },
            status => Self::Rejected {
                status,
                message: response.error_message(),
                issues: response.issues(),
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct Item {
    id: String,
    etag: String,
    values: Document,
    endpoint: Endpoint,
}

impl Item {
    /// Build from a raw document: `_id` is kept or generated, `_etag` kept or left empty,
    /// and every schema field is taken from `data`, else its default, else null.
    pub fn construct(endpoint: Endpoint, data: Document) -> ApiResult<Self> {
        let id = match data.get("_id") {
            Some(Value::String(id)) => id.clone(),
            None | Some(Value::Null) => objectid::generate()?,
            Some(other) => other.to_string(),
        };
        let etag = data
            .get("_etag")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let values = endpoint
            .schema()
            .fields()
            .iter()
            .map(|spec| {
                let value = data
                    .get(spec.name())
                    .or(spec.default())
                    .cloned()
                    .unwrap_or(Value::Null);
                (spec.name().to_string(), value)
            })
            .collect();
        let ignored = data
            .keys()
            .filter(|key| !key.starts_with('_') && !endpoint.schema().contains(key))
            .count();
        if ignored > 0 {
            debug!(url = endpoint.url(), id = id.as_str(), ignored, "ignored fields outside the schema");
        }
        Ok(Self {
            id,
            etag,
            values,
            endpoint,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn schema(&self) -> &Schema {
        self.endpoint.schema()
    }

    pub fn path(&self) -> String {
        self.endpoint.item_path(&self.id)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn values(&self) -> &Document {
        &self.values
    }

    /// Assign a field after checking it against its spec.
    pub fn set(&mut self, field: &str, value: Value) -> ApiResult<()> {
        let Some(spec) = self.endpoint.schema().field(field) else {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("'{field}' is not a field of this resource"))
                .with_path(self.path()));
        };
        let reasons = spec.check(&value);
        if !reasons.is_empty() {
            return Err(Error::new(ErrorKind::Invalid)
                .with_message(format!("invalid value for '{field}': {}", reasons.join("; ")))
                .with_path(self.path()));
        }
        self.values.insert(field.to_string(), value);
        Ok(())
    }

    /// `_id` followed by every schema field, in schema order.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("_id".to_string(), json!(self.id));
        for (key, value) in &self.values {
            doc.insert(key.clone(), value.clone());
        }
        doc
    }

    /// `_id` followed by the listed fields (missing ones are null).
    pub fn to_record(&self, fields: &[String]) -> Document {
        let mut doc = Document::new();
        doc.insert("_id".to_string(), json!(self.id));
        for field in fields {
            let value = self.values.get(field).cloned().unwrap_or(Value::Null);
            doc.insert(field.clone(), value);
        }
        doc
    }

    /// Refresh from the store. `Ok(false)` when the store has no such document.
    pub fn pull(&mut self) -> ApiResult<bool> {
        let Some(doc) = self.endpoint.fetch(&self.id)? else {
            return Ok(false);
        };
        for (key, value) in doc {
            if key == "_etag" {
                if let Value::String(etag) = value {
                    self.etag = etag;
                }
            } else if self.endpoint.schema().contains(&key) {
                self.values.insert(key, value);
            }
        }
        Ok(true)
    }

    /// Replace the whole document remotely (PUT).
    pub fn push(&mut self) -> ApiResult<WriteOutcome> {
        let mut body = self.to_document();
        if !self.etag.is_empty() {
            body.insert("_etag".to_string(), json!(self.etag));
        }
        let path = self.path();
        let response = self.endpoint.transport().put(
            &path,
            &Value::Object(body),
            self.etag_header(),
            self.endpoint.timeouts().for_items(1),
        )?;
        Ok(self.record_write(&response))
    }

    /// Send only `fields` (PATCH).
    pub fn patch(&mut self, fields: &[&str]) -> ApiResult<WriteOutcome> {
        let mut body = Document::new();
        body.insert("_id".to_string(), json!(self.id));
        if !self.etag.is_empty() {
            body.insert("_etag".to_string(), json!(self.etag));
        }
        for field in fields {
            let Some(value) = self.values.get(*field) else {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("'{field}' is not a field of this resource"))
                    .with_path(self.path()));
            };
            body.insert((*field).to_string(), value.clone());
        }
        let path = self.path();
        let response = self.endpoint.transport().patch(
            &path,
            &Value::Object(body),
            self.etag_header(),
            self.endpoint.timeouts().for_items(1),
        )?;
        Ok(self.record_write(&response))
    }

    pub fn delete(&self) -> ApiResult<WriteOutcome> {
        let path = self.path();
        let response = self.endpoint.transport().delete(
            &path,
            self.etag_header(),
            self.endpoint.timeouts().base,
        )?;
        let outcome = WriteOutcome::from_response(&response);
        if !outcome.is_success() {
            warn!(path = path.as_str(), status = response.status, "delete refused");
        }
        Ok(outcome)
    }

    fn etag_header(&self) -> Option<&str> {
        (!self.etag.is_empty()).then_some(self.etag.as_str())
    }

    fn record_write(&mut self, response: &RemoteResponse) -> WriteOutcome {
        let outcome = WriteOutcome::from_response(response);
        match &outcome {
            WriteOutcome::Accepted { etag: Some(etag) } => self.etag = etag.clone(),
            WriteOutcome::Accepted { etag: None } => {}
            WriteOutcome::Conflict { status, message } | WriteOutcome::Rejected { status, message, .. } => {
                warn!(path = self.path().as_str(), status, message = message.as_str(), "write refused");
            }
        }
        outcome
    }
}
