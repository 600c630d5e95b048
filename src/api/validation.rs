//! Purpose: Report model for bulk validation and insertion.
//! Exports: `InsertOptions`, `InsertOutcome`.
//! Role: Shared contract between the resource controller and CLI diagnostics.
//! Invariants: `rejected[i]` pairs with `errors[i]`; both keep the input order.
//! Invariants: A document is in exactly one of `accepted` and `rejected`.
use serde_json::{Value, json};

use super::transport::{RemoteResponse, issues_from};
use crate::core::schema::{Document, FieldErrors};

/// Field name under which store-level (not per-field) rejections are reported.
pub const REMOTE_ISSUE_KEY: &str = "_remote";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InsertOptions {
    /// Check documents against the schema before sending.
    pub validate: bool,
    /// Run type coercion as part of validation.
    pub coerce: bool,
    /// Validate only; nothing is sent.
    pub dry_run: bool,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self {
            validate: true,
            coerce: false,
            dry_run: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InsertOutcome {
    pub accepted: Vec<Document>,
    pub rejected: Vec<Document>,
    pub errors: Vec<FieldErrors>,
    /// HTTP status of the POST, when one was sent.
    pub status: Option<u16>,
}

impl InsertOutcome {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }

    pub fn posted(&self) -> bool {
        self.status.is_some()
    }

    pub fn to_value(&self) -> Value {
        let rejected: Vec<Value> = self
            .rejected
            .iter()
            .zip(&self.errors)
            .map(|(doc, errors)| json!({"document": doc, "errors": errors}))
            .collect();
        json!({
            "accepted": self.accepted.len(),
            "rejected": rejected,
            "status": self.status,
        })
    }
}

/// Collects accepted/rejected docs by original position so the result keeps input order.
#[derive(Default)]
pub(crate) struct OutcomeBuilder {
    accepted: Vec<(usize, Document)>,
    rejected: Vec<(usize, Document, FieldErrors)>,
}

impl OutcomeBuilder {
    pub(crate) fn accept(&mut self, index: usize, doc: Document) {
        self.accepted.push((index, doc));
    }

    pub(crate) fn reject(&mut self, index: usize, doc: Document, errors: FieldErrors) {
        self.rejected.push((index, doc, errors));
    }

    /// Apply the store's answer to a bulk POST of `posted`.
    pub(crate) fn apply_response(&mut self, posted: Vec<(usize, Document)>, response: &RemoteResponse) {
        let statuses: Vec<Value> = match response.body.get("_items").and_then(Value::as_array) {
            Some(items) => items.clone(),
            None if posted.len() == 1 => vec![response.body.clone()],
            None => Vec::new(),
        };

        if response.is_success() {
            for (slot, (index, mut doc)) in posted.into_iter().enumerate() {
                if let Some(status) = statuses.get(slot) {
                    for key in ["_id", "_etag", "_created", "_updated"] {
                        if let Some(value) = status.get(key) {
                            doc.insert(key.to_string(), value.clone());
                        }
                    }
                }
                self.accept(index, doc);
            }
            return;
        }

        // Bulk writes are all-or-nothing: every posted doc is rejected, with the
        // store's per-document issues when it reported them.
        let message = response.error_message();
        for (slot, (index, doc)) in posted.into_iter().enumerate() {
            let mut errors = match statuses.get(slot) {
                Some(status) if status.get("_status").and_then(Value::as_str) == Some("ERR") => {
                    issues_from(status)
                }
                Some(_) if statuses.len() > 1 => FieldErrors::from([(
                    REMOTE_ISSUE_KEY.to_string(),
                    vec!["batch rejected because another document failed".to_string()],
                )]),
                _ => issues_from(&response.body),
            };
            if errors.is_empty() {
                errors.insert(REMOTE_ISSUE_KEY.to_string(), vec![message.clone()]);
            }
            self.reject(index, doc, errors);
        }
    }

    pub(crate) fn finish(mut self, status: Option<u16>) -> InsertOutcome {
        self.accepted.sort_by_key(|(index, _)| *index);
        self.rejected.sort_by_key(|(index, _, _)| *index);
        let mut outcome = InsertOutcome {
            status,
            ..InsertOutcome::default()
        };
        outcome.accepted = self.accepted.into_iter().map(|(_, doc)| doc).collect();
        for (_, doc, errors) in self.rejected {
            outcome.rejected.push(doc);
            outcome.errors.push(errors);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::{OutcomeBuilder, REMOTE_ISSUE_KEY};
    use crate::api::transport::RemoteResponse;
    use crate::core::schema::{Document, FieldErrors};
    use serde_json::{Value, json};

    fn doc(value: Value) -> Document {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn local_and_remote_rejections_keep_input_order() {
        let mut builder = OutcomeBuilder::default();
        builder.reject(1, doc(json!({"n": 1})), FieldErrors::from([("n".to_string(), vec!["bad".to_string()])]));
        let response = RemoteResponse::new(
            422,
            json!({
                "_status": "ERR",
                "_error": {"code": 422, "message": "Insertion failure"},
                "_items": [
                    {"_status": "OK"},
                    {"_status": "ERR", "_issues": {"n": "value is not unique"}}
                ]
            }),
        );
        builder.apply_response(vec![(0, doc(json!({"n": 0}))), (2, doc(json!({"n": 2})))], &response);
        let outcome = builder.finish(Some(422));

        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.rejected.len(), 3);
        assert_eq!(outcome.errors.len(), 3);
        assert_eq!(outcome.rejected[0]["n"], json!(0));
        assert!(outcome.errors[0].contains_key(REMOTE_ISSUE_KEY));
        assert_eq!(outcome.errors[1]["n"], vec!["bad".to_string()]);
        assert_eq!(outcome.errors[2]["n"], vec!["value is not unique".to_string()]);
    }

    #[test]
    fn success_copies_store_metadata() {
        let mut builder = OutcomeBuilder::default();
        let response = RemoteResponse::new(
            201,
            json!({"_status": "OK", "_id": "5f8d0d55b54764421b7156c3", "_etag": "e1"}),
        );
        builder.apply_response(vec![(0, doc(json!({"name": "A"})))], &response);
        let outcome = builder.finish(Some(201));
        assert!(outcome.is_complete());
        assert_eq!(outcome.accepted[0]["_etag"], json!("e1"));
        assert_eq!(outcome.to_value()["accepted"], json!(1));
    }

    #[test]
    fn opaque_failures_are_reported_per_document() {
        let mut builder = OutcomeBuilder::default();
        let response = RemoteResponse::new(500, Value::String("Internal Server Error".into()));
        builder.apply_response(vec![(0, doc(json!({}))), (1, doc(json!({})))], &response);
        let outcome = builder.finish(Some(500));
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(outcome.errors[1][REMOTE_ISSUE_KEY], vec!["remote status 500".to_string()]);
    }
}
