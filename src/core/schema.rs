//! Purpose: Hold a compiled resource schema and validate/coerce documents against it.
//! Exports: `Schema`, `Document`, `FieldErrors`, `Validation`, `BatchValidation`.
//! Role: Client-side guard before writes; the remote store stays the source of truth.
//! Invariants: A schema is immutable once compiled; field order follows the description.
//! Invariants: Batch validation keeps input order and pairs every rejected doc with one error map.
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::core::coerce::CoerceError;
use crate::core::error::{Error, ErrorKind};
use crate::core::field::{FieldSpec, compile_field};

pub type Document = Map<String, Value>;
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Clone, Debug, Default)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Validation {
    pub accepted: Option<Document>,
    pub errors: FieldErrors,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.accepted.is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchValidation {
    pub valid: Vec<Document>,
    pub rejected: Vec<Document>,
    pub errors: Vec<FieldErrors>,
}

impl Schema {
    /// Compile every field description, silently leaving out unsupported ones.
    pub fn compile(description: &Map<String, Value>) -> Self {
        let fields = description
            .iter()
            .filter_map(|(name, field)| compile_field(name, field))
            .collect();
        Self { fields }
    }

    pub fn from_value(description: &Value) -> Result<Self, Error> {
        match description.as_object() {
            Some(map) => Ok(Self::compile(map)),
            None => Err(Error::new(ErrorKind::Usage)
                .with_message("schema must be a mapping of field name to description")),
        }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|spec| spec.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate one document. With `coerce`, per-type coercers run first and a
    /// coercion failure is reported like any other constraint failure.
    pub fn validate(&self, doc: &Document, coerce: bool) -> Validation {
        let mut errors = FieldErrors::new();
        let mut normalized = Document::new();

        for (key, value) in doc {
            let Some(spec) = self.field(key) else {
                // Meta fields (`_id`, `_etag`, ...) belong to the store, not the schema.
                if key.starts_with('_') {
                    normalized.insert(key.clone(), value.clone());
                } else {
                    errors.insert(key.clone(), vec!["unknown field".to_string()]);
                }
                continue;
            };
            if spec.readonly() {
                errors.insert(key.clone(), vec!["field is read-only".to_string()]);
                continue;
            }
            let value = if coerce {
                match spec.coerce(value.clone()) {
                    Ok(value) => value,
                    Err(err) => {
                        errors.insert(key.clone(), vec![err.to_string()]);
                        continue;
                    }
                }
            } else {
                value.clone()
            };
            let reasons = spec.check(&value);
            if reasons.is_empty() {
                normalized.insert(key.clone(), value);
            } else {
                errors.insert(key.clone(), reasons);
            }
        }

        for spec in &self.fields {
            if spec.required() && spec.default().is_none() && !doc.contains_key(spec.name()) {
                errors.insert(spec.name().to_string(), vec!["required field".to_string()]);
            }
        }

        Validation {
            accepted: errors.is_empty().then_some(normalized),
            errors,
        }
    }

    pub fn validate_documents<I>(&self, docs: I, coerce: bool) -> BatchValidation
    where
        I: IntoIterator<Item = Document>,
    {
        let mut batch = BatchValidation::default();
        for doc in docs {
            let validation = self.validate(&doc, coerce);
            match validation.accepted {
                Some(accepted) => batch.valid.push(accepted),
                None => {
                    batch.rejected.push(doc);
                    batch.errors.push(validation.errors);
                }
            }
        }
        batch
    }

    /// Coerce every declared field of a nested document; undeclared keys pass through.
    pub(crate) fn coerce_document(&self, doc: Document) -> Result<Document, CoerceError> {
        let mut out = Document::new();
        for (key, value) in doc {
            let value = match self.field(&key) {
                Some(spec) => spec.coerce(value)?,
                None => value,
            };
            out.insert(key, value);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::{Document, Schema};
    use proptest::prelude::*;
    use serde_json::{Value, json};

    fn doc(value: Value) -> Document {
        value.as_object().cloned().expect("object")
    }

    fn people() -> Schema {
        Schema::from_value(&json!({
            "name": {"type": "string", "required": true},
            "age": {"type": "integer", "min": 0},
            "born": {"type": "datetime"},
            "location": {"type": "point"}
        }))
        .expect("schema")
    }

    #[test]
    fn unsupported_fields_are_left_out() {
        let schema = people();
        assert_eq!(schema.names(), vec!["name", "age", "born"]);
        assert!(!schema.contains("location"));
    }

    #[test]
    fn insert_scenario_splits_valid_and_rejected() {
        let schema = people();
        let batch = schema.validate_documents(
            vec![
                doc(json!({"name": "A", "age": 5})),
                doc(json!({"name": "B", "age": -1})),
            ],
            false,
        );
        assert_eq!(batch.valid, vec![doc(json!({"name": "A", "age": 5}))]);
        assert_eq!(batch.rejected, vec![doc(json!({"name": "B", "age": -1}))]);
        assert_eq!(batch.errors.len(), 1);
        assert!(batch.errors[0].contains_key("age"));
    }

    #[test]
    fn missing_required_and_unknown_fields() {
        let validation = people().validate(&doc(json!({"age": 1, "nick": "x"})), false);
        assert!(!validation.is_valid());
        assert_eq!(validation.errors["name"], vec!["required field".to_string()]);
        assert_eq!(validation.errors["nick"], vec!["unknown field".to_string()]);
    }

    #[test]
    fn meta_fields_pass_through() {
        let validation = people().validate(&doc(json!({"_id": "abc", "name": "A"})), false);
        let accepted = validation.accepted.expect("accepted");
        assert_eq!(accepted["_id"], json!("abc"));
    }

    #[test]
    fn coercion_is_opt_in() {
        let schema = people();
        let raw = doc(json!({"name": "A", "age": "7", "born": "2013-04-02T10:29:13Z"}));

        let strict = schema.validate(&raw, false);
        assert_eq!(strict.errors["age"], vec!["must be of integer type".to_string()]);

        let coerced = schema.validate(&raw, true);
        let accepted = coerced.accepted.expect("accepted");
        assert_eq!(accepted["age"], json!(7));
        assert_eq!(accepted["born"], json!("Tue, 02 Apr 2013 10:29:13 GMT"));
    }

    #[test]
    fn coercion_failure_is_a_validation_failure() {
        let validation = people().validate(&doc(json!({"name": "A", "age": "old"})), true);
        assert_eq!(
            validation.errors["age"],
            vec!["cannot coerce \"old\" to integer".to_string()]
        );
    }

    #[test]
    fn readonly_fields_are_rejected_and_defaults_satisfy_required() {
        let schema = Schema::from_value(&json!({
            "slug": {"type": "string", "readonly": true},
            "kind": {"type": "string", "required": true, "default": "note"}
        }))
        .expect("schema");
        assert!(schema.validate(&doc(json!({})), false).is_valid());
        let validation = schema.validate(&doc(json!({"slug": "x"})), false);
        assert_eq!(validation.errors["slug"], vec!["field is read-only".to_string()]);
    }

    #[test]
    fn schema_must_be_a_mapping() {
        assert!(Schema::from_value(&json!(["name"])).is_err());
    }

    proptest! {
        #[test]
        fn batch_partition_is_one_to_one(
            ages in prop::collection::vec(prop_oneof![
                (-5i64..5).prop_map(Value::from),
                Just(Value::from("x")),
                Just(Value::Null),
            ], 0..20),
            coerce in any::<bool>(),
        ) {
            let schema = people();
            let docs: Vec<Document> = ages
                .into_iter()
                .map(|age| doc(json!({"name": "n", "age": age})))
                .collect();
            let total = docs.len();
            let batch = schema.validate_documents(docs, coerce);
            prop_assert_eq!(batch.valid.len() + batch.rejected.len(), total);
            prop_assert_eq!(batch.rejected.len(), batch.errors.len());
        }
    }
}
