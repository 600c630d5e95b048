//! Purpose: Compile one declarative field description into an immutable `FieldSpec`.
//! Exports: `TypeTag`, `Constraints`, `FieldSpec`, `Limit`, `compile_field`, `SUPPORTED_RULES`.
//! Role: Leaf of the schema pipeline; the validator and item model only see compiled specs.
//! Invariants: Compilation never fails. Unknown types yield `None`, malformed rules are dropped.
//! Invariants: Rules outside `SUPPORTED_RULES` are discarded before any rule is read.
use std::cmp::Ordering;
use std::fmt;

use regex::Regex;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::core::coerce::{self, CoerceError, is_object_id, parse_datetime};
use crate::core::schema::Schema;

pub const SUPPORTED_RULES: &[&str] = &[
    "type",
    "schema",
    "required",
    "default",
    "readonly",
    "valueschema",
    "keyschema",
    "regex",
    "minlength",
    "maxlength",
    "min",
    "max",
    "allowed",
    "items",
    "empty",
    "nullable",
];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TypeTag {
    Boolean,
    Integer,
    Number,
    String,
    Binary,
    Date,
    Datetime,
    ObjectId,
    Dict,
    List,
    Set,
}

impl TypeTag {
    pub fn parse(raw: &str) -> Option<Self> {
        let tag = match raw.to_ascii_lowercase().as_str() {
            "boolean" => TypeTag::Boolean,
            "integer" => TypeTag::Integer,
            "number" | "float" => TypeTag::Number,
            "string" => TypeTag::String,
            "binary" | "media" => TypeTag::Binary,
            "date" => TypeTag::Date,
            "datetime" => TypeTag::Datetime,
            "objectid" => TypeTag::ObjectId,
            "dict" => TypeTag::Dict,
            "list" => TypeTag::List,
            "set" => TypeTag::Set,
            _ => return None,
        };
        Some(tag)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::Boolean => "boolean",
            TypeTag::Integer => "integer",
            TypeTag::Number => "number",
            TypeTag::String => "string",
            TypeTag::Binary => "binary",
            TypeTag::Date => "date",
            TypeTag::Datetime => "datetime",
            TypeTag::ObjectId => "objectid",
            TypeTag::Dict => "dict",
            TypeTag::List => "list",
            TypeTag::Set => "set",
        }
    }

    fn is_date(&self) -> bool {
        matches!(self, TypeTag::Date | TypeTag::Datetime)
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            TypeTag::Boolean => value.is_boolean(),
            TypeTag::Integer => value.is_i64() || value.is_u64(),
            TypeTag::Number => value.is_number(),
            TypeTag::String => value.is_string(),
            TypeTag::Binary => value.is_string() || value.is_array(),
            TypeTag::Date | TypeTag::Datetime => {
                value.as_str().and_then(parse_datetime).is_some()
            }
            TypeTag::ObjectId => value.as_str().is_some_and(is_object_id),
            TypeTag::Dict => value.is_object(),
            TypeTag::List => value.is_array(),
            TypeTag::Set => match value.as_array() {
                Some(items) => items
                    .iter()
                    .enumerate()
                    .all(|(idx, item)| !items[..idx].contains(item)),
                None => false,
            },
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower/upper bound for `min`/`max`; dates compare as instants.
#[derive(Clone, Debug, PartialEq)]
pub enum Limit {
    Number(f64),
    Instant(OffsetDateTime),
}

impl Limit {
    fn compare(&self, value: &Value) -> Option<Ordering> {
        match self {
            Limit::Number(bound) => value.as_f64()?.partial_cmp(bound),
            Limit::Instant(bound) => Some(parse_datetime(value.as_str()?)?.cmp(bound)),
        }
    }
}

/// Nested `schema` rule: sub-fields for dicts, an element spec for lists and sets.
#[derive(Clone, Debug)]
pub enum NestedSchema {
    Fields(Schema),
    Element(Box<FieldSpec>),
}

#[derive(Clone, Debug, Default)]
pub struct Constraints {
    pub min: Option<(Limit, Value)>,
    pub max: Option<(Limit, Value)>,
    pub minlength: Option<usize>,
    pub maxlength: Option<usize>,
    pub allowed: Option<Vec<Value>>,
    pub regex: Option<(Regex, String)>,
    pub empty: Option<bool>,
    pub schema: Option<NestedSchema>,
    pub valueschema: Option<Box<FieldSpec>>,
    pub keyschema: Option<Box<FieldSpec>>,
    pub items: Option<Vec<FieldSpec>>,
}

#[derive(Clone, Debug)]
pub struct FieldSpec {
    name: String,
    type_tag: TypeTag,
    required: bool,
    nullable: bool,
    readonly: bool,
    default: Option<Value>,
    constraints: Constraints,
}

impl FieldSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_tag(&self) -> TypeTag {
        self.type_tag
    }

    pub fn required(&self) -> bool {
        self.required
    }

    /// Explicit `nullable`, or "not required" when the description is silent.
    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    /// Check a present value (including `null`) against type and constraints.
    /// Returns human-readable reasons; empty means valid.
    pub fn check(&self, value: &Value) -> Vec<String> {
        if value.is_null() {
            return if self.nullable {
                Vec::new()
            } else {
                vec!["null value not allowed".to_string()]
            };
        }
        if !self.type_tag.matches(value) {
            return vec![format!("must be of {} type", self.type_tag)];
        }

        let rules = &self.constraints;
        let mut errors = Vec::new();
        if let Some(allowed) = &rules.allowed {
            match value {
                Value::Array(items) => {
                    let unallowed: Vec<Value> = items
                        .iter()
                        .filter(|item| !allowed.contains(item))
                        .cloned()
                        .collect();
                    if !unallowed.is_empty() {
                        errors.push(format!("unallowed values {}", Value::Array(unallowed)));
                    }
                }
                other if !allowed.contains(other) => {
                    errors.push(format!("unallowed value {other}"));
                }
                _ => {}
            }
        }
        if rules.empty == Some(false) && is_empty(value) {
            errors.push("empty values not allowed".to_string());
        }
        if let Some(len) = length_of(value) {
            if let Some(min) = rules.minlength {
                if len < min {
                    errors.push(format!("min length is {min}"));
                }
            }
            if let Some(max) = rules.maxlength {
                if len > max {
                    errors.push(format!("max length is {max}"));
                }
            }
        }
        if let Some((limit, raw)) = &rules.min {
            if limit.compare(value) == Some(Ordering::Less) {
                errors.push(format!("min value is {raw}"));
            }
        }
        if let Some((limit, raw)) = &rules.max {
            if limit.compare(value) == Some(Ordering::Greater) {
                errors.push(format!("max value is {raw}"));
            }
        }
        if let (Some((regex, pattern)), Some(text)) = (&rules.regex, value.as_str()) {
            if !regex.is_match(text) {
                errors.push(format!("value does not match regex '{pattern}'"));
            }
        }
        errors.extend(self.check_nested(value));
        errors
    }

    fn check_nested(&self, value: &Value) -> Vec<String> {
        let rules = &self.constraints;
        let mut errors = Vec::new();
        match (&rules.schema, value) {
            (Some(NestedSchema::Fields(schema)), Value::Object(map)) => {
                let validation = schema.validate(map, false);
                for (field, reasons) in validation.errors {
                    for reason in reasons {
                        errors.push(format!("{field}: {reason}"));
                    }
                }
            }
            (Some(NestedSchema::Element(spec)), Value::Array(items)) => {
                for (idx, item) in items.iter().enumerate() {
                    for reason in spec.check(item) {
                        errors.push(format!("[{idx}]: {reason}"));
                    }
                }
            }
            _ => {}
        }
        if let (Some(spec), Value::Object(map)) = (&rules.valueschema, value) {
            for (key, item) in map {
                for reason in spec.check(item) {
                    errors.push(format!("{key}: {reason}"));
                }
            }
        }
        if let (Some(spec), Value::Object(map)) = (&rules.keyschema, value) {
            for key in map.keys() {
                for reason in spec.check(&Value::String(key.clone())) {
                    errors.push(format!("key '{key}': {reason}"));
                }
            }
        }
        if let (Some(specs), Value::Array(items)) = (&rules.items, value) {
            if specs.len() != items.len() {
                errors.push(format!("length of list should be {}", specs.len()));
            } else {
                for (idx, (spec, item)) in specs.iter().zip(items).enumerate() {
                    for reason in spec.check(item) {
                        errors.push(format!("[{idx}]: {reason}"));
                    }
                }
            }
        }
        errors
    }

    /// Coerce a value to this field's type, descending into nested schemas.
    pub fn coerce(&self, value: Value) -> Result<Value, CoerceError> {
        let value = coerce::coerce(self.type_tag, value)?;
        let rules = &self.constraints;
        match (value, &rules.schema) {
            (Value::Object(map), Some(NestedSchema::Fields(schema))) => {
                Ok(Value::Object(schema.coerce_document(map)?))
            }
            (Value::Array(items), Some(NestedSchema::Element(spec))) => items
                .into_iter()
                .map(|item| spec.coerce(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            (Value::Object(map), None) => match rules.valueschema.as_deref() {
                Some(spec) => {
                    let mut out = Map::new();
                    for (key, item) in map {
                        out.insert(key, spec.coerce(item)?);
                    }
                    Ok(Value::Object(out))
                }
                None => Ok(Value::Object(map)),
            },
            (value, _) => Ok(value),
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(text) => Some(text.chars().count()),
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        _ => None,
    }
}

/// Compile one field description. `None` means the field is not modelled:
/// the description is not a mapping, or its `type` is missing or unsupported.
pub fn compile_field(name: &str, description: &Value) -> Option<FieldSpec> {
    let Some(raw) = description.as_object() else {
        warn!(field = name, "field description is not a mapping; skipping");
        return None;
    };
    let rules: Map<String, Value> = raw
        .iter()
        .filter(|(key, _)| SUPPORTED_RULES.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if rules.len() != raw.len() {
        debug!(
            field = name,
            dropped = raw.len() - rules.len(),
            "dropping unsupported schema rules"
        );
    }

    let type_tag = match rules.get("type").and_then(Value::as_str) {
        Some(raw_type) => match TypeTag::parse(raw_type) {
            Some(tag) => tag,
            None => {
                debug!(field = name, r#type = raw_type, "unsupported field type; skipping");
                return None;
            }
        },
        None => {
            debug!(field = name, "field has no type; skipping");
            return None;
        }
    };

    let required = flag(name, &rules, "required").unwrap_or(false);
    let nullable = flag(name, &rules, "nullable").unwrap_or(!required);
    let readonly = flag(name, &rules, "readonly").unwrap_or(false);

    let constraints = Constraints {
        min: limit(name, type_tag, &rules, "min"),
        max: limit(name, type_tag, &rules, "max"),
        minlength: length(name, &rules, "minlength"),
        maxlength: length(name, &rules, "maxlength"),
        allowed: allowed(name, &rules),
        regex: regex(name, &rules),
        empty: flag(name, &rules, "empty"),
        schema: nested(name, type_tag, &rules),
        valueschema: single(name, &rules, "valueschema"),
        keyschema: single(name, &rules, "keyschema"),
        items: items(name, &rules),
    };

    Some(FieldSpec {
        name: name.to_string(),
        type_tag,
        required,
        nullable,
        readonly,
        default: rules.get("default").cloned(),
        constraints,
    })
}

fn dropped(field: &str, rule: &str) {
    warn!(field, rule, "malformed schema rule; ignoring it");
}

fn flag(field: &str, rules: &Map<String, Value>, key: &str) -> Option<bool> {
    let value = rules.get(key)?;
    let out = value.as_bool();
    if out.is_none() {
        dropped(field, key);
    }
    out
}

fn length(field: &str, rules: &Map<String, Value>, key: &str) -> Option<usize> {
    let value = rules.get(key)?;
    let out = value.as_u64().and_then(|n| usize::try_from(n).ok());
    if out.is_none() {
        dropped(field, key);
    }
    out
}

fn limit(
    field: &str,
    type_tag: TypeTag,
    rules: &Map<String, Value>,
    key: &str,
) -> Option<(Limit, Value)> {
    let value = rules.get(key)?;
    let parsed = if let Some(n) = value.as_f64() {
        Some(Limit::Number(n))
    } else if type_tag.is_date() {
        value.as_str().and_then(parse_datetime).map(Limit::Instant)
    } else {
        None
    };
    match parsed {
        Some(limit) => Some((limit, value.clone())),
        None => {
            dropped(field, key);
            None
        }
    }
}

fn allowed(field: &str, rules: &Map<String, Value>) -> Option<Vec<Value>> {
    let value = rules.get("allowed")?;
    match value.as_array() {
        Some(items) => Some(items.clone()),
        None => {
            dropped(field, "allowed");
            None
        }
    }
}

fn regex(field: &str, rules: &Map<String, Value>) -> Option<(Regex, String)> {
    let pattern = match rules.get("regex")?.as_str() {
        Some(pattern) => pattern,
        None => {
            dropped(field, "regex");
            return None;
        }
    };
    // Anchored so the whole value must match.
    match Regex::new(&format!("^(?:{pattern})$")) {
        Ok(regex) => Some((regex, pattern.to_string())),
        Err(err) => {
            warn!(field, pattern, error = %err, "invalid regex rule; ignoring it");
            None
        }
    }
}

fn nested(field: &str, type_tag: TypeTag, rules: &Map<String, Value>) -> Option<NestedSchema> {
    let value = rules.get("schema")?;
    match type_tag {
        TypeTag::Dict => match value.as_object() {
            Some(fields) => Some(NestedSchema::Fields(Schema::compile(fields))),
            None => {
                dropped(field, "schema");
                None
            }
        },
        TypeTag::List | TypeTag::Set => compile_field(field, value)
            .map(Box::new)
            .map(NestedSchema::Element),
        _ => {
            dropped(field, "schema");
            None
        }
    }
}

fn single(field: &str, rules: &Map<String, Value>, key: &str) -> Option<Box<FieldSpec>> {
    let value = rules.get(key)?;
    let out = compile_field(field, value).map(Box::new);
    if out.is_none() {
        dropped(field, key);
    }
    out
}

fn items(field: &str, rules: &Map<String, Value>) -> Option<Vec<FieldSpec>> {
    let value = rules.get("items")?;
    let Some(descriptions) = value.as_array() else {
        dropped(field, "items");
        return None;
    };
    // Positional rules are all-or-nothing: one unsupported entry would shift the rest.
    let compiled: Option<Vec<FieldSpec>> = descriptions
        .iter()
        .enumerate()
        .map(|(idx, description)| compile_field(&format!("{field}[{idx}]"), description))
        .collect();
    if compiled.is_none() {
        dropped(field, "items");
    }
    compiled
}
