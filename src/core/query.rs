//! Purpose: Model the query parameters a resource controller sends with every list request.
//! Exports: `Projection`, `Sort`, `SortKey`, `Direction`, `QueryState`, `FindQuery`,
//! `QuerySignature`, `Timeouts`.
//! Role: Pure value types; rendering to Eve's `where`/`projection`/`sort`/`max_results`/`page`.
//! Invariants: A projection is either inclusive or exclusive, never both.
//! Invariants: Equal query states produce equal signatures.
use std::fmt;
use std::time::Duration;

use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use crate::core::error::{Error, ErrorKind};
use crate::core::schema::Document;

pub const DEFAULT_ITEMS_PER_PAGE: u64 = 25;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProjectionMode {
    Include,
    Exclude,
}

/// Field name to 0/1 mapping, as Eve expects in `?projection=`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Projection {
    fields: Map<String, Value>,
}

impl Projection {
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::uniform(fields, 1)
    }

    pub fn exclude<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::uniform(fields, 0)
    }

    fn uniform<I, S>(fields: I, flag: u8) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(|name| (name.into(), Value::from(flag)))
            .collect();
        Self { fields }
    }

    /// Accept `{"field": 0|1|true|false, ...}` and reject mixed projections.
    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let Some(map) = value.as_object() else {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("projection must be a mapping of field name to 0 or 1"));
        };
        let mut fields = Map::new();
        for (name, flag) in map {
            let flag = match flag {
                Value::Bool(true) => 1,
                Value::Bool(false) => 0,
                Value::Number(n) if n.as_u64() == Some(1) => 1,
                Value::Number(n) if n.as_u64() == Some(0) => 0,
                other => {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message(format!("projection value for '{name}' must be 0 or 1, got {other}")));
                }
            };
            fields.insert(name.clone(), Value::from(flag));
        }
        let projection = Self { fields };
        projection.mode()?;
        Ok(projection)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// `None` for an empty projection; a Usage error when inclusion and exclusion are mixed.
    /// `_id` is exempt from the mixing rule, as in Eve.
    pub fn mode(&self) -> Result<Option<ProjectionMode>, Error> {
        let mut mode = None;
        for (name, flag) in &self.fields {
            if name == "_id" {
                continue;
            }
            let this = if flag.as_u64() == Some(1) {
                ProjectionMode::Include
            } else {
                ProjectionMode::Exclude
            };
            match mode {
                None => mode = Some(this),
                Some(seen) if seen != this => {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message("projection cannot mix included and excluded fields")
                        .with_hint("Use only 1s or only 0s in a projection."));
                }
                Some(_) => {}
            }
        }
        if mode.is_none() && !self.fields.is_empty() {
            mode = self
                .fields
                .get("_id")
                .map(|flag| match flag.as_u64() {
                    Some(1) => ProjectionMode::Include,
                    _ => ProjectionMode::Exclude,
                });
        }
        Ok(mode)
    }

    /// Which of `names` the projection leaves visible.
    pub fn visible(&self, names: &[String]) -> Vec<String> {
        match self.mode() {
            Ok(Some(ProjectionMode::Include)) => names
                .iter()
                .filter(|name| self.fields.get(*name).and_then(Value::as_u64) == Some(1))
                .cloned()
                .collect(),
            Ok(Some(ProjectionMode::Exclude)) => names
                .iter()
                .filter(|name| !self.fields.contains_key(*name))
                .cloned()
                .collect(),
            _ => names.to_vec(),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

impl SortKey {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Descending,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Sort {
    keys: Vec<SortKey>,
}

impl Sort {
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys }
    }

    /// Parse `"a,-b"`: a leading `-` means descending.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let mut keys = Vec::new();
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let key = match part.strip_prefix('-') {
                Some(field) => SortKey::descending(field.trim()),
                None => SortKey::ascending(part.strip_prefix('+').unwrap_or(part).trim()),
            };
            if key.field.is_empty() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("invalid sort key '{part}'")));
            }
            keys.push(key);
        }
        Ok(Self { keys })
    }

    /// Build from `(field, direction)` pairs where direction is `1` or `-1`.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (S, i32)>,
        S: Into<String>,
    {
        let mut keys = Vec::new();
        for (field, direction) in pairs {
            let field = field.into();
            let key = match direction {
                1 => SortKey::ascending(field),
                -1 => SortKey::descending(field),
                other => {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message(format!("sort direction for '{field}' must be 1 or -1, got {other}")));
                }
            };
            keys.push(key);
        }
        Ok(Self { keys })
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, key) in self.keys.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            if key.direction == Direction::Descending {
                f.write_str("-")?;
            }
            f.write_str(&key.field)?;
        }
        Ok(())
    }
}

/// Hex digest identifying a query state; page caches are keyed by it.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct QuerySignature(String);

impl QuerySignature {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryState {
    pub filters: Document,
    pub projection: Projection,
    pub sort: Sort,
    pub items_per_page: u64,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            filters: Document::new(),
            projection: Projection::default(),
            sort: Sort::default(),
            items_per_page: DEFAULT_ITEMS_PER_PAGE,
        }
    }
}

impl QueryState {
    pub fn signature(&self) -> QuerySignature {
        let canonical = json!({
            "where": self.filters,
            "projection": self.projection.to_value(),
            "sort": self.sort.to_string(),
            "max_results": self.items_per_page,
        });
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        QuerySignature(digest.iter().map(|byte| format!("{byte:02x}")).collect())
    }

    pub fn find(&self, page: u64) -> FindQuery {
        FindQuery {
            filter: self.filters.clone(),
            projection: self.projection.clone(),
            sort: self.sort.clone(),
            max_results: self.items_per_page,
            page,
        }
    }
}

/// One list request against a collection.
#[derive(Clone, Debug, PartialEq)]
pub struct FindQuery {
    pub filter: Document,
    pub projection: Projection,
    pub sort: Sort,
    pub max_results: u64,
    pub page: u64,
}

impl Default for FindQuery {
    fn default() -> Self {
        QueryState::default().find(1)
    }
}

impl FindQuery {
    pub fn with_page(mut self, page: u64) -> Self {
        self.page = page;
        self
    }

    pub fn with_max_results(mut self, max_results: u64) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Query-string pairs in the order Eve documents them. Empty parts are omitted.
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if !self.filter.is_empty() {
            params.push(("where".to_string(), Value::Object(self.filter.clone()).to_string()));
        }
        if !self.projection.is_empty() {
            params.push(("projection".to_string(), self.projection.to_value().to_string()));
        }
        if !self.sort.is_empty() {
            params.push(("sort".to_string(), self.sort.to_string()));
        }
        params.push(("max_results".to_string(), self.max_results.to_string()));
        params.push(("page".to_string(), self.page.to_string()));
        params
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timeouts {
    pub base: Duration,
    pub per_item: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(10),
            per_item: Duration::from_millis(20),
        }
    }
}

impl Timeouts {
    /// Timeout for a request expected to carry `items` documents.
    pub fn for_items(&self, items: u64) -> Duration {
        let items = u32::try_from(items).unwrap_or(u32::MAX);
        let scaled = self.per_item.checked_mul(items).unwrap_or(Duration::MAX);
        self.base.saturating_add(scaled)
    }
}
