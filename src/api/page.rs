//! Purpose: One fetched page of items plus the per-controller page cache.
//! Exports: `Page`, `Table`, `PagePushReport`, `PageCache`.
//! Role: Pages are the unit of fetching, caching and tabular export.
//! Invariants: Page 0 is the empty sentinel and is never cached.
//! Invariants: Empty pages are never cached; the cache is dropped when the query signature changes.
use std::collections::BTreeMap;

use serde_json::{Value, json};
use tracing::debug;

use super::item::{Item, WriteOutcome};
use super::transport::ApiResult;
use crate::core::query::QuerySignature;
use crate::core::schema::Document;

#[derive(Clone, Debug, Default)]
pub struct Page {
    name: String,
    items: Vec<Item>,
    fields: Vec<String>,
}

/// Column-oriented view of a page, indexed by `_id`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub index: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// `{"columns": [...], "index": [...], "data": [[...], ...]}`
    pub fn to_value(&self) -> Value {
        json!({
            "columns": self.columns,
            "index": self.index,
            "data": self.rows,
        })
    }

    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|column| column == name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PagePushReport {
    pub pushed: Vec<String>,
    pub failed: Vec<(String, WriteOutcome)>,
}

impl PagePushReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Page {
    pub fn new(name: impl Into<String>, items: Vec<Item>, fields: Vec<String>) -> Self {
        Self {
            name: name.into(),
            items,
            fields,
        }
    }

    pub fn empty(name: impl Into<String>, fields: Vec<String>) -> Self {
        Self::new(name, Vec::new(), fields)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(Item::id).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Item> {
        self.items.iter_mut().find(|item| item.id() == id)
    }

    pub fn to_records(&self) -> Vec<Document> {
        self.items.iter().map(|item| item.to_record(&self.fields)).collect()
    }

    pub fn to_table(&self) -> Table {
        Table {
            columns: self.fields.clone(),
            index: self.items.iter().map(|item| item.id().to_string()).collect(),
            rows: self
                .items
                .iter()
                .map(|item| {
                    self.fields
                        .iter()
                        .map(|field| item.get(field).cloned().unwrap_or(Value::Null))
                        .collect()
                })
                .collect(),
        }
    }

    /// Push every item; one item's failure does not stop the others.
    pub fn push(&mut self) -> ApiResult<PagePushReport> {
        let mut report = PagePushReport::default();
        for item in &mut self.items {
            let outcome = item.push()?;
            if outcome.is_success() {
                report.pushed.push(item.id().to_string());
            } else {
                report.failed.push((item.id().to_string(), outcome));
            }
        }
        debug!(page = self.name.as_str(), pushed = report.pushed.len(), failed = report.failed.len(), "page pushed");
        Ok(report)
    }
}

/// Fetched pages keyed by page number, valid for one query signature.
#[derive(Clone, Debug, Default)]
pub struct PageCache {
    pages: BTreeMap<u64, Page>,
    signature: Option<QuerySignature>,
}

impl PageCache {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn contains(&self, page: u64) -> bool {
        self.pages.contains_key(&page)
    }

    pub fn indices(&self) -> Vec<u64> {
        self.pages.keys().copied().collect()
    }

    pub fn get(&self, page: u64) -> Option<&Page> {
        self.pages.get(&page)
    }

    pub fn get_mut(&mut self, page: u64) -> Option<&mut Page> {
        self.pages.get_mut(&page)
    }

    pub fn clear(&mut self) {
        if !self.pages.is_empty() {
            debug!(pages = self.pages.len(), "page cache cleared");
        }
        self.pages.clear();
        self.signature = None;
    }

    pub fn invalidate(&mut self, page: u64) -> Option<Page> {
        self.pages.remove(&page)
    }

    /// Store a page under `signature`. Empty pages and the sentinel are not kept.
    pub fn store(&mut self, page: u64, signature: &QuerySignature, content: Page) -> bool {
        self.adopt(signature);
        if page == 0 || content.is_empty() {
            return false;
        }
        self.pages.insert(page, content);
        true
    }

    /// Return the cached page, fetching and caching it on a miss.
    pub fn get_or_fetch<F>(
        &mut self,
        page: u64,
        signature: &QuerySignature,
        fetch: F,
    ) -> ApiResult<Page>
    where
        F: FnOnce(u64) -> ApiResult<Page>,
    {
        self.adopt(signature);
        if let Some(hit) = self.pages.get(&page) {
            return Ok(hit.clone());
        }
        let fetched = fetch(page)?;
        self.store(page, signature, fetched.clone());
        Ok(fetched)
    }

    fn adopt(&mut self, signature: &QuerySignature) {
        if self.signature.as_ref() != Some(signature) {
            self.clear();
            self.signature = Some(signature.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Page, PageCache};
    use crate::api::endpoint::Endpoint;
    use crate::api::item::Item;
    use crate::api::memory::MemoryStore;
    use crate::core::error::{Error, ErrorKind};
    use crate::core::query::{QueryState, Timeouts};
    use crate::core::schema::Schema;
    use serde_json::json;
    use std::cell::Cell;
    use std::sync::Arc;

    fn page_of(names: &[&str]) -> Page {
        let schema = Schema::from_value(&json!({"name": {"type": "string"}, "age": {"type": "integer"}}))
            .expect("schema");
        let endpoint = Endpoint::new("people", Arc::new(schema), Arc::new(MemoryStore::new()), Timeouts::default());
        let items = names
            .iter()
            .map(|name| {
                let doc = json!({"name": name, "age": name.len()}).as_object().cloned().expect("doc");
                Item::construct(endpoint.clone(), doc).expect("item")
            })
            .collect();
        Page::new("people:1", items, vec!["name".to_string(), "age".to_string()])
    }

    #[test]
    fn table_is_indexed_by_id() {
        let page = page_of(&["ann", "bo"]);
        let table = page.to_table();
        assert_eq!(table.columns, vec!["name", "age"]);
        assert_eq!(table.index, page.ids());
        assert_eq!(table.column("age"), Some(vec![&json!(3), &json!(2)]));
        assert_eq!(table.to_value()["data"][1][0], json!("bo"));
        let records = page.to_records();
        assert_eq!(records[0]["_id"], json!(page.ids()[0]));
    }

    #[test]
    fn cache_hits_skip_the_fetch() {
        let mut cache = PageCache::default();
        let signature = QueryState::default().signature();
        let calls = Cell::new(0);
        let fetch = |_: u64| {
            calls.set(calls.get() + 1);
            Ok(page_of(&["ann"]))
        };
        cache.get_or_fetch(1, &signature, fetch).expect("page");
        cache.get_or_fetch(1, &signature, fetch).expect("page");
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.indices(), vec![1]);
    }

    #[test]
    fn empty_pages_and_sentinel_are_not_cached() {
        let mut cache = PageCache::default();
        let signature = QueryState::default().signature();
        let page = cache
            .get_or_fetch(3, &signature, |_| Ok(Page::empty("people:3", Vec::new())))
            .expect("page");
        assert!(page.is_empty());
        assert!(!cache.store(0, &signature, page_of(&["ann"])));
        assert!(cache.is_empty());
    }

    #[test]
    fn signature_change_drops_cached_pages() {
        let mut cache = PageCache::default();
        let mut state = QueryState::default();
        cache.store(1, &state.signature(), page_of(&["ann"]));
        state.items_per_page = 5;
        cache
            .get_or_fetch(2, &state.signature(), |_| Ok(page_of(&["bo"])))
            .expect("page");
        assert_eq!(cache.indices(), vec![2]);
    }

    #[test]
    fn fetch_errors_propagate_without_caching() {
        let mut cache = PageCache::default();
        let signature = QueryState::default().signature();
        let err = cache
            .get_or_fetch(1, &signature, |_| Err(Error::new(ErrorKind::Connectivity)))
            .expect_err("err");
        assert!(err.is_connectivity());
        assert!(!cache.contains(1));
    }
}
