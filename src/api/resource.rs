//! Purpose: Controller for one remote collection: query state, paging, caching, bulk writes.
//! Exports: `Resource`, `Items`.
//! Role: Main entry point library users hold per collection.
//! Invariants: Any change to filters, projection, sort or page size clears the page cache.
//! Invariants: Derived controllers (`filter`, `project`, `sort`, `paginate`, `clone`) start
//! Invariants: with their own empty cache and never share pages with the original.
//! Invariants: Page navigation never goes below page 1 when moving backwards.
use serde_json::Value;
use tracing::{debug, info};

use super::endpoint::Endpoint;
use super::item::Item;
use super::orchestrator::PartitionSource;
use super::page::{Page, PageCache, PagePushReport};
use super::transport::ApiResult;
use super::validation::{InsertOptions, InsertOutcome, OutcomeBuilder};
use crate::core::error::{Error, ErrorKind};
use crate::core::partition::Partitions;
use crate::core::query::{FindQuery, Projection, QueryState, Sort};
use crate::core::schema::{BatchValidation, Document, Schema};

#[derive(Debug)]
pub struct Resource {
    name: String,
    title: String,
    item_title: String,
    endpoint: Endpoint,
    query: QueryState,
    page: u64,
    cache: PageCache,
}

impl Clone for Resource {
    fn clone(&self) -> Self {
        self.derive(self.query.clone())
    }
}

impl Resource {
    pub fn new(name: impl Into<String>, endpoint: Endpoint) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            item_title: name.clone(),
            name,
            endpoint,
            query: QueryState::default(),
            page: 1,
            cache: PageCache::default(),
        }
    }

    pub fn with_titles(mut self, title: impl Into<String>, item_title: impl Into<String>) -> Self {
        self.title = title.into();
        self.item_title = item_title.into();
        self
    }

    pub fn with_items_per_page(mut self, items_per_page: u64) -> ApiResult<Self> {
        self.set_items_per_page(items_per_page)?;
        Ok(self)
    }

    fn derive(&self, query: QueryState) -> Self {
        Self {
            name: self.name.clone(),
            title: self.title.clone(),
            item_title: self.item_title.clone(),
            endpoint: self.endpoint.clone(),
            query,
            page: self.page,
            cache: PageCache::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn item_title(&self) -> &str {
        &self.item_title
    }

    pub fn url(&self) -> &str {
        self.endpoint.url()
    }

    pub fn schema(&self) -> &Schema {
        self.endpoint.schema()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn query(&self) -> &QueryState {
        &self.query
    }

    pub fn filters(&self) -> &Document {
        &self.query.filters
    }

    pub fn projection(&self) -> &Projection {
        &self.query.projection
    }

    pub fn sorting(&self) -> &Sort {
        &self.query.sort
    }

    pub fn items_per_page(&self) -> u64 {
        self.query.items_per_page
    }

    pub fn page_number(&self) -> u64 {
        self.page
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    /// Schema fields left visible by the current projection.
    pub fn fields(&self) -> Vec<String> {
        self.query.projection.visible(&self.schema().names())
    }

    pub fn set_filters(&mut self, filters: Document) {
        self.query.filters = filters;
        self.cache.clear();
    }

    pub fn set_projection(&mut self, projection: Projection) -> ApiResult<()> {
        projection.mode()?;
        self.query.projection = projection;
        self.cache.clear();
        Ok(())
    }

    pub fn set_sort(&mut self, sort: Sort) {
        self.query.sort = sort;
        self.cache.clear();
    }

    pub fn set_items_per_page(&mut self, items_per_page: u64) -> ApiResult<()> {
        if items_per_page == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("items per page must be at least 1"));
        }
        self.query.items_per_page = items_per_page;
        self.cache.clear();
        Ok(())
    }

    pub fn filter(&self, filters: Document) -> Self {
        let mut query = self.query.clone();
        query.filters = filters;
        self.derive(query)
    }

    pub fn project(&self, projection: Projection) -> ApiResult<Self> {
        projection.mode()?;
        let mut query = self.query.clone();
        query.projection = projection;
        Ok(self.derive(query))
    }

    pub fn sort(&self, sort: Sort) -> Self {
        let mut query = self.query.clone();
        query.sort = sort;
        self.derive(query)
    }

    pub fn paginate(&self, items_per_page: u64) -> ApiResult<Self> {
        let mut derived = self.derive(self.query.clone());
        derived.set_items_per_page(items_per_page)?;
        Ok(derived)
    }

    pub fn set_page(&mut self, page: u64) {
        self.page = page;
    }

    pub fn next_page(&mut self) -> u64 {
        self.page = self.page.saturating_add(1);
        self.page
    }

    pub fn previous_page(&mut self) -> u64 {
        self.page = self.page.saturating_sub(1).max(1);
        self.page
    }

    pub fn current_page(&mut self) -> ApiResult<Page> {
        self.get_page(self.page)
    }

    /// Cached page `page`, fetched on a miss. Page 0 is always empty.
    pub fn get_page(&mut self, page: u64) -> ApiResult<Page> {
        let signature = self.query.signature();
        let fields = self.fields();
        let (endpoint, query, title) = (&self.endpoint, &self.query, &self.title);
        self.cache
            .get_or_fetch(page, &signature, |n| fetch_page(endpoint, title, query, fields, n))
    }

    /// Fetch `page` unconditionally and replace the cached copy.
    pub fn reload_page(&mut self, page: u64) -> ApiResult<Page> {
        self.cache.invalidate(page);
        let fetched = fetch_page(&self.endpoint, &self.title, &self.query, self.fields(), page)?;
        self.cache.store(page, &self.query.signature(), fetched.clone());
        Ok(fetched)
    }

    /// Refill the cache by walking pages from 1 until one comes back empty.
    pub fn pull(&mut self) -> ApiResult<usize> {
        self.cache.clear();
        let signature = self.query.signature();
        let fields = self.fields();
        let mut total = 0;
        let mut page = 1;
        loop {
            let fetched = fetch_page(&self.endpoint, &self.title, &self.query, fields.clone(), page)?;
            if fetched.is_empty() {
                break;
            }
            total += fetched.len();
            self.cache.store(page, &signature, fetched);
            page += 1;
        }
        info!(resource = self.name.as_str(), pages = page - 1, items = total, "pulled");
        Ok(total)
    }

    /// Push every item of page `page`, fetching it first when it is not cached.
    pub fn push_page(&mut self, page: u64) -> ApiResult<PagePushReport> {
        if !self.cache.contains(page) {
            self.get_page(page)?;
        }
        match self.cache.get_mut(page) {
            Some(cached) => cached.push(),
            None => Ok(PagePushReport::default()),
        }
    }

    /// Server-side count of documents matching the current filters.
    pub fn nitems(&self) -> ApiResult<u64> {
        self.endpoint.total(&self.query.filters)
    }

    pub fn partitions(&self) -> ApiResult<Partitions> {
        Partitions::new(self.query.items_per_page, self.nitems()?)
    }

    /// Snapshot of this controller for the partitioned fetch.
    pub fn partition_source(&self) -> PartitionSource {
        PartitionSource::new(self.endpoint.clone(), self.query.clone(), self.fields())
    }

    /// Run an ad-hoc query, independent of the controller's state and cache.
    pub fn find(&self, query: &FindQuery) -> ApiResult<Vec<Item>> {
        self.endpoint.find(query)
    }

    pub fn find_records(&self, query: &FindQuery) -> ApiResult<Vec<Document>> {
        let fields = query.projection.visible(&self.schema().names());
        Ok(self
            .find(query)?
            .iter()
            .map(|item| item.to_record(&fields))
            .collect())
    }

    pub fn get_item(&self, id: &str) -> ApiResult<Option<Item>> {
        match self.endpoint.fetch(id)? {
            Some(doc) => Item::construct(self.endpoint.clone(), doc).map(Some),
            None => Ok(None),
        }
    }

    pub fn new_item(&self, data: Document) -> ApiResult<Item> {
        Item::construct(self.endpoint.clone(), data)
    }

    /// Every matching item, fetched a page at a time with the current query.
    pub fn values(&self) -> Items {
        Items::new(self.endpoint.clone(), self.query.find(1))
    }

    pub fn keys(&self) -> impl Iterator<Item = ApiResult<String>> + use<> {
        let query = self.query.find(1).with_projection(Projection::include(["_id"]));
        Items::new(self.endpoint.clone(), query).map(|item| item.map(|item| item.id().to_string()))
    }

    pub fn items(&self) -> impl Iterator<Item = ApiResult<(String, Item)>> + use<> {
        self.values()
            .map(|item| item.map(|item| (item.id().to_string(), item)))
    }

    pub fn records(&self) -> impl Iterator<Item = ApiResult<Document>> + use<> {
        let fields = self.fields();
        self.values().map(move |item| item.map(|item| item.to_record(&fields)))
    }

    pub fn validate_documents(&self, docs: Vec<Document>, coerce: bool) -> BatchValidation {
        self.schema().validate_documents(docs, coerce)
    }

    /// Validate (optionally) and bulk-insert `docs`. Rejections from either side are
    /// reported per document, in input order.
    pub fn insert_documents(
        &mut self,
        docs: Vec<Document>,
        options: InsertOptions,
    ) -> ApiResult<InsertOutcome> {
        let mut builder = OutcomeBuilder::default();
        let mut to_post = Vec::with_capacity(docs.len());
        for (index, doc) in docs.into_iter().enumerate() {
            if !options.validate {
                to_post.push((index, doc));
                continue;
            }
            let validation = self.schema().validate(&doc, options.coerce);
            match validation.accepted {
                Some(accepted) => to_post.push((index, accepted)),
                None => builder.reject(index, doc, validation.errors),
            }
        }

        if options.dry_run || to_post.is_empty() {
            for (index, doc) in to_post {
                builder.accept(index, doc);
            }
            return Ok(builder.finish(None));
        }

        let body = Value::Array(
            to_post
                .iter()
                .map(|(_, doc)| Value::Object(doc.clone()))
                .collect(),
        );
        let timeout = self.endpoint.timeouts().for_items(to_post.len() as u64);
        let response = self
            .endpoint
            .transport()
            .post(self.endpoint.url(), &body, timeout)
            .map_err(|err| err.with_path(self.endpoint.url().to_string()))?;
        builder.apply_response(to_post, &response);
        if response.is_success() {
            self.cache.clear();
        }
        let outcome = builder.finish(Some(response.status));
        info!(
            resource = self.name.as_str(),
            status = response.status,
            accepted = outcome.accepted.len(),
            rejected = outcome.rejected.len(),
            "insert finished"
        );
        Ok(outcome)
    }
}

fn fetch_page(
    endpoint: &Endpoint,
    title: &str,
    query: &QueryState,
    fields: Vec<String>,
    page: u64,
) -> ApiResult<Page> {
    let name = format!("{title}:{page}");
    if page == 0 {
        return Ok(Page::empty(name, fields));
    }
    debug!(url = endpoint.url(), page, "fetching page");
    let items = endpoint.find(&query.find(page))?;
    Ok(Page::new(name, items, fields))
}

/// Lazy, page-at-a-time iterator over a query's items.
///
/// Stops at the first empty page. A transport failure is yielded once and ends iteration.
#[derive(Debug)]
pub struct Items {
    endpoint: Endpoint,
    query: FindQuery,
    buffer: std::vec::IntoIter<Item>,
    done: bool,
}

impl Items {
    fn new(endpoint: Endpoint, query: FindQuery) -> Self {
        Self {
            endpoint,
            query,
            buffer: Vec::new().into_iter(),
            done: false,
        }
    }
}

impl Iterator for Items {
    type Item = ApiResult<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.next() {
                return Some(Ok(item));
            }
            if self.done {
                return None;
            }
            match self.endpoint.find(&self.query) {
                Ok(items) if items.is_empty() => {
                    self.done = true;
                    return None;
                }
                Ok(items) => {
                    self.query.page += 1;
                    self.buffer = items.into_iter();
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Resource;
    use crate::api::endpoint::Endpoint;
    use crate::api::memory::MemoryStore;
    use crate::api::transport::{ApiResult, RemoteResponse, Transport};
    use crate::api::validation::InsertOptions;
    use crate::core::error::ErrorKind;
    use crate::core::query::{FindQuery, Projection, Sort, Timeouts};
    use crate::core::schema::{Document, Schema};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Counts list requests on top of a memory store.
    #[derive(Clone, Default)]
    struct Counting {
        store: MemoryStore,
        gets: Arc<AtomicUsize>,
    }

    impl Transport for Counting {
        fn get(&self, path: &str, params: &[(String, String)], timeout: Duration) -> ApiResult<RemoteResponse> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.store.get(path, params, timeout)
        }
        fn post(&self, path: &str, body: &Value, timeout: Duration) -> ApiResult<RemoteResponse> {
            self.store.post(path, body, timeout)
        }
        fn put(&self, path: &str, body: &Value, etag: Option<&str>, timeout: Duration) -> ApiResult<RemoteResponse> {
            self.store.put(path, body, etag, timeout)
        }
        fn patch(&self, path: &str, body: &Value, etag: Option<&str>, timeout: Duration) -> ApiResult<RemoteResponse> {
            self.store.patch(path, body, etag, timeout)
        }
        fn delete(&self, path: &str, etag: Option<&str>, timeout: Duration) -> ApiResult<RemoteResponse> {
            self.store.delete(path, etag, timeout)
        }
        fn detached(&self) -> Arc<dyn Transport> {
            Arc::new(self.clone())
        }
        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().expect("object")
    }

    fn people(count: usize) -> (Resource, Counting) {
        let transport = Counting::default();
        transport.store.register("people");
        let docs = (0..count)
            .map(|n| doc(json!({"name": format!("p{n:02}"), "age": n})))
            .collect();
        transport.store.seed("people", docs).expect("seed");
        let schema = Schema::from_value(&json!({
            "name": {"type": "string", "required": true},
            "age": {"type": "integer", "min": 0}
        }))
        .expect("schema");
        let endpoint = Endpoint::new("people", Arc::new(schema), Arc::new(transport.clone()), Timeouts::default());
        let resource = Resource::new("people", endpoint).with_items_per_page(10).expect("page size");
        (resource, transport)
    }

    #[test]
    fn pages_are_cached_until_query_changes() {
        let (mut resource, transport) = people(25);
        let first = resource.get_page(1).expect("page");
        assert_eq!(first.len(), 10);
        resource.get_page(1).expect("page");
        assert_eq!(transport.gets.load(Ordering::SeqCst), 1);

        resource.set_sort(Sort::parse("-age").expect("sort"));
        assert!(resource.cache().is_empty());
        let sorted = resource.get_page(1).expect("page");
        assert_eq!(sorted.items()[0].get("age"), Some(&json!(24)));
        assert_eq!(transport.gets.load(Ordering::SeqCst), 2);

        resource
            .set_projection(Projection::include(["name"]))
            .expect("projection");
        assert!(resource.cache().is_empty());
        resource.get_page(1).expect("page");
        assert_eq!(transport.gets.load(Ordering::SeqCst), 3);
        assert!(!resource.cache().is_empty());

        resource.set_items_per_page(5).expect("page size");
        assert!(resource.cache().is_empty());
        assert_eq!(resource.get_page(1).expect("page").len(), 5);
        assert_eq!(transport.gets.load(Ordering::SeqCst), 4);

        resource.set_filters(doc(json!({"age": {"$lt": 3}})));
        assert!(resource.cache().is_empty());
        assert_eq!(resource.get_page(1).expect("page").len(), 3);
    }

    #[test]
    fn sentinel_and_empty_pages() {
        let (mut resource, transport) = people(25);
        assert!(resource.get_page(0).expect("page").is_empty());
        assert_eq!(transport.gets.load(Ordering::SeqCst), 0);
        assert!(resource.get_page(4).expect("page").is_empty());
        assert!(!resource.cache().contains(4));
        assert_eq!(resource.get_page(3).expect("page").len(), 5);
    }

    #[test]
    fn navigation_clamps_at_first_page() {
        let (mut resource, _) = people(5);
        assert_eq!(resource.next_page(), 2);
        assert_eq!(resource.previous_page(), 1);
        assert_eq!(resource.previous_page(), 1);
        resource.set_page(0);
        assert_eq!(resource.previous_page(), 1);
        assert_eq!(resource.current_page().expect("page").len(), 5);
    }

    #[test]
    fn derived_controllers_have_their_own_cache() {
        let (mut resource, _) = people(25);
        resource.get_page(1).expect("page");
        let young = resource.filter(doc(json!({"age": {"$lt": 5}})));
        assert!(young.cache().is_empty());
        assert_eq!(young.nitems().expect("count"), 5);
        assert_eq!(resource.nitems().expect("count"), 25);
        assert_eq!(resource.cache().len(), 1);

        let narrow = resource.project(Projection::include(["name"])).expect("projection");
        assert_eq!(narrow.fields(), vec!["name"]);
        assert!(resource.project(Projection::from_value(&json!({"a": 1})).expect("p")).is_ok());
        assert_eq!(resource.paginate(0).expect_err("zero").kind(), ErrorKind::Usage);
        assert!(resource.clone().cache().is_empty());
    }

    #[test]
    fn iteration_walks_every_page() {
        let (resource, _) = people(23);
        let keys: Vec<String> = resource.keys().collect::<Result<_, _>>().expect("keys");
        assert_eq!(keys.len(), 23);
        let records: Vec<Document> = resource.records().collect::<Result<_, _>>().expect("records");
        assert_eq!(records[22]["name"], json!("p22"));
        // Restartable: a second pass sees the same items.
        assert_eq!(resource.values().count(), 23);
        let (_, item) = resource.items().next().expect("first").expect("item");
        assert_eq!(item.get("name"), Some(&json!("p00")));
    }

    #[test]
    fn empty_collection_iterates_nothing() {
        let (resource, _) = people(0);
        assert_eq!(resource.nitems().expect("count"), 0);
        assert_eq!(resource.values().count(), 0);
        assert_eq!(resource.partitions().expect("partitions").divisions(), vec![0]);
    }

    #[test]
    fn insert_splits_and_posts_valid_documents() {
        let (mut resource, transport) = people(0);
        resource.get_page(1).expect("page");
        let outcome = resource
            .insert_documents(
                vec![doc(json!({"name": "A", "age": 5})), doc(json!({"name": "B", "age": -1}))],
                InsertOptions::default(),
            )
            .expect("insert");
        assert_eq!(outcome.status, Some(201));
        assert_eq!(outcome.accepted.len(), 1);
        assert!(outcome.accepted[0].contains_key("_id"));
        assert_eq!(outcome.rejected, vec![doc(json!({"name": "B", "age": -1}))]);
        assert!(outcome.errors[0].contains_key("age"));
        assert_eq!(transport.store.len("people"), 1);
    }

    #[test]
    fn dry_run_and_unvalidated_inserts() {
        let (mut resource, transport) = people(0);
        let dry = resource
            .insert_documents(
                vec![doc(json!({"name": "A", "age": "5"}))],
                InsertOptions { coerce: true, dry_run: true, ..InsertOptions::default() },
            )
            .expect("dry run");
        assert_eq!(dry.status, None);
        assert_eq!(dry.accepted[0]["age"], json!(5));
        assert_eq!(transport.store.len("people"), 0);

        let raw = resource
            .insert_documents(
                vec![doc(json!({"name": "A", "age": -3}))],
                InsertOptions { validate: false, ..InsertOptions::default() },
            )
            .expect("insert");
        assert!(raw.is_complete());
        assert_eq!(transport.store.len("people"), 1);
    }

    #[test]
    fn pull_reload_and_push_page() {
        let (mut resource, _) = people(15);
        assert_eq!(resource.pull().expect("pull"), 15);
        assert_eq!(resource.cache().indices(), vec![1, 2]);

        let page = resource.reload_page(2).expect("reload");
        assert_eq!(page.len(), 5);
        let report = resource.push_page(2).expect("push");
        assert_eq!(report.pushed.len(), 5);
        assert!(report.is_complete());
    }

    #[test]
    fn single_items_and_direct_queries() {
        let (resource, _) = people(12);
        let found = resource
            .find(&FindQuery::default().with_max_results(3).with_page(2))
            .expect("find");
        assert_eq!(found.len(), 3);
        let id = found[0].id().to_string();
        let item = resource.get_item(&id).expect("get").expect("present");
        assert_eq!(item.get("name"), found[0].get("name"));
        assert!(resource.get_item("5f8d0d55b54764421b7156c3").expect("get").is_none());

        let records = resource
            .find_records(&FindQuery::default().with_projection(Projection::include(["age"])))
            .expect("records");
        assert_eq!(records[0].keys().collect::<Vec<_>>(), vec!["_id", "age"]);
    }
}
