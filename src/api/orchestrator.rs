//! Purpose: Fetch a whole collection as fixed-size partitions, one page per partition, in parallel.
//! Exports: `PartitionSource`, `Partition`, `PartitionedFrame`, `fetch_partitions`.
//! Role: Bulk export path; each worker pulls pages through its own detached transport.
//! Invariants: Partition `i` holds exactly the rows of page `i + 1` for the snapshot's query.
//! Invariants: A failed partition is kept as an empty partition with its error recorded.
//! Invariants: The only fatal error is failing to count the collection up front.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::endpoint::Endpoint;
use super::transport::ApiResult;
use crate::core::partition::Partitions;
use crate::core::query::QueryState;
use crate::core::schema::Document;

/// Everything a worker needs, copied out of a controller so workers share no mutable state.
#[derive(Clone, Debug)]
pub struct PartitionSource {
    endpoint: Endpoint,
    query: QueryState,
    fields: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Partition {
    pub index: usize,
    pub page: u64,
    pub rows: Vec<Document>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PartitionedFrame {
    pub columns: Vec<String>,
    pub divisions: Vec<u64>,
    pub nitems: u64,
    pub partitions: Vec<Partition>,
}

impl PartitionSource {
    pub fn new(endpoint: Endpoint, query: QueryState, fields: Vec<String>) -> Self {
        Self {
            endpoint,
            query,
            fields,
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn partitions(&self) -> ApiResult<Partitions> {
        let nitems = self.endpoint.total(&self.query.filters)?;
        Partitions::new(self.query.items_per_page, nitems)
    }

    /// Fetch one partition through `endpoint`; failures become an empty partition.
    pub fn fetch_partition(&self, endpoint: &Endpoint, index: usize, page: u64) -> Partition {
        match endpoint.find_strict(&self.query.find(page)) {
            Ok(items) => Partition {
                index,
                page,
                rows: items.iter().map(|item| item.to_record(&self.fields)).collect(),
                error: None,
            },
            Err(err) => {
                warn!(url = endpoint.url(), page, error = %err, "partition fetch failed");
                Partition {
                    index,
                    page,
                    rows: Vec::new(),
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

impl PartitionedFrame {
    pub fn npartitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn row_count(&self) -> usize {
        self.partitions.iter().map(|partition| partition.rows.len()).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.partitions.iter().all(|partition| partition.error.is_none())
    }

    pub fn failed(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter().filter(|partition| partition.error.is_some())
    }

    pub fn records(&self) -> impl Iterator<Item = &Document> {
        self.partitions.iter().flat_map(|partition| partition.rows.iter())
    }

    pub fn into_records(self) -> Vec<Document> {
        self.partitions
            .into_iter()
            .flat_map(|partition| partition.rows)
            .collect()
    }

    /// Summary without the rows.
    pub fn describe(&self) -> Value {
        let partitions: Vec<Value> = self
            .partitions
            .iter()
            .map(|partition| {
                json!({
                    "index": partition.index,
                    "page": partition.page,
                    "rows": partition.rows.len(),
                    "error": partition.error,
                })
            })
            .collect();
        json!({
            "columns": self.columns,
            "divisions": self.divisions,
            "nitems": self.nitems,
            "partitions": partitions,
        })
    }
}

/// Count the collection, then fetch every page on up to `workers` threads.
pub fn fetch_partitions(source: &PartitionSource, workers: usize) -> ApiResult<PartitionedFrame> {
    let partitions = source.partitions()?;
    let npartitions = partitions.len();
    let workers = workers.clamp(1, usize::try_from(npartitions).unwrap_or(usize::MAX).max(1));
    info!(
        url = source.endpoint.url(),
        nitems = partitions.nitems(),
        npartitions,
        workers,
        "fetching partitions"
    );

    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();
    thread::scope(|scope| {
        for worker in 0..workers {
            let tx = tx.clone();
            let next = &next;
            scope.spawn(move || {
                let endpoint = source.endpoint.detached();
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    if index as u64 >= npartitions {
                        break;
                    }
                    let page = index as u64 + 1;
                    debug!(worker, page, "worker fetching page");
                    if tx.send(source.fetch_partition(&endpoint, index, page)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(tx);

    let mut fetched: Vec<Partition> = rx.into_iter().collect();
    fetched.sort_by_key(|partition| partition.index);
    let frame = PartitionedFrame {
        columns: std::iter::once("_id".to_string())
            .chain(source.fields.iter().cloned())
            .collect(),
        divisions: partitions.divisions(),
        nitems: partitions.nitems(),
        partitions: fetched,
    };
    if !frame.is_complete() {
        warn!(failed = frame.failed().count(), "some partitions failed and are empty");
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::fetch_partitions;
    use crate::api::endpoint::Endpoint;
    use crate::api::memory::MemoryStore;
    use crate::api::resource::Resource;
    use crate::api::transport::{ApiResult, RemoteResponse, Transport};
    use crate::core::error::{Error, ErrorKind};
    use crate::core::query::Timeouts;
    use crate::core::schema::Schema;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::from_value(&json!({"n": {"type": "integer"}})).expect("schema"))
    }

    fn seeded(count: u64) -> MemoryStore {
        let store = MemoryStore::new();
        store.register("numbers");
        let docs = (0..count)
            .map(|n| json!({"n": n}).as_object().cloned().expect("doc"))
            .collect();
        store.seed("numbers", docs).expect("seed");
        store
    }

    fn resource(transport: Arc<dyn Transport>, per_page: u64) -> Resource {
        Resource::new("numbers", Endpoint::new("numbers", schema(), transport, Timeouts::default()))
            .with_items_per_page(per_page)
            .expect("page size")
    }

    #[test]
    fn partitions_match_pages_in_order() {
        let resource = resource(Arc::new(seeded(250)), 100);
        let frame = fetch_partitions(&resource.partition_source(), 3).expect("frame");
        assert_eq!(frame.divisions, vec![0, 100, 200, 250]);
        assert_eq!(frame.npartitions(), 3);
        assert_eq!(frame.row_count(), 250);
        assert!(frame.is_complete());
        assert_eq!(frame.columns, vec!["_id", "n"]);
        let sizes: Vec<usize> = frame.partitions.iter().map(|p| p.rows.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        let ns: Vec<Value> = frame.into_records().into_iter().map(|row| row["n"].clone()).collect();
        assert_eq!(ns, (0..250).map(Value::from).collect::<Vec<_>>());
    }

    #[test]
    fn empty_collection_yields_no_partitions() {
        let resource = resource(Arc::new(seeded(0)), 25);
        let frame = fetch_partitions(&resource.partition_source(), 4).expect("frame");
        assert_eq!(frame.divisions, vec![0]);
        assert_eq!(frame.npartitions(), 0);
    }

    /// Fails the list request for one page, passes everything else through.
    /// With `status` set the page answers that status, otherwise the connection drops.
    struct FailingPage {
        store: MemoryStore,
        page: &'static str,
        status: Option<u16>,
    }

    impl Transport for FailingPage {
        fn get(&self, path: &str, params: &[(String, String)], timeout: Duration) -> ApiResult<RemoteResponse> {
            if params.iter().any(|(k, v)| k == "page" && v == self.page)
                && params.iter().any(|(k, v)| k == "max_results" && v != "1")
            {
                return match self.status {
                    Some(status) => Ok(RemoteResponse::new(
                        status,
                        json!({"_status": "ERR", "_error": {"code": status, "message": "boom"}}),
                    )),
                    None => Err(Error::new(ErrorKind::Connectivity).with_message("connection reset")),
                };
            }
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
            Arc::new(Self {
                store: self.store.clone(),
                page: self.page,
                status: self.status,
            })
        }
        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    #[test]
    fn failed_partition_is_empty_and_reported() {
        let transport = FailingPage {
            store: seeded(30),
            page: "2",
            status: None,
        };
        let resource = resource(Arc::new(transport), 10);
        let frame = fetch_partitions(&resource.partition_source(), 2).expect("frame");
        assert_eq!(frame.npartitions(), 3);
        assert_eq!(frame.row_count(), 20);
        assert!(!frame.is_complete());
        let failed: Vec<u64> = frame.failed().map(|p| p.page).collect();
        assert_eq!(failed, vec![2]);
        assert!(frame.describe()["partitions"][1]["error"].is_string());
    }

    #[test]
    fn server_error_on_a_page_marks_the_partition_failed() {
        let transport = FailingPage {
            store: seeded(30),
            page: "2",
            status: Some(500),
        };
        let resource = resource(Arc::new(transport), 10);
        assert_eq!(resource.nitems().expect("count"), 30);
        let frame = fetch_partitions(&resource.partition_source(), 3).expect("frame");
        assert_eq!(frame.row_count(), 20);
        assert!(!frame.is_complete());
        let failed: Vec<u64> = frame.failed().map(|p| p.page).collect();
        assert_eq!(failed, vec![2]);
    }

    #[test]
    fn count_failure_is_fatal() {
        let transport = FailingPage {
            store: MemoryStore::new(),
            page: "1",
            status: None,
        };
        let resource = resource(Arc::new(transport), 10);
        let err = fetch_partitions(&resource.partition_source(), 2).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
