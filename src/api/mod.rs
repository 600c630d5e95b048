//! Purpose: Define the public Rust API of the client.
//! Exports: Controllers, items, pages, transports and the core value types they use.
//! Role: Stable surface for library users and the CLI; internal module layout stays private.
//! Invariants: All remote access goes through the `Transport` trait.

mod client;
mod config;
mod domain;
mod endpoint;
mod item;
mod memory;
mod orchestrator;
mod page;
mod remote;
mod resource;
mod transport;
mod validation;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind, kind_from_status};
pub use crate::core::field::{FieldSpec, TypeTag};
pub use crate::core::partition::Partitions;
pub use crate::core::query::{
    Direction, FindQuery, Projection, ProjectionMode, QueryState, Sort, SortKey, Timeouts,
};
pub use crate::core::schema::{BatchValidation, Document, FieldErrors, Schema, Validation};
pub use client::EveClient;
pub use config::{ClientConfig, DEFAULT_BASE_URL, DEFAULT_WORKERS};
pub use domain::{Domain, ResourceDef};
pub use endpoint::Endpoint;
pub use item::{Item, WriteOutcome};
pub use memory::MemoryStore;
pub use orchestrator::{Partition, PartitionSource, PartitionedFrame, fetch_partitions};
pub use page::{Page, PageCache, PagePushReport, Table};
pub use remote::RemoteClient;
pub use resource::{Items, Resource};
pub use transport::{ApiResult, RemoteResponse, Transport};
pub use validation::{InsertOptions, InsertOutcome};
