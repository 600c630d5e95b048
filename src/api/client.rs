//! Purpose: Top-level client: a configured transport plus the domain of resource controllers.
//! Exports: `EveClient`.
//! Role: What the CLI and library users construct first; resolves resources by endpoint name.
//! Invariants: Every controller in the domain shares the client's transport and config.
#![allow(clippy::result_large_err)]

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use super::config::ClientConfig;
use super::domain::{Domain, ResourceDef};
use super::memory::MemoryStore;
use super::orchestrator::{PartitionedFrame, fetch_partitions};
use super::resource::Resource;
use super::transport::{ApiResult, Transport};

#[derive(Clone)]
pub struct EveClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    domain: Domain,
}

impl std::fmt::Debug for EveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EveClient")
            .field("transport", &self.transport.describe())
            .field("resources", &self.domain.names())
            .finish()
    }
}

impl EveClient {
    /// Talk to the server at `config.base_url`, with resources described by `settings`.
    pub fn connect(config: ClientConfig, settings: &Value) -> ApiResult<Self> {
        let transport: Arc<dyn Transport> = Arc::new(config.remote_client()?);
        Self::with_transport(config, transport, settings)
    }

    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        settings: &Value,
    ) -> ApiResult<Self> {
        let domain = Domain::from_settings(settings, Arc::clone(&transport), &config)?;
        info!(
            transport = transport.describe().as_str(),
            resources = domain.names().len(),
            "client ready"
        );
        Ok(Self {
            config,
            transport,
            domain,
        })
    }

    /// A client over a fresh in-process store with every resource URL registered.
    pub fn in_memory(config: ClientConfig, settings: &Value) -> ApiResult<(Self, MemoryStore)> {
        let store = MemoryStore::new();
        for def in ResourceDef::all_from_settings(settings)? {
            store.register(&def.url);
        }
        let client = Self::with_transport(config, Arc::new(store.clone()), settings)?;
        Ok((client, store))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn names(&self) -> Vec<String> {
        self.domain.names()
    }

    pub fn resource(&mut self, name: &str) -> ApiResult<&mut Resource> {
        self.domain.require(name)
    }

    /// Partitioned fetch of `name` with the configured worker count.
    pub fn fetch_partitions(&mut self, name: &str) -> ApiResult<PartitionedFrame> {
        let workers = self.config.workers;
        let source = self.resource(name)?.partition_source();
        fetch_partitions(&source, workers)
    }
}
