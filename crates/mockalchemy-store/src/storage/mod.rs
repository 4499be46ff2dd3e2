//! Persistence port: best-effort mirroring of collection snapshots.
//!
//! The in-memory store is the source of truth. Backends mirror it and the
//! port absorbs every backend failure, so a failing disk or remote API never
//! fails (or rolls back) a CRUD operation.

mod atomic;
pub mod http;
pub mod local;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use mockalchemy_core::{GlobalConfig, Record, StorageKind, record_id};

use crate::errors::StorageResult;

pub use http::HttpBackend;
pub use local::LocalFileBackend;
pub use memory::MemoryBackend;

/// One persistence backend keyed by collection name.
///
/// The incremental operations default to load, modify, `save_all`. That
/// sequence is not atomic: backends reachable from concurrent writers must
/// either serialize it themselves or override the three operations.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Persisted snapshot, or `None` when nothing was ever saved.
    async fn load(&self, collection: &str) -> StorageResult<Option<Vec<Record>>>;

    async fn save_all(&self, collection: &str, records: &[Record]) -> StorageResult<()>;

    async fn create_one(&self, collection: &str, record: &Record) -> StorageResult<()> {
        let mut records = self.load(collection).await?.unwrap_or_default();
        let id = record_id(record);
        records.retain(|existing| id.is_none() || record_id(existing) != id);
        records.push(record.clone());
        self.save_all(collection, &records).await
    }

    async fn update_one(&self, collection: &str, id: &str, record: &Record) -> StorageResult<()> {
        let mut records = self.load(collection).await?.unwrap_or_default();
        match records
            .iter_mut()
            .find(|existing| record_id(existing) == Some(id))
        {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        self.save_all(collection, &records).await
    }

    async fn delete_one(&self, collection: &str, id: &str) -> StorageResult<()> {
        let Some(mut records) = self.load(collection).await? else {
            return Ok(());
        };
        records.retain(|existing| record_id(existing) != Some(id));
        self.save_all(collection, &records).await
    }
}

/// Selects a backend per operation and swallows its failures.
#[derive(Clone)]
pub struct StoragePort {
    memory: Arc<MemoryBackend>,
    local: Option<Arc<dyn StorageBackend>>,
    cloud: Option<Arc<dyn StorageBackend>>,
}

impl Default for StoragePort {
    fn default() -> Self {
        Self::memory_only()
    }
}

impl StoragePort {
    pub fn memory_only() -> Self {
        Self {
            memory: Arc::new(MemoryBackend::new()),
            local: None,
            cloud: None,
        }
    }

    /// Port wired from global settings: local files under `data_dir`, plus a
    /// remote backend when `cloud_url` is set.
    pub fn from_config(config: &GlobalConfig) -> StorageResult<Self> {
        let mut port = Self::memory_only()
            .with_local(Arc::new(LocalFileBackend::new(config.data_dir.clone())));
        if let Some(url) = &config.cloud_url {
            let backend = HttpBackend::new(url, config.cloud_token.clone())?;
            port = port.with_cloud(Arc::new(backend));
        }
        Ok(port)
    }

    pub fn with_local(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    pub fn with_cloud(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.cloud = Some(backend);
        self
    }

    pub fn memory(&self) -> &MemoryBackend {
        &self.memory
    }

    fn backend(&self, kind: StorageKind) -> Option<&dyn StorageBackend> {
        match kind {
            StorageKind::Memory => Some(self.memory.as_ref()),
            StorageKind::Local => self.local.as_deref(),
            StorageKind::Cloud => self.cloud.as_deref(),
        }
    }

    fn resolve(&self, kind: StorageKind, collection: &str) -> Option<&dyn StorageBackend> {
        let backend = self.backend(kind);
        if backend.is_none() {
            warn!(
                collection,
                backend = kind.as_str(),
                "storage backend not configured; skipping"
            );
        }
        backend
    }

    /// Persisted records; failures read as "nothing persisted".
    pub async fn load(&self, kind: StorageKind, collection: &str) -> Option<Vec<Record>> {
        let backend = self.resolve(kind, collection)?;
        match backend.load(collection).await {
            Ok(records) => records,
            Err(err) => {
                warn!(
                    collection,
                    backend = backend.name(),
                    error = %err,
                    "storage load failed; treating as empty"
                );
                None
            }
        }
    }

    pub async fn save_all(&self, kind: StorageKind, collection: &str, records: &[Record]) {
        let Some(backend) = self.resolve(kind, collection) else {
            return;
        };
        let result = backend.save_all(collection, records).await;
        report(backend, collection, "save_all", result);
    }

    pub async fn create_one(&self, kind: StorageKind, collection: &str, record: &Record) {
        let Some(backend) = self.resolve(kind, collection) else {
            return;
        };
        let result = backend.create_one(collection, record).await;
        report(backend, collection, "create_one", result);
    }

    pub async fn update_one(&self, kind: StorageKind, collection: &str, id: &str, record: &Record) {
        let Some(backend) = self.resolve(kind, collection) else {
            return;
        };
        let result = backend.update_one(collection, id, record).await;
        report(backend, collection, "update_one", result);
    }

    pub async fn delete_one(&self, kind: StorageKind, collection: &str, id: &str) {
        let Some(backend) = self.resolve(kind, collection) else {
            return;
        };
        let result = backend.delete_one(collection, id).await;
        report(backend, collection, "delete_one", result);
    }
}

fn report(
    backend: &dyn StorageBackend,
    collection: &str,
    operation: &'static str,
    result: StorageResult<()>,
) {
    match result {
        Ok(()) => debug!(collection, backend = backend.name(), operation, "mirrored"),
        Err(err) => warn!(
            collection,
            backend = backend.name(),
            operation,
            error = %err,
            "storage mirror failed; in-memory state kept"
        ),
    }
}
