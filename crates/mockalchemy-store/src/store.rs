use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use mockalchemy_core::{
    CREATED_AT_FIELD, CollectionDefinition, GlobalConfig, ID_FIELD, Record, Relations, SchemaNode,
    StorageKind, UPDATED_AT_FIELD, resolve_config,
};
use mockalchemy_generate::{FkPools, GenerateRequest, ValueGenerator, enforce_pools};

use crate::clock::{Clock, new_record_id, parse_timestamp};
use crate::query::{Filter, QueryOptions, QueryResult, matches_filter, run_query};
use crate::registry::Registry;
use crate::storage::StoragePort;

/// Collaborators shared by every store of one engine.
#[derive(Clone)]
pub struct StoreServices {
    pub config: Arc<GlobalConfig>,
    pub generator: Arc<dyn ValueGenerator>,
    /// Tried once when `generator` fails.
    pub fallback: Option<Arc<dyn ValueGenerator>>,
    pub storage: StoragePort,
}

/// Lifecycle of a store. Never goes back once initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Initializing,
    Initialized,
}

impl InitState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => InitState::Uninitialized,
            1 => InitState::Initializing,
            _ => InitState::Initialized,
        }
    }
}

/// Where a store's initial records came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SeedSource {
    Persisted,
    Generated,
    Fallback,
    /// Every generator failed; the store starts empty.
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeedReport {
    pub collection: String,
    pub source: SeedSource,
    pub records: usize,
    /// Foreign-key values rewritten to stay inside their pools.
    pub repaired: usize,
    pub duration_ms: u64,
}

/// In-memory owner of one collection's records.
pub struct CollectionStore {
    definition: CollectionDefinition,
    seed_count: u32,
    storage_kind: StorageKind,
    default_limit: u32,
    services: Arc<StoreServices>,
    records: RwLock<IndexMap<String, Record>>,
    state: AtomicU8,
    seeded: OnceCell<SeedReport>,
    clock: Clock,
    registry: OnceLock<Weak<Registry>>,
}

impl std::fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionStore")
            .field("name", &self.definition.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

enum Admit {
    /// Keep the incoming id and overwrite a record holding it.
    Overwrite,
    /// Mint a new id when the incoming one is taken.
    Fresh,
}

impl CollectionStore {
    pub fn new(definition: CollectionDefinition, services: Arc<StoreServices>) -> Self {
        let resolved = resolve_config(&services.config, Some(&definition.config), None);
        let seed_count = definition
            .seed_count
            .unwrap_or(services.config.default_seed_count);
        Self {
            definition,
            seed_count,
            storage_kind: resolved.storage,
            default_limit: resolved.default_limit,
            services,
            records: RwLock::new(IndexMap::new()),
            state: AtomicU8::new(InitState::Uninitialized as u8),
            seeded: OnceCell::new(),
            clock: Clock::new(),
            registry: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &CollectionDefinition {
        &self.definition
    }

    pub fn schema(&self) -> &SchemaNode {
        &self.definition.schema
    }

    pub fn relations(&self) -> &Relations {
        &self.definition.relations
    }

    pub fn seed_count(&self) -> u32 {
        self.seed_count
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.storage_kind
    }

    pub fn state(&self) -> InitState {
        InitState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == InitState::Initialized
    }

    /// Report of the seeding run, once it happened.
    pub fn seed_report(&self) -> Option<&SeedReport> {
        self.seeded.get()
    }

    pub(crate) fn attach(&self, registry: Weak<Registry>) -> bool {
        self.registry.set(registry).is_ok()
    }

    /// Idempotent bootstrap.
    ///
    /// A registered store waits for the registry's coordinated pass. A store
    /// the pass did not cover seeds itself, with pools read from the live
    /// targets of its belongsTo relations.
    pub async fn initialize(&self) {
        if self.is_initialized() {
            return;
        }

        let registry = self.registry.get().and_then(Weak::upgrade);
        let pools = match registry {
            Some(registry) => {
                if let Err(err) = registry.initialize_all().await {
                    warn!(
                        collection = self.name(),
                        error = %err,
                        "coordinated initialization failed; seeding alone"
                    );
                }
                if self.is_initialized() {
                    return;
                }
                registry.live_pools(self.name(), self.relations()).await
            }
            None => FkPools::new(),
        };

        self.seed_once(pools).await;
    }

    pub(crate) fn initialize_boxed(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.initialize())
    }

    /// Seed at most once; later callers get the first run's report.
    pub(crate) async fn seed_once(&self, pools: FkPools) -> SeedReport {
        self.seeded
            .get_or_init(|| self.seed(pools))
            .await
            .clone()
    }

    async fn seed(&self, pools: FkPools) -> SeedReport {
        let started = Instant::now();
        self.state
            .store(InitState::Initializing as u8, Ordering::Release);

        let persisted = self
            .services
            .storage
            .load(self.storage_kind, self.name())
            .await
            .filter(|records| !records.is_empty());

        let (source, records, repaired) = match persisted {
            Some(records) => {
                let count = self.admit_all(records, Admit::Overwrite).await;
                (SeedSource::Persisted, count, 0)
            }
            None => {
                let (source, mut records) = self.generate(&pools).await;
                let repaired = {
                    let mut rng = rand::rng();
                    enforce_pools(&mut records, &pools, &mut rng)
                };
                let count = self.admit_all(records, Admit::Fresh).await;
                if source != SeedSource::Empty {
                    let snapshot = self.to_array_unchecked().await;
                    self.services
                        .storage
                        .save_all(self.storage_kind, self.name(), &snapshot)
                        .await;
                }
                (source, count, repaired)
            }
        };

        self.state
            .store(InitState::Initialized as u8, Ordering::Release);
        let report = SeedReport {
            collection: self.name().to_string(),
            source,
            records,
            repaired,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            collection = self.name(),
            source = ?report.source,
            records = report.records,
            repaired = report.repaired,
            duration_ms = report.duration_ms,
            "collection seeded"
        );
        report
    }

    async fn generate(&self, pools: &FkPools) -> (SeedSource, Vec<Record>) {
        let request = GenerateRequest {
            collection: self.name(),
            schema: &self.definition.schema,
            count: self.seed_count,
            instruction: self.definition.seed_instruction.as_deref(),
            pools,
        };

        let primary = &self.services.generator;
        let err = match primary.generate(request).await {
            Ok(records) => return (SeedSource::Generated, records),
            Err(err) => err,
        };
        warn!(
            collection = self.name(),
            generator = primary.name(),
            error = %err,
            "generation failed"
        );

        let Some(fallback) = &self.services.fallback else {
            return (SeedSource::Empty, Vec::new());
        };
        match fallback.generate(request).await {
            Ok(records) => (SeedSource::Fallback, records),
            Err(err) => {
                warn!(
                    collection = self.name(),
                    generator = fallback.name(),
                    error = %err,
                    "fallback generation failed; collection left empty"
                );
                (SeedSource::Empty, Vec::new())
            }
        }
    }

    async fn admit_all(&self, incoming: Vec<Record>, mode: Admit) -> usize {
        let mut records = self.records.write().await;
        for record in incoming {
            self.admit(&mut records, record, &mode);
        }
        records.len()
    }

    /// Normalize id and timestamps, then store.
    fn admit(&self, records: &mut IndexMap<String, Record>, mut record: Record, mode: &Admit) -> Record {
        let incoming = match record.get(ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        };
        let id = match (incoming, mode) {
            (Some(id), Admit::Overwrite) => id,
            (Some(id), Admit::Fresh) if !records.contains_key(&id) => id,
            _ => self.fresh_id(records),
        };
        record.insert(ID_FIELD.to_string(), Value::String(id.clone()));

        for field in [CREATED_AT_FIELD, UPDATED_AT_FIELD] {
            if let Some(ms) = record.get(field).and_then(Value::as_str).and_then(parse_timestamp) {
                self.clock.observe(ms);
            }
        }
        let created = match record.get(CREATED_AT_FIELD) {
            Some(Value::String(created)) => created.clone(),
            _ => {
                let now = self.clock.timestamp();
                record.insert(CREATED_AT_FIELD.to_string(), Value::String(now.clone()));
                now
            }
        };
        if !matches!(record.get(UPDATED_AT_FIELD), Some(Value::String(_))) {
            record.insert(UPDATED_AT_FIELD.to_string(), Value::String(created));
        }

        records.insert(id, record.clone());
        record
    }

    fn fresh_id(&self, records: &IndexMap<String, Record>) -> String {
        loop {
            let id = new_record_id(self.clock.tick());
            if !records.contains_key(&id) {
                return id;
            }
        }
    }

    /// New `updatedAt`, strictly after whatever the record carried.
    fn touch(&self, record: &mut Record) {
        if let Some(ms) = record
            .get(UPDATED_AT_FIELD)
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
        {
            self.clock.observe(ms);
        }
        record.insert(
            UPDATED_AT_FIELD.to_string(),
            Value::String(self.clock.timestamp()),
        );
    }

    pub async fn query(&self, options: &QueryOptions) -> QueryResult {
        self.query_with(options, self.default_limit).await
    }

    pub(crate) async fn query_with(&self, options: &QueryOptions, default_limit: u32) -> QueryResult {
        self.initialize().await;
        let records = self.to_array_unchecked().await;
        run_query(records, options, default_limit)
    }

    pub async fn find_by_id(&self, id: &str) -> Option<Record> {
        self.initialize().await;
        self.records.read().await.get(id).cloned()
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.initialize().await;
        self.records.read().await.contains_key(id)
    }

    pub async fn count(&self, filter: &Filter) -> usize {
        self.initialize().await;
        self.records
            .read()
            .await
            .values()
            .filter(|record| matches_filter(record, filter))
            .count()
    }

    /// Values of `field` across all records, nulls skipped.
    pub async fn field_values(&self, field: &str) -> Vec<Value> {
        self.records
            .read()
            .await
            .values()
            .filter_map(|record| record.get(field).filter(|value| !value.is_null()).cloned())
            .collect()
    }

    pub async fn insert(&self, record: Record) -> Record {
        self.insert_in(record, self.storage_kind).await
    }

    pub(crate) async fn insert_in(&self, record: Record, kind: StorageKind) -> Record {
        self.initialize().await;
        let stored = {
            let mut records = self.records.write().await;
            self.admit(&mut records, record, &Admit::Overwrite)
        };
        debug!(collection = self.name(), id = ?stored.get(ID_FIELD), "record inserted");
        self.services
            .storage
            .create_one(kind, self.name(), &stored)
            .await;
        stored
    }

    /// Shallow-merge `partial` into the record. `id` and `createdAt` cannot change.
    pub async fn update(&self, id: &str, partial: Record) -> Option<Record> {
        self.update_in(id, partial, self.storage_kind).await
    }

    pub(crate) async fn update_in(&self, id: &str, partial: Record, kind: StorageKind) -> Option<Record> {
        self.initialize().await;
        let updated = {
            let mut records = self.records.write().await;
            let existing = records.get_mut(id)?;
            let created = existing.get(CREATED_AT_FIELD).cloned();
            existing.extend(partial);
            self.pin_identity(existing, id, created);
            self.touch(existing);
            existing.clone()
        };
        self.services
            .storage
            .update_one(kind, self.name(), id, &updated)
            .await;
        Some(updated)
    }

    /// Swap the stored fields for `full`, keeping `id` and `createdAt`.
    pub async fn replace(&self, id: &str, full: Record) -> Option<Record> {
        self.replace_in(id, full, self.storage_kind).await
    }

    pub(crate) async fn replace_in(&self, id: &str, full: Record, kind: StorageKind) -> Option<Record> {
        self.initialize().await;
        let replaced = {
            let mut records = self.records.write().await;
            let existing = records.get_mut(id)?;
            let created = existing.get(CREATED_AT_FIELD).cloned();
            let previous_update = existing.remove(UPDATED_AT_FIELD);
            *existing = full;
            match previous_update {
                Some(previous) => existing.insert(UPDATED_AT_FIELD.to_string(), previous),
                None => existing.remove(UPDATED_AT_FIELD),
            };
            self.pin_identity(existing, id, created);
            self.touch(existing);
            existing.clone()
        };
        self.services
            .storage
            .update_one(kind, self.name(), id, &replaced)
            .await;
        Some(replaced)
    }

    fn pin_identity(&self, record: &mut Record, id: &str, created: Option<Value>) {
        record.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        match created {
            Some(created) => record.insert(CREATED_AT_FIELD.to_string(), created),
            None => record.remove(CREATED_AT_FIELD),
        };
    }

    /// True iff a record existed and was removed.
    pub async fn delete(&self, id: &str) -> bool {
        self.delete_in(id, self.storage_kind).await
    }

    pub(crate) async fn delete_in(&self, id: &str, kind: StorageKind) -> bool {
        self.initialize().await;
        let removed = self.records.write().await.shift_remove(id).is_some();
        if removed {
            self.services
                .storage
                .delete_one(kind, self.name(), id)
                .await;
        }
        removed
    }

    /// Drop every record and persist the empty state. The store stays initialized.
    pub async fn clear(&self) {
        self.initialize().await;
        self.records.write().await.clear();
        self.services
            .storage
            .save_all(self.storage_kind, self.name(), &[])
            .await;
    }

    pub async fn to_array(&self) -> Vec<Record> {
        self.initialize().await;
        self.to_array_unchecked().await
    }

    /// Snapshot without triggering initialization.
    pub(crate) async fn to_array_unchecked(&self) -> Vec<Record> {
        self.records.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockalchemy_core::SchemaNode;
    use mockalchemy_generate::{FakerGenerator, GenerationError};
    use serde_json::json;

    struct FailingGenerator;

    #[async_trait]
    impl ValueGenerator for FailingGenerator {
        fn name(&self) -> &str {
            "failing"
        }

        async fn generate(
            &self,
            _request: GenerateRequest<'_>,
        ) -> Result<Vec<Record>, GenerationError> {
            Err(GenerationError::Failed {
                generator: "failing".to_string(),
                message: "quota exhausted".to_string(),
            })
        }
    }

    fn services(
        generator: Arc<dyn ValueGenerator>,
        fallback: Option<Arc<dyn ValueGenerator>>,
    ) -> Arc<StoreServices> {
        Arc::new(StoreServices {
            config: Arc::new(GlobalConfig::default()),
            generator,
            fallback,
            storage: StoragePort::memory_only(),
        })
    }

    fn products(count: u32, services: Arc<StoreServices>) -> CollectionStore {
        let definition = CollectionDefinition::new(
            "products",
            SchemaNode::object([
                ("name", SchemaNode::string()),
                ("price", SchemaNode::number(1.0, 100.0)),
            ]),
        )
        .with_seed_count(count);
        CollectionStore::new(definition, services)
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().expect("object")
    }

    #[tokio::test]
    async fn unregistered_store_seeds_itself_once() {
        let store = products(5, services(Arc::new(FakerGenerator::seeded(1)), None));
        assert_eq!(store.state(), InitState::Uninitialized);

        store.initialize().await;
        store.initialize().await;
        assert_eq!(store.state(), InitState::Initialized);
        assert_eq!(store.to_array().await.len(), 5);

        let report = store.seed_report().expect("report");
        assert_eq!(report.source, SeedSource::Generated);
        for record in store.to_array().await {
            assert!(record[ID_FIELD].is_string());
            assert!(record[CREATED_AT_FIELD].is_string());
            assert_eq!(record[CREATED_AT_FIELD], record[UPDATED_AT_FIELD]);
        }
    }

    #[tokio::test]
    async fn failing_generator_falls_back_once() {
        let store = products(
            3,
            services(
                Arc::new(FailingGenerator),
                Some(Arc::new(FakerGenerator::seeded(2))),
            ),
        );
        store.initialize().await;
        let report = store.seed_report().expect("report");
        assert_eq!(report.source, SeedSource::Fallback);
        assert_eq!(report.records, 3);
    }

    #[tokio::test]
    async fn exhausted_generators_leave_an_initialized_empty_store() {
        let store = products(3, services(Arc::new(FailingGenerator), Some(Arc::new(FailingGenerator))));
        store.initialize().await;
        assert!(store.is_initialized());
        assert!(store.to_array().await.is_empty());
        assert_eq!(store.seed_report().map(|report| report.source), Some(SeedSource::Empty));
    }

    #[tokio::test]
    async fn persisted_snapshot_wins_over_generation() {
        let services = services(Arc::new(FakerGenerator::seeded(3)), None);
        services
            .storage
            .save_all(
                StorageKind::Memory,
                "products",
                &[record(json!({"id": "p1", "name": "Lamp", "createdAt": "2024-01-01T00:00:00.000Z"}))],
            )
            .await;
        let store = products(10, services);

        let all = store.to_array().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["id"], json!("p1"));
        assert_eq!(all[0][UPDATED_AT_FIELD], json!("2024-01-01T00:00:00.000Z"));
        assert_eq!(
            store.seed_report().map(|report| report.source),
            Some(SeedSource::Persisted)
        );
    }

    #[tokio::test]
    async fn insert_keeps_caller_id_and_overwrites() {
        let store = products(0, services(Arc::new(FakerGenerator::seeded(4)), None));
        store.insert(record(json!({"id": "p1", "name": "Lamp"}))).await;
        store.insert(record(json!({"id": "p1", "name": "Desk"}))).await;

        assert_eq!(store.count(&Filter::new()).await, 1);
        let found = store.find_by_id("p1").await.expect("p1");
        assert_eq!(found["name"], json!("Desk"));
    }

    #[tokio::test]
    async fn replace_clears_fields_missing_from_the_payload() {
        let store = products(0, services(Arc::new(FakerGenerator::seeded(5)), None));
        let created = store
            .insert(record(json!({"name": "Lamp", "price": 12})))
            .await;
        let id = created[ID_FIELD].as_str().expect("id").to_string();

        let replaced = store
            .replace(&id, record(json!({"name": "Desk"})))
            .await
            .expect("replaced");
        assert!(!replaced.contains_key("price"));
        assert_eq!(replaced[CREATED_AT_FIELD], created[CREATED_AT_FIELD]);
        assert!(replaced[UPDATED_AT_FIELD].as_str() > created[UPDATED_AT_FIELD].as_str());
    }

    #[tokio::test]
    async fn clear_persists_the_empty_state() {
        let store = products(4, services(Arc::new(FakerGenerator::seeded(6)), None));
        store.initialize().await;
        store.clear().await;

        assert!(store.is_initialized());
        assert!(store.to_array().await.is_empty());
        assert_eq!(
            store.services.storage.memory().snapshot("products"),
            Some(Vec::new())
        );
    }
}
