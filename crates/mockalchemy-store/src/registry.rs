use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use mockalchemy_core::{CollectionDefinition, Relations, build_seed_graph_report};
use mockalchemy_generate::{FkPools, KeyIndex};

use crate::errors::{StoreError, StoreResult};
use crate::store::{CollectionStore, SeedReport};

/// Outcome of the coordinated initialization pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitReport {
    pub order: Vec<String>,
    pub collections: Vec<SeedReport>,
    pub duration_ms: u64,
}

impl InitReport {
    pub fn get(&self, collection: &str) -> Option<&SeedReport> {
        self.collections
            .iter()
            .find(|report| report.collection == collection)
    }

    pub fn total_records(&self) -> usize {
        self.collections.iter().map(|report| report.records).sum()
    }
}

/// Name to store directory plus the one-shot initialization barrier.
#[derive(Debug, Default)]
pub struct Registry {
    stores: RwLock<IndexMap<String, Arc<CollectionStore>>>,
    pass: OnceCell<InitReport>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a store. Names are unique; a store joins at most one registry.
    pub fn register(self: &Arc<Self>, store: Arc<CollectionStore>) -> StoreResult<()> {
        let name = store.name().to_string();
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        if stores.contains_key(&name) {
            return Err(StoreError::Configuration(format!(
                "collection '{name}' is already registered"
            )));
        }
        if !store.attach(Arc::downgrade(self)) {
            return Err(StoreError::Configuration(format!(
                "collection '{name}' belongs to another registry"
            )));
        }
        stores.insert(name, store);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<CollectionStore>> {
        self.read().get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Stores in registration order.
    pub fn all(&self) -> Vec<Arc<CollectionStore>> {
        self.read().values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn definitions(&self) -> Vec<CollectionDefinition> {
        self.read()
            .values()
            .map(|store| store.definition().clone())
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<String, Arc<CollectionStore>>> {
        self.stores.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parents before children along belongsTo edges.
    ///
    /// Unknown targets and cycles (self references included) are
    /// configuration errors.
    pub fn compute_seed_order(&self) -> StoreResult<Vec<String>> {
        let stores = self.all();
        let report = build_seed_graph_report(
            stores
                .iter()
                .map(|store| (store.name(), store.relations())),
        );

        if let Some((collection, target)) = report.missing_targets.first() {
            return Err(StoreError::Configuration(format!(
                "relation target not found: {collection} -> {target}"
            )));
        }
        report.topo_order.ok_or_else(|| {
            StoreError::Configuration(format!(
                "cyclic belongsTo relations between: {}",
                report.cycle.unwrap_or_default().join(", ")
            ))
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.pass.initialized()
    }

    /// Run the coordinated seeding pass once.
    ///
    /// Concurrent callers await the same pass and never observe a partially
    /// seeded registry. A failed pass (bad configuration) is not cached.
    pub async fn initialize_all(&self) -> StoreResult<&InitReport> {
        self.pass.get_or_try_init(|| self.run_pass()).await
    }

    async fn run_pass(&self) -> StoreResult<InitReport> {
        let started = Instant::now();
        let order = self.compute_seed_order()?;
        let stores = self.all();
        let mut keys = KeyIndex::for_relations(stores.iter().map(|store| store.relations()));
        info!(collections = order.len(), order = ?order, "initializing collections");

        let mut collections = Vec::with_capacity(order.len());
        for name in &order {
            let Some(store) = self.get(name) else {
                continue;
            };
            let pools = keys.pools_for(store.relations());
            let report = store.seed_once(pools).await;
            keys.ingest(name, &store.to_array_unchecked().await);
            collections.push(report);
        }

        let report = InitReport {
            order,
            collections,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            collections = report.collections.len(),
            records = report.total_records(),
            duration_ms = report.duration_ms,
            "collections initialized"
        );
        Ok(report)
    }

    /// Pools from the current contents of each belongsTo target, for stores
    /// seeding outside the coordinated pass.
    pub(crate) async fn live_pools(&self, owner: &str, relations: &Relations) -> FkPools {
        let mut pools = FkPools::new();
        for relation in relations.values().filter(|relation| relation.is_belongs_to()) {
            if relation.target == owner {
                continue;
            }
            let Some(target) = self.get(&relation.target) else {
                warn!(
                    collection = owner,
                    target = %relation.target,
                    "relation target is not registered; foreign key left unconstrained"
                );
                continue;
            };
            target.initialize_boxed().await;
            let values = target.field_values(&relation.references).await;
            pools.insert(relation.foreign_key.clone(), values);
        }
        pools
    }
}
