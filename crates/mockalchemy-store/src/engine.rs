use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use mockalchemy_core::{CollectionDefinition, DefinitionSet, GlobalConfig, validate_definitions};
use mockalchemy_generate::{FakerGenerator, ValueGenerator};

use crate::collection::{Collection, Hooks};
use crate::errors::{StoreError, StoreResult};
use crate::registry::{InitReport, Registry};
use crate::storage::StoragePort;
use crate::store::{CollectionStore, StoreServices};

/// Collects definitions and collaborators, then validates everything at once.
pub struct EngineBuilder {
    config: GlobalConfig,
    definitions: Vec<CollectionDefinition>,
    generator: Option<Arc<dyn ValueGenerator>>,
    fallback: Option<Arc<dyn ValueGenerator>>,
    storage: Option<StoragePort>,
    hooks: HashMap<String, Hooks>,
}

impl EngineBuilder {
    pub fn new(config: GlobalConfig) -> Self {
        Self {
            config,
            definitions: Vec::new(),
            generator: None,
            fallback: None,
            storage: None,
            hooks: HashMap::new(),
        }
    }

    pub fn define(mut self, definition: CollectionDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn definitions(mut self, set: DefinitionSet) -> Self {
        self.definitions.extend(set.collections);
        self
    }

    /// Primary generator; defaults to [`FakerGenerator`] seeded from the config.
    pub fn generator(mut self, generator: Arc<dyn ValueGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn fallback_generator(mut self, generator: Arc<dyn ValueGenerator>) -> Self {
        self.fallback = Some(generator);
        self
    }

    /// Storage port; defaults to one wired from the config.
    pub fn storage(mut self, storage: StoragePort) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn hooks(mut self, collection: impl Into<String>, hooks: Hooks) -> Self {
        self.hooks.entry(collection.into()).or_default().extend(hooks);
        self
    }

    /// Validate the definition set and wire one store per collection.
    ///
    /// Unknown relation targets, undeclared foreign keys, cyclic belongsTo
    /// graphs and schemas the generator cannot serve fail here.
    pub fn build(self) -> StoreResult<Engine> {
        let order = validate_definitions(&self.definitions)?;

        let generator: Arc<dyn ValueGenerator> = match self.generator {
            Some(generator) => generator,
            None => Arc::new(match self.config.seed {
                Some(seed) => FakerGenerator::seeded(seed),
                None => FakerGenerator::new(),
            }),
        };
        for definition in &self.definitions {
            check_generator(generator.as_ref(), definition)?;
            if let Some(fallback) = &self.fallback {
                check_generator(fallback.as_ref(), definition)?;
            }
        }

        for collection in self.hooks.keys() {
            if !self.definitions.iter().any(|definition| &definition.name == collection) {
                return Err(StoreError::Configuration(format!(
                    "hooks registered for unknown collection '{collection}'"
                )));
            }
        }

        let storage = match self.storage {
            Some(storage) => storage,
            None => StoragePort::from_config(&self.config)?,
        };
        let config = Arc::new(self.config);
        let services = Arc::new(StoreServices {
            config: Arc::clone(&config),
            generator,
            fallback: self.fallback,
            storage,
        });

        let registry = Arc::new(Registry::new());
        for definition in self.definitions {
            registry.register(Arc::new(CollectionStore::new(
                definition,
                Arc::clone(&services),
            )))?;
        }
        info!(collections = order.len(), seed_order = ?order, "engine built");

        Ok(Engine {
            config,
            registry,
            services,
            hooks: RwLock::new(self.hooks),
        })
    }
}

fn check_generator(generator: &dyn ValueGenerator, definition: &CollectionDefinition) -> StoreResult<()> {
    generator.validate(&definition.schema).map_err(|err| {
        StoreError::Configuration(format!(
            "collection '{}' cannot be generated by '{}': {err}",
            definition.name,
            generator.name()
        ))
    })
}

/// Composition root: one registry, its stores and their collaborators.
pub struct Engine {
    config: Arc<GlobalConfig>,
    registry: Arc<Registry>,
    services: Arc<StoreServices>,
    hooks: RwLock<HashMap<String, Hooks>>,
}

impl Engine {
    pub fn builder(config: GlobalConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn storage(&self) -> &StoragePort {
        &self.services.storage
    }

    /// Add a collection to a live engine, validated against the registered ones.
    ///
    /// A collection added after initialization seeds itself on first access.
    pub fn define(&self, definition: CollectionDefinition) -> StoreResult<()> {
        let mut definitions = self.registry.definitions();
        definitions.push(definition.clone());
        validate_definitions(&definitions)?;
        check_generator(self.services.generator.as_ref(), &definition)?;
        if let Some(fallback) = &self.services.fallback {
            check_generator(fallback.as_ref(), &definition)?;
        }

        self.registry.register(Arc::new(CollectionStore::new(
            definition,
            Arc::clone(&self.services),
        )))
    }

    pub fn add_hooks(&self, collection: &str, hooks: Hooks) -> StoreResult<()> {
        if !self.registry.has(collection) {
            return Err(StoreError::Configuration(format!(
                "unknown collection '{collection}'"
            )));
        }
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection.to_string())
            .or_default()
            .extend(hooks);
        Ok(())
    }

    pub fn collection(&self, name: &str) -> StoreResult<Collection> {
        let store = self
            .registry
            .get(name)
            .ok_or_else(|| StoreError::Configuration(format!("unknown collection '{name}'")))?;
        let hooks = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_default();
        Ok(Collection::new(
            store,
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            hooks,
        ))
    }

    /// Seed every registered collection in dependency order, once.
    pub async fn initialize_all(&self) -> StoreResult<InitReport> {
        self.registry.initialize_all().await.cloned()
    }

    pub fn seed_order(&self) -> StoreResult<Vec<String>> {
        self.registry.compute_seed_order()
    }
}
