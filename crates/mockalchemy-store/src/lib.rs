//! In-memory collection engine.
//!
//! Stores own the records of one collection, the registry seeds them in
//! foreign-key order behind a shared barrier, the resolver shapes responses
//! and the facade exposes named CRUD operations. [`Engine`] wires it all.

pub mod clock;
pub mod collection;
pub mod engine;
pub mod errors;
pub mod query;
pub mod registry;
pub mod resolver;
pub mod storage;
pub mod store;

pub use collection::{Collection, Hook, HookContext, Hooks, Operation, default_list_response};
pub use engine::{Engine, EngineBuilder};
pub use errors::{StorageError, StoreError, StoreResult};
pub use query::{Filter, Pagination, QueryOptions, QueryResult, SortOrder};
pub use registry::{InitReport, Registry};
pub use resolver::{EnvelopeInput, JoinContext, build_envelope, compute_aggregate, project, resolve_joins};
pub use storage::{HttpBackend, LocalFileBackend, MemoryBackend, StorageBackend, StoragePort};
pub use store::{CollectionStore, InitState, SeedReport, SeedSource, StoreServices};
