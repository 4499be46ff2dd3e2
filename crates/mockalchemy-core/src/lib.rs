//! Core contracts shared by the mockalchemy crates.
//!
//! Defines the schema node tree, relation declarations, collection
//! definitions, layered configuration and the seed-order graph.

pub mod config;
pub mod definition;
pub mod error;
pub mod graph;
pub mod record;
pub mod relation;
pub mod schema;

pub use config::{ConfigLayer, GlobalConfig, ResolvedConfig, StorageKind, resolve_config};
pub use definition::{CollectionDefinition, DefinitionSet, validate_definitions};
pub use error::{Error, Result};
pub use graph::{SeedGraphReport, SeedGraphSummary, build_seed_graph_report};
pub use record::{CREATED_AT_FIELD, ID_FIELD, Record, UPDATED_AT_FIELD, record_id};
pub use relation::{Relation, RelationKind, Relations};
pub use schema::{AggregateKind, JoinRef, NodeKind, ObjectShape, PrimitiveKind, SchemaNode};

/// Current contract version for definition files.
pub const DEFINITION_VERSION: &str = "0.1";
