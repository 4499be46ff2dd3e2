use async_trait::async_trait;

use mockalchemy_core::{Record, SchemaNode};

use crate::errors::GenerationError;
use crate::foreign::FkPools;

/// Input of one seeding request.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub collection: &'a str,
    /// Object schema describing one record.
    pub schema: &'a SchemaNode,
    pub count: u32,
    /// Free-text hint; template generators ignore it.
    pub instruction: Option<&'a str>,
    /// Valid values per foreign-key field.
    pub pools: &'a FkPools,
}

/// Produces fake records for a collection schema.
///
/// Implementations must omit optional fields a quarter of the time and must
/// draw `uuid` fields that have a pool from that pool.
#[async_trait]
pub trait ValueGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Reject schemas this generator cannot serve before any seeding starts.
    fn validate(&self, _schema: &SchemaNode) -> Result<(), GenerationError> {
        Ok(())
    }

    async fn generate(&self, request: GenerateRequest<'_>)
    -> Result<Vec<Record>, GenerationError>;
}
