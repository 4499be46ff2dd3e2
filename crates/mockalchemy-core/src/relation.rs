use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cardinality of a declared relation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    /// The owner holds the foreign key pointing at the target.
    BelongsTo,
    /// Many target records hold a foreign key pointing at the owner.
    HasMany,
    /// One target record holds a foreign key pointing at the owner.
    HasOne,
}

/// Relation between two collections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub kind: RelationKind,
    /// Name of the related collection.
    pub target: String,
    /// Field carrying the foreign key. Lives on the owner for `belongsTo`,
    /// on the target for `hasMany`/`hasOne`.
    pub foreign_key: String,
    /// Field referenced by the foreign key.
    #[serde(default = "default_references")]
    pub references: String,
    /// Name the related value is exposed under; defaults to the relation name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessor: Option<String>,
}

/// Relations keyed by symbolic name, in declaration order.
pub type Relations = IndexMap<String, Relation>;

fn default_references() -> String {
    "id".to_string()
}

impl Relation {
    pub fn belongs_to(target: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::new(RelationKind::BelongsTo, target, foreign_key)
    }

    pub fn has_many(target: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::new(RelationKind::HasMany, target, foreign_key)
    }

    pub fn has_one(target: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::new(RelationKind::HasOne, target, foreign_key)
    }

    fn new(kind: RelationKind, target: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            foreign_key: foreign_key.into(),
            references: default_references(),
            accessor: None,
        }
    }

    pub fn with_references(mut self, field: impl Into<String>) -> Self {
        self.references = field.into();
        self
    }

    pub fn with_accessor(mut self, accessor: impl Into<String>) -> Self {
        self.accessor = Some(accessor.into());
        self
    }

    pub fn is_belongs_to(&self) -> bool {
        self.kind == RelationKind::BelongsTo
    }

    /// Accessor name, falling back to the relation's symbolic name.
    pub fn accessor_or<'a>(&'a self, name: &'a str) -> &'a str {
        self.accessor.as_deref().unwrap_or(name)
    }
}
