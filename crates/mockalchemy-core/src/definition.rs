use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::ConfigLayer;
use crate::error::{Error, Result};
use crate::graph::build_seed_graph_report;
use crate::relation::{RelationKind, Relations};
use crate::schema::{NodeKind, SchemaNode};

/// Declarative definition of one collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDefinition {
    /// Unique collection name, also the storage key.
    pub name: String,
    /// Object schema describing one record.
    pub schema: SchemaNode,
    /// Records generated when nothing is persisted; falls back to the global default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_count: Option<u32>,
    /// Free-text hint forwarded to the value generator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Relations::is_empty")]
    pub relations: Relations,
    /// Output schema for list responses (item schema or envelope).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_response: Option<SchemaNode>,
    /// Output schema for single-record responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_response: Option<SchemaNode>,
    #[serde(default, skip_serializing_if = "is_default_layer")]
    pub config: ConfigLayer,
}

fn is_default_layer(layer: &ConfigLayer) -> bool {
    *layer == ConfigLayer::default()
}

impl CollectionDefinition {
    pub fn new(name: impl Into<String>, schema: SchemaNode) -> Self {
        Self {
            name: name.into(),
            schema,
            seed_count: None,
            seed_instruction: None,
            relations: Relations::new(),
            list_response: None,
            item_response: None,
            config: ConfigLayer::default(),
        }
    }

    pub fn with_seed_count(mut self, count: u32) -> Self {
        self.seed_count = Some(count);
        self
    }

    pub fn with_relation(mut self, name: impl Into<String>, relation: crate::Relation) -> Self {
        self.relations.insert(name.into(), relation);
        self
    }

    pub fn with_list_response(mut self, schema: SchemaNode) -> Self {
        self.list_response = Some(schema);
        self
    }

    pub fn with_item_response(mut self, schema: SchemaNode) -> Self {
        self.item_response = Some(schema);
        self
    }
}

/// A definition file: every collection of one mock API.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DefinitionSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub collections: Vec<CollectionDefinition>,
}

impl DefinitionSet {
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn get(&self, name: &str) -> Option<&CollectionDefinition> {
        self.collections
            .iter()
            .find(|definition| definition.name == name)
    }

    /// Validate the set and return its seed order.
    pub fn validate(&self) -> Result<Vec<String>> {
        validate_definitions(&self.collections)
    }
}

/// Validate internal consistency of a set of collection definitions.
///
/// This checks:
/// - collection names are usable as storage keys
/// - duplicate collection names
/// - record schemas are objects
/// - relation targets exist and foreign key fields are declared
/// - join paths name declared relations
/// - the belongsTo graph is acyclic
///
/// Returns the seed order on success.
pub fn validate_definitions<'a, I>(definitions: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = &'a CollectionDefinition>,
{
    let definitions: Vec<&CollectionDefinition> = definitions.into_iter().collect();
    let mut names = BTreeSet::new();
    for definition in &definitions {
        check_collection_name(&definition.name)?;
        if !names.insert(definition.name.as_str()) {
            return Err(Error::Configuration(format!(
                "duplicate collection name: {}",
                definition.name
            )));
        }
    }

    let by_name: HashMap<&str, &CollectionDefinition> = definitions
        .iter()
        .map(|definition| (definition.name.as_str(), *definition))
        .collect();

    for definition in &definitions {
        let shape = definition.schema.shape().ok_or_else(|| {
            Error::Configuration(format!(
                "collection '{}' schema must be an object",
                definition.name
            ))
        })?;

        for (relation_name, relation) in &definition.relations {
            let target = by_name.get(relation.target.as_str()).ok_or_else(|| {
                Error::Configuration(format!(
                    "relation target not found: {}.{} -> {}",
                    definition.name, relation_name, relation.target
                ))
            })?;

            let fk_owner = match relation.kind {
                RelationKind::BelongsTo => *definition,
                RelationKind::HasMany | RelationKind::HasOne => *target,
            };
            let fk_declared = fk_owner
                .schema
                .shape()
                .is_some_and(|shape| shape.contains_key(&relation.foreign_key));
            if !fk_declared {
                return Err(Error::Configuration(format!(
                    "foreign key field not found: {}.{} ({}.{})",
                    definition.name, relation_name, fk_owner.name, relation.foreign_key
                )));
            }
        }

        if shape.values().any(SchemaNode::is_output_only) {
            return Err(Error::Configuration(format!(
                "collection '{}' record schema may not contain join or meta fields",
                definition.name
            )));
        }

        for response in [&definition.list_response, &definition.item_response]
            .into_iter()
            .flatten()
        {
            validate_joins(definition, response, &by_name)?;
        }
    }

    let report = build_seed_graph_report(
        definitions
            .iter()
            .map(|definition| (definition.name.as_str(), &definition.relations)),
    );
    match report.topo_order {
        Some(order) => Ok(order),
        None => Err(Error::Configuration(format!(
            "cyclic belongsTo relations between: {}",
            report.cycle.unwrap_or_default().join(", ")
        ))),
    }
}

/// Names double as snapshot file stems and URL segments.
fn check_collection_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::Configuration(
            "collection name must not be empty".to_string(),
        ));
    }
    if trimmed != name
        || name.contains(['/', '\\', '\0'])
        || name.contains("..")
    {
        return Err(Error::Configuration(format!(
            "invalid collection name '{name}'"
        )));
    }
    Ok(())
}

fn validate_joins(
    owner: &CollectionDefinition,
    node: &SchemaNode,
    by_name: &HashMap<&str, &CollectionDefinition>,
) -> Result<()> {
    match &node.kind {
        NodeKind::Object(shape) => {
            for child in shape.values() {
                validate_joins(owner, child, by_name)?;
            }
        }
        NodeKind::Array(array) => validate_joins(owner, &array.element, by_name)?,
        NodeKind::Join(join) => {
            let mut current = owner;
            for segment in join.segments() {
                let relation = current.relations.get(segment).ok_or_else(|| {
                    Error::Configuration(format!(
                        "join path '{}' names unknown relation '{}' on '{}'",
                        join.relation, segment, current.name
                    ))
                })?;
                current = by_name.get(relation.target.as_str()).ok_or_else(|| {
                    Error::Configuration(format!(
                        "relation target not found: {}.{} -> {}",
                        current.name, segment, relation.target
                    ))
                })?;
            }
        }
        NodeKind::Primitive(_) | NodeKind::Aggregate(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::Relation;

    fn users() -> CollectionDefinition {
        CollectionDefinition::new(
            "users",
            SchemaNode::object([("id", SchemaNode::uuid()), ("name", SchemaNode::string())]),
        )
    }

    fn orders() -> CollectionDefinition {
        CollectionDefinition::new(
            "orders",
            SchemaNode::object([("id", SchemaNode::uuid()), ("userId", SchemaNode::uuid())]),
        )
        .with_relation("user", Relation::belongs_to("users", "userId"))
    }

    #[test]
    fn returns_seed_order() {
        let definitions = [orders(), users()];
        let order = validate_definitions(&definitions).expect("valid definitions");
        assert_eq!(order, vec!["users", "orders"]);
    }

    #[test]
    fn rejects_unknown_relation_target() {
        let err = validate_definitions([&orders()]).expect_err("missing users");
        assert!(matches!(err, Error::Configuration(message) if message.contains("users")));
    }

    #[test]
    fn rejects_undeclared_foreign_key() {
        let orders = CollectionDefinition::new(
            "orders",
            SchemaNode::object([("id", SchemaNode::uuid())]),
        )
        .with_relation("user", Relation::belongs_to("users", "userId"));
        let definitions = [users(), orders];
        assert!(validate_definitions(&definitions).is_err());
    }

    #[test]
    fn rejects_join_on_unknown_relation() {
        let orders = orders().with_list_response(SchemaNode::object([(
            "customer",
            SchemaNode::join("customer", Some("name")),
        )]));
        let definitions = [users(), orders];
        let err = validate_definitions(&definitions).expect_err("unknown relation");
        assert!(err.to_string().contains("customer"));
    }

    #[test]
    fn rejects_names_that_escape_the_data_dir() {
        for name in ["", " ", "../x", "a/b", "a\\b", "..", "x..y", " users"] {
            let definition = CollectionDefinition::new(
                name,
                SchemaNode::object([("id", SchemaNode::uuid())]),
            );
            let err = validate_definitions([&definition]).expect_err(name);
            assert!(matches!(err, Error::Configuration(_)), "{name:?}");
        }

        let definition = CollectionDefinition::new(
            "order-items_v2.archive",
            SchemaNode::object([("id", SchemaNode::uuid())]),
        );
        assert!(validate_definitions([&definition]).is_ok());
    }

    #[test]
    fn loads_definition_file_json() {
        let set = DefinitionSet::from_json_str(
            r#"{
                "collections": [
                    {
                        "name": "users",
                        "seedCount": 3,
                        "schema": {"type": "object", "shape": {"name": {"type": "string"}}}
                    }
                ]
            }"#,
        )
        .expect("parse definitions");
        let users = set.get("users").expect("users");
        assert_eq!(users.seed_count, Some(3));
        assert!(users.relations.is_empty());
    }
}
