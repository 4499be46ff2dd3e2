//! Response shaping: join resolution, projection and aggregate metadata.
//!
//! Everything here is synchronous over a pre-fetched [`JoinContext`]; the
//! async part is only gathering the related collections from the registry.

use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Number, Value};

use mockalchemy_core::{
    AggregateKind, JoinRef, NodeKind, ObjectShape, Record, Relation, RelationKind, Relations,
    SchemaNode,
};

use crate::query::{Pagination, QueryResult, values_equal};
use crate::registry::Registry;

#[derive(Debug, Clone, Default)]
struct JoinTable {
    relations: Relations,
    records: Vec<Record>,
}

/// Snapshot of the collections a response schema's joins can reach.
#[derive(Debug, Clone, Default)]
pub struct JoinContext {
    tables: HashMap<String, JoinTable>,
}

impl JoinContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection: impl Into<String>, relations: Relations, records: Vec<Record>) {
        self.tables
            .insert(collection.into(), JoinTable { relations, records });
    }

    pub fn with_collection(
        mut self,
        collection: impl Into<String>,
        relations: Relations,
        records: Vec<Record>,
    ) -> Self {
        self.insert(collection, relations, records);
        self
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.tables.contains_key(collection)
    }

    /// Fetch the owner and every collection along the schema's join paths.
    pub async fn gather(registry: &Registry, owner: &str, schema: &SchemaNode) -> Self {
        let mut context = Self::new();
        let mut joins = Vec::new();
        collect_joins(schema, &mut joins);
        if joins.is_empty() {
            return context;
        }

        let mut pending: BTreeSet<String> = BTreeSet::from([owner.to_string()]);
        for join in joins {
            let mut current = owner.to_string();
            for segment in join.segments() {
                let Some(store) = registry.get(&current) else {
                    break;
                };
                let Some(relation) = store.relations().get(segment) else {
                    break;
                };
                pending.insert(relation.target.clone());
                current = relation.target.clone();
            }
        }

        for name in pending {
            if let Some(store) = registry.get(&name) {
                let records = store.to_array().await;
                context.insert(name, store.relations().clone(), records);
            }
        }
        context
    }

    fn relation(&self, collection: &str, name: &str) -> Option<&Relation> {
        self.tables.get(collection)?.relations.get(name)
    }

    fn records(&self, collection: &str) -> &[Record] {
        self.tables
            .get(collection)
            .map(|table| table.records.as_slice())
            .unwrap_or_default()
    }

    /// Follow a dotted relation path from `record` and pick the requested field.
    ///
    /// Unresolvable links produce `null`. A `hasMany` hop is only meaningful
    /// as the last segment and yields an array.
    pub fn resolve(&self, owner: &str, record: &Record, join: &JoinRef) -> Value {
        let segments: Vec<&str> = join.segments().collect();
        let mut collection = owner;
        let mut current = record;

        for (index, segment) in segments.iter().enumerate() {
            let Some(relation) = self.relation(collection, segment) else {
                return Value::Null;
            };
            let targets = self.records(&relation.target);
            match relation.kind {
                RelationKind::BelongsTo => {
                    let Some(key) = current.get(&relation.foreign_key) else {
                        return Value::Null;
                    };
                    match find_by(targets, &relation.references, key) {
                        Some(found) => current = found,
                        None => return Value::Null,
                    }
                }
                RelationKind::HasOne => {
                    let Some(key) = current.get(&relation.references) else {
                        return Value::Null;
                    };
                    match find_by(targets, &relation.foreign_key, key) {
                        Some(found) => current = found,
                        None => return Value::Null,
                    }
                }
                RelationKind::HasMany => {
                    if index + 1 != segments.len() {
                        return Value::Null;
                    }
                    let Some(key) = current.get(&relation.references) else {
                        return Value::Array(Vec::new());
                    };
                    let items = targets
                        .iter()
                        .filter(|target| {
                            target
                                .get(&relation.foreign_key)
                                .is_some_and(|value| values_equal(value, key))
                        })
                        .map(|target| pick(target, join.field.as_deref()))
                        .collect();
                    return Value::Array(items);
                }
            }
            collection = &relation.target;
        }

        pick(current, join.field.as_deref())
    }
}

fn find_by<'a>(records: &'a [Record], field: &str, key: &Value) -> Option<&'a Record> {
    records.iter().find(|record| {
        record
            .get(field)
            .is_some_and(|value| values_equal(value, key))
    })
}

fn pick(record: &Record, field: Option<&str>) -> Value {
    match field {
        Some(field) => record.get(field).cloned().unwrap_or(Value::Null),
        None => Value::Object(record.clone()),
    }
}

fn collect_joins<'a>(node: &'a SchemaNode, joins: &mut Vec<&'a JoinRef>) {
    match &node.kind {
        NodeKind::Join(join) => joins.push(join),
        NodeKind::Object(shape) => shape.values().for_each(|child| collect_joins(child, joins)),
        NodeKind::Array(array) => collect_joins(&array.element, joins),
        NodeKind::Primitive(_) | NodeKind::Aggregate(_) => {}
    }
}

/// Attach every top-level join field of `schema` to each record.
pub fn resolve_joins(
    records: &[Record],
    schema: &SchemaNode,
    owner: &str,
    context: &JoinContext,
) -> Vec<Record> {
    let Some(shape) = schema.shape() else {
        return records.to_vec();
    };
    let joins: Vec<(&String, &JoinRef)> = shape
        .iter()
        .filter_map(|(name, node)| match &node.kind {
            NodeKind::Join(join) => Some((name, join)),
            _ => None,
        })
        .collect();

    records
        .iter()
        .map(|record| {
            let mut resolved = record.clone();
            for (name, join) in &joins {
                resolved.insert((*name).clone(), context.resolve(owner, record, join));
            }
            resolved
        })
        .collect()
}

/// Keep only the fields declared by an object schema, in schema order.
pub fn project(records: &[Record], schema: &SchemaNode) -> Vec<Record> {
    match schema.shape() {
        Some(shape) => records
            .iter()
            .map(|record| project_record(record, shape))
            .collect(),
        None => records.to_vec(),
    }
}

fn project_record(record: &Record, shape: &ObjectShape) -> Record {
    let mut projected = Map::new();
    for (field, node) in shape {
        if let Some(value) = record.get(field) {
            projected.insert(field.clone(), project_value(value, node));
        }
    }
    projected
}

fn project_value(value: &Value, node: &SchemaNode) -> Value {
    match (&node.kind, value) {
        (NodeKind::Object(shape), Value::Object(object)) => {
            Value::Object(project_record(object, shape))
        }
        (NodeKind::Array(array), Value::Array(items)) => Value::Array(
            items
                .iter()
                .map(|item| project_value(item, &array.element))
                .collect(),
        ),
        _ => value.clone(),
    }
}

/// Joins then projection for an item schema.
pub fn shape_items(
    records: &[Record],
    schema: &SchemaNode,
    owner: &str,
    context: &JoinContext,
) -> Vec<Record> {
    project(&resolve_joins(records, schema, owner, context), schema)
}

/// Inputs of an envelope build.
pub struct EnvelopeInput<'a> {
    /// The requested page and its pagination context.
    pub page: &'a QueryResult,
    /// Every record of the collection; aggregates reduce over this.
    pub dataset: &'a [Record],
    pub owner: &'a str,
    pub joins: &'a JoinContext,
}

/// Walk an envelope schema and fill arrays, nested objects and aggregates.
/// Fields of any other kind are left for the caller.
pub fn build_envelope(schema: &SchemaNode, input: &EnvelopeInput<'_>) -> Value {
    match schema.shape() {
        Some(shape) => Value::Object(build_object(shape, input)),
        None => Value::Null,
    }
}

fn build_object(shape: &ObjectShape, input: &EnvelopeInput<'_>) -> Map<String, Value> {
    let mut object = Map::new();
    for (field, node) in shape {
        let value = match &node.kind {
            NodeKind::Array(array) => {
                let items = shape_items(&input.page.data, &array.element, input.owner, input.joins);
                Value::Array(items.into_iter().map(Value::Object).collect())
            }
            NodeKind::Object(inner) => Value::Object(build_object(inner, input)),
            NodeKind::Aggregate(kind) => {
                compute_aggregate(kind, input.dataset, &input.page.pagination)
            }
            NodeKind::Primitive(_) | NodeKind::Join(_) => continue,
        };
        object.insert(field.clone(), value);
    }
    object
}

/// Compute one aggregate. Pagination kinds read the context; the rest reduce
/// over `records`.
pub fn compute_aggregate(kind: &AggregateKind, records: &[Record], pagination: &Pagination) -> Value {
    match kind {
        AggregateKind::Page => Value::from(pagination.page),
        AggregateKind::Limit => Value::from(pagination.limit),
        AggregateKind::Total => Value::from(pagination.total),
        AggregateKind::TotalPages => Value::from(pagination.total_pages),
        AggregateKind::Sum(field) => number_value(lenient_values(records, field).sum()),
        AggregateKind::Avg(field) => {
            if records.is_empty() {
                return Value::from(0);
            }
            let sum: f64 = lenient_values(records, field).sum();
            number_value(sum / records.len() as f64)
        }
        AggregateKind::Min(field) => strict_values(records, field)
            .reduce(f64::min)
            .map(number_value)
            .unwrap_or(Value::Null),
        AggregateKind::Max(field) => strict_values(records, field)
            .reduce(f64::max)
            .map(number_value)
            .unwrap_or(Value::Null),
        AggregateKind::Count { field, value } => {
            let count = records
                .iter()
                .filter(|record| record.get(field).is_some_and(|found| render(found) == *value))
                .count();
            Value::from(count)
        }
    }
}

/// Non-numeric values count as zero.
fn lenient_values<'a>(records: &'a [Record], field: &'a str) -> impl Iterator<Item = f64> + 'a {
    records
        .iter()
        .map(move |record| record.get(field).and_then(Value::as_f64).unwrap_or(0.0))
}

/// Non-numeric values are skipped.
fn strict_values<'a>(records: &'a [Record], field: &'a str) -> impl Iterator<Item = f64> + 'a {
    records
        .iter()
        .filter_map(move |record| record.get(field).and_then(Value::as_f64))
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        return Value::from(value as i64);
    }
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::paginate;
    use serde_json::json;

    fn rows(values: Vec<Value>) -> Vec<Record> {
        values
            .into_iter()
            .filter_map(|value| value.as_object().cloned())
            .collect()
    }

    fn relations(entries: &[(&str, Relation)]) -> Relations {
        entries
            .iter()
            .map(|(name, relation)| (name.to_string(), relation.clone()))
            .collect()
    }

    fn shop() -> JoinContext {
        JoinContext::new()
            .with_collection(
                "companies",
                Relations::new(),
                rows(vec![json!({"id": "c1", "name": "Acme"})]),
            )
            .with_collection(
                "users",
                relations(&[
                    ("company", Relation::belongs_to("companies", "companyId")),
                    ("orders", Relation::has_many("orders", "userId")),
                ]),
                rows(vec![
                    json!({"id": "u1", "name": "Ada", "companyId": "c1"}),
                    json!({"id": "u2", "name": "Linus"}),
                ]),
            )
            .with_collection(
                "orders",
                relations(&[("user", Relation::belongs_to("users", "userId"))]),
                rows(vec![
                    json!({"id": "o1", "userId": "u1", "total": 10}),
                    json!({"id": "o2", "userId": "u1", "total": 20}),
                    json!({"id": "o3", "userId": "ghost", "total": 30}),
                ]),
            )
    }

    #[test]
    fn resolves_multi_hop_belongs_to_paths() {
        let context = shop();
        let order = &context.records("orders")[0];
        let join = JoinRef {
            relation: "user.company".to_string(),
            field: Some("name".to_string()),
        };
        assert_eq!(context.resolve("orders", order, &join), json!("Acme"));
    }

    #[test]
    fn has_many_yields_arrays() {
        let context = shop();
        let user = &context.records("users")[0];
        let join = JoinRef {
            relation: "orders".to_string(),
            field: Some("total".to_string()),
        };
        assert_eq!(context.resolve("users", user, &join), json!([10, 20]));
    }

    #[test]
    fn dangling_references_resolve_to_null() {
        let context = shop();
        let schema = SchemaNode::object([
            ("id", SchemaNode::string()),
            ("userName", SchemaNode::join("user", Some("name"))),
        ]);
        let shaped = shape_items(context.records("orders"), &schema, "orders", &context);
        assert_eq!(shaped[0], rows(vec![json!({"id": "o1", "userName": "Ada"})])[0]);
        assert_eq!(shaped[2]["userName"], Value::Null);
    }

    #[test]
    fn projection_follows_schema_order_and_nesting() {
        let records = rows(vec![json!({
            "zeta": 1,
            "id": "a",
            "profile": {"bio": "x", "age": 3, "secret": true},
            "extra": "dropped"
        })]);
        let schema = SchemaNode::object([
            ("id", SchemaNode::string()),
            ("missing", SchemaNode::string()),
            (
                "profile",
                SchemaNode::object([("age", SchemaNode::integer()), ("bio", SchemaNode::string())]),
            ),
            ("zeta", SchemaNode::integer()),
        ]);
        let projected = project(&records, &schema);
        let keys: Vec<&String> = projected[0].keys().collect();
        assert_eq!(keys, vec!["id", "profile", "zeta"]);
        let nested: Vec<&String> = projected[0]["profile"]
            .as_object()
            .expect("profile")
            .keys()
            .collect();
        assert_eq!(nested, vec!["age", "bio"]);
    }

    #[test]
    fn aggregates_ignore_the_requested_page() {
        let dataset = rows(vec![
            json!({"price": 10, "category": "a"}),
            json!({"price": 20, "category": "b"}),
            json!({"price": 30, "category": "a"}),
            json!({"price": "n/a", "category": "a"}),
        ]);
        let schema = SchemaNode::object([
            ("items", SchemaNode::array(SchemaNode::object([("price", SchemaNode::integer())]))),
            (
                "meta",
                SchemaNode::object([
                    ("avg", SchemaNode::aggregate(AggregateKind::Avg("price".to_string()))),
                    ("sum", SchemaNode::aggregate(AggregateKind::Sum("price".to_string()))),
                    ("min", SchemaNode::aggregate(AggregateKind::Min("price".to_string()))),
                    ("max", SchemaNode::aggregate(AggregateKind::Max("price".to_string()))),
                    (
                        "inA",
                        SchemaNode::aggregate(AggregateKind::Count {
                            field: "category".to_string(),
                            value: "a".to_string(),
                        }),
                    ),
                    ("page", SchemaNode::aggregate(AggregateKind::Page)),
                    ("totalPages", SchemaNode::aggregate(AggregateKind::TotalPages)),
                ]),
            ),
            ("note", SchemaNode::string()),
        ]);

        for (page, limit) in [(1, 1), (2, 2), (1, 10)] {
            let result = paginate(dataset.clone(), page, limit);
            let context = JoinContext::new();
            let envelope = build_envelope(
                &schema,
                &EnvelopeInput {
                    page: &result,
                    dataset: &dataset,
                    owner: "products",
                    joins: &context,
                },
            );
            assert_eq!(envelope["meta"]["avg"], json!(15));
            assert_eq!(envelope["meta"]["sum"], json!(60));
            assert_eq!(envelope["meta"]["min"], json!(10));
            assert_eq!(envelope["meta"]["max"], json!(30));
            assert_eq!(envelope["meta"]["inA"], json!(3));
            assert_eq!(envelope["meta"]["page"], json!(page));
            assert_eq!(envelope["items"].as_array().map(Vec::len), Some(result.data.len()));
            assert!(envelope.get("note").is_none());
        }
    }

    #[test]
    fn average_of_three_prices() {
        let dataset = rows(vec![json!({"price": 10}), json!({"price": 20}), json!({"price": 30})]);
        let pagination = paginate(dataset.clone(), 1, 2).pagination;
        let avg = compute_aggregate(&AggregateKind::Avg("price".to_string()), &dataset, &pagination);
        assert_eq!(avg, json!(20));
        let total = compute_aggregate(&AggregateKind::Total, &dataset, &pagination);
        assert_eq!(total, json!(3));
    }
}
