use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime};
use rand::seq::IndexedRandom;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{Map, Number, Value};
use tracing::debug;

use mockalchemy_core::{NodeKind, PrimitiveKind, Record, SchemaNode};

use crate::catalog::{generate_template, has_template, template_for_field};
use crate::errors::GenerationError;
use crate::foreign::FkPools;
use crate::generator::{GenerateRequest, ValueGenerator};

/// Probability that an optional field is left out of a generated value.
pub const OPTIONAL_OMIT_RATE: f64 = 0.25;

const DEFAULT_INT_MIN: i64 = 0;
const DEFAULT_INT_MAX: i64 = 1000;
const DEFAULT_FLOAT_MIN: f64 = 0.0;
const DEFAULT_FLOAT_MAX: f64 = 1000.0;
const DEFAULT_PRECISION: u32 = 2;
const DEFAULT_MIN_ITEMS: u32 = 1;
const DEFAULT_MAX_ITEMS: u32 = 3;
const DATE_SPAN_DAYS: i64 = 365;

/// Template-driven generator backed by the `fake` crate.
#[derive(Debug, Clone, Default)]
pub struct FakerGenerator {
    seed: Option<u64>,
}

impl FakerGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic generator: equal seeds produce equal records per collection.
    pub fn seeded(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }

    fn rng_for(&self, collection: &str) -> ChaCha8Rng {
        match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(hash_seed(seed, collection)),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        }
    }

    /// Generate `count` records for an object schema.
    pub fn generate_records(
        &self,
        schema: &SchemaNode,
        count: u32,
        pools: &FkPools,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Record>, GenerationError> {
        let shape = schema.shape().ok_or_else(|| {
            GenerationError::InvalidSchema(format!(
                "record schema must be an object, got '{}'",
                schema.schema_type()
            ))
        })?;

        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut record = Map::new();
            for (field, node) in shape {
                if node.is_output_only() || omit_optional(node, rng) {
                    continue;
                }
                let value = match pool_for(node, field, pools) {
                    Some(pool) => pool.choose(rng).cloned().unwrap_or(Value::Null),
                    None => generate_value(node, field, rng)?,
                };
                record.insert(field.clone(), value);
            }
            records.push(record);
        }
        Ok(records)
    }
}

#[async_trait]
impl ValueGenerator for FakerGenerator {
    fn name(&self) -> &str {
        "faker"
    }

    fn validate(&self, schema: &SchemaNode) -> Result<(), GenerationError> {
        validate_templates(schema)
    }

    async fn generate(
        &self,
        request: GenerateRequest<'_>,
    ) -> Result<Vec<Record>, GenerationError> {
        let mut rng = self.rng_for(request.collection);
        let records = self.generate_records(request.schema, request.count, request.pools, &mut rng)?;
        debug!(
            collection = request.collection,
            records = records.len(),
            pools = request.pools.len(),
            "faker records generated"
        );
        Ok(records)
    }
}

/// Generate one value for a schema node; `field` names the value for heuristics.
pub fn generate_value(
    node: &SchemaNode,
    field: &str,
    rng: &mut dyn RngCore,
) -> Result<Value, GenerationError> {
    match &node.kind {
        NodeKind::Primitive(kind) => generate_primitive(kind, field, rng),
        NodeKind::Object(shape) => {
            let mut object = Map::new();
            for (name, child) in shape {
                if child.is_output_only() || omit_optional(child, rng) {
                    continue;
                }
                object.insert(name.clone(), generate_value(child, name, rng)?);
            }
            Ok(Value::Object(object))
        }
        NodeKind::Array(array) => {
            let min = array.min_items.unwrap_or(DEFAULT_MIN_ITEMS);
            let max = array.max_items.unwrap_or(DEFAULT_MAX_ITEMS.max(min)).max(min);
            let len = rng.random_range(min..=max);
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(generate_value(&array.element, field, rng)?);
            }
            Ok(Value::Array(items))
        }
        NodeKind::Join(_) | NodeKind::Aggregate(_) => Err(GenerationError::InvalidSchema(format!(
            "field '{field}' is output-only and cannot be generated"
        ))),
    }
}

fn generate_primitive(
    kind: &PrimitiveKind,
    field: &str,
    rng: &mut dyn RngCore,
) -> Result<Value, GenerationError> {
    let value = match kind {
        PrimitiveKind::String => {
            let template = template_for_field(field).unwrap_or("lorem.word");
            Value::String(render_template(template, rng)?)
        }
        PrimitiveKind::Text => Value::String(render_template("lorem.sentence", rng)?),
        PrimitiveKind::Integer { min, max } => {
            let (min, max) = ordered(
                min.unwrap_or(DEFAULT_INT_MIN),
                max.unwrap_or(DEFAULT_INT_MAX),
            );
            Value::from(rng.random_range(min..=max))
        }
        PrimitiveKind::Number {
            min,
            max,
            precision,
        } => {
            let min = min.unwrap_or(DEFAULT_FLOAT_MIN);
            let max = max.unwrap_or(DEFAULT_FLOAT_MAX);
            let (min, max) = if min <= max { (min, max) } else { (max, min) };
            let raw = if min == max {
                min
            } else {
                rng.random_range(min..=max)
            };
            let factor = 10_f64.powi(precision.unwrap_or(DEFAULT_PRECISION) as i32);
            let rounded = ((raw * factor).round() / factor).clamp(min, max);
            Number::from_f64(rounded)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        PrimitiveKind::Boolean => Value::Bool(rng.random_bool(0.5)),
        PrimitiveKind::Uuid => Value::String(random_uuid(rng)),
        PrimitiveKind::Email => Value::String(render_template("internet.email", rng)?),
        PrimitiveKind::Date => Value::String(random_date(rng).format("%Y-%m-%d").to_string()),
        PrimitiveKind::DateTime => {
            let seconds = rng.random_range(0..86_400);
            let time = NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0)
                .unwrap_or(NaiveTime::MIN);
            let timestamp = random_date(rng).and_time(time);
            Value::String(timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        }
        PrimitiveKind::Enum { values } => values
            .choose(rng)
            .map(|value| Value::String(value.clone()))
            .unwrap_or(Value::Null),
        PrimitiveKind::Faker { template } => Value::String(render_template(template, rng)?),
    };
    Ok(value)
}

/// Reject faker templates missing from the catalog anywhere in the tree.
pub fn validate_templates(node: &SchemaNode) -> Result<(), GenerationError> {
    match &node.kind {
        NodeKind::Primitive(PrimitiveKind::Faker { template }) if !has_template(template) => {
            Err(GenerationError::UnknownTemplate(template.clone()))
        }
        NodeKind::Object(shape) => shape.values().try_for_each(validate_templates),
        NodeKind::Array(array) => validate_templates(&array.element),
        _ => Ok(()),
    }
}

fn render_template(template: &str, rng: &mut dyn RngCore) -> Result<String, GenerationError> {
    generate_template(template, rng).ok_or_else(|| GenerationError::UnknownTemplate(template.to_string()))
}

fn pool_for<'a>(node: &SchemaNode, field: &str, pools: &'a FkPools) -> Option<&'a Vec<Value>> {
    match node.kind {
        NodeKind::Primitive(PrimitiveKind::Uuid) => {
            pools.get(field).filter(|pool| !pool.is_empty())
        }
        _ => None,
    }
}

fn omit_optional(node: &SchemaNode, rng: &mut dyn RngCore) -> bool {
    node.optional && rng.random_bool(OPTIONAL_OMIT_RATE)
}

fn ordered(min: i64, max: i64) -> (i64, i64) {
    if min <= max { (min, max) } else { (max, min) }
}

fn random_uuid(rng: &mut dyn RngCore) -> String {
    let bytes: [u8; 16] = rng.random();
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .to_string()
}

fn random_date(rng: &mut dyn RngCore) -> NaiveDate {
    let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default();
    base + Duration::days(rng.random_range(0..=DATE_SPAN_DAYS))
}

fn hash_seed(seed: u64, key: &str) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockalchemy_core::AggregateKind;
    use serde_json::json;

    fn product_schema() -> SchemaNode {
        SchemaNode::object([
            ("id", SchemaNode::uuid()),
            ("name", SchemaNode::faker("company.name")),
            ("price", SchemaNode::number(5.0, 50.0)),
            (
                "stock",
                SchemaNode::primitive(PrimitiveKind::Integer {
                    min: Some(1),
                    max: Some(3),
                }),
            ),
            ("note", SchemaNode::string().optional()),
            ("avgPrice", SchemaNode::aggregate(AggregateKind::Avg("price".to_string()))),
        ])
    }

    #[test]
    fn respects_numeric_bounds_and_skips_output_fields() {
        let generator = FakerGenerator::seeded(11);
        let mut rng = generator.rng_for("products");
        let records = generator
            .generate_records(&product_schema(), 50, &FkPools::new(), &mut rng)
            .expect("generate");

        assert_eq!(records.len(), 50);
        for record in &records {
            let price = record["price"].as_f64().expect("price");
            assert!((5.0..=50.0).contains(&price));
            let stock = record["stock"].as_i64().expect("stock");
            assert!((1..=3).contains(&stock));
            assert!(!record.contains_key("avgPrice"));
            assert!(record["id"].as_str().is_some());
        }
    }

    #[test]
    fn optional_fields_are_sometimes_omitted() {
        let generator = FakerGenerator::seeded(3);
        let mut rng = generator.rng_for("products");
        let records = generator
            .generate_records(&product_schema(), 200, &FkPools::new(), &mut rng)
            .expect("generate");

        let omitted = records.iter().filter(|r| !r.contains_key("note")).count();
        assert!(omitted > 0, "some optional values should be omitted");
        assert!(omitted < 200, "most optional values should be present");
    }

    #[test]
    fn uuid_fields_draw_from_pools() {
        let schema = SchemaNode::object([("id", SchemaNode::uuid()), ("userId", SchemaNode::uuid())]);
        let pools: FkPools = [("userId".to_string(), vec![json!("u1"), json!("u2")])]
            .into_iter()
            .collect();
        let generator = FakerGenerator::seeded(5);
        let mut rng = generator.rng_for("orders");
        let records = generator
            .generate_records(&schema, 30, &pools, &mut rng)
            .expect("generate");

        for record in &records {
            assert!(pools["userId"].contains(&record["userId"]));
        }
    }

    #[test]
    fn seeded_generation_is_deterministic() {
        let generator = FakerGenerator::seeded(42);
        let mut first_rng = generator.rng_for("products");
        let mut second_rng = generator.rng_for("products");
        let first = generator
            .generate_records(&product_schema(), 5, &FkPools::new(), &mut first_rng)
            .expect("generate");
        let second = generator
            .generate_records(&product_schema(), 5, &FkPools::new(), &mut second_rng)
            .expect("generate");
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_unknown_templates_up_front() {
        let schema = SchemaNode::object([(
            "tags",
            SchemaNode::array(SchemaNode::faker("commerce.color")),
        )]);
        let result = validate_templates(&schema);
        assert!(matches!(result, Err(GenerationError::UnknownTemplate(id)) if id == "commerce.color"));
    }

    #[test]
    fn non_object_record_schema_is_rejected() {
        let generator = FakerGenerator::seeded(1);
        let mut rng = generator.rng_for("tags");
        let result = generator.generate_records(&SchemaNode::string(), 1, &FkPools::new(), &mut rng);
        assert!(matches!(result, Err(GenerationError::InvalidSchema(_))));
    }
}
