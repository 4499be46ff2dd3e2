use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::Schema;
use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::error::{Error, Result};

/// Ordered field map of an object node.
pub type ObjectShape = IndexMap<String, SchemaNode>;

/// A node of the declarative schema tree.
///
/// On the wire a node is a flat JSON object tagged by `type`; in memory it is
/// a closed sum over primitive, object, array, join and aggregate kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct SchemaNode {
    pub kind: NodeKind,
    /// Optional fields may be omitted from generated records.
    pub optional: bool,
    pub description: Option<String>,
}

/// Kind of a schema node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Primitive(PrimitiveKind),
    Object(ObjectShape),
    Array(ArrayNode),
    /// Output-only field pulled from a related collection.
    Join(JoinRef),
    /// Output-only field computed from the dataset or pagination context.
    Aggregate(AggregateKind),
}

/// Leaf value kinds understood by the value generators.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveKind {
    String,
    /// Free text, generated as a short sentence.
    Text,
    Integer {
        min: Option<i64>,
        max: Option<i64>,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
        precision: Option<u32>,
    },
    Boolean,
    Uuid,
    Email,
    Date,
    DateTime,
    Enum {
        values: Vec<String>,
    },
    /// Faker catalog id such as `name.first_name` or `address.city`.
    Faker {
        template: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayNode {
    pub element: Box<SchemaNode>,
    pub min_items: Option<u32>,
    pub max_items: Option<u32>,
}

/// Join target: a dotted relation path plus an optional field of the related record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRef {
    pub relation: String,
    pub field: Option<String>,
}

impl JoinRef {
    /// Relation names along the path, owner side first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.relation.split('.').filter(|segment| !segment.is_empty())
    }
}

/// Aggregate metadata computed at response-build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateKind {
    Page,
    Limit,
    Total,
    TotalPages,
    Avg(String),
    Sum(String),
    Min(String),
    Max(String),
    /// Number of records whose field renders to the given token.
    Count { field: String, value: String },
}

impl SchemaNode {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            optional: false,
            description: None,
        }
    }

    pub fn primitive(kind: PrimitiveKind) -> Self {
        Self::new(NodeKind::Primitive(kind))
    }

    pub fn string() -> Self {
        Self::primitive(PrimitiveKind::String)
    }

    pub fn uuid() -> Self {
        Self::primitive(PrimitiveKind::Uuid)
    }

    pub fn integer() -> Self {
        Self::primitive(PrimitiveKind::Integer {
            min: None,
            max: None,
        })
    }

    pub fn number(min: f64, max: f64) -> Self {
        Self::primitive(PrimitiveKind::Number {
            min: Some(min),
            max: Some(max),
            precision: None,
        })
    }

    pub fn faker(template: impl Into<String>) -> Self {
        Self::primitive(PrimitiveKind::Faker {
            template: template.into(),
        })
    }

    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, SchemaNode)>,
        K: Into<String>,
    {
        Self::new(NodeKind::Object(
            fields
                .into_iter()
                .map(|(name, node)| (name.into(), node))
                .collect(),
        ))
    }

    pub fn array(element: SchemaNode) -> Self {
        Self::new(NodeKind::Array(ArrayNode {
            element: Box::new(element),
            min_items: None,
            max_items: None,
        }))
    }

    pub fn join(relation: impl Into<String>, field: Option<&str>) -> Self {
        Self::new(NodeKind::Join(JoinRef {
            relation: relation.into(),
            field: field.map(str::to_string),
        }))
    }

    pub fn aggregate(kind: AggregateKind) -> Self {
        Self::new(NodeKind::Aggregate(kind))
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn describe_as(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Discriminator string of the node, as written in definition files.
    pub fn schema_type(&self) -> &'static str {
        match &self.kind {
            NodeKind::Primitive(kind) => kind.type_tag(),
            NodeKind::Object(_) => "object",
            NodeKind::Array(_) => "array",
            NodeKind::Join(_) => "join",
            NodeKind::Aggregate(_) => "meta",
        }
    }

    pub fn shape(&self) -> Option<&ObjectShape> {
        match &self.kind {
            NodeKind::Object(shape) => Some(shape),
            _ => None,
        }
    }

    pub fn element(&self) -> Option<&SchemaNode> {
        match &self.kind {
            NodeKind::Array(array) => Some(&array.element),
            _ => None,
        }
    }

    /// True for fields that only exist in responses and are never generated or stored.
    pub fn is_output_only(&self) -> bool {
        matches!(self.kind, NodeKind::Join(_) | NodeKind::Aggregate(_))
    }

    /// An object schema describing a whole response rather than one record:
    /// it has an array-typed or aggregate-typed top-level field.
    pub fn is_envelope(&self) -> bool {
        self.shape().is_some_and(|shape| {
            shape
                .values()
                .any(|node| matches!(node.kind, NodeKind::Array(_) | NodeKind::Aggregate(_)))
        })
    }

    /// Compact, human readable type description (`{ name: string, age?: integer }`).
    pub fn describe(&self) -> String {
        match &self.kind {
            NodeKind::Primitive(kind) => kind.describe(),
            NodeKind::Object(shape) => {
                let fields: Vec<String> = shape
                    .iter()
                    .map(|(name, node)| {
                        let marker = if node.optional { "?" } else { "" };
                        format!("{name}{marker}: {}", node.describe())
                    })
                    .collect();
                format!("{{ {} }}", fields.join(", "))
            }
            NodeKind::Array(array) => format!("array<{}>", array.element.describe()),
            NodeKind::Join(join) => match &join.field {
                Some(field) => format!("join({}.{field})", join.relation),
                None => format!("join({})", join.relation),
            },
            NodeKind::Aggregate(kind) => format!("meta({kind})"),
        }
    }
}

impl PrimitiveKind {
    fn type_tag(&self) -> &'static str {
        match self {
            PrimitiveKind::String => "string",
            PrimitiveKind::Text => "text",
            PrimitiveKind::Integer { .. } => "integer",
            PrimitiveKind::Number { .. } => "number",
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Uuid => "uuid",
            PrimitiveKind::Email => "email",
            PrimitiveKind::Date => "date",
            PrimitiveKind::DateTime => "datetime",
            PrimitiveKind::Enum { .. } => "enum",
            PrimitiveKind::Faker { .. } => "faker",
        }
    }

    fn describe(&self) -> String {
        match self {
            PrimitiveKind::Enum { values } => format!("enum({})", values.join("|")),
            PrimitiveKind::Faker { template } => format!("faker({template})"),
            other => other.type_tag().to_string(),
        }
    }
}

impl AggregateKind {
    /// Field reduced by the aggregate, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            AggregateKind::Avg(field)
            | AggregateKind::Sum(field)
            | AggregateKind::Min(field)
            | AggregateKind::Max(field)
            | AggregateKind::Count { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateKind::Page => write!(f, "page"),
            AggregateKind::Limit => write!(f, "limit"),
            AggregateKind::Total => write!(f, "total"),
            AggregateKind::TotalPages => write!(f, "totalPages"),
            AggregateKind::Avg(field) => write!(f, "avg:{field}"),
            AggregateKind::Sum(field) => write!(f, "sum:{field}"),
            AggregateKind::Min(field) => write!(f, "min:{field}"),
            AggregateKind::Max(field) => write!(f, "max:{field}"),
            AggregateKind::Count { field, value } => write!(f, "count:{field}:{value}"),
        }
    }
}

impl FromStr for AggregateKind {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        let mut parts = tag.splitn(3, ':');
        let head = parts.next().unwrap_or_default();
        let field = parts.next().filter(|value| !value.is_empty());
        let value = parts.next();

        let kind = match (head, field, value) {
            ("page", None, None) => AggregateKind::Page,
            ("limit", None, None) => AggregateKind::Limit,
            ("total", None, None) => AggregateKind::Total,
            ("totalPages", None, None) => AggregateKind::TotalPages,
            ("avg", Some(field), None) => AggregateKind::Avg(field.to_string()),
            ("sum", Some(field), None) => AggregateKind::Sum(field.to_string()),
            ("min", Some(field), None) => AggregateKind::Min(field.to_string()),
            ("max", Some(field), None) => AggregateKind::Max(field.to_string()),
            ("count", Some(field), Some(value)) => AggregateKind::Count {
                field: field.to_string(),
                value: value.to_string(),
            },
            _ => {
                return Err(Error::InvalidSchema(format!(
                    "unknown aggregate tag '{tag}'"
                )));
            }
        };
        Ok(kind)
    }
}

/// Flat wire form of a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawNode {
    #[serde(rename = "type")]
    node_type: String,
    #[serde(default, skip_serializing_if = "is_false")]
    optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shape: Option<IndexMap<String, SchemaNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    element: Option<Box<SchemaNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_items: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_items: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    relation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    aggregate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    template: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl TryFrom<RawNode> for SchemaNode {
    type Error = Error;

    fn try_from(raw: RawNode) -> Result<Self> {
        let kind = match raw.node_type.as_str() {
            "string" => NodeKind::Primitive(PrimitiveKind::String),
            "text" => NodeKind::Primitive(PrimitiveKind::Text),
            "integer" => NodeKind::Primitive(PrimitiveKind::Integer {
                min: integer_bound(raw.min.as_ref(), "min")?,
                max: integer_bound(raw.max.as_ref(), "max")?,
            }),
            "number" => NodeKind::Primitive(PrimitiveKind::Number {
                min: raw.min.as_ref().and_then(Number::as_f64),
                max: raw.max.as_ref().and_then(Number::as_f64),
                precision: raw.precision,
            }),
            "boolean" => NodeKind::Primitive(PrimitiveKind::Boolean),
            "uuid" => NodeKind::Primitive(PrimitiveKind::Uuid),
            "email" => NodeKind::Primitive(PrimitiveKind::Email),
            "date" => NodeKind::Primitive(PrimitiveKind::Date),
            "datetime" => NodeKind::Primitive(PrimitiveKind::DateTime),
            "enum" => {
                let values = raw.values.unwrap_or_default();
                if values.is_empty() {
                    return Err(Error::InvalidSchema(
                        "enum node requires non-empty 'values'".to_string(),
                    ));
                }
                NodeKind::Primitive(PrimitiveKind::Enum { values })
            }
            "faker" => NodeKind::Primitive(PrimitiveKind::Faker {
                template: raw.template.ok_or_else(|| {
                    Error::InvalidSchema("faker node requires 'template'".to_string())
                })?,
            }),
            "object" => NodeKind::Object(raw.shape.unwrap_or_default()),
            "array" => NodeKind::Array(ArrayNode {
                element: raw.element.ok_or_else(|| {
                    Error::InvalidSchema("array node requires 'element'".to_string())
                })?,
                min_items: raw.min_items,
                max_items: raw.max_items,
            }),
            "join" => NodeKind::Join(JoinRef {
                relation: raw.relation.ok_or_else(|| {
                    Error::InvalidSchema("join node requires 'relation'".to_string())
                })?,
                field: raw.field,
            }),
            "meta" => {
                let tag = raw.aggregate.ok_or_else(|| {
                    Error::InvalidSchema("meta node requires 'aggregate'".to_string())
                })?;
                NodeKind::Aggregate(tag.parse()?)
            }
            other => {
                return Err(Error::InvalidSchema(format!(
                    "unknown node type '{other}'"
                )));
            }
        };

        Ok(SchemaNode {
            kind,
            optional: raw.optional,
            description: raw.description,
        })
    }
}

fn integer_bound(value: Option<&Number>, name: &str) -> Result<Option<i64>> {
    match value {
        None => Ok(None),
        Some(number) => number.as_i64().map(Some).ok_or_else(|| {
            Error::InvalidSchema(format!("integer '{name}' must be a whole number"))
        }),
    }
}

impl From<SchemaNode> for RawNode {
    fn from(node: SchemaNode) -> Self {
        let mut raw = RawNode {
            node_type: node.schema_type().to_string(),
            optional: node.optional,
            description: node.description,
            ..RawNode::default()
        };

        match node.kind {
            NodeKind::Primitive(PrimitiveKind::Integer { min, max }) => {
                raw.min = min.map(Number::from);
                raw.max = max.map(Number::from);
            }
            NodeKind::Primitive(PrimitiveKind::Number {
                min,
                max,
                precision,
            }) => {
                raw.min = min.and_then(Number::from_f64);
                raw.max = max.and_then(Number::from_f64);
                raw.precision = precision;
            }
            NodeKind::Primitive(PrimitiveKind::Enum { values }) => raw.values = Some(values),
            NodeKind::Primitive(PrimitiveKind::Faker { template }) => {
                raw.template = Some(template)
            }
            NodeKind::Primitive(_) => {}
            NodeKind::Object(shape) => raw.shape = Some(shape),
            NodeKind::Array(array) => {
                raw.element = Some(array.element);
                raw.min_items = array.min_items;
                raw.max_items = array.max_items;
            }
            NodeKind::Join(join) => {
                raw.relation = Some(join.relation);
                raw.field = join.field;
            }
            NodeKind::Aggregate(kind) => raw.aggregate = Some(kind.to_string()),
        }

        raw
    }
}

impl JsonSchema for SchemaNode {
    fn schema_name() -> String {
        "SchemaNode".to_string()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        RawNode::json_schema(generator)
    }
}
