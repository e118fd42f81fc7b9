//! Canonical value representation exchanged with drivers: statement
//! parameters, entity properties and result columns.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Property map of a node or relationship.
pub type Properties = BTreeMap<String, Value>;

/// Typed value tagged with explicit type information so the wire format remains
/// unambiguous across drivers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Null literal.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Signed 64-bit integer literal.
    Int(i64),
    /// 64-bit floating point literal.
    Float(f64),
    /// UTF-8 string literal.
    String(String),
    /// Arbitrary binary payload represented as bytes.
    Bytes(Vec<u8>),
    /// Nanoseconds since Unix epoch in UTC.
    #[serde(deserialize_with = "serde_datetime::deserialize")]
    DateTime(i128),
    /// Ordered collection of values.
    List(Vec<Value>),
    /// String-keyed collection of values.
    Map(BTreeMap<String, Value>),
    /// Node returned by the database.
    Node(NodeValue),
    /// Relationship returned by the database.
    Relationship(RelationshipValue),
    /// Alternating node/relationship path returned by the database.
    Path(PathValue),
}

/// Database node as it appears in a result row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeValue {
    /// Database identifier.
    pub id: i64,
    /// All labels carried by the node.
    pub labels: Vec<String>,
    /// Stored properties.
    pub properties: Properties,
}

/// Database relationship as it appears in a result row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationshipValue {
    /// Database identifier.
    pub id: i64,
    /// Relationship type.
    pub rel_type: String,
    /// Identifier of the start node.
    pub start: i64,
    /// Identifier of the end node.
    pub end: i64,
    /// Stored properties.
    pub properties: Properties,
}

/// Path made of `n` relationships and `n + 1` nodes, in traversal order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PathValue {
    /// Nodes in traversal order.
    pub nodes: Vec<NodeValue>,
    /// Relationships in traversal order; `relationships[i]` joins
    /// `nodes[i]` and `nodes[i + 1]` in either direction.
    pub relationships: Vec<RelationshipValue>,
}

impl Value {
    /// Returns the integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Looks up a key of a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// True for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::DateTime(_) => "datetime",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Node(_) => "node",
            Value::Relationship(_) => "relationship",
            Value::Path(_) => "path",
        }
    }
}

mod serde_datetime {
    use serde::de::{self, Deserializer, Visitor};
    use std::fmt;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i128, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DateTimeVisitor;

        impl<'de> Visitor<'de> for DateTimeVisitor {
            type Value = i128;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a string or number representing nanoseconds since Unix epoch")
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(value as i128)
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(value as i128)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value
                    .parse::<i128>()
                    .map_err(|err| E::custom(format!("invalid datetime literal '{value}': {err}")))
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                self.visit_str(&value)
            }
        }

        deserializer.deserialize_any(DateTimeVisitor)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Map(value)
    }
}
