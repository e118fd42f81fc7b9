//! Conversion between backend property values and declared field types.
//!
//! Drivers hand back a narrow set of value kinds (integers widen to `i64`,
//! timestamps may arrive as integers, map fields are stored flattened as
//! `field.key`). These helpers reshape raw values into what the schema
//! declares, and flatten them back on the way out.

use std::collections::BTreeMap;

use super::{FieldType, PropertyDef};
use crate::model::ID_PROPERTY;
use crate::query::value::{Properties, Value};
use crate::types::{GraphError, Result};

/// Separator between a map field name and its key in backend properties.
pub const MAP_DELIMITER: char = '.';

/// Reshapes a raw driver value into the declared field type.
///
/// Values that cannot be converted are passed through unchanged. A whole
/// float outside the `i64` range is a schema error.
pub fn coerce(value: Value, field_type: &FieldType) -> Result<Value> {
    Ok(match (value, field_type) {
        (Value::Int(v), FieldType::Float) => Value::Float(v as f64),
        (Value::Float(v), FieldType::Int) if v.fract() == 0.0 => {
            // i64::MAX rounds up to 2^63 as a float, hence the open bound.
            if v < i64::MIN as f64 || v >= i64::MAX as f64 {
                return Err(GraphError::Schema(format!(
                    "{v} does not fit an integer field"
                )));
            }
            Value::Int(v as i64)
        }
        (Value::Int(v), FieldType::DateTime) => Value::DateTime(i128::from(v)),
        (Value::String(s), FieldType::Bytes) => Value::Bytes(s.into_bytes()),
        (Value::List(items), FieldType::Bytes) => {
            let bytes: Option<Vec<u8>> = items
                .iter()
                .map(|item| item.as_int().and_then(|b| u8::try_from(b).ok()))
                .collect();
            match bytes {
                Some(bytes) => Value::Bytes(bytes),
                None => Value::List(items),
            }
        }
        (Value::List(items), FieldType::List(inner)) => Value::List(
            items
                .into_iter()
                .map(|v| coerce(v, inner))
                .collect::<Result<_>>()?,
        ),
        (Value::Map(entries), FieldType::Map(inner)) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| Ok((k, coerce(v, inner)?)))
                .collect::<Result<_>>()?,
        ),
        (value, _) => value,
    })
}

/// True when a value may be stored in a field of the given type.
pub fn conforms(value: &Value, field_type: &FieldType) -> bool {
    match (value, field_type) {
        (_, FieldType::Any) | (Value::Null, _) => true,
        (Value::Bool(_), FieldType::Bool)
        | (Value::Int(_), FieldType::Int)
        | (Value::Int(_), FieldType::Float)
        | (Value::Float(_), FieldType::Float)
        | (Value::String(_), FieldType::String)
        | (Value::Bytes(_), FieldType::Bytes)
        | (Value::DateTime(_), FieldType::DateTime) => true,
        (Value::List(items), FieldType::List(inner)) => items.iter().all(|v| conforms(v, inner)),
        (Value::Map(entries), FieldType::Map(inner)) => entries.values().all(|v| conforms(v, inner)),
        _ => false,
    }
}

/// Flattens a map field into `name.key` backend properties.
pub fn flatten(name: &str, value: Value, out: &mut Properties) {
    match value {
        Value::Map(entries) => {
            for (key, entry) in entries {
                out.insert(format!("{name}{MAP_DELIMITER}{key}"), entry);
            }
        }
        other => {
            out.insert(name.to_owned(), other);
        }
    }
}

/// Turns raw backend properties into domain properties.
///
/// Undeclared keys and the reserved id mirror are dropped, flattened map
/// entries are regrouped, and every value is coerced to its declared type.
pub fn unflatten(raw: &Properties, declared: &[PropertyDef]) -> Result<Properties> {
    let by_name: BTreeMap<&str, &PropertyDef> =
        declared.iter().map(|def| (def.name.as_str(), def)).collect();
    let mut out = Properties::new();
    let mut grouped: BTreeMap<&str, BTreeMap<String, Value>> = BTreeMap::new();

    for (key, value) in raw {
        if key == ID_PROPERTY {
            continue;
        }
        if let Some((field, map_key)) = key.split_once(MAP_DELIMITER) {
            if let Some(def) = by_name.get(field) {
                if matches!(def.field_type, FieldType::Map(_)) {
                    grouped
                        .entry(def.name.as_str())
                        .or_default()
                        .insert(map_key.to_owned(), value.clone());
                }
            }
            continue;
        }
        if let Some(def) = by_name.get(key.as_str()) {
            out.insert(key.clone(), coerce(value.clone(), &def.field_type)?);
        }
    }

    for (field, entries) in grouped {
        if let Some(def) = by_name.get(field) {
            out.insert(field.to_owned(), coerce(Value::Map(entries), &def.field_type)?);
        }
    }
    Ok(out)
}
