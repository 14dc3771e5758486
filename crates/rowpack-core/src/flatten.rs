//! Flattening statically-typed values back into schema-less records.
//!
//! This is the inverse end of the bridge: anything that implements
//! `serde::Serialize` can be turned into a [`Record`], with nested composite
//! members recursively flattened into nested records. The serializer walks
//! the value's shape, so reference and ownership indirection (`&T`,
//! `Box<T>`, ...) is transparent and the produced record never aliases the
//! source value's storage.
//!
//! [`record_from_row`] is the row-side companion used by the columnar
//! reader: it pairs a decoded [`Row`] with its [`Schema`] to rebuild the
//! record shape.
//!
//! Timestamps serialize as RFC 3339 strings, so a `DateTime` member comes
//! back as a string field; that canonical-string normalization is the
//! documented round-trip behavior, not a defect.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use snafu::prelude::*;

use crate::record::{Record, Value};
use crate::row::Row;
use crate::schema::Schema;

/// Errors raised while flattening a value into a record.
#[derive(Debug, Snafu)]
pub enum FlattenError {
    /// The value could not be serialized at all.
    #[snafu(display("value is not serializable: {source}"))]
    Serialize {
        /// The underlying serialization error.
        source: serde_json::Error,
    },

    /// The top-level value was not a struct/map shape.
    #[snafu(display("expected a struct-like value, got {kind}"))]
    NotAStruct {
        /// The shape that was actually found.
        kind: String,
    },

    /// A member's shape has no record counterpart (sequence or null).
    #[snafu(display("member {key} has unsupported shape {kind}"))]
    UnsupportedMember {
        /// The member name.
        key: String,
        /// The shape that was actually found.
        kind: String,
    },
}

/// A convenience alias for flatten results.
pub type FlattenResult<T> = Result<T, FlattenError>;

/// Flatten any serializable value into a [`Record`].
///
/// Each member's declared name becomes a record key; composite members
/// become nested records, recursively, terminating once no composites
/// remain. Sequences and nulls have no record shape and are rejected.
pub fn flatten<T>(value: &T) -> FlattenResult<Record>
where
    T: Serialize + ?Sized,
{
    let json = serde_json::to_value(value).context(SerializeSnafu)?;
    match json {
        JsonValue::Object(members) => record_from_members(members),
        other => NotAStructSnafu {
            kind: json_kind(&other),
        }
        .fail(),
    }
}

/// Rebuild a [`Record`] from a decoded row and the schema it conforms to.
///
/// Field names come from the schema (external names, not normalized
/// identifiers); values are copied out of the row slots.
pub fn record_from_row(schema: &Schema, row: &Row) -> Record {
    schema
        .fields()
        .iter()
        .zip(row.values())
        .map(|(field, value)| (field.name.clone(), value.clone()))
        .collect()
}

fn record_from_members(members: Map<String, JsonValue>) -> FlattenResult<Record> {
    let mut record = Record::new();
    for (key, member) in members {
        let value = match member {
            JsonValue::Bool(v) => Value::Bool(v),
            JsonValue::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Value::Int(v)
                } else if let Some(v) = n.as_f64() {
                    Value::Float(v)
                } else {
                    return UnsupportedMemberSnafu {
                        key,
                        kind: "number out of range".to_string(),
                    }
                    .fail();
                }
            }
            JsonValue::String(v) => Value::Str(v),
            JsonValue::Object(nested) => Value::Record(record_from_members(nested)?),
            other => {
                return UnsupportedMemberSnafu {
                    key,
                    kind: json_kind(&other),
                }
                .fail();
            }
        };
        record.insert(key, value);
    }
    Ok(record)
}

fn json_kind(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "sequence",
        JsonValue::Object(_) => "object",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::materialize;
    use crate::schema::Schema;

    #[derive(Serialize)]
    struct Tick {
        symbol: String,
        price: f64,
        size: i64,
        live: bool,
    }

    #[derive(Serialize)]
    struct Quote {
        symbol: String,
        best: Level,
    }

    #[derive(Serialize)]
    struct Level {
        bid: f64,
        ask: f64,
    }

    fn tick() -> Tick {
        Tick {
            symbol: "BTC".to_string(),
            price: 100.0,
            size: 3,
            live: true,
        }
    }

    #[test]
    fn members_become_record_fields() {
        let record = flatten(&tick()).unwrap();
        assert_eq!(record.get("symbol"), Some(&Value::Str("BTC".into())));
        assert_eq!(record.get("price"), Some(&Value::Float(100.0)));
        assert_eq!(record.get("size"), Some(&Value::Int(3)));
        assert_eq!(record.get("live"), Some(&Value::Bool(true)));
    }

    #[test]
    fn indirection_is_dereferenced() {
        let boxed = Box::new(tick());
        let direct = flatten(&tick()).unwrap();
        assert_eq!(flatten(&boxed).unwrap(), direct);
        assert_eq!(flatten(&&boxed).unwrap(), direct);
    }

    #[test]
    fn nested_composites_become_nested_records() {
        let quote = Quote {
            symbol: "BTC".to_string(),
            best: Level {
                bid: 99.5,
                ask: 100.5,
            },
        };

        let record = flatten(&quote).unwrap();
        let Some(Value::Record(best)) = record.get("best") else {
            panic!("best should flatten to a nested record");
        };
        assert_eq!(best.get("bid"), Some(&Value::Float(99.5)));
        assert_eq!(best.get("ask"), Some(&Value::Float(100.5)));
    }

    #[test]
    fn scalars_are_not_structs() {
        let err = flatten(&42_i64).unwrap_err();
        assert!(matches!(err, FlattenError::NotAStruct { kind } if kind == "number"));
    }

    #[test]
    fn sequences_are_rejected() {
        #[derive(Serialize)]
        struct WithSeq {
            items: Vec<i64>,
        }

        let err = flatten(&WithSeq { items: vec![1] }).unwrap_err();
        assert!(matches!(
            err,
            FlattenError::UnsupportedMember { key, .. } if key == "items"
        ));
    }

    #[test]
    fn flatten_materialize_flatten_is_identity() {
        let record = flatten(&tick()).unwrap();
        let schema = Schema::infer(&record).unwrap();
        let (row, issues) = materialize(&schema, &record);
        assert!(issues.is_empty());

        let again = record_from_row(&schema, &row);
        assert_eq!(again, record);
    }
}
