//! Runtime schema inference from a sample record.
//!
//! The upstream collectors produce schema-less [`Record`]s, but Parquet needs
//! a fixed, typed column layout. This module bridges the two: given one
//! sample record that is representative of a whole batch, [`Schema::infer`]
//! derives an ordered list of typed [`Field`] descriptors. The schema is
//! built once per write batch, reused for every record in the batch, and
//! discarded afterwards; the persisted file carries its own copy of the
//! layout in the Parquet footer.
//!
//! Field order follows the sample record's iteration order, which is
//! lexicographic by name (see the `record` module). Inference is therefore
//! deterministic across runs: the same sample always yields the same schema.
//!
//! Each field also carries a normalized title-case identifier. The row
//! materializer resolves incoming record keys against these identifiers, so
//! they must be unique; two names that collapse to the same identifier are
//! rejected at inference time.

use std::fmt;

use snafu::prelude::*;

use crate::record::{Record, Value};

/// The scalar column types this crate can persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    /// 64-bit signed integer, stored as Parquet `INT64`.
    Int64,
    /// 64-bit float, stored as Parquet `DOUBLE`.
    Float64,
    /// UTF-8 string, stored as Parquet `BYTE_ARRAY` with the `String`
    /// logical type.
    Utf8,
    /// Boolean, stored as Parquet `BOOLEAN`.
    Bool,
    /// UTC instant, stored as Parquet `INT64` annotated as a UTC-adjusted
    /// millisecond timestamp.
    Timestamp,
}

impl ScalarType {
    /// The zero value a row slot of this type starts from.
    pub fn zero_value(self) -> Value {
        match self {
            ScalarType::Int64 => Value::Int(0),
            ScalarType::Float64 => Value::Float(0.0),
            ScalarType::Utf8 => Value::Str(String::new()),
            ScalarType::Bool => Value::Bool(false),
            ScalarType::Timestamp => Value::Timestamp(chrono::DateTime::UNIX_EPOCH),
        }
    }

    /// The scalar type of a value, or `None` for nested records.
    pub fn of_value(value: &Value) -> Option<ScalarType> {
        match value {
            Value::Int(_) => Some(ScalarType::Int64),
            Value::Float(_) => Some(ScalarType::Float64),
            Value::Str(_) => Some(ScalarType::Utf8),
            Value::Bool(_) => Some(ScalarType::Bool),
            Value::Timestamp(_) => Some(ScalarType::Timestamp),
            Value::Record(_) => None,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarType::Int64 => "int64",
            ScalarType::Float64 => "float64",
            ScalarType::Utf8 => "utf8",
            ScalarType::Bool => "bool",
            ScalarType::Timestamp => "timestamp_ms",
        };
        f.write_str(name)
    }
}

/// Errors raised while inferring a schema from a sample record.
#[derive(Debug, Snafu)]
pub enum SchemaError {
    /// The sample record had no fields, so there is nothing to infer from.
    #[snafu(display("cannot infer a schema from an empty record"))]
    EmptyRecord,

    /// A field held a nested record, which has no scalar column shape.
    #[snafu(display("field {field} holds a nested record, which cannot be a column"))]
    UnsupportedValue {
        /// The name of the offending field.
        field: String,
    },

    /// Two field names normalized to the same identifier.
    #[snafu(display(
        "fields {first} and {second} both normalize to identifier {ident}"
    ))]
    DuplicateIdent {
        /// The colliding normalized identifier.
        ident: String,
        /// The field that claimed the identifier first.
        first: String,
        /// The field that collided with it.
        second: String,
    },
}

/// A convenience alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// One typed column descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// The external field name, exactly as it appears in records and in the
    /// persisted file.
    pub name: String,
    /// The normalized title-case identifier the materializer resolves record
    /// keys against. Unique within a schema.
    pub ident: String,
    /// The column's scalar type.
    pub data_type: ScalarType,
    /// Serialization metadata: external name, resolved type name, and the
    /// dictionary encoding hint.
    pub tag: String,
}

impl Field {
    /// Build a field descriptor for `name` with the given type, deriving the
    /// normalized identifier and the serialization tag.
    pub fn new(name: impl Into<String>, data_type: ScalarType) -> Field {
        let name = name.into();
        let ident = title_case_ident(&name);
        let tag = format!("name={name}, type={data_type}, encoding=PLAIN_DICTIONARY");
        Field {
            name,
            ident,
            data_type,
            tag,
        }
    }
}

/// An ordered, immutable sequence of [`Field`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Infer a schema from one sample record.
    ///
    /// Fields are enumerated in the record's (lexicographic) iteration order;
    /// each contributes its name, its concrete scalar type, and a
    /// dictionary-encoding serialization tag. Fails on an empty sample, on a
    /// nested-record value, and on a normalized-identifier collision.
    pub fn infer(sample: &Record) -> SchemaResult<Schema> {
        if sample.is_empty() {
            return EmptyRecordSnafu.fail();
        }

        Schema::from_columns(sample.iter().map(|(name, value)| {
            let data_type = ScalarType::of_value(value).context(UnsupportedValueSnafu {
                field: name.to_string(),
            });
            data_type.map(|data_type| (name.to_string(), data_type))
        }))
    }

    /// Build a schema from `(name, type)` pairs, normalizing identifiers and
    /// rejecting collisions. Shared by inference and by the columnar reader
    /// when it reconstructs the layout embedded in a file.
    pub fn from_columns<I>(columns: I) -> SchemaResult<Schema>
    where
        I: IntoIterator<Item = SchemaResult<(String, ScalarType)>>,
    {
        let mut fields: Vec<Field> = Vec::new();
        for column in columns {
            let (name, data_type) = column?;
            let field = Field::new(name, data_type);
            if let Some(existing) = fields.iter().find(|f| f.ident == field.ident) {
                return DuplicateIdentSnafu {
                    ident: field.ident.clone(),
                    first: existing.name.clone(),
                    second: field.name.clone(),
                }
                .fail();
            }
            fields.push(field);
        }
        Ok(Schema { fields })
    }

    /// The ordered field descriptors.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Locate the unique field whose normalized identifier matches, returning
    /// its position and descriptor.
    pub fn field_by_ident(&self, ident: &str) -> Option<(usize, &Field)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, f)| f.ident == ident)
    }
}

/// Normalize a field name to a title-case identifier: the first letter of
/// each whitespace-separated word is uppercased, the rest lowercased.
///
/// The mapping is stable, so normalizing an incoming record key always lands
/// on the same identifier the schema derived from that field name.
pub fn title_case_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut at_word_start = true;
    for ch in name.chars() {
        if ch.is_whitespace() {
            at_word_start = true;
            out.push(ch);
        } else if at_word_start {
            out.extend(ch.to_uppercase());
            at_word_start = false;
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    out
}
