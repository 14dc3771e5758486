//! Materialization of schema-less records into schema-conformant rows.
//!
//! A [`Row`] is the typed, transient shape handed to the columnar writer: a
//! value array indexed by schema position. Materialization never fails for a
//! single malformed record; a key that matches no schema field, or a value
//! whose type differs from the declared column type, is dropped and reported
//! as a [`FieldIssue`]. Issues are values first and log lines second: the
//! batch helper emits one `warn!` per issue, but callers get the full list
//! back and decide what to do with it.

use std::fmt;

use log::warn;

use crate::record::{Record, Value};
use crate::schema::{title_case_ident, ScalarType, Schema};

/// A schema-conformant materialization of one record.
///
/// Slots are ordered by schema position and always hold a value of the
/// declared type; unmatched slots keep the type's zero value.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    /// The slot values, ordered by schema position.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The value at schema position `idx`.
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no slots.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn from_values(values: Vec<Value>) -> Row {
        Row { values }
    }
}

/// A non-fatal problem found while materializing one record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldIssue {
    /// The record key matched no schema field once normalized.
    UnknownField {
        /// The offending record key.
        key: String,
    },
    /// The record value's type differed from the declared column type; the
    /// slot keeps its zero value.
    TypeMismatch {
        /// The schema field name.
        field: String,
        /// The declared column type.
        expected: ScalarType,
        /// The type the record actually carried.
        found: ScalarType,
    },
    /// The record value was a nested record, which no column can hold.
    NestedValue {
        /// The schema field name.
        field: String,
    },
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldIssue::UnknownField { key } => write!(f, "invalid field: {key}"),
            FieldIssue::TypeMismatch {
                field,
                expected,
                found,
            } => write!(
                f,
                "type mismatch for field {field}: schema has {expected}, record has {found}"
            ),
            FieldIssue::NestedValue { field } => {
                write!(f, "field {field} holds a nested record; dropped")
            }
        }
    }
}

/// Materialize one record against `schema`.
///
/// Allocates a row pre-filled with each field's zero value, then copies every
/// record value whose normalized key resolves to a schema field of the exact
/// same type. Mismatches and unknown keys are returned as issues, never
/// errors; a malformed record simply produces a partially populated row.
pub fn materialize(schema: &Schema, record: &Record) -> (Row, Vec<FieldIssue>) {
    let mut values: Vec<Value> = schema
        .fields()
        .iter()
        .map(|f| f.data_type.zero_value())
        .collect();
    let mut issues = Vec::new();

    for (key, value) in record.iter() {
        let ident = title_case_ident(key);
        let Some((idx, field)) = schema.field_by_ident(&ident) else {
            issues.push(FieldIssue::UnknownField {
                key: key.to_string(),
            });
            continue;
        };

        match ScalarType::of_value(value) {
            Some(found) if found == field.data_type => {
                values[idx] = value.clone();
            }
            Some(found) => {
                issues.push(FieldIssue::TypeMismatch {
                    field: field.name.clone(),
                    expected: field.data_type,
                    found,
                });
            }
            None => {
                issues.push(FieldIssue::NestedValue {
                    field: field.name.clone(),
                });
            }
        }
    }

    (Row::from_values(values), issues)
}

/// Materialize a whole batch, logging each issue at `warn` level.
///
/// The returned issue list is the concatenation of every record's issues, in
/// batch order.
pub fn materialize_batch(schema: &Schema, records: &[Record]) -> (Vec<Row>, Vec<FieldIssue>) {
    let mut rows = Vec::with_capacity(records.len());
    let mut all_issues = Vec::new();

    for (index, record) in records.iter().enumerate() {
        let (row, issues) = materialize(schema, record);
        for issue in &issues {
            warn!("record {index}: {issue}");
        }
        rows.push(row);
        all_issues.extend(issues);
    }

    (rows, all_issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn schema() -> Schema {
        let sample: Record = [
            ("symbol", Value::from("BTC")),
            ("price", Value::from(100.0)),
            ("ts", Value::from(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())),
        ]
        .into_iter()
        .collect();
        Schema::infer(&sample).unwrap()
    }

    #[test]
    fn copies_exactly_matching_values() {
        let schema = schema();
        let record: Record = [
            ("symbol", Value::from("ETH")),
            ("price", Value::from(42.5)),
            ("ts", Value::from(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())),
        ]
        .into_iter()
        .collect();

        let (row, issues) = materialize(&schema, &record);
        assert!(issues.is_empty());
        // Schema order: price, symbol, ts.
        assert_eq!(row.get(0), Some(&Value::Float(42.5)));
        assert_eq!(row.get(1), Some(&Value::Str("ETH".into())));
    }

    #[test]
    fn type_mismatch_keeps_zero_value() {
        let schema = schema();
        let record: Record = [
            ("symbol", Value::from("ETH")),
            ("price", Value::from("not a number")),
            ("ts", Value::from(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())),
        ]
        .into_iter()
        .collect();

        let (row, issues) = materialize(&schema, &record);
        assert_eq!(row.get(0), Some(&Value::Float(0.0)));
        assert_eq!(
            issues,
            vec![FieldIssue::TypeMismatch {
                field: "price".to_string(),
                expected: ScalarType::Float64,
                found: ScalarType::Utf8,
            }]
        );
    }

    #[test]
    fn unknown_key_is_reported_and_ignored() {
        let schema = schema();
        let mut record: Record = [("symbol", Value::from("ETH")), ("price", Value::from(1.0))]
            .into_iter()
            .collect();
        record.insert("bid", 9.0);

        let (row, issues) = materialize(&schema, &record);
        assert_eq!(row.len(), 3);
        assert_eq!(
            issues,
            vec![FieldIssue::UnknownField {
                key: "bid".to_string()
            }]
        );
    }

    #[test]
    fn missing_fields_keep_zero_values() {
        let schema = schema();
        let record: Record = [("price", Value::from(7.0))].into_iter().collect();

        let (row, issues) = materialize(&schema, &record);
        assert!(issues.is_empty());
        assert_eq!(row.get(1), Some(&Value::Str(String::new())));
        assert_eq!(
            row.get(2),
            Some(&Value::Timestamp(chrono::DateTime::UNIX_EPOCH))
        );
    }

    #[test]
    fn batch_concatenates_issues_in_order() {
        let schema = schema();
        let good: Record = [("price", Value::from(1.0))].into_iter().collect();
        let mut bad = good.clone();
        bad.insert("bogus", true);

        let (rows, issues) = materialize_batch(&schema, &[good, bad]);
        assert_eq!(rows.len(), 2);
        assert_eq!(
            issues,
            vec![FieldIssue::UnknownField {
                key: "bogus".to_string()
            }]
        );
    }
}
