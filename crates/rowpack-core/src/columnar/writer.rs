//! The Parquet write path.
//!
//! [`write_records`] is the batch entry point: it infers a schema from the
//! first record, materializes every record against it (field mismatches are
//! logged and dropped, never fatal), and persists the resulting rows
//! column-wise. [`write_rows`] is the lower half for callers that already
//! hold a schema and materialized rows; [`write_rows_to`] targets any
//! `Write` sink and backs the in-memory round-trips in tests.
//!
//! Lifecycle: the destination file is created (or overwritten) up front, a
//! single row group is written one column at a time in schema order, and the
//! Parquet writer is closed (flushing buffered column data and the footer)
//! before the file handle is released. A failure on any column aborts the
//! write and surfaces the underlying error; no cleanup of the partial file
//! is attempted.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use parquet::basic::{LogicalType, Repetition, TimeUnit, Type as PhysicalType};
use parquet::column::writer::ColumnWriter;
use parquet::data_type::ByteArray;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::{Type, TypePtr};
use snafu::{Backtrace, prelude::*};

use crate::record::{Record, Value};
use crate::row::{Row, materialize_batch};
use crate::schema::{Field, ScalarType, Schema, SchemaError};

/// Errors raised by the write path.
#[derive(Debug, Snafu)]
pub enum WriteError {
    /// The batch held no records, so there is no sample to infer from.
    #[snafu(display("cannot write an empty record batch"))]
    EmptyBatch,

    /// Schema inference on the sample record failed.
    #[snafu(display("schema inference failed: {source}"))]
    Schema {
        /// The underlying schema error.
        source: SchemaError,
    },

    /// The destination file could not be created.
    #[snafu(display("failed to create {path}: {source}"))]
    Create {
        /// The destination path.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The underlying Parquet writer reported a failure.
    #[snafu(display("Parquet write error at {path}: {source}"))]
    Parquet {
        /// The destination path (or an in-memory label).
        path: String,
        /// The underlying Parquet error.
        source: ParquetError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A row slot did not hold a value of the column's declared type. Rows
    /// produced by the materializer always do; this guards rows built for a
    /// different schema.
    #[snafu(display("row {row_index} slot for column {field} does not hold the declared type"))]
    RowShape {
        /// The column name.
        field: String,
        /// The offending row's position in the batch.
        row_index: usize,
    },

    /// The Parquet column writer's type did not match the schema's declared
    /// type for this column.
    #[snafu(display("column writer for {field} does not match its declared type"))]
    ColumnShape {
        /// The column name.
        field: String,
    },
}

/// A convenience alias for write-path results.
pub type WriteResult<T> = Result<T, WriteError>;

/// Infer a schema from the first record, materialize the whole batch against
/// it, and persist the rows to `path`. Returns the number of rows written.
///
/// Field mismatches in individual records are logged and dropped (the
/// affected slots keep their zero values); an empty batch is rejected before
/// any file is created.
pub fn write_records(records: &[Record], path: &Path) -> WriteResult<u64> {
    if records.is_empty() {
        return EmptyBatchSnafu.fail();
    }

    let schema = Schema::infer(&records[0]).context(SchemaSnafu)?;
    let (rows, _issues) = materialize_batch(&schema, records);
    write_rows(&schema, &rows, path)
}

/// Persist already-materialized rows to `path`, creating or overwriting the
/// file. Returns the number of rows written.
pub fn write_rows(schema: &Schema, rows: &[Row], path: &Path) -> WriteResult<u64> {
    let path_str = path.display().to_string();
    let file = File::create(path).context(CreateSnafu {
        path: path_str.clone(),
    })?;
    write_rows_to(schema, rows, file, &path_str)
}

/// Persist rows to an arbitrary `Write` sink. `label` stands in for the path
/// in error context.
pub fn write_rows_to<W: Write + Send>(
    schema: &Schema,
    rows: &[Row],
    sink: W,
    label: &str,
) -> WriteResult<u64> {
    let parquet_schema = parquet_schema(schema, label)?;
    let props = Arc::new(
        WriterProperties::builder()
            .set_dictionary_enabled(true)
            .build(),
    );

    let mut writer = SerializedFileWriter::new(sink, parquet_schema, props)
        .context(ParquetSnafu { path: label })?;

    if !rows.is_empty() {
        let mut row_group = writer
            .next_row_group()
            .context(ParquetSnafu { path: label })?;

        let mut idx = 0;
        while let Some(mut col_writer) = row_group
            .next_column()
            .context(ParquetSnafu { path: label })?
        {
            let field = &schema.fields()[idx];
            match (col_writer.untyped(), field.data_type) {
                (ColumnWriter::Int64ColumnWriter(typed), ScalarType::Int64) => {
                    let values = int64_column(rows, idx, field)?;
                    typed
                        .write_batch(&values, None, None)
                        .context(ParquetSnafu { path: label })?;
                }
                (ColumnWriter::Int64ColumnWriter(typed), ScalarType::Timestamp) => {
                    let values = millis_column(rows, idx, field)?;
                    typed
                        .write_batch(&values, None, None)
                        .context(ParquetSnafu { path: label })?;
                }
                (ColumnWriter::DoubleColumnWriter(typed), ScalarType::Float64) => {
                    let values = float64_column(rows, idx, field)?;
                    typed
                        .write_batch(&values, None, None)
                        .context(ParquetSnafu { path: label })?;
                }
                (ColumnWriter::ByteArrayColumnWriter(typed), ScalarType::Utf8) => {
                    let values = utf8_column(rows, idx, field)?;
                    typed
                        .write_batch(&values, None, None)
                        .context(ParquetSnafu { path: label })?;
                }
                (ColumnWriter::BoolColumnWriter(typed), ScalarType::Bool) => {
                    let values = bool_column(rows, idx, field)?;
                    typed
                        .write_batch(&values, None, None)
                        .context(ParquetSnafu { path: label })?;
                }
                _ => {
                    return ColumnShapeSnafu {
                        field: field.name.clone(),
                    }
                    .fail();
                }
            }
            col_writer.close().context(ParquetSnafu { path: label })?;
            idx += 1;
        }
        row_group.close().context(ParquetSnafu { path: label })?;
    }

    // Close the Parquet writer first so all buffered column data and the
    // footer are flushed; the sink is released when the writer drops.
    writer.close().context(ParquetSnafu { path: label })?;

    Ok(rows.len() as u64)
}

/// Translate the inferred schema into a Parquet group type.
///
/// All columns are REQUIRED; strings carry the `String` logical type and
/// timestamps the UTC-adjusted millisecond `Timestamp` logical type.
fn parquet_schema(schema: &Schema, label: &str) -> WriteResult<TypePtr> {
    let mut fields: Vec<TypePtr> = Vec::with_capacity(schema.len());

    for field in schema.fields() {
        let physical = match field.data_type {
            ScalarType::Int64 | ScalarType::Timestamp => PhysicalType::INT64,
            ScalarType::Float64 => PhysicalType::DOUBLE,
            ScalarType::Utf8 => PhysicalType::BYTE_ARRAY,
            ScalarType::Bool => PhysicalType::BOOLEAN,
        };

        let mut builder = Type::primitive_type_builder(&field.name, physical)
            .with_repetition(Repetition::REQUIRED);
        match field.data_type {
            ScalarType::Utf8 => {
                builder = builder.with_logical_type(Some(LogicalType::String));
            }
            ScalarType::Timestamp => {
                builder = builder.with_logical_type(Some(LogicalType::Timestamp {
                    is_adjusted_to_u_t_c: true,
                    unit: TimeUnit::MILLIS(parquet::format::MilliSeconds {}),
                }));
            }
            _ => {}
        }

        let built = builder.build().context(ParquetSnafu { path: label })?;
        fields.push(Arc::new(built));
    }

    let group = Type::group_type_builder("schema")
        .with_fields(fields)
        .build()
        .context(ParquetSnafu { path: label })?;
    Ok(Arc::new(group))
}

fn int64_column(rows: &[Row], idx: usize, field: &Field) -> WriteResult<Vec<i64>> {
    rows.iter()
        .enumerate()
        .map(|(row_index, row)| match row.get(idx) {
            Some(Value::Int(v)) => Ok(*v),
            _ => RowShapeSnafu {
                field: field.name.clone(),
                row_index,
            }
            .fail(),
        })
        .collect()
}

fn millis_column(rows: &[Row], idx: usize, field: &Field) -> WriteResult<Vec<i64>> {
    rows.iter()
        .enumerate()
        .map(|(row_index, row)| match row.get(idx) {
            Some(Value::Timestamp(v)) => Ok(v.timestamp_millis()),
            _ => RowShapeSnafu {
                field: field.name.clone(),
                row_index,
            }
            .fail(),
        })
        .collect()
}

fn float64_column(rows: &[Row], idx: usize, field: &Field) -> WriteResult<Vec<f64>> {
    rows.iter()
        .enumerate()
        .map(|(row_index, row)| match row.get(idx) {
            Some(Value::Float(v)) => Ok(*v),
            _ => RowShapeSnafu {
                field: field.name.clone(),
                row_index,
            }
            .fail(),
        })
        .collect()
}

fn utf8_column(rows: &[Row], idx: usize, field: &Field) -> WriteResult<Vec<ByteArray>> {
    rows.iter()
        .enumerate()
        .map(|(row_index, row)| match row.get(idx) {
            Some(Value::Str(v)) => Ok(ByteArray::from(v.as_str())),
            _ => RowShapeSnafu {
                field: field.name.clone(),
                row_index,
            }
            .fail(),
        })
        .collect()
}

fn bool_column(rows: &[Row], idx: usize, field: &Field) -> WriteResult<Vec<bool>> {
    rows.iter()
        .enumerate()
        .map(|(row_index, row)| match row.get(idx) {
            Some(Value::Bool(v)) => Ok(*v),
            _ => RowShapeSnafu {
                field: field.name.clone(),
                row_index,
            }
            .fail(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::materialize;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn btc_record(price: f64) -> Record {
        [
            ("symbol", Value::from("BTC")),
            ("price", Value::from(price)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn empty_batch_is_rejected_before_any_file_exists() -> TestResult {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("empty.parquet");

        let err = write_records(&[], &path).unwrap_err();
        assert!(matches!(err, WriteError::EmptyBatch));
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn empty_sample_record_is_a_schema_error() -> TestResult {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("empty-record.parquet");

        let err = write_records(&[Record::new()], &path).unwrap_err();
        assert!(matches!(
            err,
            WriteError::Schema {
                source: SchemaError::EmptyRecord
            }
        ));
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn unwritable_path_is_a_creation_error() {
        let records = vec![btc_record(1.0)];
        let err = write_records(&records, Path::new("/nonexistent-dir/out.parquet")).unwrap_err();
        assert!(matches!(err, WriteError::Create { .. }));
    }

    #[test]
    fn written_bytes_carry_the_parquet_magic() -> TestResult {
        let records = vec![btc_record(100.0), btc_record(101.5)];
        let schema = Schema::infer(&records[0])?;
        let (rows, _) = materialize_batch(&schema, &records);

        let mut buf = Vec::new();
        let written = write_rows_to(&schema, &rows, &mut buf, "mem")?;
        assert_eq!(written, 2);
        assert_eq!(&buf[..4], b"PAR1");
        assert_eq!(&buf[buf.len() - 4..], b"PAR1");
        Ok(())
    }

    #[test]
    fn foreign_rows_are_a_row_shape_error() -> TestResult {
        let schema = Schema::infer(&btc_record(1.0))?;
        let int_sample: Record = [("price", Value::from(1_i64))].into_iter().collect();
        let other_schema = Schema::infer(&int_sample)?;
        let (row, _) = materialize(&other_schema, &int_sample);

        let err = write_rows_to(&schema, &[row], &mut Vec::new(), "mem").unwrap_err();
        assert!(matches!(err, WriteError::RowShape { .. }));
        Ok(())
    }

    #[test]
    fn zero_rows_still_produce_a_valid_schema_only_file() -> TestResult {
        let schema = Schema::infer(&btc_record(1.0))?;
        let mut buf = Vec::new();
        let written = write_rows_to(&schema, &[], &mut buf, "mem")?;
        assert_eq!(written, 0);
        assert_eq!(&buf[..4], b"PAR1");
        Ok(())
    }
}
