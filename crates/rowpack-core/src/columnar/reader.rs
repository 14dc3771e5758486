//! The Parquet read path.
//!
//! [`read_into`] opens a file, reconstructs the crate-level [`Schema`] from
//! the metadata embedded in the Parquet footer, and appends one decoded
//! [`Row`] per file row to the caller's vector until end-of-stream.
//! [`read_records`] additionally flattens the decoded rows back into
//! [`Record`]s, closing the round trip with the write path.
//!
//! Any decode failure other than end-of-stream aborts the read and is
//! surfaced to the caller. The reader and the underlying file handle are
//! plain owned values, so they are released exactly once on every exit path
//! (normal completion, decode error, or unwind) by their destructors; no
//! cleanup code runs on the error path itself.

use std::fs::File;
use std::path::Path;

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use parquet::basic::{ConvertedType, LogicalType, Type as PhysicalType};
use parquet::errors::ParquetError;
use parquet::file::reader::{ChunkReader, FileReader, SerializedFileReader};
use parquet::record::{Field as ParquetField, Row as ParquetRow};
use parquet::schema::types::SchemaDescriptor;
use snafu::{Backtrace, prelude::*};

use crate::flatten::record_from_row;
use crate::record::{Record, Value};
use crate::row::Row;
use crate::schema::{ScalarType, Schema, SchemaError};

/// Errors raised by the read path.
#[derive(Debug, Snafu)]
pub enum ReadError {
    /// The file could not be opened.
    #[snafu(display("failed to open {path}: {source}"))]
    Open {
        /// The path that could not be opened.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The underlying Parquet reader reported a failure.
    #[snafu(display("Parquet read error at {path}: {source}"))]
    Parquet {
        /// The path being read (or an in-memory label).
        path: String,
        /// The underlying Parquet error.
        source: ParquetError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The embedded layout could not be mapped onto a crate-level schema.
    #[snafu(display("invalid embedded schema in {path}: {source}"))]
    EmbeddedSchema {
        /// The path being read.
        path: String,
        /// The underlying schema error.
        source: SchemaError,
    },

    /// A column's physical/logical type combination has no scalar
    /// counterpart in this crate.
    #[snafu(display(
        "unsupported column {column} in {path}: physical {physical}, logical {logical}"
    ))]
    UnsupportedColumn {
        /// The path being read.
        path: String,
        /// The column name.
        column: String,
        /// The Parquet physical type.
        physical: String,
        /// The Parquet logical/converted annotation.
        logical: String,
    },

    /// A decoded field could not be converted into a crate-level value.
    #[snafu(display("cannot decode column {column} in {path}: {detail}"))]
    Decode {
        /// The path being read.
        path: String,
        /// The column name.
        column: String,
        /// What went wrong.
        detail: String,
    },
}

/// A convenience alias for read-path results.
pub type ReadResult<T> = Result<T, ReadError>;

/// Open the Parquet file at `path` and append one decoded row per file row
/// to `out`. Returns the schema reconstructed from the file's own metadata.
///
/// Reading stops without error at end-of-stream; any other decode failure
/// aborts and is surfaced. The file handle is released on every exit path.
pub fn read_into(path: &Path, out: &mut Vec<Row>) -> ReadResult<Schema> {
    let path_str = path.display().to_string();
    let file = File::open(path).context(OpenSnafu {
        path: path_str.clone(),
    })?;
    let reader = SerializedFileReader::new(file).context(ParquetSnafu {
        path: path_str.clone(),
    })?;
    read_rows_from(reader, &path_str, out)
}

/// Decode rows from an in-memory Parquet buffer. `label` stands in for the
/// path in error context.
pub fn read_bytes_into(data: Bytes, label: &str, out: &mut Vec<Row>) -> ReadResult<Schema> {
    let reader = SerializedFileReader::new(data).context(ParquetSnafu { path: label })?;
    read_rows_from(reader, label, out)
}

/// Read the file at `path` and flatten every decoded row back into a
/// [`Record`].
pub fn read_records(path: &Path) -> ReadResult<Vec<Record>> {
    let mut rows = Vec::new();
    let schema = read_into(path, &mut rows)?;
    Ok(rows
        .iter()
        .map(|row| record_from_row(&schema, row))
        .collect())
}

/// Shared decode loop over any [`ChunkReader`] source. The reader is consumed
/// and dropped here, so its resources are released exactly once whether the
/// loop completes, errors, or unwinds.
pub(crate) fn read_rows_from<R: ChunkReader + 'static>(
    reader: SerializedFileReader<R>,
    path: &str,
    out: &mut Vec<Row>,
) -> ReadResult<Schema> {
    let descr = reader.metadata().file_metadata().schema_descr();
    let schema = schema_from_descr(descr, path)?;

    let iter = reader.get_row_iter(None).context(ParquetSnafu { path })?;
    for row_res in iter {
        let parquet_row = row_res.context(ParquetSnafu { path })?;
        out.push(decode_row(&schema, &parquet_row, path)?);
    }

    Ok(schema)
}

/// Map the file's embedded column descriptors onto the crate's schema shape.
fn schema_from_descr(descr: &SchemaDescriptor, path: &str) -> ReadResult<Schema> {
    let mut columns = Vec::with_capacity(descr.num_columns());

    for col in descr.columns() {
        let name = col.path().string();
        let basic = col.self_type().get_basic_info();
        let data_type = scalar_from_parquet(
            path,
            &name,
            col.physical_type(),
            basic.logical_type().as_ref(),
            basic.converted_type(),
        )?;
        columns.push(Ok((name, data_type)));
    }

    Schema::from_columns(columns).context(EmbeddedSchemaSnafu { path })
}

/// Resolve one Parquet column to a crate-level scalar type.
///
/// Logical annotations win, converted-type annotations (written by older
/// writers) come next, and the bare physical type is the fallback.
fn scalar_from_parquet(
    path: &str,
    column: &str,
    physical: PhysicalType,
    logical: Option<&LogicalType>,
    converted: ConvertedType,
) -> ReadResult<ScalarType> {
    if let Some(logical) = logical {
        match logical {
            LogicalType::String if physical == PhysicalType::BYTE_ARRAY => {
                return Ok(ScalarType::Utf8);
            }
            LogicalType::Timestamp { .. } if physical == PhysicalType::INT64 => {
                return Ok(ScalarType::Timestamp);
            }
            _ => {}
        }
    }

    match converted {
        ConvertedType::UTF8 if physical == PhysicalType::BYTE_ARRAY => {
            return Ok(ScalarType::Utf8);
        }
        ConvertedType::TIMESTAMP_MILLIS | ConvertedType::TIMESTAMP_MICROS
            if physical == PhysicalType::INT64 =>
        {
            return Ok(ScalarType::Timestamp);
        }
        _ => {}
    }

    match physical {
        PhysicalType::BOOLEAN => Ok(ScalarType::Bool),
        PhysicalType::INT32 | PhysicalType::INT64 => Ok(ScalarType::Int64),
        PhysicalType::FLOAT | PhysicalType::DOUBLE => Ok(ScalarType::Float64),
        other => UnsupportedColumnSnafu {
            path,
            column,
            physical: format!("{other:?}"),
            logical: format!("{logical:?}"),
        }
        .fail(),
    }
}

/// Decode one Parquet row into a zero-initialized [`Row`].
///
/// Null fields (from OPTIONAL columns in foreign files) leave the slot's
/// zero value in place.
fn decode_row(schema: &Schema, parquet_row: &ParquetRow, path: &str) -> ReadResult<Row> {
    let mut values: Vec<Value> = schema
        .fields()
        .iter()
        .map(|f| f.data_type.zero_value())
        .collect();

    for (idx, (name, field)) in parquet_row.get_column_iter().enumerate() {
        if idx >= values.len() {
            return DecodeSnafu {
                path,
                column: name.clone(),
                detail: "row has more columns than the embedded schema".to_string(),
            }
            .fail();
        }
        if let Some(value) = value_from_field(field, path, name)? {
            values[idx] = value;
        }
    }

    Ok(Row::from_values(values))
}

fn value_from_field(
    field: &ParquetField,
    path: &str,
    column: &str,
) -> ReadResult<Option<Value>> {
    let value = match field {
        ParquetField::Null => return Ok(None),
        ParquetField::Bool(v) => Value::Bool(*v),
        ParquetField::Byte(v) => Value::Int(*v as i64),
        ParquetField::Short(v) => Value::Int(*v as i64),
        ParquetField::Int(v) => Value::Int(*v as i64),
        ParquetField::Long(v) => Value::Int(*v),
        ParquetField::UByte(v) => Value::Int(*v as i64),
        ParquetField::UShort(v) => Value::Int(*v as i64),
        ParquetField::UInt(v) => Value::Int(*v as i64),
        ParquetField::ULong(v) => {
            let signed = i64::try_from(*v).map_err(|_| {
                DecodeSnafu {
                    path,
                    column,
                    detail: format!("u64 value {v} exceeds i64 range"),
                }
                .build()
            })?;
            Value::Int(signed)
        }
        ParquetField::Float(v) => Value::Float(*v as f64),
        ParquetField::Double(v) => Value::Float(*v),
        ParquetField::Str(v) => Value::Str(v.clone()),
        ParquetField::TimestampMillis(ms) => {
            let ts = Utc.timestamp_millis_opt(*ms).single().context(DecodeSnafu {
                path,
                column,
                detail: format!("timestamp value {ms}ms out of range"),
            })?;
            Value::Timestamp(ts)
        }
        ParquetField::TimestampMicros(us) => {
            let ts = Utc.timestamp_micros(*us).single().context(DecodeSnafu {
                path,
                column,
                detail: format!("timestamp value {us}us out of range"),
            })?;
            Value::Timestamp(ts)
        }
        other => {
            return DecodeSnafu {
                path,
                column,
                detail: format!("unsupported field shape {other:?}"),
            }
            .fail();
        }
    };

    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use bytes::Buf;
    use parquet::column::writer::ColumnWriter;
    use parquet::file::properties::WriterProperties;
    use parquet::file::writer::SerializedFileWriter;
    use parquet::schema::types::Type;

    use crate::columnar::writer::write_rows_to;
    use crate::row::materialize_batch;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn sample_batch() -> (Schema, Vec<Row>) {
        let records: Vec<Record> = vec![
            [
                ("symbol", Value::from("BTC")),
                ("price", Value::from(100.0)),
                (
                    "ts",
                    Value::from(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
                ),
            ]
            .into_iter()
            .collect(),
            [
                ("symbol", Value::from("BTC")),
                ("price", Value::from(101.5)),
                (
                    "ts",
                    Value::from(Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap()),
                ),
            ]
            .into_iter()
            .collect(),
        ];
        let schema = Schema::infer(&records[0]).unwrap();
        let (rows, issues) = materialize_batch(&schema, &records);
        assert!(issues.is_empty());
        (schema, rows)
    }

    fn sample_bytes() -> Bytes {
        let (schema, rows) = sample_batch();
        let mut buf = Vec::new();
        write_rows_to(&schema, &rows, &mut buf, "mem").unwrap();
        Bytes::from(buf)
    }

    /// A `ChunkReader` over `Bytes` that counts drops and can inject an I/O
    /// fault once the footer has been parsed, to exercise mid-stream decode
    /// failures.
    struct TrackedBytes {
        data: Bytes,
        fail: Arc<AtomicBool>,
        drops: Arc<AtomicUsize>,
    }

    impl parquet::file::reader::Length for TrackedBytes {
        fn len(&self) -> u64 {
            self.data.len() as u64
        }
    }

    impl ChunkReader for TrackedBytes {
        type T = bytes::buf::Reader<Bytes>;

        fn get_read(&self, start: u64) -> parquet::errors::Result<Self::T> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ParquetError::General("injected page fault".to_string()));
            }
            Ok(self.data.slice(start as usize..).reader())
        }

        fn get_bytes(&self, start: u64, length: usize) -> parquet::errors::Result<Bytes> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ParquetError::General("injected page fault".to_string()));
            }
            let start = start as usize;
            let end = start.checked_add(length).filter(|end| *end <= self.data.len());
            match end {
                Some(end) => Ok(self.data.slice(start..end)),
                None => Err(ParquetError::EOF("read past end of buffer".to_string())),
            }
        }
    }

    impl Drop for TrackedBytes {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn round_trips_rows_through_bytes() -> TestResult {
        let (schema, rows) = sample_batch();
        let data = sample_bytes();

        let mut decoded = Vec::new();
        let read_schema = read_bytes_into(data, "mem", &mut decoded)?;

        assert_eq!(read_schema, schema);
        assert_eq!(decoded, rows);
        Ok(())
    }

    #[test]
    fn corrupt_footer_is_a_parquet_error() {
        let mut out = Vec::new();
        let err = read_bytes_into(
            Bytes::from_static(b"PAR1PAR1garbage"),
            "mem",
            &mut out,
        )
        .unwrap_err();
        assert!(matches!(err, ReadError::Parquet { .. }));
        assert!(out.is_empty());
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let mut out = Vec::new();
        let err = read_into(Path::new("/nonexistent/none.parquet"), &mut out).unwrap_err();
        assert!(matches!(err, ReadError::Open { .. }));
    }

    #[test]
    fn reader_is_released_exactly_once_on_success() -> TestResult {
        let drops = Arc::new(AtomicUsize::new(0));
        let tracked = TrackedBytes {
            data: sample_bytes(),
            fail: Arc::new(AtomicBool::new(false)),
            drops: drops.clone(),
        };

        let reader = SerializedFileReader::new(tracked)?;
        let mut out = Vec::new();
        read_rows_from(reader, "mem", &mut out)?;

        assert_eq!(out.len(), 2);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn reader_is_released_exactly_once_on_mid_stream_fault() -> TestResult {
        let fail = Arc::new(AtomicBool::new(false));
        let drops = Arc::new(AtomicUsize::new(0));
        let tracked = TrackedBytes {
            data: sample_bytes(),
            fail: fail.clone(),
            drops: drops.clone(),
        };

        // Footer parse succeeds, then every page read fails.
        let reader = SerializedFileReader::new(tracked)?;
        fail.store(true, Ordering::SeqCst);

        let mut out = Vec::new();
        let err = read_rows_from(reader, "mem", &mut out).unwrap_err();

        assert!(matches!(err, ReadError::Parquet { .. }));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn int96_column_is_unsupported() -> TestResult {
        let col = Arc::new(
            Type::primitive_type_builder("legacy_ts", PhysicalType::INT96)
                .with_repetition(parquet::basic::Repetition::REQUIRED)
                .build()?,
        );
        let group = Arc::new(
            Type::group_type_builder("schema")
                .with_fields(vec![col])
                .build()?,
        );

        let mut buf = Vec::new();
        let props = Arc::new(WriterProperties::builder().build());
        let writer = SerializedFileWriter::new(&mut buf, group, props)?;
        writer.close()?;

        let mut out = Vec::new();
        let err = read_bytes_into(Bytes::from(buf), "mem", &mut out).unwrap_err();
        assert!(matches!(
            err,
            ReadError::UnsupportedColumn { column, .. } if column == "legacy_ts"
        ));
        Ok(())
    }

    #[test]
    fn null_slots_keep_zero_values() -> TestResult {
        // An OPTIONAL int64 column with one null, as a foreign writer might
        // produce it.
        let col = Arc::new(
            Type::primitive_type_builder("qty", PhysicalType::INT64)
                .with_repetition(parquet::basic::Repetition::OPTIONAL)
                .build()?,
        );
        let group = Arc::new(
            Type::group_type_builder("schema")
                .with_fields(vec![col])
                .build()?,
        );

        let mut buf = Vec::new();
        let props = Arc::new(WriterProperties::builder().build());
        let mut writer = SerializedFileWriter::new(&mut buf, group, props)?;
        let mut row_group = writer.next_row_group()?;
        while let Some(mut col_writer) = row_group.next_column()? {
            match col_writer.untyped() {
                ColumnWriter::Int64ColumnWriter(typed) => {
                    typed.write_batch(&[7], Some(&[1, 0]), None)?;
                }
                _ => return Err("unexpected column writer type".into()),
            }
            col_writer.close()?;
        }
        row_group.close()?;
        writer.close()?;

        let mut out = Vec::new();
        read_bytes_into(Bytes::from(buf), "mem", &mut out)?;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get(0), Some(&Value::Int(7)));
        assert_eq!(out[1].get(0), Some(&Value::Int(0)));
        Ok(())
    }
}
