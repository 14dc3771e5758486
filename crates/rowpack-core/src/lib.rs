//! Bridge between schema-less key/value records and typed Parquet files.
//!
//! Upstream collectors produce heterogeneous, string-keyed records; Parquet
//! wants a fixed, typed column layout. This crate closes that gap:
//!
//! - A [`record::Record`] is the schema-less exchange unit, with
//!   deterministic (lexicographic) field order.
//! - [`schema::Schema::infer`] derives a typed column layout from one sample
//!   record of a batch.
//! - [`row::materialize`] turns each record into a position-indexed row,
//!   dropping and reporting mismatched fields instead of failing.
//! - [`columnar::write_records`] persists a batch as a Parquet file;
//!   [`columnar::read_records`] reads one back into records, releasing the
//!   file on every exit path.
//! - [`flatten::flatten`] converts any serializable value (nested or not)
//!   into a record for round-tripping or inspection.
//!
//! Around the core bridge, the `series` module ships the time-series
//! statistics and batch-shaping routines that consume the same record
//! shape, `timeutil` the epoch/timezone conversions, and `supervise` the
//! panic-recovery boundary. Field-level problems are reported through the
//! `log` facade and as explicit issue values; schema and I/O problems are
//! typed errors.
#![deny(missing_docs)]

pub mod columnar;
pub mod flatten;
pub mod record;
pub mod row;
pub mod schema;
pub mod series;
pub mod supervise;
pub mod timeutil;
