//! Columnar (Parquet) persistence for record batches.
//!
//! This module centralizes the Parquet-specific logic: schema translation,
//! the write path (`writer`) and the read path (`reader`). Files produced
//! here are plain Parquet files, readable by any compliant reader; files
//! produced elsewhere are readable here as long as their columns map onto
//! the crate's scalar types.

pub mod reader;
pub mod writer;

pub use reader::*;
pub use writer::*;
