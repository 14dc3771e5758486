//! Ingest a simulated BTC minute-bar batch into a Parquet file using the core API.

use std::path::PathBuf;

use chrono::{Duration, TimeZone, Utc};
use rowpack_core::columnar::{read_records, write_records};
use rowpack_core::record::Record;
use rowpack_core::series::{max_time, min_time, resample_ohlcv};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Resolve paths relative to the workspace root.
    let workspace_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");
    let out_dir = workspace_root.join("demos/data");
    let parquet_path = out_dir.join("btc_1m.parquet");

    // Start clean so the example is repeatable.
    std::fs::create_dir_all(&out_dir)?;
    if parquet_path.exists() {
        std::fs::remove_file(&parquet_path)?;
    }

    // 1) Simulate one hour of 1-minute OHLCV bars.
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut records: Vec<Record> = Vec::new();
    for i in 0..60_i64 {
        let close = 100.0 + i as f64 * 0.25;
        let mut record = Record::new();
        record.insert("time", start + Duration::minutes(i));
        record.insert("symbol", "BTC");
        record.insert("open", close - 0.1);
        record.insert("high", close + 0.5);
        record.insert("low", close - 0.5);
        record.insert("close", close);
        record.insert("volume", 1.5 + i as f64 * 0.01);
        records.push(record);
    }

    // 2) Persist the batch; the schema is inferred from the first record.
    let written = write_records(&records, &parquet_path)?;

    // 3) Read the file back and resample it into 5-minute bars.
    let reloaded = read_records(&parquet_path)?;
    let bars = resample_ohlcv(&reloaded, Duration::minutes(5));

    println!("Output file    : {}", parquet_path.display());
    println!("Rows written   : {}", written);
    println!("Rows reloaded  : {}", reloaded.len());
    println!("5m bars        : {}", bars.len());
    println!(
        "Time range     : {} .. {}",
        min_time(&reloaded)?.to_rfc3339(),
        max_time(&reloaded)?.to_rfc3339()
    );

    Ok(())
}
