//! Time-series statistics and batch-shaping routines.
//!
//! Everything here consumes or produces the same [`Record`] shape the
//! columnar writer and reader persist, so analytics code can resample or
//! filter a batch, write it out, and reload it through one set of types.
//! Records missing the fields a routine needs are skipped, not fatal, the
//! same tolerance the row materializer applies.
//!
//! Routines that depend on the current time take an explicit `now` argument,
//! and bucketed outputs are sorted by (symbol, time), so results are
//! reproducible in tests and across runs.

use std::collections::{BTreeMap, HashSet, btree_map::Entry};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use snafu::prelude::*;

use crate::record::{Record, Value};
use crate::timeutil::{floor_to_interval, floor_to_minute};

/// Errors raised by batch-level time queries.
#[derive(Debug, Snafu)]
pub enum SeriesError {
    /// The batch held no records.
    #[snafu(display("empty record batch"))]
    EmptyBatch,

    /// A record was missing a required field.
    #[snafu(display("record is missing field {field}"))]
    MissingField {
        /// The missing field name.
        field: String,
    },

    /// A record field did not hold the expected type.
    #[snafu(display("field {field} does not hold a timestamp"))]
    WrongType {
        /// The mistyped field name.
        field: String,
    },
}

/// A convenience alias for series operations.
pub type SeriesResult<T> = Result<T, SeriesError>;

/// Simple moving average over `values` with the given window.
///
/// Produces one output per fully covered window; an empty input, a zero
/// window, or a window longer than the input yields an empty result.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if values.is_empty() || window == 0 || window > values.len() {
        return Vec::new();
    }

    values
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}

/// Population z-score transform of `values`.
///
/// A constant series (standard deviation zero) maps to all zeros rather
/// than dividing by zero.
pub fn z_scores(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }

    let (mean, std_dev) = mean_and_std_dev(values);
    if std_dev == 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - mean) / std_dev).collect()
}

fn mean_and_std_dev(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Linear-interpolation quantile of `values` at `p` (clamped to `[0, 1]`).
///
/// Operates on a sorted copy; an empty input yields `0.0`.
pub fn quantile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let p = p.clamp(0.0, 1.0);
    let index = p * (sorted.len() - 1) as f64;
    let lower = index as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let frac = index - lower as f64;

    sorted[lower] + frac * (sorted[upper] - sorted[lower])
}

/// Relative difference `(b - a) / a`, or `0.0` when `a` is zero.
pub fn percentage_difference(a: f64, b: f64) -> f64 {
    if a == 0.0 { 0.0 } else { (b - a) / a }
}

struct Bar {
    time: DateTime<Utc>,
    open: Option<f64>,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Resample OHLCV records into `frame`-sized buckets per symbol.
///
/// Each input record needs a `time` timestamp, a `symbol` string, and float
/// `high`/`low`/`close`/`volume` fields; records missing any of those are
/// skipped. Within a bucket: high is the maximum, low the minimum, close the
/// last value in input order, volume the sum, and `open` (when the first
/// record of the bucket carries one) the first value. Output buckets are
/// sorted by (symbol, bucket start).
pub fn resample_ohlcv(records: &[Record], frame: Duration) -> Vec<Record> {
    let mut buckets: BTreeMap<(String, i64), Bar> = BTreeMap::new();

    for record in records {
        let Some(time) = record.get("time").and_then(Value::as_timestamp) else {
            continue;
        };
        let Some(symbol) = record.get("symbol").and_then(Value::as_str) else {
            continue;
        };
        let (Some(high), Some(low), Some(close), Some(volume)) = (
            record.get("high").and_then(Value::as_f64),
            record.get("low").and_then(Value::as_f64),
            record.get("close").and_then(Value::as_f64),
            record.get("volume").and_then(Value::as_f64),
        ) else {
            continue;
        };
        let Ok(bucket_start) = floor_to_interval(time, frame) else {
            continue;
        };

        let key = (symbol.to_string(), bucket_start.timestamp_millis());
        match buckets.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(Bar {
                    time: bucket_start,
                    open: record.get("open").and_then(Value::as_f64),
                    high,
                    low,
                    close,
                    volume,
                });
            }
            Entry::Occupied(mut slot) => {
                let bar = slot.get_mut();
                bar.high = bar.high.max(high);
                bar.low = bar.low.min(low);
                bar.close = close;
                bar.volume += volume;
            }
        }
    }

    buckets
        .into_iter()
        .map(|((symbol, _), bar)| {
            let mut out = Record::new();
            out.insert("time", bar.time);
            out.insert("symbol", symbol);
            if let Some(open) = bar.open {
                out.insert("open", open);
            }
            out.insert("high", bar.high);
            out.insert("low", bar.low);
            out.insert("close", bar.close);
            out.insert("volume", bar.volume);
            out
        })
        .collect()
}

/// Keep records whose `event_time` lies within the last `minutes` before
/// `now`. Records without a valid `event_time` are dropped.
pub fn retain_last_minutes(records: &[Record], minutes: f64, now: DateTime<Utc>) -> Vec<Record> {
    records
        .iter()
        .filter(|record| {
            record
                .get("event_time")
                .and_then(Value::as_timestamp)
                .is_some_and(|t| (now - t).num_milliseconds() as f64 / 60_000.0 <= minutes)
        })
        .cloned()
        .collect()
}

/// Keep only the most recent record (by `event_time`) per (symbol, minute of
/// `time`), then apply the [`retain_last_minutes`] window.
///
/// Records missing `symbol`, `event_time`, or `time` are skipped. Output is
/// sorted by (symbol, minute).
pub fn dedupe_latest_per_minute(
    records: &[Record],
    keep_minutes: f64,
    now: DateTime<Utc>,
) -> Vec<Record> {
    let mut latest: BTreeMap<(String, i64), (DateTime<Utc>, Record)> = BTreeMap::new();

    for record in records {
        let Some(symbol) = record.get("symbol").and_then(Value::as_str) else {
            continue;
        };
        let Some(event_time) = record.get("event_time").and_then(Value::as_timestamp) else {
            continue;
        };
        let Some(time) = record.get("time").and_then(Value::as_timestamp) else {
            continue;
        };
        let Ok(minute) = floor_to_minute(time) else {
            continue;
        };

        let key = (symbol.to_string(), minute.timestamp_millis());
        match latest.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert((event_time, record.clone()));
            }
            Entry::Occupied(mut slot) => {
                if event_time > slot.get().0 {
                    slot.insert((event_time, record.clone()));
                }
            }
        }
    }

    let deduped: Vec<Record> = latest.into_values().map(|(_, record)| record).collect();
    retain_last_minutes(&deduped, keep_minutes, now)
}

/// Whether any two records share the same combination of values under
/// `keys`. A record missing one of the keys counts as a duplicate.
pub fn has_duplicate(records: &[Record], keys: &[&str]) -> bool {
    let mut seen = HashSet::with_capacity(records.len());

    for record in records {
        let mut composite = String::new();
        for key in keys {
            match record.get(key) {
                None => return true,
                Some(value) => {
                    composite.push_str(&format!("{value:?}"));
                    composite.push('\u{1f}');
                }
            }
        }
        if !seen.insert(composite) {
            return true;
        }
    }

    false
}

/// Earliest `time` value across the batch.
pub fn min_time(records: &[Record]) -> SeriesResult<DateTime<Utc>> {
    fold_time(records, |acc, t| t < acc)
}

/// Latest `time` value across the batch.
pub fn max_time(records: &[Record]) -> SeriesResult<DateTime<Utc>> {
    fold_time(records, |acc, t| t > acc)
}

fn fold_time(
    records: &[Record],
    replace: impl Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
) -> SeriesResult<DateTime<Utc>> {
    if records.is_empty() {
        return EmptyBatchSnafu.fail();
    }

    let mut acc: Option<DateTime<Utc>> = None;
    for record in records {
        let value = record.get("time").context(MissingFieldSnafu { field: "time" })?;
        let t = value
            .as_timestamp()
            .context(WrongTypeSnafu { field: "time" })?;
        acc = Some(match acc {
            Some(current) if !replace(current, t) => current,
            _ => t,
        });
    }

    // acc is Some here: the batch was non-empty and every record contributed.
    acc.context(EmptyBatchSnafu)
}

/// Canonicalize string scalars across a batch: RFC 3339 strings are
/// re-formatted to the canonical form, numeric strings are parsed into
/// floats, anything else is kept as-is.
pub fn coerce_scalar_strings(records: &[Record]) -> Vec<Record> {
    records
        .iter()
        .map(|record| {
            record
                .iter()
                .map(|(name, value)| {
                    let coerced = match value {
                        Value::Str(s) => {
                            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                                Value::Str(ts.to_rfc3339_opts(SecondsFormat::Secs, true))
                            } else if let Ok(num) = s.parse::<f64>() {
                                Value::Float(num)
                            } else {
                                value.clone()
                            }
                        }
                        other => other.clone(),
                    };
                    (name.to_string(), coerced)
                })
                .collect()
        })
        .collect()
}
