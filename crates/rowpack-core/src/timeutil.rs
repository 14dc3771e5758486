//! Timestamp and timezone helpers.
//!
//! Collectors report instants as epoch milliseconds; scheduling and
//! bucketing work on UTC instants. These helpers define a stable mapping
//! between the two, plus the interval arithmetic the resampler and the
//! periodic schedulers rely on:
//!
//! - [`instant_at_zone`] resolves an IANA zone name and converts epoch
//!   milliseconds into a zone-aware instant.
//! - [`floor_to_interval`] / [`floor_to_minute`] truncate an instant to a
//!   bucket boundary, counted forward from the Unix epoch.
//! - [`until_next_boundary`] / [`is_boundary_minute`] support "run at the
//!   next round interval" scheduling.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use snafu::prelude::*;

/// Errors raised by timestamp conversions.
#[derive(Debug, Snafu)]
pub enum TimeError {
    /// The zone name is not a known IANA identifier.
    #[snafu(display("unknown timezone {zone}"))]
    UnknownZone {
        /// The unrecognized zone name.
        zone: String,
    },

    /// The millisecond value has no chrono representation.
    #[snafu(display("timestamp value {millis}ms out of range"))]
    OutOfRange {
        /// The offending epoch-millisecond value.
        millis: i64,
    },

    /// The bucket interval was zero or negative.
    #[snafu(display("interval must be positive"))]
    NonPositiveInterval,
}

/// A convenience alias for time conversions.
pub type TimeResult<T> = Result<T, TimeError>;

/// Convert epoch milliseconds into a zone-aware instant.
///
/// `zone` is an IANA identifier such as `America/Sao_Paulo`; an unknown name
/// or an out-of-range millisecond value is an error.
pub fn instant_at_zone(epoch_ms: i64, zone: &str) -> TimeResult<DateTime<Tz>> {
    let tz: Tz = zone
        .parse()
        .ok()
        .context(UnknownZoneSnafu { zone })?;
    let utc = Utc
        .timestamp_millis_opt(epoch_ms)
        .single()
        .context(OutOfRangeSnafu { millis: epoch_ms })?;
    Ok(utc.with_timezone(&tz))
}

/// Truncate `ts` down to the start of its `every`-sized bucket.
///
/// Buckets are contiguous half-open intervals counted forward from the Unix
/// epoch, so the mapping is stable across calls and platforms. Pre-epoch
/// instants round toward earlier time.
pub fn floor_to_interval(ts: DateTime<Utc>, every: Duration) -> TimeResult<DateTime<Utc>> {
    let every_ms = every.num_milliseconds();
    if every_ms <= 0 {
        return NonPositiveIntervalSnafu.fail();
    }

    let ms = ts.timestamp_millis();
    let floored = ms - ms.rem_euclid(every_ms);
    Utc.timestamp_millis_opt(floored)
        .single()
        .context(OutOfRangeSnafu { millis: floored })
}

/// Truncate `ts` down to the start of its minute.
pub fn floor_to_minute(ts: DateTime<Utc>) -> TimeResult<DateTime<Utc>> {
    floor_to_interval(ts, Duration::minutes(1))
}

/// Time remaining from `now` until the next `every`-sized bucket boundary.
pub fn until_next_boundary(now: DateTime<Utc>, every: Duration) -> TimeResult<Duration> {
    let floored = floor_to_interval(now, every)?;
    Ok(floored + every - now)
}

/// Whether `now` falls on a minute that is a multiple of `every_minutes`.
pub fn is_boundary_minute(now: DateTime<Utc>, every_minutes: u32) -> bool {
    every_minutes != 0 && now.minute() % every_minutes == 0
}
