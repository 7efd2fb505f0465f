//! # Rollups
//!
//! Minute, hour and day averages over the raw second buckets.
//!
//! The rollup of type `T` over interval `I` lives in collection `T` + suffix
//! (`PADminutes`, `RMChours`, `RAW--GGdays`). Its bucket with id `k` holds a
//! single entry: the per-field mean of every raw entry with
//! `k * I <= timestamp < (k + 1) * I`. A window is only evaluated once it has
//! fully elapsed, and an existing rollup bucket is never rewritten.

use std::time::Instant;

use chrono::DateTime;

use super::Engine;
use crate::error::Result;
use crate::nmea::protocol::FIELD_DEVICE_ID;
use crate::nmea::record::AGGREGATE_DEVICE_ID;
use crate::nmea::{FieldMap, Record};

/// Rollup granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Interval {
    Minute,
    Hour,
    Day,
}

impl Interval {
    pub const ALL: [Interval; 3] = [Interval::Minute, Interval::Hour, Interval::Day];

    /// Window length in seconds
    pub fn seconds(self) -> i64 {
        match self {
            Interval::Minute => 60,
            Interval::Hour => 3_600,
            Interval::Day => 86_400,
        }
    }

    /// Collection name suffix
    pub fn suffix(self) -> &'static str {
        match self {
            Interval::Minute => "minutes",
            Interval::Hour => "hours",
            Interval::Day => "days",
        }
    }

    /// Rollup collection of raw type `kind`
    pub fn collection(self, kind: &str) -> String {
        format!("{}{}", kind, self.suffix())
    }

    /// Start of the window containing `timestamp`
    pub fn align(self, timestamp: i64) -> i64 {
        timestamp - timestamp.rem_euclid(self.seconds())
    }

    pub fn is_aligned(self, timestamp: i64) -> bool {
        timestamp.rem_euclid(self.seconds()) == 0
    }

    /// Rollup bucket id of the window starting at `start`
    pub fn bucket_id(self, start: i64) -> i64 {
        start.div_euclid(self.seconds())
    }
}

/// Whether `name` is a rollup collection rather than a raw type
///
/// A name only counts as a rollup when it is `Interval::collection(base)`
/// for a `base` that is itself in `collections`. A raw type that happens to
/// end in a suffix (`RAWdays` from `$daysX`) stays raw.
pub fn is_rollup_collection(name: &str, collections: &[String]) -> bool {
    Interval::ALL.iter().any(|interval| {
        name.strip_suffix(interval.suffix())
            .is_some_and(|base| !base.is_empty() && collections.iter().any(|c| c == base))
    })
}

/// Per-field arithmetic mean over `entries`
///
/// Each field is averaged over the entries that carry it, so records with
/// differing field sets still produce a mean per field. The device id is an
/// identifier rather than a measurement and is left out.
///
/// # Returns
///
/// * `Option<FieldMap>` - `None` if there are no entries at all
pub fn average<'a, I>(entries: I) -> Option<FieldMap>
where
    I: IntoIterator<Item = &'a FieldMap>,
{
    let mut sums: std::collections::BTreeMap<&str, (f64, u32)> = Default::default();
    let mut seen = false;

    for entry in entries {
        seen = true;
        for (key, value) in entry {
            if key == FIELD_DEVICE_ID || !value.is_finite() {
                continue;
            }
            let slot = sums.entry(key.as_str()).or_insert((0.0, 0));
            slot.0 += value;
            slot.1 += 1;
        }
    }

    seen.then(|| {
        sums.into_iter()
            .map(|(key, (sum, count))| (key.to_string(), sum / f64::from(count)))
            .collect()
    })
}

fn format_ts(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}

impl Engine {
    /// Bring every rollup of raw type `kind` up to date as of `now`
    ///
    /// Intervals whose rollup collection already exists are advanced
    /// incrementally from their newest bucket. Missing ones (or all of them
    /// when `force_backfill` is set) are rebuilt by a single backfill scan
    /// over the whole raw history.
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of rollup buckets written
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read. Failures writing single
    /// windows are reported `Low` and do not stop the pass.
    pub async fn dispatch_type(&self, kind: &str, now: i64, force_backfill: bool) -> Result<usize> {
        let started = Instant::now();
        let mut pending = Vec::new();
        let mut written = 0;

        for interval in Interval::ALL {
            let exists = self.store.collection_exists(&interval.collection(kind)).await?;
            if exists && !force_backfill {
                written += self.advance(kind, interval, now).await?;
            } else {
                pending.push(interval);
            }
        }

        if !pending.is_empty() {
            written += self.backfill(kind, &pending, now).await?;
        }

        self.diagnostics.debug(format!(
            "finished calculating {} in {:.3}s ({} rollup buckets)",
            kind,
            started.elapsed().as_secs_f64(),
            written
        ));
        Ok(written)
    }

    /// Write every complete window after the newest existing rollup bucket
    async fn advance(&self, kind: &str, interval: Interval, now: i64) -> Result<usize> {
        let Some(last_raw) = self.store.last_id(kind).await? else {
            return Ok(0);
        };
        let step = interval.seconds();
        let last_start = (interval.align(now) - step).min(interval.align(last_raw));

        let collection = interval.collection(kind);
        let mut start = match self.store.last_id(&collection).await? {
            Some(id) => (id + 1) * step,
            None => match self.store.first_id(kind).await? {
                Some(first_raw) => interval.align(first_raw),
                None => return Ok(0),
            },
        };

        let mut written = 0;
        while start <= last_start {
            written += self.write_rollup_reported(kind, start, interval).await;
            start += step;
        }
        Ok(written)
    }

    /// Rebuild the `pending` intervals over the whole raw history
    ///
    /// Walks minute instants from the day boundary at or before the first raw
    /// record up to the last one and evaluates each window that starts on
    /// that instant and has fully elapsed.
    async fn backfill(&self, kind: &str, pending: &[Interval], now: i64) -> Result<usize> {
        let (Some(first_raw), Some(last_raw)) =
            (self.store.first_id(kind).await?, self.store.last_id(kind).await?)
        else {
            return Ok(0);
        };

        let start = Interval::Day.align(first_raw);
        self.diagnostics.debug(format!(
            "recalculating {}\nstart: {}\nend: {}",
            kind,
            format_ts(start),
            format_ts(last_raw)
        ));

        let step = Interval::Minute.seconds();
        let mut written = 0;
        let mut instant = start;
        while instant <= last_raw {
            for &interval in pending {
                if interval.is_aligned(instant) && instant + interval.seconds() <= now {
                    written += self.write_rollup_reported(kind, instant, interval).await;
                }
            }
            instant += step;
        }
        Ok(written)
    }

    async fn write_rollup_reported(&self, kind: &str, start: i64, interval: Interval) -> usize {
        match self.write_rollup(kind, start, interval).await {
            Ok(true) => 1,
            Ok(false) => 0,
            Err(e) => {
                self.diagnostics.low(format!(
                    "failed to write {} rollup at {}: {}",
                    interval.collection(kind),
                    format_ts(start),
                    e
                ));
                0
            }
        }
    }

    /// Compute and store the rollup of window `[start, start + I)`
    ///
    /// # Returns
    ///
    /// * `Result<bool>` - false if the rollup already existed or the window
    ///   held no raw entries
    pub async fn write_rollup(&self, kind: &str, start: i64, interval: Interval) -> Result<bool> {
        let collection = interval.collection(kind);
        let id = interval.bucket_id(start);
        if self.store.bucket_exists(&collection, id).await? {
            return Ok(false);
        }

        let buckets = self
            .store
            .range(kind, start, start + interval.seconds())
            .await?;
        let Some(mean) = average(buckets.iter().flat_map(|bucket| bucket.data.iter())) else {
            return Ok(false);
        };

        let mut record = Record::new(id, collection.as_str(), AGGREGATE_DEVICE_ID);
        record.fields.extend(mean);
        Ok(self.write(&record, &collection).await?.is_written())
    }
}
