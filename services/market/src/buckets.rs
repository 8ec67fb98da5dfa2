use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::bar::OhlcvBar;

/// Bucket-start instant (UTC).
pub type BucketKey = DateTime<Utc>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IntervalError {
    #[error("bucket interval must be a positive whole number of seconds, got {0:?}")]
    Invalid(Duration),
}

/// Fixed bucket width, aligned to the Unix epoch.
///
/// Whole-second widths that divide a day (1m, 5m, 1h, ...) therefore land on
/// wall-clock boundaries in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketInterval {
    secs: i64,
}

impl BucketInterval {
    pub const HOUR: BucketInterval = BucketInterval { secs: 3600 };
    pub const MINUTE: BucketInterval = BucketInterval { secs: 60 };

    pub fn new(width: Duration) -> Result<Self, IntervalError> {
        if width.subsec_nanos() != 0 || width.as_secs() == 0 || width.as_secs() > i64::MAX as u64 {
            return Err(IntervalError::Invalid(width));
        }
        Ok(Self {
            secs: width.as_secs() as i64,
        })
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.secs as u64)
    }

    /// `floor(t, interval)`: start of the bucket containing `t`.
    pub fn bucket_start(&self, t: DateTime<Utc>) -> BucketKey {
        let ts = t.timestamp();
        let start = ts - ts.rem_euclid(self.secs);
        DateTime::<Utc>::from_timestamp(start, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Owned mapping from bucket start to its running bar.
///
/// Not synchronized: one store belongs to one ingestion task. Keys iterate in
/// chronological order.
#[derive(Debug, Default)]
pub struct BucketStore {
    buckets: BTreeMap<BucketKey, OhlcvBar>,
    watermark: Option<BucketKey>,
}

impl BucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, key: BucketKey) -> &mut OhlcvBar {
        self.buckets.entry(key).or_default()
    }

    pub fn get(&self, key: &BucketKey) -> Option<&OhlcvBar> {
        self.buckets.get(key)
    }

    /// Removes the bucket and advances the flush watermark. `None` if absent.
    pub fn evict(&mut self, key: &BucketKey) -> Option<OhlcvBar> {
        let bar = self.buckets.remove(key)?;
        if self.watermark.map_or(true, |w| *key > w) {
            self.watermark = Some(*key);
        }
        Some(bar)
    }

    /// Snapshot of current keys, oldest first.
    pub fn keys(&self) -> Vec<BucketKey> {
        self.buckets.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Newest bucket start that has been evicted so far.
    pub fn watermark(&self) -> Option<BucketKey> {
        self.watermark
    }

    /// True when `key` is at or below the watermark and not currently open,
    /// i.e. its bucket was already flushed.
    pub fn is_flushed(&self, key: &BucketKey) -> bool {
        match self.watermark {
            Some(w) => *key <= w && !self.buckets.contains_key(key),
            None => false,
        }
    }
}
