use chrono::{DateTime, Utc};
use tracing::debug;

use crate::bar::BarRow;
use crate::buckets::{BucketInterval, BucketKey, BucketStore};

/// Selects and evicts buckets whose interval has fully elapsed.
#[derive(Debug, Clone, Copy)]
pub struct FlushScheduler {
    interval: BucketInterval,
}

impl FlushScheduler {
    pub fn new(interval: BucketInterval) -> Self {
        Self { interval }
    }

    /// Keys strictly older than the bucket containing `now`.
    pub fn eligible(&self, store: &BucketStore, now: DateTime<Utc>) -> Vec<BucketKey> {
        let boundary = self.interval.bucket_start(now);
        store.keys().into_iter().filter(|k| *k < boundary).collect()
    }

    /// Evicts every eligible bucket and returns rows for those that saw ticks,
    /// oldest first.
    pub fn flush(&self, store: &mut BucketStore, symbol: &str, now: DateTime<Utc>) -> Vec<BarRow> {
        let mut rows = Vec::new();
        for key in self.eligible(store, now) {
            let Some(bar) = store.evict(&key) else {
                continue;
            };
            match bar.to_row(symbol, key) {
                Ok(row) => rows.push(row),
                Err(err) => debug!(bucket = %key, %err, "skipping empty bucket"),
            }
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn test_eligible_is_strictly_before_boundary() {
        let mut store = BucketStore::new();
        for h in [7, 8, 9, 10] {
            store.get_or_create(at(h, 0)).apply_tick(dec!(1), dec!(1)).unwrap();
        }
        let scheduler = FlushScheduler::new(BucketInterval::HOUR);

        assert_eq!(scheduler.eligible(&store, at(10, 0)), vec![at(7, 0), at(8, 0), at(9, 0)]);
        assert_eq!(scheduler.eligible(&store, at(10, 59)), vec![at(7, 0), at(8, 0), at(9, 0)]);
        assert_eq!(scheduler.eligible(&store, at(9, 30)), vec![at(7, 0), at(8, 0)]);
        assert!(scheduler.eligible(&store, at(7, 15)).is_empty());
    }

    #[test]
    fn test_current_bucket_never_evicted() {
        let mut store = BucketStore::new();
        store.get_or_create(at(10, 0)).apply_tick(dec!(1), dec!(1)).unwrap();
        let scheduler = FlushScheduler::new(BucketInterval::HOUR);

        let rows = scheduler.flush(&mut store, "BTC-USD", at(10, 59));
        assert!(rows.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_empty_bucket_evicted_without_row() {
        let mut store = BucketStore::new();
        store.get_or_create(at(8, 0));
        store.get_or_create(at(9, 0)).apply_tick(dec!(3), dec!(1)).unwrap();
        let scheduler = FlushScheduler::new(BucketInterval::HOUR);

        let rows = scheduler.flush(&mut store, "BTC-USD", at(10, 1));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, "2024-03-10T09:00:00+00:00");
        assert!(store.is_empty());
    }

    #[test]
    fn test_flush_twice_is_idempotent() {
        let mut store = BucketStore::new();
        store.get_or_create(at(9, 0)).apply_tick(dec!(3), dec!(1)).unwrap();
        let scheduler = FlushScheduler::new(BucketInterval::HOUR);

        assert_eq!(scheduler.flush(&mut store, "BTC-USD", at(10, 1)).len(), 1);
        assert!(scheduler.flush(&mut store, "BTC-USD", at(10, 2)).is_empty());
    }
}
