use chrono::{DateTime, Utc};
use shared::{LateTradePolicy, TradeEvent};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::buckets::{BucketInterval, BucketKey, BucketStore};
use crate::clock::Clock;
use crate::flush::FlushScheduler;
use crate::sink::RowSink;

/// Result of feeding one trade into the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absorbed {
    /// Tick applied to `bucket`; `flushed` rows were handed to the sink.
    Applied { bucket: BucketKey, flushed: usize },
    /// The bucket was already flushed and the policy is to drop.
    DroppedLate { bucket: BucketKey },
    /// The tick could not be folded into the bar (volume overflow).
    Rejected { bucket: BucketKey },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineCounters {
    pub trades_applied: u64,
    pub trades_rejected: u64,
    pub late_reopened: u64,
    pub late_dropped: u64,
    pub rows_flushed: u64,
}

/// Single-symbol aggregation path shared by the live feed and the poller:
/// bucket lookup, tick application, flush, hand-off to the sink.
pub struct IngestPipeline {
    symbol: String,
    interval: BucketInterval,
    store: BucketStore,
    scheduler: FlushScheduler,
    sink: RowSink,
    clock: Arc<dyn Clock>,
    late_trades: LateTradePolicy,
    counters: PipelineCounters,
}

impl IngestPipeline {
    pub fn new(
        symbol: impl Into<String>,
        interval: BucketInterval,
        sink: RowSink,
        clock: Arc<dyn Clock>,
        late_trades: LateTradePolicy,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            store: BucketStore::new(),
            scheduler: FlushScheduler::new(interval),
            sink,
            clock,
            late_trades,
            counters: PipelineCounters::default(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval(&self) -> BucketInterval {
        self.interval
    }

    pub fn store(&self) -> &BucketStore {
        &self.store
    }

    pub fn sink(&self) -> &RowSink {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut RowSink {
        &mut self.sink
    }

    pub fn counters(&self) -> PipelineCounters {
        self.counters
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn absorb(&mut self, trade: &TradeEvent) -> Absorbed {
        let bucket = self.interval.bucket_start(trade.timestamp());

        if self.store.is_flushed(&bucket) {
            match self.late_trades {
                LateTradePolicy::Drop => {
                    self.counters.late_dropped += 1;
                    warn!(bucket = %bucket, price = %trade.price(), "dropping trade for flushed bucket");
                    return Absorbed::DroppedLate { bucket };
                }
                LateTradePolicy::Reopen => {
                    self.counters.late_reopened += 1;
                    warn!(bucket = %bucket, price = %trade.price(), "reopening flushed bucket");
                }
            }
        }

        if let Err(err) = self.store.get_or_create(bucket).apply_tick(trade.price(), trade.size()) {
            self.counters.trades_rejected += 1;
            debug!(bucket = %bucket, %err, "dropping unusable trade");
            return Absorbed::Rejected { bucket };
        }
        self.counters.trades_applied += 1;
        debug!(bucket = %bucket, price = %trade.price(), size = %trade.size(), "tick applied");

        let flushed = self.flush();
        Absorbed::Applied { bucket, flushed }
    }

    /// Evicts completed buckets and schedules their write. Returns the row count.
    pub fn flush(&mut self) -> usize {
        let rows = self.scheduler.flush(&mut self.store, &self.symbol, self.clock.now());
        let count = rows.len();
        if self.sink.submit(rows) {
            self.counters.rows_flushed += count as u64;
        }
        count
    }

    /// Final flush and drain of pending writes. Buckets still in progress are
    /// reported and discarded.
    pub async fn shutdown(&mut self) {
        self.flush();
        self.sink.wait_idle().await;
        if !self.store.is_empty() {
            warn!(
                symbol = %self.symbol,
                buckets = self.store.len(),
                "discarding in-progress buckets at shutdown"
            );
        }
    }
}
