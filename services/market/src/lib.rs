pub mod backend;
pub mod bar;
pub mod buckets;
pub mod clock;
pub mod feed;
pub mod flush;
pub mod pipeline;
pub mod poller;
pub mod sink;
pub mod supervisor;


pub use backend::{InsertAllBackend, JsonLinesBackend, MemoryBackend};
pub use bar::{BarRow, OhlcvBar};
pub use buckets::{BucketInterval, BucketKey, BucketStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use feed::{FeedClient, FeedError, FeedSession};
pub use flush::FlushScheduler;
pub use pipeline::{Absorbed, IngestPipeline, PipelineCounters};
pub use poller::{FallbackPoller, PollError};
pub use sink::{RowSink, SinkError, SinkStats, SinkStatsSnapshot, StorageBackend, TableRef};
pub use supervisor::{IngestState, IngestorSupervisor};
