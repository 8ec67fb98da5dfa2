pub mod config;
pub mod http;
pub mod logger;
pub mod types;

pub use config::{ConfigError, IngestConfig, LateTradePolicy, SinkConfig, SinkKind};
pub use http::{HttpClient, HttpError};
pub use types::{TradeError, TradeEvent};
