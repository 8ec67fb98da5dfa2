//! REST fallback used while the streaming feed is down.

use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::{HttpClient, HttpError, TradeError, TradeEvent};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PollError {
    #[error("ticker request failed: {0}")]
    Http(#[from] HttpError),
    #[error("ticker response unusable: {0}")]
    Malformed(#[from] TradeError),
}

/// Turns one ticker/last-trade response into a synthetic trade.
#[derive(Debug, Clone)]
pub struct FallbackPoller {
    http: HttpClient,
    path: String,
}

impl FallbackPoller {
    pub fn new(http: HttpClient, symbol: &str) -> Self {
        Self {
            http,
            path: format!("/products/{}/ticker", symbol),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Issues exactly one request. A missing `time` is replaced by `now`.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<TradeEvent, PollError> {
        let ticker: Value = self.http.get_json(&self.path).await?;
        let trade = TradeEvent::from_json_fields(ticker.get("price"), ticker.get("size"), ticker.get("time"), now)?;
        Ok(trade)
    }
}
