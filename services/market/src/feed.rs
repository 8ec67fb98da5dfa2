//! Streaming trade feed (websocket `matches` channel).

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use shared::TradeEvent;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pipeline::IngestPipeline;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("connect to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("connect to {url} timed out after {timeout:?}")]
    ConnectTimeout { url: String, timeout: Duration },
    #[error("subscribe request failed: {0}")]
    Subscribe(#[source] tungstenite::Error),
    #[error("stream error: {0}")]
    Stream(#[from] tungstenite::Error),
    #[error("stream closed by peer")]
    Closed,
}

/// Subscription request for the `matches` channel of one product.
pub fn subscribe_message(symbol: &str) -> Value {
    serde_json::json!({
        "type": "subscribe",
        "product_ids": [symbol],
        "channels": ["matches"],
    })
}

/// Decodes one inbound frame. Only `match` messages for `symbol` yield a trade;
/// anything else, including malformed JSON, is `None`.
pub fn decode_message(text: &str, symbol: &str, now: DateTime<Utc>) -> Option<TradeEvent> {
    let msg: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(err) => {
            debug!(%err, "ignoring non-JSON feed message");
            return None;
        }
    };

    match msg.get("type").and_then(Value::as_str) {
        Some("match") => {}
        Some("error") => {
            warn!(message = ?msg.get("message"), reason = ?msg.get("reason"), "feed reported an error");
            return None;
        }
        _ => return None,
    }

    if let Some(product) = msg.get("product_id").and_then(Value::as_str) {
        if product != symbol {
            return None;
        }
    }

    match TradeEvent::from_json_fields(msg.get("price"), msg.get("size"), msg.get("time"), now) {
        Ok(trade) => Some(trade),
        Err(err) => {
            debug!(%err, "ignoring malformed match message");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedClient {
    ws_url: String,
    symbol: String,
    connect_timeout: Duration,
}

impl FeedClient {
    pub fn new(ws_url: impl Into<String>, symbol: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            ws_url: ws_url.into(),
            symbol: symbol.into(),
            connect_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.ws_url
    }

    /// Connects and subscribes. Failures are returned, never retried here.
    pub async fn connect(&self) -> Result<FeedSession, FeedError> {
        info!(url = %self.ws_url, symbol = %self.symbol, "connecting trade feed");
        let connect = connect_async(self.ws_url.as_str());
        let (mut ws, _) = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(source)) => {
                return Err(FeedError::Connect {
                    url: self.ws_url.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(FeedError::ConnectTimeout {
                    url: self.ws_url.clone(),
                    timeout: self.connect_timeout,
                })
            }
        };

        ws.send(Message::Text(subscribe_message(&self.symbol).to_string()))
            .await
            .map_err(FeedError::Subscribe)?;
        info!(symbol = %self.symbol, "subscribed to matches channel");

        Ok(FeedSession {
            ws,
            symbol: self.symbol.clone(),
        })
    }
}

/// A connected, subscribed feed.
pub struct FeedSession {
    ws: WsStream,
    symbol: String,
}

impl fmt::Debug for FeedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedSession").field("symbol", &self.symbol).finish()
    }
}

impl FeedSession {
    /// Reads until the stream fails or closes, routing trades into `pipeline`.
    ///
    /// `Ok(())` only when `cancel` fired; every other exit is an error for the
    /// supervisor to act on.
    pub async fn run(mut self, pipeline: &mut IngestPipeline, cancel: &CancellationToken) -> Result<(), FeedError> {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                msg = self.ws.next() => Some(msg),
            };
            let Some(next) = next else {
                if let Err(err) = self.ws.close(None).await {
                    debug!(%err, "close on cancellation failed");
                }
                return Ok(());
            };

            match next {
                None => return Err(FeedError::Closed),
                Some(Err(err)) => return Err(FeedError::Stream(err)),
                Some(Ok(Message::Text(text))) => {
                    if let Some(trade) = decode_message(&text, &self.symbol, pipeline.now()) {
                        pipeline.absorb(&trade);
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    self.ws.send(Message::Pong(payload)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    warn!(?frame, "trade feed closed by server");
                    return Err(FeedError::Closed);
                }
                Some(Ok(_)) => {}
            }
        }
    }
}
