//! Ingestion run loop: stream when possible, poll when not.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::feed::{FeedClient, FeedSession};
use crate::pipeline::IngestPipeline;
use crate::poller::FallbackPoller;

/// Externally visible supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestState {
    ConnectingFeed,
    Streaming,
    Polling,
    Stopped,
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestState::ConnectingFeed => "CONNECTING_FEED",
            IngestState::Streaming => "STREAMING",
            IngestState::Polling => "POLLING",
            IngestState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

enum Phase {
    ConnectingFeed,
    Streaming(FeedSession),
    Polling,
}

impl Phase {
    fn state(&self) -> IngestState {
        match self {
            Phase::ConnectingFeed => IngestState::ConnectingFeed,
            Phase::Streaming(_) => IngestState::Streaming,
            Phase::Polling => IngestState::Polling,
        }
    }
}

/// Owns one symbol's pipeline and drives it through
/// `CONNECTING_FEED -> STREAMING | POLLING -> CONNECTING_FEED -> ...`.
pub struct IngestorSupervisor {
    feed: FeedClient,
    poller: FallbackPoller,
    pipeline: IngestPipeline,
    poll_interval: Duration,
    phase: Phase,
    state_tx: watch::Sender<IngestState>,
}

impl IngestorSupervisor {
    pub fn new(feed: FeedClient, poller: FallbackPoller, pipeline: IngestPipeline, poll_interval: Duration) -> Self {
        let (state_tx, _) = watch::channel(IngestState::ConnectingFeed);
        Self {
            feed,
            poller,
            pipeline,
            poll_interval,
            phase: Phase::ConnectingFeed,
            state_tx,
        }
    }

    pub fn state(&self) -> IngestState {
        self.phase.state()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<IngestState> {
        self.state_tx.subscribe()
    }

    pub fn pipeline(&self) -> &IngestPipeline {
        &self.pipeline
    }

    /// Runs until `cancel` fires, then drains pending writes and hands the
    /// pipeline back.
    pub async fn run(mut self, cancel: CancellationToken) -> IngestPipeline {
        info!(symbol = %self.pipeline.symbol(), feed = %self.feed.url(), "ingestor started");
        while !cancel.is_cancelled() {
            self.step(&cancel).await;
        }

        self.pipeline.shutdown().await;
        self.state_tx.send_replace(IngestState::Stopped);
        info!(symbol = %self.pipeline.symbol(), "ingestor stopped");
        self.pipeline
    }

    /// Performs one transition and returns the new state.
    pub async fn step(&mut self, cancel: &CancellationToken) -> IngestState {
        let previous = self.phase.state();
        let phase = std::mem::replace(&mut self.phase, Phase::ConnectingFeed);

        self.phase = match phase {
            Phase::ConnectingFeed => {
                let attempt = tokio::select! {
                    _ = cancel.cancelled() => None,
                    result = self.feed.connect() => Some(result),
                };
                match attempt {
                    None => Phase::ConnectingFeed,
                    Some(Ok(session)) => Phase::Streaming(session),
                    Some(Err(err)) => {
                        warn!(%err, "trade feed unavailable, falling back to polling");
                        Phase::Polling
                    }
                }
            }
            Phase::Streaming(session) => {
                if let Err(err) = session.run(&mut self.pipeline, cancel).await {
                    warn!(%err, "trade feed lost, reconnecting");
                }
                Phase::ConnectingFeed
            }
            Phase::Polling => {
                self.poll_cycle(cancel).await;
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
                Phase::ConnectingFeed
            }
        };

        let next = self.phase.state();
        if next != previous {
            info!(from = %previous, to = %next, "ingestor state change");
        }
        self.state_tx.send_replace(next);
        next
    }

    async fn poll_cycle(&mut self, cancel: &CancellationToken) {
        let now = self.pipeline.now();
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = self.poller.poll_once(now) => result,
        };
        match result {
            Ok(trade) => {
                self.pipeline.absorb(&trade);
            }
            Err(err) => error!(%err, path = %self.poller.path(), "fallback poll failed"),
        }
    }
}
