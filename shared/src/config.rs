//! Process configuration read from the environment.

use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SYMBOL: &str = "BTC-USD";
pub const DEFAULT_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";
pub const DEFAULT_REST_URL: &str = "https://api.exchange.coinbase.com";
pub const DEFAULT_BIGQUERY_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} must be set")]
    Missing(&'static str),
}

/// What to do with a trade whose bucket was already flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LateTradePolicy {
    /// Recreate the bucket; it is flushed again as an additional row.
    Reopen,
    /// Discard the trade.
    Drop,
}

impl FromStr for LateTradePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reopen" => Ok(Self::Reopen),
            "drop" => Ok(Self::Drop),
            other => Err(format!("expected `reopen` or `drop`, got `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Memory,
    Jsonl,
    Bigquery,
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "jsonl" => Ok(Self::Jsonl),
            "bigquery" => Ok(Self::Bigquery),
            other => Err(format!("unknown sink `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub project: String,
    pub dataset: String,
    pub table: String,
    pub jsonl_dir: String,
    pub bigquery_url: String,
    pub bigquery_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    pub symbol: String,
    pub ws_url: String,
    pub rest_url: String,
    pub bucket_interval: Duration,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    pub late_trades: LateTradePolicy,
    pub sink: SinkConfig,
    pub port: u16,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            symbol: DEFAULT_SYMBOL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            rest_url: DEFAULT_REST_URL.to_string(),
            bucket_interval: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(5),
            http_timeout: Duration::from_secs(10),
            late_trades: LateTradePolicy::Reopen,
            sink: SinkConfig {
                kind: SinkKind::Memory,
                project: "local".to_string(),
                dataset: "moda_mcp".to_string(),
                table: "raw_ohlcv".to_string(),
                jsonl_dir: "data".to_string(),
                bigquery_url: DEFAULT_BIGQUERY_URL.to_string(),
                bigquery_token: None,
            },
            port: 8000,
        }
    }
}

impl IngestConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_vars(&env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let symbol = lookup(vars, "TICKBAR_SYMBOL")
            .map(str::to_string)
            .unwrap_or(defaults.symbol);

        let bucket_interval = match lookup(vars, "TICKBAR_BUCKET_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("TICKBAR_BUCKET_SECS", raw)?),
            None => defaults.bucket_interval,
        };
        let poll_interval = match lookup(vars, "TICKBAR_POLL_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("TICKBAR_POLL_SECS", raw)?),
            None => defaults.poll_interval,
        };
        let http_timeout = match lookup(vars, "TICKBAR_HTTP_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("TICKBAR_HTTP_TIMEOUT_SECS", raw)?),
            None => defaults.http_timeout,
        };

        let late_trades = match lookup(vars, "TICKBAR_LATE_TRADES") {
            Some(raw) => parse_with("TICKBAR_LATE_TRADES", raw)?,
            None => defaults.late_trades,
        };

        let sink_kind = match lookup(vars, "TICKBAR_SINK") {
            Some(raw) => parse_with("TICKBAR_SINK", raw)?,
            None => defaults.sink.kind,
        };
        let bigquery_token = lookup(vars, "TICKBAR_BIGQUERY_TOKEN").map(str::to_string);
        if sink_kind == SinkKind::Bigquery && bigquery_token.is_none() {
            return Err(ConfigError::Missing("TICKBAR_BIGQUERY_TOKEN"));
        }

        let sink = SinkConfig {
            kind: sink_kind,
            project: lookup(vars, "TICKBAR_PROJECT").map(str::to_string).unwrap_or(defaults.sink.project),
            dataset: lookup(vars, "TICKBAR_DATASET").map(str::to_string).unwrap_or(defaults.sink.dataset),
            table: lookup(vars, "TICKBAR_TABLE").map(str::to_string).unwrap_or(defaults.sink.table),
            jsonl_dir: lookup(vars, "TICKBAR_JSONL_DIR").map(str::to_string).unwrap_or(defaults.sink.jsonl_dir),
            bigquery_url: lookup(vars, "TICKBAR_BIGQUERY_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.sink.bigquery_url),
            bigquery_token,
        };

        let port = match lookup(vars, "PORT") {
            Some(raw) => parse_with("PORT", raw)?,
            None => defaults.port,
        };

        Ok(Self {
            symbol,
            ws_url: lookup(vars, "TICKBAR_WS_URL").map(str::to_string).unwrap_or(defaults.ws_url),
            rest_url: lookup(vars, "TICKBAR_REST_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.rest_url),
            bucket_interval,
            poll_interval,
            http_timeout,
            late_trades,
            sink,
            port,
        })
    }
}

fn lookup<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_with<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    let value: u64 = parse_with(key, raw)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
