use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TradeError {
    #[error("negative price: {0}")]
    NegativePrice(Decimal),
    #[error("negative size: {0}")]
    NegativeSize(Decimal),
    #[error("missing or unparseable field `{0}`")]
    BadField(&'static str),
}

/// A single observed trade.
///
/// Construction validates that price and size are non-negative; `Decimal` has no
/// NaN or infinity so finiteness holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    price: Decimal,
    size: Decimal,
    timestamp: DateTime<Utc>,
}

impl TradeEvent {
    pub fn new(price: Decimal, size: Decimal, timestamp: DateTime<Utc>) -> Result<Self, TradeError> {
        if price.is_sign_negative() && !price.is_zero() {
            return Err(TradeError::NegativePrice(price));
        }
        if size.is_sign_negative() && !size.is_zero() {
            return Err(TradeError::NegativeSize(size));
        }
        Ok(Self { price, size, timestamp })
    }

    /// Builds a trade from loosely typed JSON fields, as exchanges send them.
    ///
    /// `price` is required. A missing `size` counts as zero and a missing `time`
    /// falls back to `now`.
    pub fn from_json_fields(
        price: Option<&Value>,
        size: Option<&Value>,
        time: Option<&Value>,
        now: DateTime<Utc>,
    ) -> Result<Self, TradeError> {
        let price = price
            .and_then(parse_decimal)
            .ok_or(TradeError::BadField("price"))?;
        let size = match size {
            None | Some(Value::Null) => Decimal::ZERO,
            Some(v) => parse_decimal(v).ok_or(TradeError::BadField("size"))?,
        };
        let timestamp = match time {
            None | Some(Value::Null) => now,
            Some(Value::String(s)) => parse_timestamp(s).ok_or(TradeError::BadField("time"))?,
            Some(_) => return Err(TradeError::BadField("time")),
        };
        Self::new(price, size, timestamp)
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn size(&self) -> Decimal {
        self.size
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Parses a decimal sent either as a JSON string ("101.25") or a JSON number.
pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        _ => None,
    }
}

/// Parses an ISO-8601 instant. Timestamps without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
