use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BarError {
    #[error("bar for bucket {0} has no ticks")]
    Empty(DateTime<Utc>),
    #[error("volume overflow adding {size} to {volume}")]
    VolumeOverflow { volume: Decimal, size: Decimal },
}

/// Running OHLCV aggregate for one bucket.
///
/// Price fields stay `None` until the first tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OhlcvBar {
    open: Option<Decimal>,
    high: Option<Decimal>,
    low: Option<Decimal>,
    close: Option<Decimal>,
    volume: Decimal,
    ticks: u64,
}

impl OhlcvBar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one trade into the bar. A size that would overflow the volume
    /// is rejected and leaves the bar unchanged.
    pub fn apply_tick(&mut self, price: Decimal, size: Decimal) -> Result<(), BarError> {
        let volume = self.volume.checked_add(size).ok_or(BarError::VolumeOverflow {
            volume: self.volume,
            size,
        })?;
        if self.open.is_none() {
            self.open = Some(price);
        }
        self.high = Some(self.high.map_or(price, |h| h.max(price)));
        self.low = Some(self.low.map_or(price, |l| l.min(price)));
        self.close = Some(price);
        self.volume = volume;
        self.ticks += 1;
        Ok(())
    }

    pub fn has_ticks(&self) -> bool {
        self.ticks > 0
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn open(&self) -> Option<Decimal> {
        self.open
    }

    pub fn high(&self) -> Option<Decimal> {
        self.high
    }

    pub fn low(&self) -> Option<Decimal> {
        self.low
    }

    pub fn close(&self) -> Option<Decimal> {
        self.close
    }

    pub fn volume(&self) -> Decimal {
        self.volume
    }

    pub fn to_row(&self, symbol: &str, bucket_start: DateTime<Utc>) -> Result<BarRow, BarError> {
        if !self.has_ticks() {
            return Err(BarError::Empty(bucket_start));
        }
        Ok(BarRow {
            timestamp: bucket_start.to_rfc3339_opts(SecondsFormat::Secs, false),
            symbol: symbol.to_string(),
            open: self.open.and_then(|p| p.to_f64()),
            high: self.high.and_then(|p| p.to_f64()),
            low: self.low.and_then(|p| p.to_f64()),
            close: self.close.and_then(|p| p.to_f64()),
            volume: self.volume.to_f64().unwrap_or(0.0),
        })
    }
}

/// Persistence row for a completed bar, in the storage table's shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarRow {
    /// Bucket start, ISO-8601 with a `+00:00` offset.
    pub timestamp: String,
    pub symbol: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_empty_bar_has_no_prices() {
        let bar = OhlcvBar::new();
        assert!(!bar.has_ticks());
        assert_eq!(bar.open(), None);
        assert_eq!(bar.high(), None);
        assert_eq!(bar.low(), None);
        assert_eq!(bar.close(), None);
        assert_eq!(bar.volume(), Decimal::ZERO);
    }

    #[test]
    fn test_first_tick_sets_all_prices() {
        let mut bar = OhlcvBar::new();
        bar.apply_tick(dec!(50.5), dec!(0.25)).unwrap();
        assert_eq!(bar.open(), Some(dec!(50.5)));
        assert_eq!(bar.high(), Some(dec!(50.5)));
        assert_eq!(bar.low(), Some(dec!(50.5)));
        assert_eq!(bar.close(), Some(dec!(50.5)));
        assert_eq!(bar.volume(), dec!(0.25));
    }

    #[test]
    fn test_open_is_never_overwritten() {
        let mut bar = OhlcvBar::new();
        bar.apply_tick(dec!(10), dec!(1)).unwrap();
        bar.apply_tick(dec!(20), dec!(1)).unwrap();
        bar.apply_tick(dec!(5), dec!(1)).unwrap();
        assert_eq!(bar.open(), Some(dec!(10)));
        assert_eq!(bar.close(), Some(dec!(5)));
    }

    #[test]
    fn test_sequence_matches_reference_fold() {
        let ticks = [
            (dec!(101.5), dec!(0.1)),
            (dec!(99.0), dec!(2)),
            (dec!(104.25), dec!(0.75)),
            (dec!(100), dec!(0)),
            (dec!(98.5), dec!(1.15)),
            (dec!(102), dec!(3)),
        ];
        for len in 1..=ticks.len() {
            let slice = &ticks[..len];
            let mut bar = OhlcvBar::new();
            for (p, s) in slice {
                bar.apply_tick(*p, *s).unwrap();
            }
            let max = slice.iter().map(|t| t.0).max().unwrap();
            let min = slice.iter().map(|t| t.0).min().unwrap();
            let vol: Decimal = slice.iter().map(|t| t.1).sum();
            assert_eq!(bar.open(), Some(slice[0].0));
            assert_eq!(bar.close(), Some(slice[len - 1].0));
            assert_eq!(bar.high(), Some(max));
            assert_eq!(bar.low(), Some(min));
            assert_eq!(bar.volume(), vol);
            assert_eq!(bar.ticks(), len as u64);
            let (lo, hi) = (bar.low().unwrap(), bar.high().unwrap());
            assert!(lo <= bar.open().unwrap() && bar.open().unwrap() <= hi);
            assert!(lo <= bar.close().unwrap() && bar.close().unwrap() <= hi);
        }
    }

    #[test]
    fn test_volume_overflow_rejected_without_mutation() {
        let mut bar = OhlcvBar::new();
        bar.apply_tick(dec!(10), Decimal::MAX).unwrap();
        let before = bar.clone();

        let err = bar.apply_tick(dec!(11), Decimal::MAX).unwrap_err();
        assert!(matches!(err, BarError::VolumeOverflow { .. }));
        assert_eq!(bar, before);
        assert_eq!(bar.ticks(), 1);
        assert_eq!(bar.close(), Some(dec!(10)));
    }

    #[test]
    fn test_to_row_shape() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut bar = OhlcvBar::new();
        bar.apply_tick(dec!(100), dec!(1)).unwrap();
        bar.apply_tick(dec!(105), dec!(2)).unwrap();
        bar.apply_tick(dec!(95), dec!(1)).unwrap();

        let row = bar.to_row("BTC-USD", start).unwrap();
        assert_eq!(row.timestamp, "2024-05-01T10:00:00+00:00");
        assert_eq!(row.symbol, "BTC-USD");
        assert_eq!(row.open, Some(100.0));
        assert_eq!(row.high, Some(105.0));
        assert_eq!(row.low, Some(95.0));
        assert_eq!(row.close, Some(95.0));
        assert_eq!(row.volume, 4.0);
    }

    #[test]
    fn test_to_row_empty_fails() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(OhlcvBar::new().to_row("BTC-USD", start), Err(BarError::Empty(start)));
    }

    #[test]
    fn test_row_serializes_like_table_schema() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut bar = OhlcvBar::new();
        bar.apply_tick(dec!(1.5), dec!(2)).unwrap();
        let json = serde_json::to_value(bar.to_row("ETH-USD", start).unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "timestamp": "2024-05-01T10:00:00+00:00",
                "symbol": "ETH-USD",
                "open": 1.5,
                "high": 1.5,
                "low": 1.5,
                "close": 1.5,
                "volume": 2.0,
            })
        );
    }
}
