use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BarError {
    #[error("Invalid OHLC values: high ({high}) < low ({low})")]
    InvalidHighLow { high: f64, low: f64 },
    #[error("Invalid OHLC values: close ({close}) outside high-low range [{low}, {high}]")]
    InvalidClose { close: f64, high: f64, low: f64 },
    #[error("Invalid OHLC values: open ({open}) outside high-low range [{low}, {high}]")]
    InvalidOpen { open: f64, high: f64, low: f64 },
    #[error("Non-finite or non-positive price in bar")]
    NonFinitePrice,
    #[error("Negative volume: {0}")]
    NegativeVolume(f64),
}

//a single ohlcv bar for one symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    //creates a new Bar with validation
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: impl Into<String>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, BarError> {
        let bar = Bar::new_unchecked(timestamp, symbol, open, high, low, close, volume);
        bar.validate()?;
        Ok(bar)
    }

    //creates a Bar without validation
    pub fn new_unchecked(
        timestamp: DateTime<Utc>,
        symbol: impl Into<String>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Bar {
            timestamp,
            symbol: symbol.into(),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    //checks the ohlc relationships
    pub fn validate(&self) -> Result<(), BarError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(BarError::NonFinitePrice);
        }

        if self.high < self.low {
            return Err(BarError::InvalidHighLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(BarError::InvalidClose {
                close: self.close,
                high: self.high,
                low: self.low,
            });
        }

        if self.open < self.low || self.open > self.high {
            return Err(BarError::InvalidOpen {
                open: self.open,
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 || self.volume.is_nan() {
            return Err(BarError::NegativeVolume(self.volume));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn rejects_inverted_range() {
        let err = Bar::new(ts(), "ES", 100.0, 99.0, 101.0, 100.0, 10.0).unwrap_err();
        assert!(matches!(err, BarError::InvalidHighLow { .. }));
    }

    #[test]
    fn rejects_close_outside_range() {
        let err = Bar::new(ts(), "ES", 100.0, 105.0, 95.0, 106.0, 10.0).unwrap_err();
        assert!(matches!(err, BarError::InvalidClose { .. }));
    }

    #[test]
    fn rejects_nan_price() {
        let err = Bar::new(ts(), "ES", f64::NAN, 105.0, 95.0, 100.0, 10.0).unwrap_err();
        assert_eq!(err, BarError::NonFinitePrice);
    }

    #[test]
    fn accepts_valid_bar() {
        let bar = Bar::new(ts(), "ES", 100.0, 105.0, 95.0, 102.0, 10.0).unwrap();
        assert_eq!(bar.symbol, "ES");
        assert!(Bar::new(ts(), "ES", 100.0, 100.0, 100.0, 100.0, 0.0).is_ok());
    }
}
