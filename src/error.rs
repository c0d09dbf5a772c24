use crate::data::bar::BarError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

//fatal input problems, raised before the first bar is processed
#[derive(Error, Debug)]
pub enum DataError {
    #[error("no bars supplied")]
    Empty,
    #[error("required column '{0}' is missing")]
    MissingColumn(String),
    #[error("invalid bar #{index} ({symbol} @ {timestamp}): {source}")]
    InvalidBar {
        index: usize,
        symbol: String,
        timestamp: DateTime<Utc>,
        #[source]
        source: BarError,
    },
    #[error("duplicate bar for {symbol} at {timestamp}")]
    DuplicateBar {
        symbol: String,
        timestamp: DateTime<Utc>,
    },
    #[error("unparseable timestamp '{value}' at line {line}")]
    BadTimestamp { line: usize, value: String },
    #[error("no bars inside the requested date range")]
    EmptyRange,
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

//errors that can abort a run; everything else is absorbed per bar
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

//reasons a sizing method cannot produce a fraction
//never surfaced to callers: converted into a zero-size result
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SizingError {
    #[error("degenerate statistics: {0}")]
    Degenerate(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("order {id}: illegal status transition {from:?} -> {to:?}")]
    IllegalTransition {
        id: u64,
        from: crate::engine::order::OrderStatus,
        to: crate::engine::order::OrderStatus,
    },
    #[error("order {id}: fill of {qty} exceeds remaining {remaining}")]
    Overfill { id: u64, qty: f64, remaining: f64 },
}

//non-fatal anomalies recorded on the result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunWarning {
    SignalValidation {
        timestamp: DateTime<Utc>,
        symbol: String,
        reason: String,
    },
    SizingDegenerate {
        timestamp: DateTime<Utc>,
        symbol: String,
        reason: String,
    },
    OrderRejected {
        timestamp: DateTime<Utc>,
        order_id: u64,
        reason: String,
    },
    Concentration {
        timestamp: DateTime<Utc>,
        symbol: String,
        fraction: f64,
    },
    MarginCall {
        timestamp: DateTime<Utc>,
        drawdown: f64,
    },
    InsufficientSample {
        statistic: String,
        observations: usize,
    },
}
