#![allow(dead_code)]

use backsight::prelude::*;
use chrono::{DateTime, Duration, TimeZone, Utc};

pub fn day(i: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i as i64)
}

//one bar per day, open == close, a point of range either side
pub fn bars(symbol: &str, closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar::new_unchecked(day(i), symbol, c, c + 1.0, c - 1.0, c, 1_000_000.0))
        .collect()
}

pub fn series(symbol: &str, closes: &[f64]) -> BarSeries {
    BarSeries::new(bars(symbol, closes)).unwrap()
}

pub fn frictionless(initial_capital: f64) -> BacktestConfig {
    BacktestConfig {
        initial_capital,
        commission_rate: 0.0,
        slippage_rate: 0.0,
        ..BacktestConfig::default()
    }
}

pub fn count<F>(warnings: &[RunWarning], pred: F) -> usize
where
    F: Fn(&RunWarning) -> bool,
{
    warnings.iter().filter(|w| pred(w)).count()
}
