use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

//a point in the equity curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub drawdown: f64,
    pub returns: f64,
}

impl EquityPoint {
    pub fn new(timestamp: DateTime<Utc>, equity: f64, drawdown: f64, returns: f64) -> Self {
        EquityPoint {
            timestamp,
            equity,
            drawdown,
            returns,
        }
    }
}

//calculates the equity curve with drawdowns
//
//the initial balance seeds both the peak and the first return
pub fn calculate_equity_curve(
    snapshots: &[(DateTime<Utc>, f64)],
    initial_balance: f64,
) -> Vec<EquityPoint> {
    let mut curve = Vec::with_capacity(snapshots.len());
    let mut peak = initial_balance;
    let mut prev_equity = initial_balance;

    for &(timestamp, equity) in snapshots {
        if equity > peak {
            peak = equity;
        }

        let drawdown = if peak > 0.0 {
            (peak - equity) / peak
        } else {
            0.0
        };

        let returns = if prev_equity != 0.0 {
            (equity - prev_equity) / prev_equity
        } else {
            0.0
        };

        curve.push(EquityPoint::new(timestamp, equity, drawdown, returns));
        prev_equity = equity;
    }

    curve
}

//calculates maximum drawdown from equity curve
pub fn max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    equity_curve
        .iter()
        .map(|point| point.drawdown)
        .fold(0.0, f64::max)
}

//(timestamp, drawdown) pairs in chronological order
pub fn drawdown_curve(equity_curve: &[EquityPoint]) -> Vec<(DateTime<Utc>, f64)> {
    equity_curve
        .iter()
        .map(|p| (p.timestamp, p.drawdown))
        .collect()
}
