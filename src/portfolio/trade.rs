use crate::engine::order::OrderSide;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Manual,
    MarginCall,
    EndOfData,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CloseReason::StopLoss => "Stop loss",
            CloseReason::TakeProfit => "Take profit",
            CloseReason::Manual => "Manual",
            CloseReason::MarginCall => "Margin call",
            CloseReason::EndOfData => "End of data",
        };
        f.write_str(label)
    }
}

//immutable record of a closed position (or a closed lot of one)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub position_id: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub quantity: f64,
    //net of entry and exit commission
    pub pnl: f64,
    pub pnl_pct: f64,
    pub commission: f64,
    pub slippage: f64,
    pub duration_seconds: i64,
    pub reason: CloseReason,
}

impl Trade {
    pub fn duration(&self) -> Duration {
        Duration::seconds(self.duration_seconds)
    }

    pub fn gross_pnl(&self) -> f64 {
        self.pnl + self.commission
    }

    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }

    pub fn is_loss(&self) -> bool {
        self.pnl < 0.0
    }
}
