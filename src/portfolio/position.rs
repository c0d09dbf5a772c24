use crate::data::Bar;
use crate::engine::order::{Fill, OrderSide};
use crate::portfolio::trade::{CloseReason, Trade};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

//exit leg applied to a position
#[derive(Debug, Clone, Copy)]
pub struct Exit {
    pub price: f64,
    pub quantity: f64,
    pub commission: f64,
    pub slippage: f64,
    pub time: DateTime<Utc>,
    pub reason: CloseReason,
}

//an open (or closed) directional holding in one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub symbol: String,
    pub side: OrderSide,

    //volume-weighted average entry price
    pub entry_price: f64,
    pub quantity: f64,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub status: PositionStatus,

    //net pnl booked by reductions and the final close
    pub realized_pnl: f64,
    //gross mark-to-market pnl at the last price seen
    pub unrealized_pnl: f64,

    //cumulative commission and slippage, entry and exit legs; never decreases
    pub commission: f64,
    pub slippage: f64,

    //entry costs not yet charged to a trade
    pub open_commission: f64,
    pub open_slippage: f64,

    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
}

impl Position {
    //opens a position from a fill (or the unmatched remainder of one)
    pub fn open(id: u64, fill: &Fill, quantity: f64) -> Self {
        let share = quantity / fill.qty;
        let commission = fill.commission * share;
        let slippage = fill.slippage * share;
        Position {
            id,
            symbol: fill.symbol.clone(),
            side: fill.side,
            entry_price: fill.price,
            quantity,
            entry_time: fill.timestamp,
            stop_loss: fill.stop_loss,
            take_profit: fill.take_profit,
            status: PositionStatus::Open,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            commission,
            slippage,
            open_commission: commission,
            open_slippage: slippage,
            exit_price: None,
            exit_time: None,
        }
    }

    //adds a same-side fill, averaging the entry price
    pub fn add(&mut self, fill: &Fill) {
        let total_qty = self.quantity + fill.qty;
        self.entry_price = (self.entry_price * self.quantity + fill.price * fill.qty) / total_qty;
        self.quantity = total_qty;
        self.commission += fill.commission;
        self.slippage += fill.slippage;
        self.open_commission += fill.commission;
        self.open_slippage += fill.slippage;

        if fill.stop_loss.is_some() {
            self.stop_loss = fill.stop_loss;
        }
        if fill.take_profit.is_some() {
            self.take_profit = fill.take_profit;
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    //gross pnl if the whole position were closed at price
    pub fn gross_pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity * self.side.sign()
    }

    pub fn mark(&mut self, price: f64) {
        self.unrealized_pnl = self.gross_pnl_at(price);
    }

    pub fn notional_value(&self, price: f64) -> f64 {
        price * self.quantity
    }

    //capital at risk down to the stop, or a flat share of notional without one
    pub fn heat(&self, fallback_risk: f64) -> f64 {
        match self.stop_loss {
            Some(sl) => (self.entry_price - sl).abs() * self.quantity,
            None => self.entry_price * self.quantity * fallback_risk,
        }
    }

    //stop-loss or take-profit touched by this bar; the stop wins a tie
    pub fn check_exit(&self, bar: &Bar) -> Option<(f64, CloseReason)> {
        if let Some(sl) = self.stop_loss {
            let hit = match self.side {
                OrderSide::Buy => bar.low <= sl,
                OrderSide::Sell => bar.high >= sl,
            };
            if hit {
                return Some((sl, CloseReason::StopLoss));
            }
        }

        if let Some(tp) = self.take_profit {
            let hit = match self.side {
                OrderSide::Buy => bar.high >= tp,
                OrderSide::Sell => bar.low <= tp,
            };
            if hit {
                return Some((tp, CloseReason::TakeProfit));
            }
        }

        None
    }

    //closes `exit.quantity` (capped at the open quantity) and returns the trade
    //
    //a full exit marks the position closed; entry costs are charged pro rata
    pub fn apply_exit(&mut self, exit: Exit, trade_id: u64) -> Trade {
        let quantity = exit.quantity.min(self.quantity);
        let share = quantity / self.quantity;
        let entry_commission = self.open_commission * share;
        let entry_slippage = self.open_slippage * share;

        let gross = (exit.price - self.entry_price) * quantity * self.side.sign();
        let commission = entry_commission + exit.commission;
        let pnl = gross - commission;
        let cost_basis = self.entry_price * quantity;

        self.open_commission -= entry_commission;
        self.open_slippage -= entry_slippage;
        self.commission += exit.commission;
        self.slippage += exit.slippage;
        self.realized_pnl += pnl;
        self.quantity -= quantity;

        if self.quantity <= 1e-9 {
            self.quantity = 0.0;
            self.unrealized_pnl = 0.0;
            self.status = PositionStatus::Closed;
            self.exit_price = Some(exit.price);
            self.exit_time = Some(exit.time);
        }

        Trade {
            id: trade_id,
            position_id: self.id,
            symbol: self.symbol.clone(),
            side: self.side,
            entry_price: self.entry_price,
            exit_price: exit.price,
            entry_time: self.entry_time,
            exit_time: exit.time,
            quantity,
            pnl,
            pnl_pct: if cost_basis > 0.0 { pnl / cost_basis } else { 0.0 },
            commission,
            slippage: entry_slippage + exit.slippage,
            duration_seconds: (exit.time - self.entry_time).num_seconds(),
            reason: exit.reason,
        }
    }
}
