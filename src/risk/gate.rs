use crate::engine::order::OrderSide;
use crate::portfolio::PositionLedger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

//run-level risk state; only moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskState {
    Running,
    Liquidating,
    Halted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskLimits {
    //drawdown from peak that triggers forced liquidation
    pub margin_call_level: f64,
    pub max_positions: usize,
    //position notional / equity above which a warning is raised
    pub max_concentration: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        RiskLimits {
            margin_call_level: 0.5,
            max_positions: 10,
            max_concentration: 0.30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskAction {
    Continue,
    Liquidate { drawdown: f64 },
}

//enforces global constraints before trades and after every bar
#[derive(Debug, Clone)]
pub struct RiskGate {
    limits: RiskLimits,
    state: RiskState,
    margin_call_at: Option<DateTime<Utc>>,
}

impl RiskGate {
    pub fn new(limits: RiskLimits) -> Self {
        RiskGate {
            limits,
            state: RiskState::Running,
            margin_call_at: None,
        }
    }

    pub fn state(&self) -> RiskState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RiskState::Running
    }

    pub fn margin_call_at(&self) -> Option<DateTime<Utc>> {
        self.margin_call_at
    }

    //checks the drawdown after the bar's exits have been booked
    pub fn evaluate(&mut self, ledger: &PositionLedger, timestamp: DateTime<Utc>) -> RiskAction {
        if self.state != RiskState::Running {
            return RiskAction::Continue;
        }

        let drawdown = ledger.drawdown();
        if drawdown >= self.limits.margin_call_level {
            warn!(
                %timestamp,
                drawdown,
                limit = self.limits.margin_call_level,
                "margin call: liquidating all positions"
            );
            self.state = RiskState::Liquidating;
            self.margin_call_at = Some(timestamp);
            return RiskAction::Liquidate { drawdown };
        }

        RiskAction::Continue
    }

    //called once forced liquidation has been booked
    pub fn halt(&mut self) {
        if self.state == RiskState::Liquidating {
            self.state = RiskState::Halted;
        }
    }

    //pre-trade check for a new order
    //
    //`queued` is the signed quantity already queued for the symbol; the part of
    //the order that shrinks held plus queued exposure always passes, whatever
    //it leaves on the other side is checked like a new position
    pub fn check_order(
        &self,
        ledger: &PositionLedger,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
        queued: f64,
    ) -> Result<(), String> {
        if self.state != RiskState::Running {
            return Err(format!("risk gate is {:?}", self.state));
        }

        let committed = ledger.signed_quantity(symbol) + queued;
        let after = committed + side.sign() * quantity;
        if after.abs() <= committed.abs() + 1e-9 && after * committed >= 0.0 {
            return Ok(());
        }

        let adds_symbol = ledger.position(symbol).is_none() && committed.abs() <= 1e-9;
        if adds_symbol && ledger.open_position_count() >= self.limits.max_positions {
            return Err(format!(
                "position limit reached ({} open)",
                ledger.open_position_count()
            ));
        }

        //the symbol's current margin is released by whatever this order reduces
        let required = after.abs() * price / ledger.leverage();
        let available = ledger.available_margin() + ledger.position_margin(symbol);
        if required > available + 1e-9 {
            return Err(format!(
                "insufficient margin: need {:.2}, have {:.2}",
                required, available
            ));
        }

        Ok(())
    }

    //positions whose notional exceeds the concentration limit
    pub fn concentration_breaches(&self, ledger: &PositionLedger) -> Vec<(String, f64)> {
        if ledger.equity <= 0.0 {
            return Vec::new();
        }
        ledger
            .positions()
            .filter_map(|p| {
                let price = ledger.last_price(&p.symbol).unwrap_or(p.entry_price);
                let fraction = p.notional_value(price) / ledger.equity;
                (fraction > self.limits.max_concentration).then(|| (p.symbol.clone(), fraction))
            })
            .collect()
    }
}
