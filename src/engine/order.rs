use crate::error::OrderError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

//order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    //direction multiplier (Buy = +1, Sell = -1)
    pub fn sign(&self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    //moves a price against the trader by `rate`
    pub fn adverse(&self, price: f64, rate: f64) -> f64 {
        match self {
            OrderSide::Buy => price * (1.0 + rate),
            OrderSide::Sell => price * (1.0 - rate),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buy" | "long" => Some(OrderSide::Buy),
            "sell" | "short" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

//order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
    TrailingStop,
}

//distance a trailing stop keeps from the best price seen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TrailingOffset {
    Amount(f64),
    Percent(f64),
}

impl TrailingOffset {
    pub fn is_valid(&self) -> bool {
        match *self {
            TrailingOffset::Amount(a) => a.is_finite() && a > 0.0,
            TrailingOffset::Percent(p) => p.is_finite() && p > 0.0 && p < 1.0,
        }
    }

    //stop level for a position protected on `side` (the exit order side)
    pub fn stop_from(&self, reference: f64, side: OrderSide) -> f64 {
        match (*self, side) {
            (TrailingOffset::Amount(a), OrderSide::Sell) => reference - a,
            (TrailingOffset::Amount(a), OrderSide::Buy) => reference + a,
            (TrailingOffset::Percent(p), OrderSide::Sell) => reference * (1.0 - p),
            (TrailingOffset::Percent(p), OrderSide::Buy) => reference * (1.0 + p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum TimeInForce {
    //good till cancelled
    #[default]
    Gtc,
    //immediate or cancel: one bar to fill
    Ioc,
    //good till the given timestamp
    Gtd(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Partial,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    //status only moves forward
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Pending, Partial)
                | (Pending, Filled)
                | (Pending, Cancelled)
                | (Pending, Rejected)
                | (Partial, Partial)
                | (Partial, Filled)
                | (Partial, Cancelled)
        )
    }
}

//represents a trading order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub trail: Option<TrailingOffset>,
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,

    //protective levels handed to the position once filled
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,

    //fill bookkeeping (filled_price is the volume-weighted average)
    pub filled_quantity: f64,
    pub filled_price: Option<f64>,
    pub filled_at: Option<DateTime<Utc>>,
    pub commission: f64,
    pub slippage: f64,
    pub reject_reason: Option<String>,

    pub metadata: IndexMap<String, String>,

    //working state for stop-limit and trailing orders
    pub triggered: bool,
    pub trail_reference: Option<f64>,
}

impl Order {
    fn base(
        id: u64,
        created_at: DateTime<Utc>,
        symbol: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        quantity: f64,
    ) -> Self {
        Order {
            id,
            created_at,
            symbol: symbol.into(),
            side,
            order_type,
            quantity,
            limit_price: None,
            stop_price: None,
            trail: None,
            time_in_force: TimeInForce::Gtc,
            status: OrderStatus::Pending,
            stop_loss: None,
            take_profit: None,
            filled_quantity: 0.0,
            filled_price: None,
            filled_at: None,
            commission: 0.0,
            slippage: 0.0,
            reject_reason: None,
            metadata: IndexMap::new(),
            triggered: false,
            trail_reference: None,
        }
    }

    //creates a new market order
    pub fn market(
        id: u64,
        created_at: DateTime<Utc>,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: f64,
    ) -> Self {
        Order::base(id, created_at, symbol, side, OrderType::Market, quantity)
    }

    //creates a new limit order
    pub fn limit(
        id: u64,
        created_at: DateTime<Utc>,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: f64,
        limit_price: f64,
    ) -> Self {
        let mut order = Order::base(id, created_at, symbol, side, OrderType::Limit, quantity);
        order.limit_price = Some(limit_price);
        order
    }

    //creates a new stop order
    pub fn stop(
        id: u64,
        created_at: DateTime<Utc>,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: f64,
        stop_price: f64,
    ) -> Self {
        let mut order = Order::base(id, created_at, symbol, side, OrderType::Stop, quantity);
        order.stop_price = Some(stop_price);
        order
    }

    pub fn stop_limit(
        id: u64,
        created_at: DateTime<Utc>,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: f64,
        stop_price: f64,
        limit_price: f64,
    ) -> Self {
        let mut order = Order::base(id, created_at, symbol, side, OrderType::StopLimit, quantity);
        order.stop_price = Some(stop_price);
        order.limit_price = Some(limit_price);
        order
    }

    pub fn trailing_stop(
        id: u64,
        created_at: DateTime<Utc>,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: f64,
        trail: TrailingOffset,
    ) -> Self {
        let mut order = Order::base(
            id,
            created_at,
            symbol,
            side,
            OrderType::TrailingStop,
            quantity,
        );
        order.trail = Some(trail);
        order
    }

    pub fn with_protection(mut self, stop_loss: Option<f64>, take_profit: Option<f64>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    pub fn remaining(&self) -> f64 {
        (self.quantity - self.filled_quantity).max(0.0)
    }

    //checks the fields the order type needs
    pub fn validate(&self) -> Result<(), String> {
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err(format!("non-positive quantity {}", self.quantity));
        }

        let positive = |p: Option<f64>| p.map_or(false, |v| v.is_finite() && v > 0.0);
        match self.order_type {
            OrderType::Market => Ok(()),
            OrderType::Limit if !positive(self.limit_price) => {
                Err("limit order without a valid limit price".to_string())
            }
            OrderType::Stop if !positive(self.stop_price) => {
                Err("stop order without a valid stop price".to_string())
            }
            OrderType::StopLimit if !positive(self.stop_price) || !positive(self.limit_price) => {
                Err("stop-limit order needs both stop and limit prices".to_string())
            }
            OrderType::TrailingStop if !self.trail.map_or(false, |t| t.is_valid()) => {
                Err("trailing stop without a valid trail offset".to_string())
            }
            _ => Ok(()),
        }
    }

    //moves the order to a new status, refusing backwards transitions
    pub fn transition(&mut self, to: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(to) {
            return Err(OrderError::IllegalTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    //books a (possibly partial) fill and advances the status
    pub fn record_fill(
        &mut self,
        qty: f64,
        price: f64,
        commission: f64,
        slippage: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        let remaining = self.remaining();
        if qty > remaining + 1e-9 {
            return Err(OrderError::Overfill {
                id: self.id,
                qty,
                remaining,
            });
        }

        let next = if qty >= remaining - 1e-9 {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
        self.transition(next)?;

        let prior_notional = self.filled_price.unwrap_or(0.0) * self.filled_quantity;
        self.filled_quantity += qty;
        self.filled_price = Some((prior_notional + price * qty) / self.filled_quantity);
        self.filled_at = Some(timestamp);
        self.commission += commission;
        self.slippage += slippage;
        Ok(())
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        if self.transition(OrderStatus::Rejected).is_ok() {
            self.reject_reason = Some(reason.into());
        }
    }
}

//represents a filled (or partially filled) order slice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub id: u64,
    pub order_id: u64,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: f64,
    //slippage-adjusted execution price
    pub price: f64,
    pub commission: f64,
    pub slippage: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl Fill {
    //returns the notional value of the fill
    pub fn notional_value(&self) -> f64 {
        self.price * self.qty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn status_never_moves_backwards() {
        let mut order = Order::market(1, ts(), "ES", OrderSide::Buy, 1.0);
        order.record_fill(1.0, 100.0, 0.1, 0.0, ts()).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.transition(OrderStatus::Pending).is_err());
        assert!(order.transition(OrderStatus::Cancelled).is_err());
    }

    #[test]
    fn partial_fills_average_the_price() {
        let mut order = Order::limit(1, ts(), "ES", OrderSide::Buy, 10.0, 100.0);
        order.record_fill(4.0, 100.0, 0.0, 0.0, ts()).unwrap();
        assert_eq!(order.status, OrderStatus::Partial);
        order.record_fill(6.0, 95.0, 0.0, 0.0, ts()).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert!((order.filled_price.unwrap() - 97.0).abs() < 1e-9);
    }

    #[test]
    fn overfill_is_refused() {
        let mut order = Order::market(1, ts(), "ES", OrderSide::Sell, 2.0);
        assert!(matches!(
            order.record_fill(3.0, 1.0, 0.0, 0.0, ts()),
            Err(OrderError::Overfill { .. })
        ));
    }

    #[test]
    fn validation_catches_missing_prices() {
        let mut limit = Order::market(1, ts(), "ES", OrderSide::Buy, 1.0);
        limit.order_type = OrderType::Limit;
        assert!(limit.validate().is_err());

        let zero = Order::market(2, ts(), "ES", OrderSide::Buy, 0.0);
        assert!(zero.validate().is_err());

        let trail = Order::trailing_stop(
            3,
            ts(),
            "ES",
            OrderSide::Sell,
            1.0,
            TrailingOffset::Percent(1.5),
        );
        assert!(trail.validate().is_err());
    }

    #[test]
    fn adverse_slippage_direction() {
        assert!(OrderSide::Buy.adverse(100.0, 0.01) > 100.0);
        assert!(OrderSide::Sell.adverse(100.0, 0.01) < 100.0);
    }
}
