pub mod rsi_reversion;
pub mod sma_crossover;

use crate::data::{Bar, BarTable};
use crate::engine::order::{OrderSide, OrderType, TimeInForce, TrailingOffset};
use crate::portfolio::Position;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

//strategy interface that all strategies must implement
pub trait Strategy: Send {
    //called once before the first bar
    fn on_start(&mut self, _context: &StrategyContext) {}

    //called on each timestamp once exits have been booked
    fn on_bar(&mut self, context: &StrategyContext) -> Vec<Signal>;

    //called after the last processed bar
    fn on_end(&mut self, _context: &StrategyContext) {}

    fn name(&self) -> &str;
}

//an order request produced by a strategy; sized by the engine unless `quantity` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    //limit price for limit and stop-limit orders
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    pub trail: Option<TrailingOffset>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub quantity: Option<f64>,
    pub strength: f64,
    pub ml_confidence: Option<f64>,
    pub volatility: Option<f64>,
    pub time_in_force: TimeInForce,
    //flatten the symbol's position instead of opening one
    pub close: bool,
    pub metadata: IndexMap<String, String>,
}

impl Signal {
    fn new(symbol: impl Into<String>, side: OrderSide) -> Self {
        Signal {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            price: None,
            stop_price: None,
            trail: None,
            stop_loss: None,
            take_profit: None,
            quantity: None,
            strength: 1.0,
            ml_confidence: None,
            volatility: None,
            time_in_force: TimeInForce::Gtc,
            close: false,
            metadata: IndexMap::new(),
        }
    }

    pub fn buy(symbol: impl Into<String>) -> Self {
        Signal::new(symbol, OrderSide::Buy)
    }

    pub fn sell(symbol: impl Into<String>) -> Self {
        Signal::new(symbol, OrderSide::Sell)
    }

    //market exit of whatever is open in `symbol`; the side is resolved by the engine
    pub fn close(symbol: impl Into<String>) -> Self {
        let mut signal = Signal::new(symbol, OrderSide::Sell);
        signal.close = true;
        signal
    }

    pub fn limit(mut self, price: f64) -> Self {
        self.order_type = OrderType::Limit;
        self.price = Some(price);
        self
    }

    pub fn stop(mut self, stop_price: f64) -> Self {
        self.order_type = OrderType::Stop;
        self.stop_price = Some(stop_price);
        self
    }

    pub fn stop_limit(mut self, stop_price: f64, limit_price: f64) -> Self {
        self.order_type = OrderType::StopLimit;
        self.stop_price = Some(stop_price);
        self.price = Some(limit_price);
        self
    }

    pub fn trailing(mut self, trail: TrailingOffset) -> Self {
        self.order_type = OrderType::TrailingStop;
        self.trail = Some(trail);
        self
    }

    pub fn with_stop_loss(mut self, stop_loss: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    pub fn with_take_profit(mut self, take_profit: f64) -> Self {
        self.take_profit = Some(take_profit);
        self
    }

    pub fn with_quantity(mut self, quantity: f64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_ml_confidence(mut self, confidence: f64) -> Self {
        self.ml_confidence = Some(confidence);
        self
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = Some(volatility);
        self
    }

    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    //price the order is expected to execute around, used for sizing
    pub fn reference_price(&self, bar: &Bar) -> f64 {
        match self.order_type {
            OrderType::Limit | OrderType::StopLimit => self.price.unwrap_or(bar.close),
            OrderType::Stop => self.stop_price.unwrap_or(bar.close),
            OrderType::Market | OrderType::TrailingStop => bar.close,
        }
    }
}

//per-symbol ring buffers of past bars
#[derive(Debug, Clone)]
pub struct BarHistory {
    max_history: usize,
    bars: IndexMap<String, VecDeque<Bar>>,
}

impl BarHistory {
    pub fn new(max_history: usize) -> Self {
        BarHistory {
            max_history: max_history.max(1),
            bars: IndexMap::new(),
        }
    }

    pub fn push(&mut self, table: &BarTable) {
        let capacity = self.max_history;
        for (symbol, bar) in table {
            let history = self
                .bars
                .entry(symbol.clone())
                .or_insert_with(|| VecDeque::with_capacity(capacity));
            if history.len() >= capacity {
                history.pop_front();
            }
            history.push_back(bar.clone());
        }
    }

    //returns the last n bars, oldest first
    pub fn get_bars(&self, symbol: &str, n: usize) -> Vec<&Bar> {
        match self.bars.get(symbol) {
            Some(history) => {
                let start = history.len().saturating_sub(n);
                history.range(start..).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn get_close_prices(&self, symbol: &str, n: usize) -> Vec<f64> {
        self.get_bars(symbol, n).iter().map(|b| b.close).collect()
    }

    pub fn bar_count(&self, symbol: &str) -> usize {
        self.bars.get(symbol).map_or(0, |h| h.len())
    }

    pub fn last_bar(&self, symbol: &str) -> Option<&Bar> {
        self.bars.get(symbol)?.back()
    }
}

//read-only view of the run handed to the strategy on each bar
pub struct StrategyContext<'a> {
    pub timestamp: DateTime<Utc>,
    //bars of the current timestamp, keyed by symbol
    pub bars: &'a BarTable,
    //snapshot of the open positions
    pub positions: &'a [Position],
    pub equity: f64,
    pub cash: f64,
    pub history: &'a BarHistory,
}

impl<'a> StrategyContext<'a> {
    pub fn bar(&self, symbol: &str) -> Option<&Bar> {
        self.bars.get(symbol)
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }

    pub fn get_close_prices(&self, symbol: &str, n: usize) -> Vec<f64> {
        self.history.get_close_prices(symbol, n)
    }

    pub fn bar_count(&self, symbol: &str) -> usize {
        self.history.bar_count(symbol)
    }
}

//adapts a plain callback (bars, open positions, capital, timestamp) into a Strategy
pub struct FnStrategy<F> {
    name: String,
    callback: F,
}

impl<F> FnStrategy<F>
where
    F: FnMut(&BarTable, &[Position], f64, DateTime<Utc>) -> Vec<Signal> + Send,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        FnStrategy {
            name: name.into(),
            callback,
        }
    }
}

impl<F> Strategy for FnStrategy<F>
where
    F: FnMut(&BarTable, &[Position], f64, DateTime<Utc>) -> Vec<Signal> + Send,
{
    fn on_bar(&mut self, context: &StrategyContext) -> Vec<Signal> {
        (self.callback)(
            context.bars,
            context.positions,
            context.equity,
            context.timestamp,
        )
    }

    fn name(&self) -> &str {
        &self.name
    }
}

//helper function to calculate simple moving average
pub fn sma(prices: &[f64]) -> Option<f64> {
    if prices.is_empty() {
        return None;
    }
    Some(prices.iter().sum::<f64>() / prices.len() as f64)
}

//helper function to calculate relative strength index
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let recent = &changes[changes.len() - period..];

    let avg_gain = recent.iter().filter(|c| **c > 0.0).sum::<f64>() / period as f64;
    let avg_loss = -recent.iter().filter(|c| **c < 0.0).sum::<f64>() / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn table(day: i64, close: f64) -> BarTable {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day);
        let mut t = BarTable::new();
        t.insert(
            "SPY".to_string(),
            Bar::new_unchecked(ts, "SPY", close, close, close, close, 1.0),
        );
        t
    }

    #[test]
    fn history_is_bounded_per_symbol() {
        let mut history = BarHistory::new(3);
        for day in 0..5 {
            history.push(&table(day, 100.0 + day as f64));
        }
        assert_eq!(history.bar_count("SPY"), 3);
        assert_eq!(history.get_close_prices("SPY", 10), vec![102.0, 103.0, 104.0]);
        assert_eq!(history.get_close_prices("SPY", 2), vec![103.0, 104.0]);
        assert!(history.get_bars("QQQ", 2).is_empty());
    }

    #[test]
    fn rsi_extremes() {
        let rising: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert_eq!(rsi(&rising, 14), Some(100.0));
        let falling: Vec<f64> = (0..20).map(|i| -(i as f64)).collect();
        assert!(rsi(&falling, 14).unwrap() < 1e-9);
        assert_eq!(rsi(&rising[..5], 14), None);
    }

    #[test]
    fn signal_builders_set_order_fields() {
        let s = Signal::buy("SPY")
            .stop_limit(101.0, 102.0)
            .with_stop_loss(95.0)
            .with_meta("tag", "breakout");
        assert_eq!(s.order_type, OrderType::StopLimit);
        assert_eq!(s.stop_price, Some(101.0));
        assert_eq!(s.price, Some(102.0));
        assert_eq!(s.metadata.get("tag").map(String::as_str), Some("breakout"));
        assert!(Signal::close("SPY").close);
    }

    #[test]
    fn callback_strategy_sees_capital_and_time() {
        let mut strategy = FnStrategy::new("probe", |bars: &BarTable, _: &[Position], capital, ts| {
            assert_eq!(capital, 5_000.0);
            bars.keys().map(|s| Signal::buy(s.clone()).with_meta("ts", ts.to_rfc3339())).collect()
        });
        let bars = table(0, 10.0);
        let history = BarHistory::new(5);
        let ctx = StrategyContext {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            bars: &bars,
            positions: &[],
            equity: 5_000.0,
            cash: 5_000.0,
            history: &history,
        };
        let signals = strategy.on_bar(&ctx);
        assert_eq!(signals.len(), 1);
        assert_eq!(strategy.name(), "probe");
    }
}
