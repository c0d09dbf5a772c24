use crate::engine::order::OrderSide;
use crate::strategy::{rsi, Signal, Strategy, StrategyContext};

//rsi mean reversion strategy
//buys when rsi drops below oversold threshold
//sells when rsi rises above overbought threshold, flattens in the neutral zone
#[derive(Debug, Clone)]
pub struct RsiReversionStrategy {
    symbol: String,
    lookback: usize,
    oversold: f64,
    overbought: f64,
    stop_loss_pct: Option<f64>,
    allow_short: bool,
}

impl RsiReversionStrategy {
    pub fn new(symbol: impl Into<String>, lookback: usize, oversold: f64, overbought: f64) -> Self {
        RsiReversionStrategy {
            symbol: symbol.into(),
            lookback,
            oversold,
            overbought,
            stop_loss_pct: None,
            allow_short: false,
        }
    }

    //default rsi strategy with standard parameters
    pub fn standard(symbol: impl Into<String>) -> Self {
        Self::new(symbol, 14, 30.0, 70.0)
    }

    pub fn with_stop_loss(mut self, pct: f64) -> Self {
        self.stop_loss_pct = Some(pct);
        self
    }

    pub fn with_shorts(mut self, allow_short: bool) -> Self {
        self.allow_short = allow_short;
        self
    }

    fn entry(&self, side: OrderSide, price: f64, rsi_value: f64) -> Signal {
        let signal = match side {
            OrderSide::Buy => Signal::buy(self.symbol.clone()),
            OrderSide::Sell => Signal::sell(self.symbol.clone()),
        };
        //stronger conviction the further rsi sits past its threshold
        let depth = match side {
            OrderSide::Buy => (self.oversold - rsi_value) / self.oversold.max(1.0),
            OrderSide::Sell => (rsi_value - self.overbought) / (100.0 - self.overbought).max(1.0),
        };
        let signal = signal
            .with_strength((0.7 + depth).clamp(0.0, 1.0))
            .with_meta("rsi", format!("{:.2}", rsi_value));
        match self.stop_loss_pct {
            Some(pct) => signal.with_stop_loss(price * (1.0 - pct * side.sign())),
            None => signal,
        }
    }
}

impl Strategy for RsiReversionStrategy {
    fn on_bar(&mut self, context: &StrategyContext) -> Vec<Signal> {
        let Some(bar) = context.bar(&self.symbol) else {
            return Vec::new();
        };

        //need at least lookback + 1 bars for rsi calculation
        if context.bar_count(&self.symbol) < self.lookback + 1 {
            return Vec::new();
        }

        let closes = context.get_close_prices(&self.symbol, self.lookback + 1);
        let Some(rsi_value) = rsi(&closes, self.lookback) else {
            return Vec::new();
        };

        let held = context.position(&self.symbol).map(|p| p.side);
        let mut signals = Vec::new();

        if rsi_value < self.oversold {
            //oversold - go long if not already
            if held != Some(OrderSide::Buy) {
                if held.is_some() {
                    signals.push(Signal::close(self.symbol.clone()));
                }
                signals.push(self.entry(OrderSide::Buy, bar.close, rsi_value));
            }
        } else if rsi_value > self.overbought {
            //overbought - exit longs, go short if allowed
            if held == Some(OrderSide::Buy) {
                signals.push(Signal::close(self.symbol.clone()));
            }
            if self.allow_short && held != Some(OrderSide::Sell) {
                signals.push(self.entry(OrderSide::Sell, bar.close, rsi_value));
            }
        } else if held.is_some() {
            //in neutral zone - close positions if open
            signals.push(Signal::close(self.symbol.clone()));
        }

        signals
    }

    fn name(&self) -> &str {
        "RSI Reversion"
    }
}
