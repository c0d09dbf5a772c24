use crate::engine::order::OrderSide;
use crate::strategy::{sma, Signal, Strategy, StrategyContext};

//sma crossover strategy
//goes long when fast sma crosses above slow sma
//exits (or goes short, if allowed) when fast sma crosses below slow sma
#[derive(Debug, Clone)]
pub struct SmaCrossoverStrategy {
    symbol: String,
    fast_window: usize,
    slow_window: usize,
    //protective levels as fractions of the entry price
    stop_loss_pct: Option<f64>,
    take_profit_pct: Option<f64>,
    allow_short: bool,

    //state
    last_fast_sma: Option<f64>,
    last_slow_sma: Option<f64>,
}

impl SmaCrossoverStrategy {
    pub fn new(symbol: impl Into<String>, fast_window: usize, slow_window: usize) -> Self {
        SmaCrossoverStrategy {
            symbol: symbol.into(),
            fast_window,
            slow_window,
            stop_loss_pct: None,
            take_profit_pct: None,
            allow_short: false,
            last_fast_sma: None,
            last_slow_sma: None,
        }
    }

    pub fn with_protection(mut self, stop_loss_pct: Option<f64>, take_profit_pct: Option<f64>) -> Self {
        self.stop_loss_pct = stop_loss_pct;
        self.take_profit_pct = take_profit_pct;
        self
    }

    pub fn with_shorts(mut self, allow_short: bool) -> Self {
        self.allow_short = allow_short;
        self
    }

    //checks for crossover and returns signal
    fn check_crossover(&self, fast_sma: f64, slow_sma: f64) -> Option<OrderSide> {
        if let (Some(prev_fast), Some(prev_slow)) = (self.last_fast_sma, self.last_slow_sma) {
            //bullish crossover fast crosses above slow
            if prev_fast <= prev_slow && fast_sma > slow_sma {
                return Some(OrderSide::Buy);
            }
            //bearish crossover fast crosses below slow
            if prev_fast >= prev_slow && fast_sma < slow_sma {
                return Some(OrderSide::Sell);
            }
        }
        None
    }

    fn entry(&self, side: OrderSide, price: f64) -> Signal {
        let mut signal = match side {
            OrderSide::Buy => Signal::buy(self.symbol.clone()),
            OrderSide::Sell => Signal::sell(self.symbol.clone()),
        };
        //long stops sit below, short stops above
        if let Some(pct) = self.stop_loss_pct {
            signal = signal.with_stop_loss(price * (1.0 - pct * side.sign()));
        }
        if let Some(pct) = self.take_profit_pct {
            signal = signal.with_take_profit(price * (1.0 + pct * side.sign()));
        }
        signal.with_meta("strategy", "sma_crossover")
    }
}

impl Strategy for SmaCrossoverStrategy {
    fn on_start(&mut self, _context: &StrategyContext) {
        self.last_fast_sma = None;
        self.last_slow_sma = None;
    }

    fn on_bar(&mut self, context: &StrategyContext) -> Vec<Signal> {
        let Some(bar) = context.bar(&self.symbol) else {
            return Vec::new();
        };

        //need at least slow_window bars to calculate
        if context.bar_count(&self.symbol) < self.slow_window {
            return Vec::new();
        }

        let closes = context.get_close_prices(&self.symbol, self.slow_window);
        let fast_prices = &closes[closes.len().saturating_sub(self.fast_window)..];

        let (Some(fast_sma), Some(slow_sma)) = (sma(fast_prices), sma(&closes)) else {
            return Vec::new();
        };

        let mut signals = Vec::new();
        if let Some(cross) = self.check_crossover(fast_sma, slow_sma) {
            let held = context.position(&self.symbol).map(|p| p.side);
            match (cross, held) {
                (OrderSide::Buy, Some(OrderSide::Buy)) | (OrderSide::Sell, Some(OrderSide::Sell)) => {}
                (OrderSide::Buy, held) => {
                    if held.is_some() {
                        signals.push(Signal::close(self.symbol.clone()));
                    }
                    signals.push(self.entry(OrderSide::Buy, bar.close));
                }
                (OrderSide::Sell, held) => {
                    if held.is_some() {
                        signals.push(Signal::close(self.symbol.clone()));
                    }
                    if self.allow_short {
                        signals.push(self.entry(OrderSide::Sell, bar.close));
                    }
                }
            }
        }

        self.last_fast_sma = Some(fast_sma);
        self.last_slow_sma = Some(slow_sma);
        signals
    }

    fn name(&self) -> &str {
        "SMA Crossover"
    }
}
