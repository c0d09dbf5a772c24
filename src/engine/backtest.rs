use crate::config::BacktestConfig;
use crate::data::{BarSeries, BarTable};
use crate::engine::execution::OrderProcessor;
use crate::engine::order::{Order, OrderSide, OrderType};
use crate::error::{BacktestError, RunWarning};
use crate::journal::TradeJournal;
use crate::metrics::{calculate_equity_curve, drawdown_curve, MetricsCalculator, PerformanceMetrics};
use crate::portfolio::{CloseReason, Position, PositionLedger, Trade};
use crate::risk::{PositionSizer, RiskAction, RiskGate, SizingMethod, SizingSignal};
use crate::strategy::{BarHistory, Signal, Strategy, StrategyContext};
use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

//how a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    //every bar was processed
    Completed,
    //the risk gate liquidated the account
    Halted,
    //the caller stopped the run
    Stopped,
}

//result of a backtest; plain data, safe to persist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy: String,
    pub status: RunStatus,
    pub config: BacktestConfig,
    pub metrics: PerformanceMetrics,
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
    pub drawdown_curve: Vec<(DateTime<Utc>, f64)>,
    pub trades: Vec<Trade>,
    pub orders: Vec<Order>,
    //positions still open when the run ended
    pub open_positions: Vec<Position>,
    pub warnings: Vec<RunWarning>,
    pub bars_processed: usize,
    pub halted_at: Option<DateTime<Utc>>,
}

impl BacktestResult {
    pub fn final_capital(&self) -> f64 {
        self.metrics.final_capital
    }

    pub fn total_return(&self) -> f64 {
        self.metrics.total_return
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

//replays a bar series through a strategy
//
//the engine owns only configuration and data; every run starts from fresh state
pub struct BacktestEngine {
    config: BacktestConfig,
    series: BarSeries,
}

impl BacktestEngine {
    //validates the config and applies its date bounds to the series
    pub fn new(config: BacktestConfig, series: BarSeries) -> Result<Self, BacktestError> {
        config.validate()?;
        let series = if config.start_date.is_some() || config.end_date.is_some() {
            series.between(config.start_date, config.end_date)?
        } else {
            series
        };
        Ok(BacktestEngine { config, series })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn series(&self) -> &BarSeries {
        &self.series
    }

    //runs the backtest with the given strategy
    pub fn run(&self, strategy: &mut dyn Strategy) -> BacktestResult {
        self.run_with_stop(strategy, |_, _| false)
    }

    //like run, but `stop(timestamp, equity)` is asked after every bar whether to end early
    pub fn run_with_stop<F>(&self, strategy: &mut dyn Strategy, mut stop: F) -> BacktestResult
    where
        F: FnMut(DateTime<Utc>, f64) -> bool,
    {
        info!(
            strategy = strategy.name(),
            bars = self.series.len(),
            symbols = self.series.symbols().len(),
            "backtest started"
        );

        let mut run = RunState::new(&self.config);
        let empty = BarTable::new();
        let first_ts = self.series.first_timestamp().unwrap_or_else(Utc::now);
        strategy.on_start(&run.context(first_ts, &empty, &[]));

        let mut status = RunStatus::Completed;
        let mut last_ts = first_ts;
        let mut last_bars = BarTable::new();

        for (timestamp, bars) in &self.series {
            last_ts = timestamp;
            let outcome = run.step(timestamp, &bars, strategy);
            last_bars = bars;

            if outcome == RunStatus::Halted {
                status = RunStatus::Halted;
                break;
            }
            if stop(timestamp, run.ledger.equity) {
                info!(%timestamp, "backtest stopped by caller");
                status = RunStatus::Stopped;
                break;
            }
        }

        let positions = run.ledger.open_positions();
        strategy.on_end(&run.context(last_ts, &last_bars, &positions));

        if self.config.close_at_end && status != RunStatus::Halted {
            run.flatten(last_ts);
        }

        let result = run.finish(strategy.name(), status, &self.config);
        info!(
            status = ?result.status,
            trades = result.trades.len(),
            final_capital = result.final_capital(),
            total_return = result.total_return(),
            "backtest finished"
        );
        result
    }
}

//mutable state of one run
struct RunState {
    processor: OrderProcessor,
    ledger: PositionLedger,
    gate: RiskGate,
    sizer: PositionSizer,
    journal: TradeJournal,
    history: BarHistory,
    snapshots: Vec<(DateTime<Utc>, f64)>,
    warnings: Vec<RunWarning>,
    bars_in_market: usize,
    //symbols currently above the concentration limit
    concentrated: IndexSet<String>,
    commission_rate: f64,
    allow_short: bool,
    sizing_method: SizingMethod,
    fallback_risk: f64,
}

impl RunState {
    fn new(config: &BacktestConfig) -> Self {
        let sizing = config.sizing_config();
        let fallback_risk = sizing.max_risk_per_trade;
        RunState {
            processor: OrderProcessor::new(config.execution_costs()),
            ledger: PositionLedger::new(config.initial_capital, config.leverage),
            gate: RiskGate::new(config.risk_limits()),
            sizer: PositionSizer::new(sizing, config.initial_capital),
            journal: TradeJournal::new(),
            history: BarHistory::new(config.max_lookback),
            snapshots: Vec::new(),
            warnings: Vec::new(),
            bars_in_market: 0,
            concentrated: IndexSet::new(),
            commission_rate: config.commission_rate,
            allow_short: config.allow_short,
            sizing_method: config.sizing_method,
            fallback_risk,
        }
    }

    fn context<'a>(
        &'a self,
        timestamp: DateTime<Utc>,
        bars: &'a BarTable,
        positions: &'a [Position],
    ) -> StrategyContext<'a> {
        StrategyContext {
            timestamp,
            bars,
            positions,
            equity: self.ledger.equity,
            cash: self.ledger.cash,
            history: &self.history,
        }
    }

    //one timestamp: fills, exits, mark, risk, signals, snapshot; in that order
    fn step(
        &mut self,
        timestamp: DateTime<Utc>,
        bars: &BarTable,
        strategy: &mut dyn Strategy,
    ) -> RunStatus {
        //orders queued on earlier bars
        let mut inventory: IndexMap<String, f64> = self
            .ledger
            .positions()
            .map(|p| (p.symbol.clone(), p.side.sign() * p.quantity))
            .collect();
        let allow_short = self.allow_short;
        let execution = self.processor.process_bar(bars, timestamp, |order, qty| {
            let held = inventory.entry(order.symbol.clone()).or_insert(0.0);
            //without shorting a sell can only take what is long at fill time
            let accepted = match order.side {
                OrderSide::Sell if !allow_short => qty.min(held.max(0.0)),
                _ => qty,
            };
            *held += order.side.sign() * accepted;
            accepted
        });
        for fill in &execution.fills {
            let trades = self.ledger.apply_fill(fill);
            self.book(trades);
        }
        for order_id in execution.refused {
            let reason = "sell would open a short while short selling is disabled".to_string();
            warn!(%timestamp, order_id, %reason, "fill refused");
            self.warnings.push(RunWarning::OrderRejected {
                timestamp,
                order_id,
                reason,
            });
        }
        for order in execution.completed {
            self.journal.record_order(order);
        }

        //stop-loss / take-profit before any new signal
        let exits = self
            .ledger
            .check_exits(bars, timestamp, self.commission_rate);
        self.book(exits);

        self.ledger.mark_to_market(bars);

        if let RiskAction::Liquidate { drawdown } = self.gate.evaluate(&self.ledger, timestamp) {
            let trades = self
                .ledger
                .close_all(timestamp, CloseReason::MarginCall, self.commission_rate);
            self.book(trades);
            for order in self.processor.cancel_all_orders() {
                self.journal.record_order(order);
            }
            self.gate.halt();
            self.warnings
                .push(RunWarning::MarginCall { timestamp, drawdown });
            self.snapshots.push((timestamp, self.ledger.equity));
            return RunStatus::Halted;
        }

        //warn once per breach, not on every bar it lasts
        let breaches = self.gate.concentration_breaches(&self.ledger);
        self.concentrated
            .retain(|symbol| breaches.iter().any(|(s, _)| s == symbol));
        for (symbol, fraction) in breaches {
            if self.concentrated.insert(symbol.clone()) {
                warn!(%timestamp, %symbol, fraction, "position concentration above limit");
                self.warnings.push(RunWarning::Concentration {
                    timestamp,
                    symbol,
                    fraction,
                });
            }
        }

        for (symbol, bar) in bars {
            if let Some(prev) = self.history.last_bar(symbol) {
                if prev.close > 0.0 {
                    self.sizer.record_return(symbol, bar.close / prev.close - 1.0);
                }
            }
        }
        self.history.push(bars);
        self.sizer.update_equity(self.ledger.equity);
        self.sizer
            .set_portfolio(self.ledger.heat(self.fallback_risk), self.ledger.open_symbols());

        let positions = self.ledger.open_positions();
        let signals = strategy.on_bar(&self.context(timestamp, bars, &positions));
        for signal in signals {
            self.handle_signal(signal, timestamp, bars);
        }

        if self.ledger.open_position_count() > 0 {
            self.bars_in_market += 1;
        }
        self.snapshots.push((timestamp, self.ledger.equity));
        RunStatus::Completed
    }

    fn book(&mut self, trades: Vec<Trade>) {
        for trade in trades {
            self.sizer.record_trade(trade.pnl);
            self.journal.record_trade(trade);
        }
    }

    fn drop_signal(&mut self, timestamp: DateTime<Utc>, symbol: &str, reason: String) {
        warn!(%timestamp, symbol, %reason, "signal dropped");
        self.warnings.push(RunWarning::SignalValidation {
            timestamp,
            symbol: symbol.to_string(),
            reason,
        });
    }

    //validates, sizes and queues one strategy signal
    fn handle_signal(&mut self, signal: Signal, timestamp: DateTime<Utc>, bars: &BarTable) {
        let Some(bar) = bars.get(&signal.symbol) else {
            let reason = "no bar for symbol at this timestamp".to_string();
            self.drop_signal(timestamp, &signal.symbol, reason);
            return;
        };

        //net exposure once the market orders already queued have filled
        let held = self.ledger.signed_quantity(&signal.symbol);
        let queued = self.processor.queued_quantity(&signal.symbol);
        let projected = held + queued;

        if signal.close {
            if held.abs() <= 1e-9 {
                let reason = "close requested with no open position".to_string();
                self.drop_signal(timestamp, &signal.symbol, reason);
                return;
            }
            if projected.abs() <= 1e-9 {
                let reason = "position is already being closed".to_string();
                self.drop_signal(timestamp, &signal.symbol, reason);
                return;
            }
            let side = if projected > 0.0 { OrderSide::Sell } else { OrderSide::Buy };
            let id = self.processor.next_order_id();
            let mut order = Order::market(id, timestamp, &signal.symbol, side, projected.abs());
            order.metadata = signal.metadata;
            order.metadata.insert("intent".to_string(), "close".to_string());
            self.submit(order, timestamp);
            return;
        }

        if let Err(reason) = validate_signal(&signal, bar.close) {
            self.drop_signal(timestamp, &signal.symbol, reason);
            return;
        }

        //how much of an order on this side only shrinks the projected position
        let reducible = if projected * signal.side.sign() < 0.0 {
            projected.abs()
        } else {
            0.0
        };
        if signal.side == OrderSide::Sell && !self.allow_short && reducible <= 1e-9 {
            let reason = "short selling is disabled".to_string();
            self.drop_signal(timestamp, &signal.symbol, reason);
            return;
        }

        let reference = signal.reference_price(bar);
        let mut sizing_note = None;
        let mut quantity = match signal.quantity {
            Some(q) => q,
            //an unsized opposite signal exits the position
            None if reducible > 1e-9 => reducible,
            None => {
                let mut request = SizingSignal::new(signal.symbol.clone(), signal.side, reference)
                    .with_strength(signal.strength);
                request.stop_loss = signal.stop_loss;
                request.take_profit = signal.take_profit;
                request.ml_confidence = signal.ml_confidence;
                request.volatility = signal.volatility;

                let sized = self.sizer.calculate_position_size(&request, self.sizing_method);
                if sized.is_zero() {
                    warn!(%timestamp, symbol = %signal.symbol, reason = %sized.reasoning, "zero position size");
                    self.warnings.push(RunWarning::SizingDegenerate {
                        timestamp,
                        symbol: signal.symbol.clone(),
                        reason: sized.reasoning,
                    });
                    return;
                }
                sizing_note = Some(sized.reasoning);
                sized.position_size
            }
        };

        //without shorting a sell can at most flatten the long
        if signal.side == OrderSide::Sell && !self.allow_short {
            quantity = quantity.min(reducible);
        }

        let id = self.processor.next_order_id();
        let mut order = build_order(id, timestamp, &signal, quantity);
        if let Some(note) = sizing_note {
            order.metadata.insert("sizing".to_string(), note);
        }

        if let Err(reason) =
            self.gate
                .check_order(&self.ledger, &signal.symbol, signal.side, quantity, reference, queued)
        {
            warn!(%timestamp, order_id = id, %reason, "order rejected by risk gate");
            order.reject(reason.clone());
            self.warnings.push(RunWarning::OrderRejected {
                timestamp,
                order_id: id,
                reason,
            });
            self.journal.record_order(order);
            return;
        }

        self.submit(order, timestamp);
    }

    fn submit(&mut self, order: Order, timestamp: DateTime<Utc>) {
        match self.processor.submit(order) {
            Ok(id) => debug!(%timestamp, order_id = id, "order queued"),
            Err(rejected) => {
                self.warnings.push(RunWarning::OrderRejected {
                    timestamp,
                    order_id: rejected.id,
                    reason: rejected.reject_reason.clone().unwrap_or_default(),
                });
                self.journal.record_order(rejected);
            }
        }
    }

    //closes everything at the last close and cancels working orders
    fn flatten(&mut self, timestamp: DateTime<Utc>) {
        for order in self.processor.cancel_all_orders() {
            self.journal.record_order(order);
        }
        let trades = self
            .ledger
            .close_all(timestamp, CloseReason::EndOfData, self.commission_rate);
        self.book(trades);
        if let Some(last) = self.snapshots.last_mut() {
            last.1 = self.ledger.equity;
        }
    }

    fn finish(mut self, strategy: &str, status: RunStatus, config: &BacktestConfig) -> BacktestResult {
        //still-working orders are reported as they stand
        for order in self.processor.pending_orders() {
            self.journal.record_order(order.clone());
        }

        let curve = calculate_equity_curve(&self.snapshots, config.initial_capital);
        let calculator = MetricsCalculator {
            risk_free_rate: config.risk_free_rate,
            periods_per_year: config.sizing.periods_per_year,
            ..MetricsCalculator::default()
        };
        let (metrics, metric_warnings) = calculator.calculate(
            &curve,
            self.journal.trades(),
            config.initial_capital,
            self.bars_in_market,
        );
        self.warnings.extend(metric_warnings);

        let open_positions = self.ledger.open_positions();
        let halted_at = self.gate.margin_call_at();
        let bars_processed = self.snapshots.len();
        let drawdowns = drawdown_curve(&curve);
        let (orders, trades) = self.journal.into_parts();

        BacktestResult {
            strategy: strategy.to_string(),
            status,
            config: config.clone(),
            metrics,
            equity_curve: self.snapshots,
            drawdown_curve: drawdowns,
            trades,
            orders,
            open_positions,
            warnings: self.warnings,
            bars_processed,
            halted_at,
        }
    }
}

//checks the prices a signal carries against its side and type
fn validate_signal(signal: &Signal, price: f64) -> Result<(), String> {
    let positive = |p: Option<f64>| p.map_or(false, |v| v.is_finite() && v > 0.0);

    match signal.order_type {
        OrderType::Market => {}
        OrderType::Limit if !positive(signal.price) => {
            return Err("limit signal without a limit price".to_string())
        }
        OrderType::Stop if !positive(signal.stop_price) => {
            return Err("stop signal without a stop price".to_string())
        }
        OrderType::StopLimit if !positive(signal.price) || !positive(signal.stop_price) => {
            return Err("stop-limit signal needs stop and limit prices".to_string())
        }
        OrderType::TrailingStop if !signal.trail.map_or(false, |t| t.is_valid()) => {
            return Err("trailing signal without a valid trail".to_string())
        }
        _ => {}
    }

    if let Some(q) = signal.quantity {
        if !q.is_finite() || q <= 0.0 {
            return Err(format!("non-positive quantity {}", q));
        }
    }
    if !signal.strength.is_finite() {
        return Err("non-finite signal strength".to_string());
    }

    let sign = signal.side.sign();
    if let Some(sl) = signal.stop_loss {
        if !sl.is_finite() || (price - sl) * sign <= 0.0 {
            return Err(format!("stop loss {} on the wrong side of {}", sl, price));
        }
    }
    if let Some(tp) = signal.take_profit {
        if !tp.is_finite() || (tp - price) * sign <= 0.0 {
            return Err(format!("take profit {} on the wrong side of {}", tp, price));
        }
    }
    Ok(())
}

fn build_order(id: u64, timestamp: DateTime<Utc>, signal: &Signal, quantity: f64) -> Order {
    let symbol = signal.symbol.as_str();
    let side = signal.side;
    let order = match signal.order_type {
        OrderType::Market => Order::market(id, timestamp, symbol, side, quantity),
        OrderType::Limit => {
            Order::limit(id, timestamp, symbol, side, quantity, signal.price.unwrap_or_default())
        }
        OrderType::Stop => Order::stop(
            id,
            timestamp,
            symbol,
            side,
            quantity,
            signal.stop_price.unwrap_or_default(),
        ),
        OrderType::StopLimit => Order::stop_limit(
            id,
            timestamp,
            symbol,
            side,
            quantity,
            signal.stop_price.unwrap_or_default(),
            signal.price.unwrap_or_default(),
        ),
        OrderType::TrailingStop => match signal.trail {
            Some(trail) => Order::trailing_stop(id, timestamp, symbol, side, quantity, trail),
            None => Order::market(id, timestamp, symbol, side, quantity),
        },
    };

    let mut order = order
        .with_protection(signal.stop_loss, signal.take_profit)
        .with_time_in_force(signal.time_in_force);
    order.metadata = signal.metadata.clone();
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Bar;
    use crate::engine::order::OrderStatus;
    use crate::strategy::FnStrategy;
    use chrono::{Duration, TimeZone};

    fn series(closes: &[f64]) -> BarSeries {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                Bar::new_unchecked(
                    start + Duration::days(i as i64),
                    "SPY",
                    *c,
                    c + 1.0,
                    c - 1.0,
                    *c,
                    1_000.0,
                )
            })
            .collect();
        BarSeries::new(bars).unwrap()
    }

    fn frictionless() -> BacktestConfig {
        BacktestConfig {
            initial_capital: 10_000.0,
            commission_rate: 0.0,
            slippage_rate: 0.0,
            ..BacktestConfig::default()
        }
    }

    #[test]
    fn market_entry_fills_on_the_next_bar() {
        let engine = BacktestEngine::new(frictionless(), series(&[100.0, 102.0, 104.0])).unwrap();
        let mut first = true;
        let mut strategy = FnStrategy::new("once", move |_: &BarTable, _: &[Position], _, _| {
            if std::mem::take(&mut first) {
                vec![Signal::buy("SPY").with_quantity(10.0)]
            } else {
                vec![]
            }
        });
        let result = engine.run(&mut strategy);
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.open_positions.len(), 1);
        assert_eq!(result.open_positions[0].entry_price, 102.0);
        //equity after bar 3: 10 * (104 - 102)
        assert!((result.final_capital() - 10_020.0).abs() < 1e-9);
        assert_eq!(result.equity_curve.len(), 3);
    }

    #[test]
    fn shorts_are_dropped_when_disabled() {
        let engine = BacktestEngine::new(frictionless(), series(&[100.0, 101.0])).unwrap();
        let mut strategy = FnStrategy::new("shorty", |_: &BarTable, _: &[Position], _, _| {
            vec![Signal::sell("SPY").with_quantity(1.0)]
        });
        let result = engine.run(&mut strategy);
        assert!(result.orders.is_empty());
        assert!(result
            .warnings
            .iter()
            .any(|w| matches!(w, RunWarning::SignalValidation { .. })));
    }

    #[test]
    fn malformed_signal_is_dropped_not_fatal() {
        let engine = BacktestEngine::new(frictionless(), series(&[100.0, 101.0])).unwrap();
        let mut strategy = FnStrategy::new("bad", |_: &BarTable, _: &[Position], _, _| {
            vec![
                Signal::buy("SPY").with_quantity(1.0).with_stop_loss(150.0),
                Signal::buy("QQQ").with_quantity(1.0),
            ]
        });
        let result = engine.run(&mut strategy);
        let dropped = result
            .warnings
            .iter()
            .filter(|w| matches!(w, RunWarning::SignalValidation { .. }))
            .count();
        assert_eq!(dropped, 4);
        assert_eq!(result.status, RunStatus::Completed);
    }

    #[test]
    fn caller_can_stop_early() {
        let engine = BacktestEngine::new(frictionless(), series(&[1.0, 2.0, 3.0, 4.0])).unwrap();
        let mut strategy = FnStrategy::new("idle", |_: &BarTable, _: &[Position], _, _| vec![]);
        let mut seen = 0;
        let result = engine.run_with_stop(&mut strategy, |_, _| {
            seen += 1;
            seen == 2
        });
        assert_eq!(result.status, RunStatus::Stopped);
        assert_eq!(result.bars_processed, 2);
    }

    #[test]
    fn close_at_end_flattens_with_end_of_data() {
        let config = BacktestConfig {
            close_at_end: true,
            ..frictionless()
        };
        let engine = BacktestEngine::new(config, series(&[100.0, 100.0, 110.0])).unwrap();
        let mut strategy = FnStrategy::new("hold", |_: &BarTable, p: &[Position], _, _| {
            if p.is_empty() {
                vec![Signal::buy("SPY").with_quantity(5.0)]
            } else {
                vec![]
            }
        });
        let result = engine.run(&mut strategy);
        assert!(result.open_positions.is_empty());
        let last = result.trades.last().unwrap();
        assert_eq!(last.reason, CloseReason::EndOfData);
        assert!((last.pnl - 50.0).abs() < 1e-9);
        assert!((result.equity_curve.last().unwrap().1 - 10_050.0).abs() < 1e-9);
        assert!(result.orders.iter().all(|o| o.status == OrderStatus::Filled));
    }

    #[test]
    fn date_bounds_with_no_data_are_a_data_error() {
        let config = BacktestConfig {
            start_date: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
            ..frictionless()
        };
        assert!(matches!(
            BacktestEngine::new(config, series(&[1.0, 2.0])),
            Err(BacktestError::Data(_))
        ));
    }
}
