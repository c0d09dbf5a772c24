use crate::engine::order::OrderSide;
use crate::error::SizingError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizingMethod {
    Kelly,
    OptimalF,
    Volatility,
    FixedFractional,
}

impl SizingMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "kelly" => Some(SizingMethod::Kelly),
            "optimal_f" | "optimal-f" | "optimalf" => Some(SizingMethod::OptimalF),
            "volatility" | "vol" => Some(SizingMethod::Volatility),
            "fixed" | "fixed_fractional" | "fixed-fractional" => {
                Some(SizingMethod::FixedFractional)
            }
            _ => None,
        }
    }
}

//share of the kelly fraction actually used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Conservative,
    Moderate,
    Aggressive,
    Full,
}

impl RiskLevel {
    pub fn fraction(&self) -> f64 {
        match self {
            RiskLevel::Conservative => 0.25,
            RiskLevel::Moderate => 0.5,
            RiskLevel::Aggressive => 0.75,
            RiskLevel::Full => 1.0,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "conservative" => Some(RiskLevel::Conservative),
            "moderate" => Some(RiskLevel::Moderate),
            "aggressive" => Some(RiskLevel::Aggressive),
            "full" => Some(RiskLevel::Full),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    pub max_risk_per_trade: f64,
    pub risk_level: RiskLevel,
    //ceiling on total capital at risk, as a fraction of equity
    pub max_portfolio_heat: f64,
    pub correlation_threshold: f64,
    //annualized volatility the volatility method aims for
    pub target_volatility: f64,
    pub kelly_cap: f64,
    //drawdown above which kelly is scaled down
    pub drawdown_threshold: f64,
    pub optimal_f_safety: f64,
    //largest notional for one position, as a fraction of equity
    pub max_position_pct: f64,
    //trades and returns kept for statistics
    pub history_window: usize,
    pub periods_per_year: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        SizingConfig {
            max_risk_per_trade: 0.02,
            risk_level: RiskLevel::Moderate,
            max_portfolio_heat: 0.06,
            correlation_threshold: 0.7,
            target_volatility: 0.15,
            kelly_cap: 0.25,
            drawdown_threshold: 0.10,
            optimal_f_safety: 0.25,
            max_position_pct: 1.0,
            history_window: 100,
            periods_per_year: 252.0,
        }
    }
}

//what the sizer needs to know about a trade idea
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingSignal {
    pub symbol: String,
    pub side: OrderSide,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    //signal conviction in [0, 1]
    pub strength: f64,
    pub ml_confidence: Option<f64>,
    //annualized volatility estimate
    pub volatility: Option<f64>,

    //overrides for the statistics otherwise taken from trade history
    pub win_rate: Option<f64>,
    pub avg_win: Option<f64>,
    pub avg_loss: Option<f64>,
}

impl SizingSignal {
    pub fn new(symbol: impl Into<String>, side: OrderSide, entry_price: f64) -> Self {
        SizingSignal {
            symbol: symbol.into(),
            side,
            entry_price,
            stop_loss: None,
            take_profit: None,
            strength: 1.0,
            ml_confidence: None,
            volatility: None,
            win_rate: None,
            avg_win: None,
            avg_loss: None,
        }
    }

    pub fn with_stop_loss(mut self, stop_loss: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    pub fn with_take_profit(mut self, take_profit: f64) -> Self {
        self.take_profit = Some(take_profit);
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

    pub fn with_stats(mut self, win_rate: f64, avg_win: f64, avg_loss: f64) -> Self {
        self.win_rate = Some(win_rate);
        self.avg_win = Some(avg_win);
        self.avg_loss = Some(avg_loss);
        self
    }

    //|tp - entry| / |entry - sl|, 0 when either level is missing
    pub fn risk_reward(&self) -> f64 {
        match (self.stop_loss, self.take_profit) {
            (Some(sl), Some(tp)) => {
                let risk = (self.entry_price - sl).abs();
                if risk > 0.0 {
                    (tp - self.entry_price).abs() / risk
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }
}

//output of one sizing call; `reasoning` is for humans only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSizeResult {
    pub method: SizingMethod,
    pub position_size: f64,
    pub risk_amount: f64,
    //fraction of equity put at risk after every adjustment
    pub risk_fraction: f64,
    pub kelly_fraction: f64,
    pub adjusted_kelly: f64,
    pub confidence: f64,
    pub risk_reward_ratio: f64,
    pub expected_value: f64,
    pub max_position_size: f64,
    pub reasoning: String,
}

impl PositionSizeResult {
    fn zero(method: SizingMethod, reasoning: impl Into<String>) -> Self {
        PositionSizeResult {
            method,
            position_size: 0.0,
            risk_amount: 0.0,
            risk_fraction: 0.0,
            kelly_fraction: 0.0,
            adjusted_kelly: 0.0,
            confidence: 0.0,
            risk_reward_ratio: 0.0,
            expected_value: 0.0,
            max_position_size: 0.0,
            reasoning: reasoning.into(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.position_size <= 0.0
    }
}

//win/loss statistics feeding kelly and confidence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeStats {
    pub win_rate: f64,
    pub avg_win: f64,
    //magnitude of the average loss
    pub avg_loss: f64,
    pub profit_factor: f64,
}

//raw kelly fraction f = (p*b - q) / b
pub fn kelly(win_rate: f64, payoff_ratio: f64) -> f64 {
    if payoff_ratio <= 0.0 {
        return 0.0;
    }
    (win_rate * payoff_ratio - (1.0 - win_rate)) / payoff_ratio
}

//pearson correlation over the overlapping tails of two series
pub fn correlation(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 3 {
        return None;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];
    let sd = a.std_dev() * b.std_dev();
    if !sd.is_finite() || sd == 0.0 {
        return None;
    }
    Some(a.covariance(b) / sd)
}

//converts signals into quantities under the account's risk budget
//
//holds a bounded window of trade pnls and per-symbol returns; sizing calls never mutate it
#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: SizingConfig,
    equity: f64,
    peak_equity: f64,
    open_risk: f64,
    open_symbols: Vec<String>,
    trade_history: VecDeque<f64>,
    returns: IndexMap<String, VecDeque<f64>>,
}

impl PositionSizer {
    pub fn new(config: SizingConfig, equity: f64) -> Self {
        PositionSizer {
            config,
            equity,
            peak_equity: equity,
            open_risk: 0.0,
            open_symbols: Vec::new(),
            trade_history: VecDeque::new(),
            returns: IndexMap::new(),
        }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    pub fn update_equity(&mut self, equity: f64) {
        self.equity = equity;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn current_drawdown(&self) -> f64 {
        if self.peak_equity > 0.0 {
            ((self.peak_equity - self.equity) / self.peak_equity).max(0.0)
        } else {
            0.0
        }
    }

    //capital at risk and symbols currently held
    pub fn set_portfolio(&mut self, open_risk: f64, open_symbols: Vec<String>) {
        self.open_risk = open_risk.max(0.0);
        self.open_symbols = open_symbols;
    }

    pub fn current_heat(&self) -> f64 {
        if self.equity > 0.0 {
            self.open_risk / self.equity
        } else {
            0.0
        }
    }

    pub fn record_trade(&mut self, pnl: f64) {
        self.trade_history.push_back(pnl);
        while self.trade_history.len() > self.config.history_window {
            self.trade_history.pop_front();
        }
    }

    pub fn record_return(&mut self, symbol: &str, ret: f64) {
        if !ret.is_finite() {
            return;
        }
        let window = self.config.history_window;
        let series = self.returns.entry(symbol.to_string()).or_default();
        series.push_back(ret);
        while series.len() > window {
            series.pop_front();
        }
    }

    pub fn trade_history(&self) -> &VecDeque<f64> {
        &self.trade_history
    }

    //signal overrides first, trade history for anything missing
    pub fn statistics(&self, signal: &SizingSignal) -> Option<TradeStats> {
        let history = self.history_stats();
        let win_rate = signal.win_rate.or(history.map(|h| h.win_rate))?;
        let avg_win = signal.avg_win.or(history.map(|h| h.avg_win))?;
        let avg_loss = signal.avg_loss.or(history.map(|h| h.avg_loss))?.abs();

        let overridden =
            signal.win_rate.is_some() || signal.avg_win.is_some() || signal.avg_loss.is_some();
        let profit_factor = match history {
            Some(h) if !overridden => h.profit_factor,
            _ => {
                let losses = (1.0 - win_rate) * avg_loss;
                if losses > 0.0 {
                    win_rate * avg_win / losses
                } else {
                    f64::INFINITY
                }
            }
        };

        Some(TradeStats {
            win_rate,
            avg_win,
            avg_loss,
            profit_factor,
        })
    }

    fn history_stats(&self) -> Option<TradeStats> {
        if self.trade_history.is_empty() {
            return None;
        }
        let wins: Vec<f64> = self.trade_history.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = self
            .trade_history
            .iter()
            .copied()
            .filter(|p| *p < 0.0)
            .map(f64::abs)
            .collect();

        let gross_win: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().sum();
        Some(TradeStats {
            win_rate: wins.len() as f64 / self.trade_history.len() as f64,
            avg_win: if wins.is_empty() { 0.0 } else { gross_win / wins.len() as f64 },
            avg_loss: if losses.is_empty() { 0.0 } else { gross_loss / losses.len() as f64 },
            profit_factor: if gross_loss > 0.0 {
                gross_win / gross_loss
            } else if gross_win > 0.0 {
                f64::INFINITY
            } else {
                0.0
            },
        })
    }

    //(raw, risk-adjusted) kelly fractions
    pub fn kelly_fraction(&self, stats: &TradeStats) -> Result<(f64, f64), SizingError> {
        if stats.avg_win == 0.0 || stats.avg_loss == 0.0 {
            return Err(SizingError::Degenerate(
                "average win or average loss is zero".to_string(),
            ));
        }

        let payoff = (stats.avg_win / stats.avg_loss).abs();
        let raw = kelly(stats.win_rate, payoff);

        let mut adjusted = raw.clamp(0.0, self.config.kelly_cap);
        adjusted *= self.config.risk_level.fraction();

        let drawdown = self.current_drawdown();
        if drawdown > self.config.drawdown_threshold {
            adjusted *= (1.0 - drawdown).max(0.0);
        }

        Ok((raw, adjusted.clamp(0.0, self.config.max_risk_per_trade)))
    }

    //ralph vince's optimal f over the trade history, scaled by the safety factor
    pub fn optimal_f(&self) -> Result<f64, SizingError> {
        let largest_loss = self
            .trade_history
            .iter()
            .copied()
            .filter(|p| *p < 0.0)
            .map(f64::abs)
            .fold(0.0, f64::max);
        if largest_loss == 0.0 {
            return Err(SizingError::Degenerate(
                "trade history has no losing trade".to_string(),
            ));
        }

        let mut best_f = 0.0;
        let mut best_twi = 1.0;
        for step in 1..50 {
            let f = step as f64 * 0.01;
            let twi = self
                .trade_history
                .iter()
                .map(|pnl| 1.0 + f * pnl / largest_loss)
                .try_fold(1.0, |acc, hpr| (hpr > 0.0).then_some(acc * hpr))
                .unwrap_or(0.0);
            if twi > best_twi {
                best_twi = twi;
                best_f = f;
            }
        }

        if best_f == 0.0 {
            return Err(SizingError::Degenerate(
                "no fraction grows terminal wealth".to_string(),
            ));
        }
        Ok(best_f * self.config.optimal_f_safety)
    }

    //target volatility over the signal's (or the symbol's realized) volatility
    pub fn volatility_fraction(&self, signal: &SizingSignal) -> Result<f64, SizingError> {
        let volatility = match signal.volatility {
            Some(v) => v,
            None => self.realized_volatility(&signal.symbol).ok_or_else(|| {
                SizingError::Degenerate(format!("no volatility estimate for {}", signal.symbol))
            })?,
        };
        if !volatility.is_finite() || volatility <= 0.0 {
            return Err(SizingError::Degenerate(format!(
                "non-positive volatility {}",
                volatility
            )));
        }
        Ok((self.config.target_volatility / volatility).min(self.config.max_risk_per_trade))
    }

    fn realized_volatility(&self, symbol: &str) -> Option<f64> {
        let series = self.returns.get(symbol)?;
        if series.len() < 2 {
            return None;
        }
        let (a, b) = series.as_slices();
        let sd = a.iter().chain(b.iter()).std_dev();
        Some(sd * self.config.periods_per_year.sqrt())
    }

    //highest correlation with a held symbol above the threshold, and the size factor it implies
    pub fn correlation_factor(&self, symbol: &str) -> (f64, Option<(String, f64)>) {
        let Some(candidate) = self.returns.get(symbol) else {
            return (1.0, None);
        };
        let candidate: Vec<f64> = candidate.iter().copied().collect();

        let worst = self
            .open_symbols
            .iter()
            .filter(|s| s.as_str() != symbol)
            .filter_map(|s| {
                let other: Vec<f64> = self.returns.get(s)?.iter().copied().collect();
                Some((s.clone(), correlation(&candidate, &other)?))
            })
            .fold(None::<(String, f64)>, |best, (s, c)| match best {
                Some((_, b)) if b >= c => best,
                _ => Some((s, c)),
            });

        match worst {
            Some((s, corr)) if corr > self.config.correlation_threshold => {
                let headroom = (1.0 - self.config.correlation_threshold).max(f64::EPSILON);
                let excess = (corr - self.config.correlation_threshold) / headroom;
                ((1.0 - 0.5 * excess).max(0.5), Some((s, corr)))
            }
            _ => (1.0, None),
        }
    }

    //mean of the tiers that can be scored
    pub fn confidence(&self, stats: Option<&TradeStats>, signal: &SizingSignal) -> f64 {
        let mut parts = Vec::with_capacity(5);

        if let Some(stats) = stats {
            parts.push(match stats.win_rate {
                w if w >= 0.6 => 1.0,
                w if w >= 0.5 => 0.8,
                w if w >= 0.4 => 0.6,
                _ => 0.4,
            });
            parts.push(match stats.profit_factor {
                pf if pf >= 2.0 => 1.0,
                pf if pf >= 1.5 => 0.8,
                pf if pf >= 1.0 => 0.6,
                _ => 0.4,
            });
        }

        let rr = signal.risk_reward();
        if rr > 0.0 {
            parts.push(match rr {
                r if r >= 3.0 => 1.0,
                r if r >= 2.0 => 0.8,
                r if r >= 1.0 => 0.6,
                _ => 0.4,
            });
        }

        parts.push(signal.strength.clamp(0.0, 1.0));
        if let Some(ml) = signal.ml_confidence {
            parts.push(ml.clamp(0.0, 1.0));
        }

        parts.iter().sum::<f64>() / parts.len() as f64
    }

    //converts a signal into a quantity using the given method
    pub fn calculate_position_size(
        &self,
        signal: &SizingSignal,
        method: SizingMethod,
    ) -> PositionSizeResult {
        let entry = signal.entry_price;
        if !entry.is_finite() || entry <= 0.0 {
            return PositionSizeResult::zero(method, format!("invalid entry price {}", entry));
        }
        if self.equity <= 0.0 {
            return PositionSizeResult::zero(method, "no equity to risk");
        }

        let stats = self.statistics(signal);
        let (kelly_raw, kelly_adjusted) = stats
            .as_ref()
            .and_then(|s| self.kelly_fraction(s).ok())
            .unwrap_or((0.0, 0.0));

        let fraction = match method {
            SizingMethod::Kelly => match stats.as_ref() {
                Some(s) => self.kelly_fraction(s).map(|(_, adjusted)| adjusted),
                None => Err(SizingError::Degenerate(
                    "no win/loss statistics available".to_string(),
                )),
            },
            SizingMethod::OptimalF => self.optimal_f(),
            SizingMethod::Volatility => self.volatility_fraction(signal),
            SizingMethod::FixedFractional => Ok(self.config.max_risk_per_trade),
        };

        let fraction = match fraction {
            Ok(f) if f > 0.0 => f,
            Ok(_) => {
                return PositionSizeResult::zero(method, "no positive edge: fraction is zero")
            }
            Err(e) => return PositionSizeResult::zero(method, e.to_string()),
        };

        let mut reasons = vec![format!("{:?} fraction {:.4}", method, fraction)];
        let per_unit_risk = signal
            .stop_loss
            .map(|sl| (entry - sl).abs())
            .filter(|r| *r > 0.0)
            .unwrap_or(entry);

        let mut risk_amount = self.equity * fraction;
        let mut quantity = risk_amount / per_unit_risk;

        let max_heat = self.config.max_portfolio_heat * self.equity;
        if self.open_risk + risk_amount > max_heat {
            let headroom = (max_heat - self.open_risk).max(0.0);
            let scale = headroom / risk_amount;
            quantity *= scale;
            risk_amount = headroom;
            reasons.push(format!("heat limit scaled by {:.2}", scale));
        }

        let (corr_factor, corr_with) = self.correlation_factor(&signal.symbol);
        if let Some((other, corr)) = corr_with {
            quantity *= corr_factor;
            reasons.push(format!(
                "correlation {:.2} with {} scaled by {:.2}",
                corr, other, corr_factor
            ));
        }

        let confidence = self.confidence(stats.as_ref(), signal);
        let confidence_factor = if confidence < 0.6 {
            0.5
        } else if confidence < 0.7 {
            0.75
        } else {
            1.0
        };
        if confidence_factor < 1.0 {
            quantity *= confidence_factor;
            reasons.push(format!(
                "confidence {:.2} scaled by {:.2}",
                confidence, confidence_factor
            ));
        }

        let max_position_size = self.equity * self.config.max_position_pct / entry;
        if quantity > max_position_size {
            quantity = max_position_size;
            reasons.push("capped at max position size".to_string());
        }

        risk_amount = risk_amount.min(quantity * per_unit_risk);
        let expected_value = stats
            .map(|s| s.win_rate * s.avg_win - (1.0 - s.win_rate) * s.avg_loss)
            .unwrap_or(0.0);

        debug!(
            symbol = %signal.symbol,
            method = ?method,
            quantity,
            risk_amount,
            "position sized"
        );

        PositionSizeResult {
            method,
            position_size: quantity.max(0.0),
            risk_amount,
            risk_fraction: risk_amount / self.equity,
            kelly_fraction: kelly_raw,
            adjusted_kelly: kelly_adjusted,
            confidence,
            risk_reward_ratio: signal.risk_reward(),
            expected_value,
            max_position_size,
            reasoning: reasons.join("; "),
        }
    }
}
