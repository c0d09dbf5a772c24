use crate::engine::execution::ExecutionCosts;
use crate::error::BacktestError;
use crate::risk::{RiskLimits, SizingConfig, SizingMethod};
use crate::strategy::{
    rsi_reversion::RsiReversionStrategy, sma_crossover::SmaCrossoverStrategy, Strategy,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

//settings for one run; immutable once the engine is built
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub slippage_rate: f64,
    pub leverage: f64,
    //drawdown from peak that forces liquidation
    pub margin_call_level: f64,
    pub max_positions: usize,
    //cap on the fraction of equity risked by one trade
    pub risk_per_trade: f64,
    pub allow_short: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    //annual rate for sharpe and sortino
    pub risk_free_rate: f64,
    pub max_concentration: f64,
    pub max_volume_participation: Option<f64>,
    //flatten open positions at the last close
    pub close_at_end: bool,
    //bars of history kept per symbol for strategies
    pub max_lookback: usize,
    pub sizing_method: SizingMethod,
    pub sizing: SizingConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 100_000.0,
            commission_rate: 0.001,
            slippage_rate: 0.0005,
            leverage: 1.0,
            margin_call_level: 0.5,
            max_positions: 10,
            risk_per_trade: 0.02,
            allow_short: false,
            start_date: None,
            end_date: None,
            risk_free_rate: 0.0,
            max_concentration: 0.30,
            max_volume_participation: None,
            close_at_end: false,
            max_lookback: 500,
            sizing_method: SizingMethod::FixedFractional,
            sizing: SizingConfig::default(),
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), BacktestError> {
        let fail = |msg: String| Err(BacktestError::InvalidConfig(msg));

        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return fail(format!("initial_capital must be positive, got {}", self.initial_capital));
        }
        for (name, rate) in [
            ("commission_rate", self.commission_rate),
            ("slippage_rate", self.slippage_rate),
        ] {
            if !(0.0..1.0).contains(&rate) {
                return fail(format!("{} must be in [0, 1), got {}", name, rate));
            }
        }
        if !self.leverage.is_finite() || self.leverage <= 0.0 {
            return fail(format!("leverage must be positive, got {}", self.leverage));
        }
        if self.margin_call_level <= 0.0 || self.margin_call_level > 1.0 {
            return fail(format!(
                "margin_call_level must be in (0, 1], got {}",
                self.margin_call_level
            ));
        }
        if self.max_positions == 0 {
            return fail("max_positions must be at least 1".to_string());
        }
        if self.risk_per_trade <= 0.0 || self.risk_per_trade > 1.0 {
            return fail(format!(
                "risk_per_trade must be in (0, 1], got {}",
                self.risk_per_trade
            ));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return fail(format!("start_date {} is after end_date {}", start, end));
            }
        }
        if let Some(p) = self.max_volume_participation {
            if p <= 0.0 || p > 1.0 {
                return fail(format!("max_volume_participation must be in (0, 1], got {}", p));
            }
        }
        if self.sizing.history_window == 0 {
            return fail("sizing.history_window must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn execution_costs(&self) -> ExecutionCosts {
        ExecutionCosts {
            commission_rate: self.commission_rate,
            slippage_rate: self.slippage_rate,
            max_volume_participation: self.max_volume_participation,
        }
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            margin_call_level: self.margin_call_level,
            max_positions: self.max_positions,
            max_concentration: self.max_concentration,
        }
    }

    //sizer settings with the per-trade cap taken from this config
    pub fn sizing_config(&self) -> SizingConfig {
        SizingConfig {
            max_risk_per_trade: self.risk_per_trade,
            ..self.sizing.clone()
        }
    }
}

//strategy type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyType {
    SmaCrossover,
    RsiReversion,
}

impl StrategyType {
    //parse strategy type from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sma" | "sma_crossover" => Some(StrategyType::SmaCrossover),
            "rsi" | "rsi_reversion" => Some(StrategyType::RsiReversion),
            _ => None,
        }
    }
}

//sma crossover strategy parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmaParams {
    pub fast_window: usize,
    pub slow_window: usize,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
}

impl Default for SmaParams {
    fn default() -> Self {
        SmaParams {
            fast_window: 20,
            slow_window: 50,
            stop_loss_pct: Some(0.05),
            take_profit_pct: Some(0.10),
        }
    }
}

//rsi reversion strategy parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsiParams {
    pub lookback: usize,
    pub oversold: f64,
    pub overbought: f64,
    pub stop_loss_pct: Option<f64>,
}

impl Default for RsiParams {
    fn default() -> Self {
        RsiParams {
            lookback: 14,
            oversold: 30.0,
            overbought: 70.0,
            stop_loss_pct: Some(0.05),
        }
    }
}

//strategy-specific parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StrategyParams {
    Sma(SmaParams),
    Rsi(RsiParams),
}

impl StrategyParams {
    pub fn strategy_type(&self) -> StrategyType {
        match self {
            StrategyParams::Sma(_) => StrategyType::SmaCrossover,
            StrategyParams::Rsi(_) => StrategyType::RsiReversion,
        }
    }

    pub fn build(&self, symbol: &str, allow_short: bool) -> Box<dyn Strategy> {
        match self {
            StrategyParams::Sma(p) => Box::new(
                SmaCrossoverStrategy::new(symbol, p.fast_window, p.slow_window)
                    .with_protection(p.stop_loss_pct, p.take_profit_pct)
                    .with_shorts(allow_short),
            ),
            StrategyParams::Rsi(p) => {
                let strategy = RsiReversionStrategy::new(symbol, p.lookback, p.oversold, p.overbought)
                    .with_shorts(allow_short);
                Box::new(match p.stop_loss_pct {
                    Some(pct) => strategy.with_stop_loss(pct),
                    None => strategy,
                })
            }
        }
    }
}

//complete run configuration, loadable from json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfiguration {
    //data
    pub data_path: PathBuf,
    pub symbol: String,

    //strategy
    pub strategy_params: StrategyParams,

    //engine, risk and sizing settings
    pub backtest: BacktestConfig,

    //optional output paths
    pub output_json: Option<PathBuf>,
    pub output_equity_csv: Option<PathBuf>,
    pub output_trades_csv: Option<PathBuf>,
    pub output_orders_csv: Option<PathBuf>,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        RunConfiguration {
            data_path: PathBuf::from("data.csv"),
            symbol: "SPY".to_string(),
            strategy_params: StrategyParams::Sma(SmaParams::default()),
            backtest: BacktestConfig::default(),
            output_json: None,
            output_equity_csv: None,
            output_trades_csv: None,
            output_orders_csv: None,
        }
    }
}

impl RunConfiguration {
    //load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: RunConfiguration = serde_json::from_str(&contents)?;
        Ok(config)
    }

    //save configuration to a JSON file
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn defaults_are_valid() {
        assert!(BacktestConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        let bad = BacktestConfig {
            initial_capital: 0.0,
            ..BacktestConfig::default()
        };
        assert!(matches!(bad.validate(), Err(BacktestError::InvalidConfig(_))));

        let bad = BacktestConfig {
            margin_call_level: 1.5,
            ..BacktestConfig::default()
        };
        assert!(bad.validate().is_err());

        let bad = BacktestConfig {
            start_date: Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()),
            end_date: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            ..BacktestConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn risk_per_trade_drives_the_sizer_cap() {
        let config = BacktestConfig {
            risk_per_trade: 0.01,
            ..BacktestConfig::default()
        };
        assert_eq!(config.sizing_config().max_risk_per_trade, 0.01);
    }

    #[test]
    fn json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");

        let mut config = RunConfiguration::default();
        config.strategy_params = StrategyParams::Rsi(RsiParams::default());
        config.backtest.allow_short = true;
        config.to_json_file(&path).unwrap();

        let loaded = RunConfiguration::from_json_file(&path).unwrap();
        assert_eq!(loaded.strategy_params.strategy_type(), StrategyType::RsiReversion);
        assert!(loaded.backtest.allow_short);
    }

    #[test]
    fn partial_backtest_json_uses_defaults() {
        let config: BacktestConfig =
            serde_json::from_str(r#"{ "initial_capital": 5000.0, "allow_short": true }"#).unwrap();
        assert_eq!(config.initial_capital, 5_000.0);
        assert_eq!(config.max_positions, 10);
    }
}
