pub mod backtest_config;

pub use backtest_config::{
    BacktestConfig, RsiParams, RunConfiguration, SmaParams, StrategyParams, StrategyType,
};
