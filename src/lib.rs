//an event-driven strategy backtesting engine with risk-adjusted position sizing

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod journal;
pub mod metrics;
pub mod portfolio;
pub mod risk;
pub mod strategy;

//prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{
        BacktestConfig, RsiParams, RunConfiguration, SmaParams, StrategyParams, StrategyType,
    };
    pub use crate::data::{load_csv, read_csv, Bar, BarSeries, BarTable};
    pub use crate::engine::{
        rank_by_sharpe, run_sweep, sma_grid, BacktestEngine, BacktestResult, ExecutionCosts, Fill,
        Order, OrderProcessor, OrderSide, OrderStatus, OrderType, RunStatus, TimeInForce,
        TrailingOffset,
    };
    pub use crate::error::{BacktestError, DataError, RunWarning};
    pub use crate::journal::TradeJournal;
    pub use crate::metrics::{EquityPoint, MetricsCalculator, PerformanceMetrics};
    pub use crate::portfolio::{CloseReason, Position, PositionLedger, Trade};
    pub use crate::risk::{
        PositionSizeResult, PositionSizer, RiskGate, RiskLevel, RiskLimits, SizingConfig,
        SizingMethod, SizingSignal,
    };
    pub use crate::strategy::{
        rsi_reversion::RsiReversionStrategy, sma_crossover::SmaCrossoverStrategy, FnStrategy,
        Signal, Strategy, StrategyContext,
    };
}
