pub mod backtest;
pub mod execution;
pub mod order;
pub mod sweep;

pub use backtest::{BacktestEngine, BacktestResult, RunStatus};
pub use execution::{BarExecution, ExecutionCosts, OrderProcessor};
pub use order::{Fill, Order, OrderSide, OrderStatus, OrderType, TimeInForce, TrailingOffset};
pub use sweep::{rank_by_sharpe, run_sweep, sma_grid};
