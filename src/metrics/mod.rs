pub mod summary;
pub mod timeseries;

pub use summary::{MetricsCalculator, PerformanceMetrics, TradeQuality, MIN_OBSERVATIONS};
pub use timeseries::{calculate_equity_curve, drawdown_curve, max_drawdown, EquityPoint};
