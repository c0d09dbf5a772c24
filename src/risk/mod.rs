pub mod gate;
pub mod sizer;

pub use gate::{RiskAction, RiskGate, RiskLimits, RiskState};
pub use sizer::{
    PositionSizeResult, PositionSizer, RiskLevel, SizingConfig, SizingMethod, SizingSignal,
    TradeStats,
};
