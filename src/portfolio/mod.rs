pub mod ledger;
pub mod position;
pub mod trade;

pub use ledger::PositionLedger;
pub use position::{Position, PositionStatus};
pub use trade::{CloseReason, Trade};
