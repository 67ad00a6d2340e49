//! Dip detection: fee curve, sizing/slippage math, and the gate sequence.

pub mod detector;
pub mod fees;
pub mod sizing;

pub use detector::{
    ActiveDip, Detection, Detector, DetectorConfig, DipEvent, DipOpportunity, SkipReason,
};
pub use fees::{fee_for, fee_rate};
pub use sizing::{plan_trade, TradePlan};
