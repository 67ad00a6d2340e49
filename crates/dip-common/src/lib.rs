//! Shared types for the prediction-market dip arbitrage bot.
//!
//! CRITICAL: All prices and quantities use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math.

pub mod types;

pub use types::{
    CryptoAsset, MarketTokens, OutcomeSide, PriceLevel, Side, Timeframe, WindowKey, TICK_SIZE,
};
