//! Real-time dip arbitrage engine for crypto up/down prediction markets.
//!
//! Watches complementary binary outcome pairs on short-window markets and
//! buys both sides when their combined best ask drops below one unit of
//! account, net of fees and slippage.
//!
//! ## Modules
//!
//! - `config`: layered configuration (TOML, env, CLI) with boot validation
//! - `state`: admission gating, cooldowns, metrics counters
//! - `strategy`: fee curve, sizing math, and the dip detector
//! - `api`: raw CLOB REST surface (auth, order signing, submission)
//! - `presign`: hot-market signed-order cache
//! - `executor`: dual-leg coordination with rollback
//! - `store`: durable positions, events, and book snapshots on SQLite
//! - `resolution`: window-close outcome reconciliation
//! - `engine`: the event loop tying everything together
//! - `sim`: synthetic book feed for offline paper runs

pub mod api;
pub mod config;
pub mod engine;
pub mod executor;
pub mod presign;
pub mod resolution;
pub mod sim;
pub mod state;
pub mod store;
pub mod strategy;

pub use config::{BotConfig, TradingMode};
pub use engine::Engine;
pub use executor::{
    ExecutionResult, LatencyBreakdown, LegClient, LegError, LegFill, LegRequest, LiveLegClient,
    PaperLegClient, TradeExecutor, TradeExecutorConfig,
};
pub use presign::{HotMarket, PresignCache, PresignKey, Presigner};
pub use resolution::{settle_position, ResolutionTracker};
pub use state::{AdmissionRefusal, CooldownTracker, Metrics, PendingAdmissions};
pub use store::{Position, PositionStatus, PositionStore, SnapshotRecord, StoreStats};
pub use strategy::{
    Detection, Detector, DetectorConfig, DipEvent, DipOpportunity, SkipReason, TradePlan,
};
