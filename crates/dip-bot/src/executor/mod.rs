//! Dual-leg trade execution.
//!
//! `TradeExecutor::execute` submits both legs of an admitted opportunity in
//! parallel as fill-and-kill orders, waits for both outcomes, and applies
//! the compensation matrix: one filled leg plus one failed leg triggers a
//! best-effort SELL of the filled side. A rollback that itself fails leaves
//! a `Failed` position for operator reconciliation.
//!
//! The `LegClient` trait is the seam between the coordinator and the wire:
//! live submission goes through the CLOB client (consulting the pre-signer
//! first), paper mode swaps in a fill simulator.

pub mod live;
pub mod paper;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use dip_common::{OutcomeSide, Side, WindowKey};

use crate::api::OrderType;
use crate::store::{Position, PositionStatus};
use crate::strategy::DipOpportunity;

pub use live::LiveLegClient;
pub use paper::PaperLegClient;

/// Rollback sells take any bid: the limit is the lowest quotable price so a
/// FAK sell crosses whatever liquidity exists.
const ROLLBACK_SELL_LIMIT: Decimal = dec!(0.01);

/// Errors from leg submission.
#[derive(Debug, Error)]
pub enum LegError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("order timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),
}

/// One order leg to submit.
#[derive(Debug, Clone)]
pub struct LegRequest {
    pub market: WindowKey,
    pub outcome: OutcomeSide,
    pub token_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub order_type: OrderType,
}

/// What actually happened to a submitted leg.
#[derive(Debug, Clone)]
pub struct LegFill {
    pub order_id: Option<String>,
    pub filled_size: Decimal,
    pub avg_price: Decimal,
}

impl LegFill {
    pub fn cost(&self) -> Decimal {
        self.filled_size * self.avg_price
    }
}

/// Order submission seam. One call, one exchange order.
#[async_trait]
pub trait LegClient: Send + Sync {
    async fn submit(&self, request: LegRequest) -> Result<LegFill, LegError>;
}

/// Latency accounting for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyBreakdown {
    /// Detection to order submission start.
    pub detect_ms: u64,
    /// Submission start to both outcomes observed.
    pub order_ms: u64,
    /// Detection to both outcomes observed.
    pub total_ms: u64,
}

/// Result of one execution attempt. Exactly one of a successful open
/// position, a plain failure, or a failure carrying a `Failed` position
/// (rollback could not restore balance).
#[derive(Debug)]
pub struct ExecutionResult {
    pub success: bool,
    pub position: Option<Position>,
    pub error: Option<String>,
    pub latency: Option<LatencyBreakdown>,
    /// A compensating sell was issued for a one-sided fill.
    pub rolled_back: bool,
    /// The compensating sell itself failed; the position is `Failed` and
    /// needs operator reconciliation.
    pub rollback_failed: bool,
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct TradeExecutorConfig {
    /// Reject when the slippage-adjusted per-pair cost exceeds this.
    pub max_total_cost: Decimal,
    /// Price-protection buffer added to each limit.
    pub price_buffer: Decimal,
    /// Per-leg submission timeout.
    pub order_timeout: Duration,
}

/// The dual-leg coordinator.
pub struct TradeExecutor {
    legs: Arc<dyn LegClient>,
    config: TradeExecutorConfig,
}

/// Pure compensation decision: which side to unwind, and how much.
///
/// Applying the decision to the same pair of outcomes twice yields the same
/// answer; the terminal position state is therefore stable under retry.
fn compensation_for(
    up: &Result<LegFill, LegError>,
    down: &Result<LegFill, LegError>,
) -> Option<(OutcomeSide, Decimal)> {
    match (up, down) {
        (Ok(fill), Err(_)) if fill.filled_size > Decimal::ZERO => {
            Some((OutcomeSide::Up, fill.filled_size))
        }
        (Err(_), Ok(fill)) if fill.filled_size > Decimal::ZERO => {
            Some((OutcomeSide::Down, fill.filled_size))
        }
        _ => None,
    }
}

impl TradeExecutor {
    pub fn new(legs: Arc<dyn LegClient>, config: TradeExecutorConfig) -> Self {
        Self { legs, config }
    }

    /// Execute both legs of an admitted opportunity.
    ///
    /// The caller holds the admission slot for `opportunity.market` and
    /// releases it when this returns, whatever the outcome.
    pub async fn execute(
        &self,
        opportunity: &DipOpportunity,
        size_up: Decimal,
        size_down: Decimal,
        token_up: &str,
        token_down: &str,
    ) -> ExecutionResult {
        let execution_start = Instant::now();

        // Price-protection limits on the tick grid.
        let limit_up = (opportunity.ask_up + self.config.price_buffer).round_dp(2);
        let limit_down = (opportunity.ask_down + self.config.price_buffer).round_dp(2);

        let adjusted_cost = opportunity.avg_fill_up + opportunity.avg_fill_down;
        if adjusted_cost > self.config.max_total_cost {
            return ExecutionResult {
                success: false,
                position: None,
                error: Some(format!(
                    "total cost {} exceeds limit {}",
                    adjusted_cost, self.config.max_total_cost
                )),
                latency: None,
                rolled_back: false,
                rollback_failed: false,
            };
        }

        let up_request = LegRequest {
            market: opportunity.market,
            outcome: OutcomeSide::Up,
            token_id: token_up.to_string(),
            side: Side::Buy,
            price: limit_up,
            size: size_up,
            order_type: OrderType::Fak,
        };
        let down_request = LegRequest {
            market: opportunity.market,
            outcome: OutcomeSide::Down,
            token_id: token_down.to_string(),
            side: Side::Buy,
            price: limit_down,
            size: size_down,
            order_type: OrderType::Fak,
        };

        // Both legs in parallel; a timeout counts as a leg failure.
        let (up_result, down_result) = tokio::join!(
            self.submit_with_timeout(up_request),
            self.submit_with_timeout(down_request),
        );

        let order_end = Instant::now();
        let latency = LatencyBreakdown {
            detect_ms: execution_start
                .duration_since(opportunity.detected_at)
                .as_millis() as u64,
            order_ms: order_end.duration_since(execution_start).as_millis() as u64,
            total_ms: order_end
                .duration_since(opportunity.detected_at)
                .as_millis() as u64,
        };

        match (&up_result, &down_result) {
            (Ok(up_fill), Ok(down_fill)) => {
                info!(
                    market = %opportunity.market,
                    up = %up_fill.filled_size,
                    down = %down_fill.filled_size,
                    order_ms = latency.order_ms,
                    "both legs filled"
                );
                let position =
                    self.build_position(opportunity, up_fill, down_fill, latency);
                ExecutionResult {
                    success: true,
                    position: Some(position),
                    error: None,
                    latency: Some(latency),
                    rolled_back: false,
                    rollback_failed: false,
                }
            }
            (Ok(_), Err(leg_err)) | (Err(leg_err), Ok(_))
                if compensation_for(&up_result, &down_result).is_some() =>
            {
                let (side, size) =
                    compensation_for(&up_result, &down_result).expect("guard checked");
                let token = match side {
                    OutcomeSide::Up => token_up,
                    OutcomeSide::Down => token_down,
                };
                warn!(
                    market = %opportunity.market,
                    filled_side = %side,
                    size = %size,
                    error = %leg_err,
                    "partial fill imbalance, issuing compensating sell"
                );
                let rollback = self.rollback(opportunity.market, side, token, size).await;

                match rollback {
                    Ok(()) => ExecutionResult {
                        success: false,
                        position: None,
                        error: Some(format!("leg failure, rolled back {} {}", size, side)),
                        latency: Some(latency),
                        rolled_back: true,
                        rollback_failed: false,
                    },
                    Err(e) => {
                        error!(
                            market = %opportunity.market,
                            side = %side,
                            size = %size,
                            error = %e,
                            "rollback failed: manual intervention required"
                        );
                        let position = self.build_failed_position(
                            opportunity,
                            &up_result,
                            &down_result,
                            latency,
                        );
                        ExecutionResult {
                            success: false,
                            position: Some(position),
                            error: Some("rollback failed: manual intervention required".into()),
                            latency: Some(latency),
                            rolled_back: true,
                            rollback_failed: true,
                        }
                    }
                }
            }
            _ => {
                let up_msg = up_result
                    .as_ref()
                    .err()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                let down_msg = down_result
                    .as_ref()
                    .err()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                warn!(
                    market = %opportunity.market,
                    up_error = %up_msg,
                    down_error = %down_msg,
                    "both legs failed"
                );
                ExecutionResult {
                    success: false,
                    position: None,
                    error: Some(format!("both legs failed: up={up_msg} down={down_msg}")),
                    latency: Some(latency),
                    rolled_back: false,
                    rollback_failed: false,
                }
            }
        }
    }

    async fn submit_with_timeout(&self, request: LegRequest) -> Result<LegFill, LegError> {
        match tokio::time::timeout(self.config.order_timeout, self.legs.submit(request)).await {
            Ok(result) => result,
            Err(_) => Err(LegError::Timeout),
        }
    }

    /// Best-effort compensating sell. Never re-enters admission.
    async fn rollback(
        &self,
        market: WindowKey,
        side: OutcomeSide,
        token_id: &str,
        size: Decimal,
    ) -> Result<(), LegError> {
        let request = LegRequest {
            market,
            outcome: side,
            token_id: token_id.to_string(),
            side: Side::Sell,
            price: ROLLBACK_SELL_LIMIT,
            size,
            order_type: OrderType::Fak,
        };
        self.submit_with_timeout(request).await.map(|fill| {
            info!(
                market = %market,
                side = %side,
                sold = %fill.filled_size,
                "rollback sell submitted"
            );
        })
    }

    fn build_position(
        &self,
        opportunity: &DipOpportunity,
        up: &LegFill,
        down: &LegFill,
        latency: LatencyBreakdown,
    ) -> Position {
        Position {
            id: Uuid::new_v4().to_string(),
            market: opportunity.market.asset.as_str().to_string(),
            window_key: opportunity.market.to_string(),
            opened_at: Utc::now(),
            resolved_at: None,
            status: PositionStatus::Open,
            cost_up: up.cost(),
            cost_down: down.cost(),
            size_up: up.filled_size,
            size_down: down.filled_size,
            total_cost: up.cost() + down.cost(),
            expected_profit: opportunity.expected_profit,
            ask_up: Some(opportunity.ask_up),
            ask_down: Some(opportunity.ask_down),
            liquidity_up: Some(opportunity.liquidity_up),
            liquidity_down: Some(opportunity.liquidity_down),
            est_slippage: Some(opportunity.total_slippage),
            latency_detect_ms: Some(latency.detect_ms as i64),
            latency_exec_ms: Some(latency.order_ms as i64),
            latency_total_ms: Some(latency.total_ms as i64),
            outcome: None,
            payout: None,
            fees: None,
            actual_profit: None,
        }
    }

    /// A position for the imbalanced remnant after a failed rollback.
    fn build_failed_position(
        &self,
        opportunity: &DipOpportunity,
        up: &Result<LegFill, LegError>,
        down: &Result<LegFill, LegError>,
        latency: LatencyBreakdown,
    ) -> Position {
        let empty = LegFill {
            order_id: None,
            filled_size: Decimal::ZERO,
            avg_price: Decimal::ZERO,
        };
        let up_fill = up.as_ref().unwrap_or(&empty);
        let down_fill = down.as_ref().unwrap_or(&empty);
        let mut position = self.build_position(opportunity, up_fill, down_fill, latency);
        position.status = PositionStatus::Failed;
        position
    }
}
