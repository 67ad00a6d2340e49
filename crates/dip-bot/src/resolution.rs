//! Position resolution.
//!
//! Wakes 60 s after each window close, partitions open positions by the
//! window they were opened in, and looks up outcomes for the ones whose
//! window has ended. Settlement is at-most-once: the terminal-state check
//! refuses to touch a position twice. Anything that cannot be resolved yet
//! (HTTP failure, ambiguous prices, market not closed) stays open and is
//! retried on the next wake.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use dip_common::{OutcomeSide, Timeframe, WindowKey};
use dip_market::{catalog, ms_until_next_boundary, MarketCatalog};

use crate::state::Metrics;
use crate::store::{Position, PositionStatus, PositionStore, StoreError};
use crate::strategy::fees;

/// Delay after window close before the first resolution attempt, giving the
/// exchange time to post outcome prices.
const RESOLUTION_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("catalog error: {0}")]
    Catalog(#[from] dip_market::CatalogError),
}

/// The resolution tracker.
pub struct ResolutionTracker {
    store: Arc<PositionStore>,
    catalog: Arc<MarketCatalog>,
    metrics: Arc<Metrics>,
    timeframe: Timeframe,
    /// Paper positions get a random outcome: arbitrage profit is
    /// independent of which side wins.
    paper: bool,
}

impl ResolutionTracker {
    pub fn new(
        store: Arc<PositionStore>,
        catalog: Arc<MarketCatalog>,
        metrics: Arc<Metrics>,
        timeframe: Timeframe,
        paper: bool,
    ) -> Self {
        Self {
            store,
            catalog,
            metrics,
            timeframe,
            paper,
        }
    }

    /// Run until shutdown, waking at each window close + grace.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            // Re-anchor on the wall clock every cycle so the schedule never
            // drifts.
            let wait = Duration::from_millis(ms_until_next_boundary(Utc::now(), self.timeframe))
                + RESOLUTION_GRACE;
            debug!(wait_secs = wait.as_secs(), "resolution tracker sleeping");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.recv() => {
                    info!("resolution tracker: shutdown");
                    return;
                }
            }

            if let Err(e) = self.resolve_due(Utc::now()).await {
                warn!(error = %e, "resolution pass failed, retrying next wake");
            }
        }
    }

    /// One resolution pass: settle every open position whose window ended.
    pub async fn resolve_due(&self, now: DateTime<Utc>) -> Result<(), ResolutionError> {
        let open = self.store.open_positions()?;
        if open.is_empty() {
            return Ok(());
        }
        info!(count = open.len(), "resolution pass over open positions");

        for position in open {
            let key: WindowKey = match position.window_key.parse() {
                Ok(k) => k,
                Err(e) => {
                    warn!(id = %position.id, error = %e, "unparseable window key, leaving open");
                    continue;
                }
            };
            if !key.has_ended(now) {
                continue;
            }

            match self.lookup_outcome(&key).await {
                Ok(Some(winner)) => {
                    self.settle(position, winner)?;
                }
                Ok(None) => {
                    debug!(id = %position.id, "outcome not yet available, retrying next wake");
                }
                Err(e) => {
                    warn!(id = %position.id, error = %e, "outcome lookup failed, retrying next wake");
                }
            }
        }
        Ok(())
    }

    async fn lookup_outcome(
        &self,
        key: &WindowKey,
    ) -> Result<Option<OutcomeSide>, ResolutionError> {
        if self.paper {
            let winner = if rand::random::<bool>() {
                OutcomeSide::Up
            } else {
                OutcomeSide::Down
            };
            return Ok(Some(winner));
        }

        let slug = catalog::slug_for(key.asset, key.timeframe, key.period_ts);
        let market = match self.catalog.fetch_resolved_by_slug(&slug).await? {
            Some(m) => m,
            None => return Ok(None),
        };

        let settled = market.closed.unwrap_or(false) || market.resolved.unwrap_or(false);
        if !settled {
            return Ok(None);
        }
        // Malformed or ambiguous prices resolve to None and retry later.
        Ok(catalog::winning_side(&market))
    }

    /// Apply settlement. At-most-once by the terminal-state check.
    fn settle(&self, position: Position, winner: OutcomeSide) -> Result<(), ResolutionError> {
        if position.status.is_terminal() {
            return Ok(());
        }
        let settled = settle_position(position, winner, self.timeframe, Utc::now());
        info!(
            id = %settled.id,
            market = %settled.market,
            outcome = %winner,
            payout = %settled.payout.unwrap_or_default(),
            profit = %settled.actual_profit.unwrap_or_default(),
            "position resolved"
        );
        self.store.save(&settled)?;
        self.store.record_event(
            "position_resolved",
            Utc::now(),
            &serde_json::json!({
                "id": settled.id,
                "outcome": winner.as_str(),
                "payout": settled.payout.map(|p| p.to_string()),
                "actual_profit": settled.actual_profit.map(|p| p.to_string()),
            }),
        )?;
        Metrics::incr(&self.metrics.positions_resolved);
        Ok(())
    }
}

/// Pure settlement math.
///
/// Matched pairs pay $1.00 each: `payout = min(size_up, size_down)`. Fees
/// are recomputed from the recorded ask prices under the window's fee
/// model. The transition is `Open -> Resolved`; terminal inputs come back
/// unchanged.
pub fn settle_position(
    mut position: Position,
    winner: OutcomeSide,
    timeframe: Timeframe,
    now: DateTime<Utc>,
) -> Position {
    if position.status.is_terminal() {
        return position;
    }

    let payout = position.size_up.min(position.size_down) * Decimal::ONE;
    let fee_bill = fees::fee_for(
        position.cost_up,
        position.ask_up.unwrap_or(Decimal::ZERO),
        timeframe,
    ) + fees::fee_for(
        position.cost_down,
        position.ask_down.unwrap_or(Decimal::ZERO),
        timeframe,
    );

    position.status = PositionStatus::Resolved;
    position.resolved_at = Some(now);
    position.outcome = Some(winner);
    position.payout = Some(payout);
    position.fees = Some(fee_bill);
    position.actual_profit = Some(payout - position.total_cost - fee_bill);
    position
}
