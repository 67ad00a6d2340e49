//! Order pre-signing.
//!
//! Signing an order costs 200-400 ms of the execution path. For markets
//! trading close to the admission threshold ("hot" markets) a background
//! task keeps a cache of signed BUY orders at a grid of common price and
//! size points; on admission the executor looks up the rounded
//! (market, outcome, side, price, size) key and posts the cached blob,
//! skipping the signing step entirely.
//!
//! Pre-signing is best-effort: any failure is ignored and the executor
//! falls back to live signing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

use dip_common::{OutcomeSide, Side, WindowKey};

use crate::api::{ClobClient, SignedOrder};
use crate::config::PresignConfig;

/// Price grid: 0.30 to 0.70 in 0.05 steps.
const PRICE_GRID: [Decimal; 9] = [
    dec!(0.30),
    dec!(0.35),
    dec!(0.40),
    dec!(0.45),
    dec!(0.50),
    dec!(0.55),
    dec!(0.60),
    dec!(0.65),
    dec!(0.70),
];

/// Common sizes worth caching.
const SIZE_GRID: [Decimal; 2] = [dec!(50), dec!(100)];

/// Cache key. Prices are rounded to the tick grid, sizes to whole shares,
/// so executor lookups land on the same key the task signed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PresignKey {
    pub market: WindowKey,
    pub outcome: OutcomeSide,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

impl PresignKey {
    pub fn new(
        market: WindowKey,
        outcome: OutcomeSide,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Self {
        Self {
            market,
            outcome,
            side,
            price: price.round_dp(2).normalize(),
            size: size.round_dp(0).normalize(),
        }
    }
}

#[derive(Debug, Clone)]
struct PresignEntry {
    order: SignedOrder,
    created_at: Instant,
}

/// The signed-order cache shared between the pre-sign task and the live
/// leg client.
#[derive(Debug, Default)]
pub struct PresignCache {
    entries: DashMap<PresignKey, PresignEntry>,
}

impl PresignCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a cached blob if one exists and is younger than `max_age`.
    /// The entry is consumed: a signed order must not be posted twice.
    pub fn take(&self, key: &PresignKey, max_age: Duration) -> Option<SignedOrder> {
        let (_, entry) = self.entries.remove(key)?;
        if entry.created_at.elapsed() >= max_age {
            return None;
        }
        Some(entry.order)
    }

    pub fn insert(&self, key: PresignKey, order: SignedOrder) {
        self.entries.insert(
            key,
            PresignEntry {
                order,
                created_at: Instant::now(),
            },
        );
    }

    /// True when the key is missing or due a re-sign.
    pub fn needs_refresh(&self, key: &PresignKey, refresh_after: Duration) -> bool {
        match self.entries.get(key) {
            Some(entry) => entry.created_at.elapsed() >= refresh_after,
            None => true,
        }
    }

    /// Drop entries past the eviction age.
    pub fn evict_expired(&self, max_age: Duration) {
        self.entries
            .retain(|_, entry| entry.created_at.elapsed() < max_age);
    }

    /// Drop everything for a market (whole-slice eviction on rotation or
    /// when the market cools).
    pub fn evict_market(&self, market: &WindowKey) {
        self.entries.retain(|key, _| key.market != *market);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A market the detector currently considers hot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotMarket {
    pub key: WindowKey,
    pub token_up: String,
    pub token_down: String,
}

/// The background pre-sign task.
pub struct Presigner {
    cache: Arc<PresignCache>,
    clob: Arc<ClobClient>,
    config: PresignConfig,
}

impl Presigner {
    pub fn new(cache: Arc<PresignCache>, clob: Arc<ClobClient>, config: PresignConfig) -> Self {
        Self {
            cache,
            clob,
            config,
        }
    }

    /// Run until shutdown. `hot_markets` is published by the engine.
    pub async fn run(
        &self,
        mut hot_markets: watch::Receiver<Vec<HotMarket>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut tick = tokio::time::interval(Duration::from_millis(self.config.task_interval_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let markets = hot_markets.borrow_and_update().clone();
                    self.refresh_grid(&markets);
                    self.cache.evict_expired(Duration::from_secs(self.config.evict_secs));
                }
                _ = shutdown.recv() => {
                    debug!("pre-sign task: shutdown");
                    return;
                }
            }
        }
    }

    /// Ensure every grid point for every hot market has a fresh signature.
    fn refresh_grid(&self, markets: &[HotMarket]) {
        let refresh_after = Duration::from_secs(self.config.refresh_secs);

        for market in markets {
            for (outcome, token) in [
                (OutcomeSide::Up, &market.token_up),
                (OutcomeSide::Down, &market.token_down),
            ] {
                for price in PRICE_GRID {
                    for size in SIZE_GRID {
                        let key =
                            PresignKey::new(market.key, outcome, Side::Buy, price, size);
                        if !self.cache.needs_refresh(&key, refresh_after) {
                            continue;
                        }
                        match self.clob.sign_order(token, price, size, Side::Buy, 0) {
                            Ok(order) => {
                                trace!(market = %market.key, %outcome, %price, %size, "pre-signed");
                                self.cache.insert(key, order);
                            }
                            Err(e) => {
                                // Best-effort: the live path still works.
                                debug!(error = %e, "pre-sign failed, skipping grid point");
                            }
                        }
                    }
                }
            }
        }
    }
}
