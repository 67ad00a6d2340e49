//! Per-window orderbook state with partial-update merge.
//!
//! Two update shapes reach a book: full snapshots, which replace a side's
//! ladders wholesale, and best-price changes, which touch only the top of
//! one ladder. After a bare best-price change (no explicit size) the depth
//! behind level 0 is stale, so liquidity queries fall back to the top level
//! until the next snapshot restores trust.

use rust_decimal::Decimal;
use serde::Serialize;

use dip_common::{OutcomeSide, PriceLevel, Side, WindowKey};

/// Result of walking a ladder to fill a target share count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillEstimate {
    /// Shares actually available (≤ requested).
    pub filled: Decimal,
    /// Total notional cost of those shares.
    pub cost: Decimal,
    /// Volume-weighted average price.
    pub vwap: Decimal,
}

/// One sorted ladder: asks ascending, bids descending. No duplicate prices;
/// a level with size zero is a deletion.
#[derive(Debug, Clone, Serialize)]
pub struct SideBook {
    levels: Vec<PriceLevel>,
    /// Asks sort ascending, bids descending.
    ascending: bool,
    /// False after a bare best-price update until the next snapshot.
    depth_trusted: bool,
}

impl SideBook {
    pub fn asks() -> Self {
        Self {
            levels: Vec::new(),
            ascending: true,
            depth_trusted: true,
        }
    }

    pub fn bids() -> Self {
        Self {
            levels: Vec::new(),
            ascending: false,
            depth_trusted: true,
        }
    }

    /// Replace the whole ladder from a snapshot: sort, drop zero-size
    /// levels, collapse duplicate prices (last wins).
    pub fn apply_snapshot(&mut self, mut levels: Vec<PriceLevel>) {
        levels.retain(|l| l.price > Decimal::ZERO && l.size > Decimal::ZERO);
        if self.ascending {
            levels.sort_by(|a, b| a.price.cmp(&b.price));
        } else {
            levels.sort_by(|a, b| b.price.cmp(&a.price));
        }
        levels.dedup_by(|next, prev| {
            if next.price == prev.price {
                prev.size = next.size;
                true
            } else {
                false
            }
        });
        self.levels = levels;
        self.depth_trusted = true;
    }

    /// Apply a best-price change: only level 0 moves; deeper levels the new
    /// best has crossed are dropped (they were consumed), the rest survive.
    ///
    /// When the message carries no explicit size, the previous best size is
    /// carried forward as an opaque placeholder and depth behind level 0
    /// stops being trusted until the next snapshot.
    pub fn apply_best_price(&mut self, price: Decimal, size: Option<Decimal>) {
        if price <= Decimal::ZERO {
            return;
        }
        let placeholder = self.levels.first().map(|l| l.size).unwrap_or(Decimal::ZERO);
        let new_size = match size {
            Some(s) => s,
            None => {
                self.depth_trusted = false;
                placeholder
            }
        };

        if new_size == Decimal::ZERO && size.is_some() {
            // Explicit zero size at the top: delete the level.
            if self.levels.first().map(|l| l.price) == Some(price) {
                self.levels.remove(0);
            }
            return;
        }

        // Drop levels the new best has crossed, keep everything deeper.
        self.levels.retain(|l| {
            if self.ascending {
                l.price > price
            } else {
                l.price < price
            }
        });
        self.levels.insert(0, PriceLevel::new(price, new_size));
    }

    /// Best (top-of-book) level.
    #[inline]
    pub fn best(&self) -> Option<PriceLevel> {
        self.levels.first().copied()
    }

    #[inline]
    pub fn best_price(&self) -> Option<Decimal> {
        self.levels.first().map(|l| l.price)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    #[inline]
    pub fn levels(&self) -> &[PriceLevel] {
        &self.levels
    }

    #[inline]
    pub fn depth_trusted(&self) -> bool {
        self.depth_trusted
    }

    /// Shares on offer within `band` (fraction) of the best price.
    ///
    /// With untrusted depth only the top level is counted.
    pub fn liquidity_within(&self, band: Decimal) -> Decimal {
        let Some(best) = self.best() else {
            return Decimal::ZERO;
        };
        if !self.depth_trusted {
            return best.size;
        }
        let limit = if self.ascending {
            best.price * (Decimal::ONE + band)
        } else {
            best.price * (Decimal::ONE - band)
        };
        self.levels
            .iter()
            .take_while(|l| {
                if self.ascending {
                    l.price <= limit
                } else {
                    l.price >= limit
                }
            })
            .map(|l| l.size)
            .sum()
    }

    /// Walk the ladder to fill `target` shares.
    ///
    /// Returns `None` for an empty book or a zero target. The walk stops at
    /// the available depth, so `filled` may be less than requested. With
    /// untrusted depth the walk is confined to level 0.
    pub fn vwap_to_fill(&self, target: Decimal) -> Option<FillEstimate> {
        if target <= Decimal::ZERO {
            return None;
        }
        let levels: &[PriceLevel] = if self.depth_trusted {
            &self.levels
        } else {
            &self.levels[..self.levels.len().min(1)]
        };

        let mut remaining = target;
        let mut cost = Decimal::ZERO;
        let mut filled = Decimal::ZERO;
        for level in levels {
            if remaining <= Decimal::ZERO {
                break;
            }
            let take = remaining.min(level.size);
            cost += take * level.price;
            filled += take;
            remaining -= take;
        }

        if filled <= Decimal::ZERO {
            return None;
        }
        Some(FillEstimate {
            filled,
            cost,
            vwap: cost / filled,
        })
    }

    /// Number of levels a fill of `target` shares would touch.
    pub fn levels_to_fill(&self, target: Decimal) -> usize {
        let mut remaining = target;
        let mut used = 0;
        for level in &self.levels {
            if remaining <= Decimal::ZERO {
                break;
            }
            remaining -= level.size;
            used += 1;
        }
        used
    }

    /// Sort invariant check: strictly monotonic prices in ladder order.
    pub fn is_sorted(&self) -> bool {
        self.levels.windows(2).all(|w| {
            if self.ascending {
                w[0].price < w[1].price
            } else {
                w[0].price > w[1].price
            }
        })
    }
}

/// Both ladders of one outcome token.
#[derive(Debug, Clone, Serialize)]
pub struct PairBooks {
    pub bids: SideBook,
    pub asks: SideBook,
}

impl PairBooks {
    pub fn new() -> Self {
        Self {
            bids: SideBook::bids(),
            asks: SideBook::asks(),
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut SideBook {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }
}

impl Default for PairBooks {
    fn default() -> Self {
        Self::new()
    }
}

/// An update routed to one outcome token's ladders.
#[derive(Debug, Clone)]
pub enum BookUpdate {
    /// Full snapshot: replaces both ladders.
    Snapshot {
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    },
    /// Best-price change on one ladder. `size` of `None` means the message
    /// carried only a price.
    BestPrice {
        side: Side,
        price: Decimal,
        size: Option<Decimal>,
    },
}

/// The full dual-side book for one (asset, window).
#[derive(Debug, Clone, Serialize)]
pub struct Orderbook {
    pub key: WindowKey,
    pub window_offset: u8,
    pub window_label: String,
    pub up: PairBooks,
    pub down: PairBooks,
    /// Monotonic milliseconds of the last applied update.
    pub last_update_ms: i64,
}

impl Orderbook {
    pub fn new(key: WindowKey, window_offset: u8, window_label: String) -> Self {
        Self {
            key,
            window_offset,
            window_label,
            up: PairBooks::new(),
            down: PairBooks::new(),
            last_update_ms: 0,
        }
    }

    /// Apply an update to the given outcome's ladders.
    pub fn apply(&mut self, outcome: OutcomeSide, update: BookUpdate, now_ms: i64) {
        let pair = match outcome {
            OutcomeSide::Up => &mut self.up,
            OutcomeSide::Down => &mut self.down,
        };
        match update {
            BookUpdate::Snapshot { bids, asks } => {
                pair.bids.apply_snapshot(bids);
                pair.asks.apply_snapshot(asks);
            }
            BookUpdate::BestPrice { side, price, size } => {
                pair.side_mut(side).apply_best_price(price, size);
            }
        }
        self.last_update_ms = now_ms;
    }

    /// Best ask on the UP side.
    #[inline]
    pub fn best_ask_up(&self) -> Option<PriceLevel> {
        self.up.asks.best()
    }

    /// Best ask on the DOWN side.
    #[inline]
    pub fn best_ask_down(&self) -> Option<PriceLevel> {
        self.down.asks.best()
    }

    /// Sum of the two best asks, the headline dip metric.
    ///
    /// `None` when either side has no ask; a missing side is never a
    /// zero-cost opportunity.
    pub fn best_case_cost(&self) -> Option<Decimal> {
        let up = self.best_ask_up()?;
        let down = self.best_ask_down()?;
        Some(up.price + down.price)
    }
}
