//! The dip detector: gate sequence, active-dip tracking, and admission
//! hand-off.
//!
//! `detect` runs inline on the ingest task for every orderbook change and
//! never suspends. It short-circuits on the first failing gate:
//!
//! 1. no trade pending for the market
//! 2. cooldown elapsed
//! 3. both sides quoted
//! 4. both best asks at a realistic price
//! 5. combined best ask below the threshold (drives the ActiveDip machine)
//! 6. fillable size worth trading
//! 7. slippage within bounds
//! 8. profit above the configured floors, net of fees

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use dip_common::{Timeframe, WindowKey};
use dip_market::Orderbook;

use crate::config::TradingConfig;
use crate::state::{CooldownTracker, PendingAdmissions};

use super::sizing::{self, available_depth};

/// Best asks below this price are treated as noise, not bargains.
const MIN_REALISTIC_PRICE: Decimal = dec!(0.05);

/// Why an update produced no trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    TradePending,
    CooldownActive,
    EmptyOrderbook,
    PriceTooLow,
    NoDip,
    TradeTooSmall,
    SlippageTooHigh,
    ProfitTooLow,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::TradePending => "trade pending",
            SkipReason::CooldownActive => "cooldown active",
            SkipReason::EmptyOrderbook => "empty orderbook",
            SkipReason::PriceTooLow => "price too low",
            SkipReason::NoDip => "no dip",
            SkipReason::TradeTooSmall => "trade too small",
            SkipReason::SlippageTooHigh => "slippage too high",
            SkipReason::ProfitTooLow => "profit too low",
        }
    }
}

/// Result of one detection pass.
#[derive(Debug)]
pub enum Detection {
    Skip(SkipReason),
    Trade(Box<DipOpportunity>),
}

impl Detection {
    pub fn is_trade(&self) -> bool {
        matches!(self, Detection::Trade(_))
    }
}

/// An admitted opportunity. Immutable once produced.
#[derive(Debug, Clone)]
pub struct DipOpportunity {
    pub market: WindowKey,
    pub window_label: String,
    pub timestamp: DateTime<Utc>,
    pub ask_up: Decimal,
    pub ask_down: Decimal,
    pub avg_fill_up: Decimal,
    pub avg_fill_down: Decimal,
    pub shares: Decimal,
    pub trade_value: Decimal,
    /// Slippage-adjusted notional for both legs.
    pub total_cost: Decimal,
    /// `ask_up + ask_down` at detection time.
    pub best_case_cost: Decimal,
    pub fees: Decimal,
    pub expected_profit: Decimal,
    pub profit_pct: Decimal,
    pub slippage_up: Decimal,
    pub slippage_down: Decimal,
    pub total_slippage: Decimal,
    pub liquidity_up: Decimal,
    pub liquidity_down: Decimal,
    pub levels_used_up: usize,
    pub levels_used_down: usize,
    /// Monotonic detection stamp for latency accounting.
    pub detected_at: Instant,
}

/// A dip in progress for one market.
#[derive(Debug, Clone)]
pub struct ActiveDip {
    pub started_at: DateTime<Utc>,
    pub started_mono: Instant,
    pub start_cost: Decimal,
    pub min_cost: Decimal,
    pub max_liq_up: Decimal,
    pub max_liq_down: Decimal,
    pub update_count: u64,
}

/// Lifecycle events emitted by the ActiveDip machine.
#[derive(Debug, Clone, Serialize)]
pub enum DipEvent {
    Started {
        market: WindowKey,
        window_label: String,
        ts: DateTime<Utc>,
        start_cost: Decimal,
        liquidity_up: Decimal,
        liquidity_down: Decimal,
    },
    Ended {
        market: WindowKey,
        window_label: String,
        ts: DateTime<Utc>,
        duration_ms: u64,
        start_cost: Decimal,
        min_cost: Decimal,
        update_count: u64,
        max_liq_up: Decimal,
        max_liq_down: Decimal,
    },
}

/// Detector tuning, derived from the trading config.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub timeframe: Timeframe,
    pub threshold: Decimal,
    pub cooldown: Duration,
    pub budget_usd: Decimal,
    pub min_trade_usd: Decimal,
    pub max_slippage_pct: Decimal,
    /// Percentage points (1.0 means 1%).
    pub min_profit_pct: Decimal,
    pub min_profit_usd: Decimal,
}

impl DetectorConfig {
    pub fn from_trading(trading: &TradingConfig, timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            threshold: trading.threshold,
            cooldown: Duration::from_millis(trading.cooldown_ms),
            budget_usd: trading.trade_budget_usd(),
            min_trade_usd: trading.min_trade_usd,
            max_slippage_pct: trading.max_slippage_pct,
            // Config carries a fraction; the gate compares percentage points.
            min_profit_pct: trading.min_profit_pct * Decimal::ONE_HUNDRED,
            min_profit_usd: trading.min_profit_usd,
        }
    }
}

/// The detector. Owns the ActiveDip map; consults the shared admission and
/// cooldown state.
pub struct Detector {
    config: DetectorConfig,
    admissions: Arc<PendingAdmissions>,
    cooldowns: Arc<CooldownTracker>,
    active_dips: HashMap<WindowKey, ActiveDip>,
}

impl Detector {
    pub fn new(
        config: DetectorConfig,
        admissions: Arc<PendingAdmissions>,
        cooldowns: Arc<CooldownTracker>,
    ) -> Self {
        Self {
            config,
            admissions,
            cooldowns,
            active_dips: HashMap::new(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Evaluate one orderbook state. Dip lifecycle events for this market
    /// are pushed onto `events`.
    pub fn detect(&mut self, book: &Orderbook, events: &mut Vec<DipEvent>) -> Detection {
        let key = book.key;

        // Gate 1: no concurrent trade for this market.
        if self.admissions.is_pending(&key) {
            return Detection::Skip(SkipReason::TradePending);
        }

        // Gate 2: cooldown.
        if self.cooldowns.is_cooling(&key, self.config.cooldown) {
            return Detection::Skip(SkipReason::CooldownActive);
        }

        // Gate 3: both sides quoted. A missing side is never a zero-cost
        // opportunity.
        let (Some(ask_up), Some(ask_down)) = (book.best_ask_up(), book.best_ask_down()) else {
            return Detection::Skip(SkipReason::EmptyOrderbook);
        };

        // Gate 4: realistic prices.
        if ask_up.price < MIN_REALISTIC_PRICE || ask_down.price < MIN_REALISTIC_PRICE {
            return Detection::Skip(SkipReason::PriceTooLow);
        }

        // Gate 5: the dip itself, driving the ActiveDip machine.
        let best_case_cost = ask_up.price + ask_down.price;
        let liq_up = available_depth(&book.up.asks);
        let liq_down = available_depth(&book.down.asks);

        if best_case_cost >= self.config.threshold {
            self.close_dip(key, &book.window_label, events);
            return Detection::Skip(SkipReason::NoDip);
        }
        self.track_dip(key, &book.window_label, best_case_cost, liq_up, liq_down, events);

        // Gate 6: fillable size worth trading.
        let Some(plan) = sizing::plan_trade(book, self.config.timeframe, self.config.budget_usd)
        else {
            return Detection::Skip(SkipReason::TradeTooSmall);
        };
        if plan.trade_value < self.config.min_trade_usd {
            return Detection::Skip(SkipReason::TradeTooSmall);
        }

        // Gate 7: slippage bound.
        if plan.combined_slippage > self.config.max_slippage_pct {
            return Detection::Skip(SkipReason::SlippageTooHigh);
        }

        // Gate 8: profit floors, net of fees.
        if plan.profit_pct < self.config.min_profit_pct
            || plan.expected_profit < self.config.min_profit_usd
        {
            return Detection::Skip(SkipReason::ProfitTooLow);
        }

        Detection::Trade(Box::new(DipOpportunity {
            market: key,
            window_label: book.window_label.clone(),
            timestamp: Utc::now(),
            ask_up: ask_up.price,
            ask_down: ask_down.price,
            avg_fill_up: plan.avg_fill_up,
            avg_fill_down: plan.avg_fill_down,
            shares: plan.shares,
            trade_value: plan.trade_value,
            total_cost: plan.total_cost,
            best_case_cost,
            fees: plan.fees,
            expected_profit: plan.expected_profit,
            profit_pct: plan.profit_pct,
            slippage_up: plan.slippage_up,
            slippage_down: plan.slippage_down,
            total_slippage: plan.combined_slippage,
            liquidity_up: plan.liquidity_up,
            liquidity_down: plan.liquidity_down,
            levels_used_up: plan.levels_used_up,
            levels_used_down: plan.levels_used_down,
            detected_at: Instant::now(),
        }))
    }

    fn track_dip(
        &mut self,
        key: WindowKey,
        label: &str,
        cost: Decimal,
        liq_up: Decimal,
        liq_down: Decimal,
        events: &mut Vec<DipEvent>,
    ) {
        match self.active_dips.get_mut(&key) {
            Some(dip) => {
                dip.min_cost = dip.min_cost.min(cost);
                dip.max_liq_up = dip.max_liq_up.max(liq_up);
                dip.max_liq_down = dip.max_liq_down.max(liq_down);
                dip.update_count += 1;
            }
            None => {
                let now = Utc::now();
                self.active_dips.insert(
                    key,
                    ActiveDip {
                        started_at: now,
                        started_mono: Instant::now(),
                        start_cost: cost,
                        min_cost: cost,
                        max_liq_up: liq_up,
                        max_liq_down: liq_down,
                        update_count: 1,
                    },
                );
                events.push(DipEvent::Started {
                    market: key,
                    window_label: label.to_string(),
                    ts: now,
                    start_cost: cost,
                    liquidity_up: liq_up,
                    liquidity_down: liq_down,
                });
            }
        }
    }

    fn close_dip(&mut self, key: WindowKey, label: &str, events: &mut Vec<DipEvent>) {
        if let Some(dip) = self.active_dips.remove(&key) {
            events.push(DipEvent::Ended {
                market: key,
                window_label: label.to_string(),
                ts: Utc::now(),
                duration_ms: dip.started_mono.elapsed().as_millis() as u64,
                start_cost: dip.start_cost,
                min_cost: dip.min_cost,
                update_count: dip.update_count,
                max_liq_up: dip.max_liq_up,
                max_liq_down: dip.max_liq_down,
            });
        }
    }

    /// Close every open dip (shutdown or rotation of the tracked set).
    pub fn close_all(&mut self, events: &mut Vec<DipEvent>) {
        let keys: Vec<WindowKey> = self.active_dips.keys().copied().collect();
        for key in keys {
            let label = key.to_string();
            self.close_dip(key, &label, events);
        }
    }

    /// Currently open dip for a market, if any.
    pub fn active_dip(&self, key: &WindowKey) -> Option<&ActiveDip> {
        self.active_dips.get(key)
    }

    /// Whether a market is close enough to the threshold to pre-sign for.
    pub fn is_hot(&self, book: &Orderbook, margin: Decimal) -> bool {
        book.best_case_cost()
            .map(|cost| cost < self.config.threshold + margin)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dip_common::{CryptoAsset, OutcomeSide, PriceLevel};
    use dip_market::BookUpdate;

    fn config_1h() -> DetectorConfig {
        DetectorConfig {
            timeframe: Timeframe::OneHour,
            threshold: dec!(0.97),
            cooldown: Duration::from_secs(30),
            budget_usd: dec!(100),
            min_trade_usd: dec!(20),
            max_slippage_pct: dec!(0.02),
            min_profit_pct: dec!(1),
            min_profit_usd: dec!(0.50),
        }
    }

    fn detector(config: DetectorConfig) -> Detector {
        Detector::new(
            config,
            Arc::new(PendingAdmissions::new(3)),
            Arc::new(CooldownTracker::new()),
        )
    }

    fn book(up_asks: &[(Decimal, Decimal)], down_asks: &[(Decimal, Decimal)]) -> Orderbook {
        let mut book = Orderbook::new(
            WindowKey::new(CryptoAsset::Btc, Timeframe::OneHour, 1_700_000_000),
            0,
            "bitcoin-up-or-down-test".to_string(),
        );
        book.apply(
            OutcomeSide::Up,
            BookUpdate::Snapshot {
                bids: vec![],
                asks: up_asks.iter().map(|&(p, s)| PriceLevel::new(p, s)).collect(),
            },
            1,
        );
        book.apply(
            OutcomeSide::Down,
            BookUpdate::Snapshot {
                bids: vec![],
                asks: down_asks.iter().map(|&(p, s)| PriceLevel::new(p, s)).collect(),
            },
            2,
        );
        book
    }

    #[test]
    fn test_clean_admission_one_hour() {
        let mut det = detector(config_1h());
        let mut events = Vec::new();
        let book = book(&[(dec!(0.48), dec!(500))], &[(dec!(0.47), dec!(500))]);

        let result = det.detect(&book, &mut events);
        let Detection::Trade(opp) = result else {
            panic!("expected trade, got {:?}", result);
        };
        assert_eq!(opp.best_case_cost, dec!(0.95));
        assert!((opp.shares - dec!(100) / dec!(0.95)).abs() < dec!(0.001));
        assert!((opp.expected_profit - dec!(5.26)).abs() < dec!(0.01));
        assert!((opp.profit_pct - dec!(5.26)).abs() < dec!(0.01));
        assert_eq!(opp.fees, Decimal::ZERO);

        // The dip opened.
        assert!(matches!(events.first(), Some(DipEvent::Started { .. })));
        assert!(det.active_dip(&book.key).is_some());
    }

    #[test]
    fn test_skip_pending() {
        let admissions = Arc::new(PendingAdmissions::new(3));
        let mut det = Detector::new(config_1h(), admissions.clone(), Arc::new(CooldownTracker::new()));
        let book = book(&[(dec!(0.48), dec!(500))], &[(dec!(0.47), dec!(500))]);

        admissions.try_admit(book.key).unwrap();
        let mut events = Vec::new();
        let result = det.detect(&book, &mut events);
        assert!(matches!(result, Detection::Skip(SkipReason::TradePending)));
        assert!(events.is_empty());
    }

    #[test]
    fn test_skip_cooldown() {
        let cooldowns = Arc::new(CooldownTracker::new());
        let mut det = Detector::new(config_1h(), Arc::new(PendingAdmissions::new(3)), cooldowns.clone());
        let book = book(&[(dec!(0.48), dec!(500))], &[(dec!(0.47), dec!(500))]);

        cooldowns.mark(book.key);
        let mut events = Vec::new();
        let result = det.detect(&book, &mut events);
        assert!(matches!(result, Detection::Skip(SkipReason::CooldownActive)));
    }

    #[test]
    fn test_skip_empty_book() {
        let mut det = detector(config_1h());
        let mut events = Vec::new();
        let book = book(&[], &[(dec!(0.47), dec!(500))]);
        let result = det.detect(&book, &mut events);
        assert!(matches!(result, Detection::Skip(SkipReason::EmptyOrderbook)));
    }

    #[test]
    fn test_skip_price_too_low_regardless_of_cost() {
        // UP quoted at 0.02: unrealistic, skipped even though the sum dips.
        let mut det = detector(config_1h());
        let mut events = Vec::new();
        let book = book(&[(dec!(0.02), dec!(500))], &[(dec!(0.97), dec!(500))]);
        let result = det.detect(&book, &mut events);
        assert!(matches!(result, Detection::Skip(SkipReason::PriceTooLow)));
    }

    #[test]
    fn test_no_dip_closes_active_dip() {
        // A tracked dip must emit its end record the moment cost recovers.
        let mut det = detector(config_1h());
        let mut events = Vec::new();

        // First update opens a dip at 0.88.
        let dipped = book(&[(dec!(0.44), dec!(500))], &[(dec!(0.44), dec!(500))]);
        det.detect(&dipped, &mut events);
        assert!(matches!(events.first(), Some(DipEvent::Started { .. })));
        events.clear();

        // Cost recovers to 0.98: skip + DIP_ENDED.
        let recovered = book(&[(dec!(0.49), dec!(500))], &[(dec!(0.49), dec!(500))]);
        let result = det.detect(&recovered, &mut events);
        assert!(matches!(result, Detection::Skip(SkipReason::NoDip)));
        match events.first() {
            Some(DipEvent::Ended {
                start_cost,
                min_cost,
                update_count,
                ..
            }) => {
                assert_eq!(*start_cost, dec!(0.88));
                assert_eq!(*min_cost, dec!(0.88));
                assert_eq!(*update_count, 1);
            }
            other => panic!("expected Ended, got {:?}", other),
        }
        assert!(det.active_dip(&recovered.key).is_none());
    }

    #[test]
    fn test_dip_tracks_min_cost_and_liquidity() {
        let mut det = detector(config_1h());
        let mut events = Vec::new();

        det.detect(
            &book(&[(dec!(0.46), dec!(100))], &[(dec!(0.46), dec!(100))]),
            &mut events,
        );
        det.detect(
            &book(&[(dec!(0.44), dec!(300))], &[(dec!(0.45), dec!(200))]),
            &mut events,
        );
        det.detect(
            &book(&[(dec!(0.45), dec!(50))], &[(dec!(0.46), dec!(50))]),
            &mut events,
        );

        let key = WindowKey::new(CryptoAsset::Btc, Timeframe::OneHour, 1_700_000_000);
        let dip = det.active_dip(&key).unwrap();
        assert_eq!(dip.start_cost, dec!(0.92));
        assert_eq!(dip.min_cost, dec!(0.89));
        assert_eq!(dip.max_liq_up, dec!(300));
        assert_eq!(dip.max_liq_down, dec!(200));
        assert_eq!(dip.update_count, 3);
        // Only one Started for the whole run.
        let starts = events
            .iter()
            .filter(|e| matches!(e, DipEvent::Started { .. }))
            .count();
        assert_eq!(starts, 1);
    }

    #[test]
    fn test_skip_trade_too_small() {
        let mut det = detector(config_1h());
        let mut events = Vec::new();
        // 20 shares at 0.90 per pair = $18 < min_trade_usd 20.
        let book = book(&[(dec!(0.45), dec!(20))], &[(dec!(0.45), dec!(20))]);
        let result = det.detect(&book, &mut events);
        assert!(matches!(result, Detection::Skip(SkipReason::TradeTooSmall)));
        // The dip is still tracked even though it is untradeable.
        assert!(det.active_dip(&book.key).is_some());
    }

    #[test]
    fn test_skip_slippage_too_high() {
        let mut det = detector(config_1h());
        let mut events = Vec::new();
        // Thin top level forces a deep walk on UP.
        let book = book(
            &[(dec!(0.40), dec!(5)), (dec!(0.52), dec!(500))],
            &[(dec!(0.45), dec!(500))],
        );
        let result = det.detect(&book, &mut events);
        assert!(matches!(result, Detection::Skip(SkipReason::SlippageTooHigh)));
    }

    #[test]
    fn test_skip_profit_too_low() {
        let mut config = config_1h();
        config.threshold = dec!(0.995);
        config.min_profit_usd = dec!(2);
        // Cost 0.99 leaves ~$1.01 on a $100 budget, under the $2 floor.
        let mut det = detector(config);
        let mut events = Vec::new();
        let book = book(&[(dec!(0.50), dec!(500))], &[(dec!(0.49), dec!(500))]);
        let result = det.detect(&book, &mut events);
        assert!(matches!(result, Detection::Skip(SkipReason::ProfitTooLow)));
    }

    #[test]
    fn test_close_all_on_shutdown() {
        let mut det = detector(config_1h());
        let mut events = Vec::new();
        det.detect(
            &book(&[(dec!(0.44), dec!(500))], &[(dec!(0.44), dec!(500))]),
            &mut events,
        );
        events.clear();
        det.close_all(&mut events);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DipEvent::Ended { .. }));
    }

    #[test]
    fn test_is_hot_band() {
        let det = detector(config_1h());
        // threshold 0.97, margin 0.05 → hot below 1.02.
        let hot = book(&[(dec!(0.50), dec!(100))], &[(dec!(0.50), dec!(100))]);
        assert!(det.is_hot(&hot, dec!(0.05)));
        let cold = book(&[(dec!(0.60), dec!(100))], &[(dec!(0.55), dec!(100))]);
        assert!(!det.is_hot(&cold, dec!(0.05)));
    }
}
