//! End-to-end detection scenarios against literal book states.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use dip_common::{CryptoAsset, OutcomeSide, PriceLevel, Timeframe, WindowKey};
use dip_market::{BookUpdate, Orderbook};

use dip_bot::config::TradingConfig;
use dip_bot::strategy::{Detection, Detector, DetectorConfig, DipEvent, SkipReason};
use dip_bot::{CooldownTracker, PendingAdmissions};

fn make_book(
    asset: CryptoAsset,
    timeframe: Timeframe,
    up_asks: &[(Decimal, Decimal)],
    down_asks: &[(Decimal, Decimal)],
) -> Orderbook {
    let mut book = Orderbook::new(
        WindowKey::new(asset, timeframe, 1_700_000_000),
        0,
        format!("{}-test-window", asset.slug_symbol()),
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
            asks: down_asks
                .iter()
                .map(|&(p, s)| PriceLevel::new(p, s))
                .collect(),
        },
        2,
    );
    book
}

fn detector_for(timeframe: Timeframe, threshold: Decimal) -> Detector {
    let mut trading = TradingConfig::default();
    trading.threshold = threshold;
    Detector::new(
        DetectorConfig::from_trading(&trading, timeframe),
        Arc::new(PendingAdmissions::new(3)),
        Arc::new(CooldownTracker::new()),
    )
}

#[test]
fn scenario_clean_dip_admission_hourly() {
    // timeframe=1h, threshold=0.97, max trade $100.
    // UP asks [(0.48, 500)], DOWN asks [(0.47, 500)], fees zero.
    let mut detector = detector_for(Timeframe::OneHour, dec!(0.97));
    let book = make_book(
        CryptoAsset::Btc,
        Timeframe::OneHour,
        &[(dec!(0.48), dec!(500))],
        &[(dec!(0.47), dec!(500))],
    );

    let mut events = Vec::new();
    let Detection::Trade(opp) = detector.detect(&book, &mut events) else {
        panic!("expected admission");
    };

    assert_eq!(opp.best_case_cost, dec!(0.95));
    assert_eq!(opp.fees, Decimal::ZERO);
    // shares = 100 / 0.95 ≈ 105.26
    assert!((opp.shares - dec!(105.2631)).abs() < dec!(0.001));
    // profit ≈ (1 − 0.95) · 105.26 ≈ 5.26 USDC, profit_pct ≈ 5.26%
    assert!((opp.expected_profit - dec!(5.2631)).abs() < dec!(0.001));
    assert!((opp.profit_pct - dec!(5.2631)).abs() < dec!(0.001));
    // Admission floor invariants hold by construction.
    assert!(opp.profit_pct >= dec!(1));
    assert!(opp.total_slippage <= dec!(0.02));
}

#[test]
fn scenario_fifteen_minute_fee_boundary() {
    // timeframe=15m, threshold=0.94.
    // UP asks [(0.50, 1000)], DOWN asks [(0.43, 1000)].
    let mut detector = detector_for(Timeframe::FifteenMin, dec!(0.94));
    let book = make_book(
        CryptoAsset::Eth,
        Timeframe::FifteenMin,
        &[(dec!(0.50), dec!(1000))],
        &[(dec!(0.43), dec!(1000))],
    );

    let mut events = Vec::new();
    let Detection::Trade(opp) = detector.detect(&book, &mut events) else {
        panic!("expected admission");
    };

    // shares = 100 / 0.93 ≈ 107.53
    assert!((opp.shares - dec!(107.5268)).abs() < dec!(0.001));
    // fee_rate(0.50) = 0.03125 and fee_rate(0.43) = 2·(0.43·0.57)³ ≈ 0.02945,
    // so fees ≈ 1.68 + 1.36 ≈ 3.04.
    assert!((opp.fees - dec!(3.0417)).abs() < dec!(0.01), "fees = {}", opp.fees);
    // expected profit ≈ (1 − 0.93) · 107.53 − 3.04 ≈ 4.49
    assert!(
        (opp.expected_profit - dec!(4.4852)).abs() < dec!(0.01),
        "profit = {}",
        opp.expected_profit
    );
    // Admitted because profit_pct ≥ 1%.
    assert!(opp.profit_pct >= dec!(1));
}

#[test]
fn scenario_dip_end_emits_duration() {
    // An open dip at cost 0.88 ends when cost returns to 0.95.
    let mut detector = detector_for(Timeframe::OneHour, dec!(0.94));
    let mut events = Vec::new();

    let dipped = make_book(
        CryptoAsset::Btc,
        Timeframe::OneHour,
        &[(dec!(0.44), dec!(20))],
        &[(dec!(0.44), dec!(20))],
    );
    // 20 shares at 0.88 per pair is $17.60, under the $20 floor: the dip
    // opens but nothing trades.
    let result = detector.detect(&dipped, &mut events);
    assert!(matches!(result, Detection::Skip(SkipReason::TradeTooSmall)));
    assert!(matches!(events.last(), Some(DipEvent::Started { .. })));
    events.clear();

    let recovered = make_book(
        CryptoAsset::Btc,
        Timeframe::OneHour,
        &[(dec!(0.48), dec!(30))],
        &[(dec!(0.47), dec!(30))],
    );
    let result = detector.detect(&recovered, &mut events);
    assert!(matches!(result, Detection::Skip(SkipReason::NoDip)));

    match events.last() {
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
        other => panic!("expected dip end, got {:?}", other),
    }
}

#[test]
fn scenario_price_too_low_beats_total_cost() {
    // UP best ask 0.02, DOWN best ask 0.97: skipped on price alone.
    let mut detector = detector_for(Timeframe::OneHour, dec!(0.97));
    let book = make_book(
        CryptoAsset::Btc,
        Timeframe::OneHour,
        &[(dec!(0.02), dec!(500))],
        &[(dec!(0.97), dec!(500))],
    );
    let mut events = Vec::new();
    let result = detector.detect(&book, &mut events);
    assert!(matches!(result, Detection::Skip(SkipReason::PriceTooLow)));
    assert!(events.is_empty());
}

#[test]
fn pending_admission_blocks_second_trade() {
    let admissions = Arc::new(PendingAdmissions::new(3));
    let mut trading = TradingConfig::default();
    trading.threshold = dec!(0.97);
    let mut detector = Detector::new(
        DetectorConfig::from_trading(&trading, Timeframe::OneHour),
        admissions.clone(),
        Arc::new(CooldownTracker::new()),
    );
    let book = make_book(
        CryptoAsset::Btc,
        Timeframe::OneHour,
        &[(dec!(0.48), dec!(500))],
        &[(dec!(0.47), dec!(500))],
    );

    let mut events = Vec::new();
    // First detection admits; the caller claims the slot before executing.
    assert!(detector.detect(&book, &mut events).is_trade());
    admissions.try_admit(book.key).unwrap();

    // While pending, the same book yields "trade pending".
    let result = detector.detect(&book, &mut events);
    assert!(matches!(result, Detection::Skip(SkipReason::TradePending)));

    // Released without success (no cooldown): tradeable again.
    admissions.release(book.key);
    assert!(detector.detect(&book, &mut events).is_trade());
}

#[test]
fn admission_is_exclusive_under_contention() {
    let admissions = Arc::new(PendingAdmissions::new(10));
    let key = WindowKey::new(CryptoAsset::Btc, Timeframe::OneHour, 1_700_000_000);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let admissions = admissions.clone();
        handles.push(std::thread::spawn(move || admissions.try_admit(key).is_ok()));
    }
    let wins: usize = handles
        .into_iter()
        .map(|h| h.join().unwrap() as usize)
        .sum();
    assert_eq!(wins, 1, "exactly one concurrent admission may win");
}
