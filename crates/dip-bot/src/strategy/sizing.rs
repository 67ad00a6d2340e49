//! Position sizing and slippage-adjusted cost math.
//!
//! Sizing walks both ask ladders for the candidate share count, so the plan
//! carries VWAP fills, per-side slippage, and the fee bill: everything the
//! detector's profitability gates need.

use rust_decimal::Decimal;

use dip_common::Timeframe;
use dip_market::Orderbook;

use super::fees;

/// A fully costed candidate trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradePlan {
    /// Shares to buy on each side (equal by construction).
    pub shares: Decimal,
    /// Trade value at the quoted best asks: `shares * (ask_up + ask_down)`.
    pub trade_value: Decimal,
    /// VWAP fill price on the UP ladder.
    pub avg_fill_up: Decimal,
    /// VWAP fill price on the DOWN ladder.
    pub avg_fill_down: Decimal,
    /// Notional paid on the UP leg.
    pub cost_up: Decimal,
    /// Notional paid on the DOWN leg.
    pub cost_down: Decimal,
    /// `cost_up + cost_down`.
    pub total_cost: Decimal,
    /// Slippage-adjusted per-pair cost: `avg_fill_up + avg_fill_down`.
    pub cost_per_share: Decimal,
    /// `(vwap - best_ask) / best_ask` on the UP side.
    pub slippage_up: Decimal,
    /// `(vwap - best_ask) / best_ask` on the DOWN side.
    pub slippage_down: Decimal,
    /// Mean of the two per-side slippages.
    pub combined_slippage: Decimal,
    /// Ask-side shares available on UP.
    pub liquidity_up: Decimal,
    /// Ask-side shares available on DOWN.
    pub liquidity_down: Decimal,
    /// Ladder levels a fill would touch on UP.
    pub levels_used_up: usize,
    /// Ladder levels a fill would touch on DOWN.
    pub levels_used_down: usize,
    /// Total fee bill for both legs.
    pub fees: Decimal,
    /// `(1 - cost_per_share) * shares - fees`.
    pub expected_profit: Decimal,
    /// `expected_profit / trade_value * 100`.
    pub profit_pct: Decimal,
}

/// Cost a candidate trade for `budget_usd`.
///
/// Shares = `min(budget / (ask_up + ask_down), liquidity_up, liquidity_down)`.
/// Returns `None` when either ask ladder is empty or the budget buys
/// nothing.
pub fn plan_trade(book: &Orderbook, timeframe: Timeframe, budget_usd: Decimal) -> Option<TradePlan> {
    let ask_up = book.best_ask_up()?;
    let ask_down = book.best_ask_down()?;

    let price_per_pair = ask_up.price + ask_down.price;
    if price_per_pair <= Decimal::ZERO || budget_usd <= Decimal::ZERO {
        return None;
    }

    // Full trusted depth on each ask ladder.
    let liquidity_up = available_depth(&book.up.asks);
    let liquidity_down = available_depth(&book.down.asks);

    let shares = (budget_usd / price_per_pair)
        .min(liquidity_up)
        .min(liquidity_down);
    if shares <= Decimal::ZERO {
        return None;
    }

    let up_fill = book.up.asks.vwap_to_fill(shares)?;
    let down_fill = book.down.asks.vwap_to_fill(shares)?;

    let slippage_up = (up_fill.vwap - ask_up.price) / ask_up.price;
    let slippage_down = (down_fill.vwap - ask_down.price) / ask_down.price;

    let cost_per_share = up_fill.vwap + down_fill.vwap;
    let total_cost = up_fill.cost + down_fill.cost;
    let trade_value = shares * price_per_pair;

    let fees = fees::fee_for(up_fill.cost, ask_up.price, timeframe)
        + fees::fee_for(down_fill.cost, ask_down.price, timeframe);

    let expected_profit = (Decimal::ONE - cost_per_share) * shares - fees;
    let profit_pct = if trade_value > Decimal::ZERO {
        expected_profit / trade_value * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    };

    Some(TradePlan {
        shares,
        trade_value,
        avg_fill_up: up_fill.vwap,
        avg_fill_down: down_fill.vwap,
        cost_up: up_fill.cost,
        cost_down: down_fill.cost,
        total_cost,
        cost_per_share,
        slippage_up,
        slippage_down,
        combined_slippage: (slippage_up + slippage_down) / Decimal::TWO,
        liquidity_up,
        liquidity_down,
        levels_used_up: book.up.asks.levels_to_fill(shares),
        levels_used_down: book.down.asks.levels_to_fill(shares),
        fees,
        expected_profit,
        profit_pct,
    })
}

/// Trusted ask-side depth in shares.
pub fn available_depth(asks: &dip_market::SideBook) -> Decimal {
    // vwap_to_fill caps the walk at trusted depth; a huge target measures it.
    asks.vwap_to_fill(Decimal::MAX)
        .map(|est| est.filled)
        .unwrap_or(Decimal::ZERO)
}
