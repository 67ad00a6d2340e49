//! Taker fee model.
//!
//! Fifteen-minute markets charge a price-dependent taker fee that peaks at
//! mid prices and vanishes toward the extremes:
//!
//! ```text
//! fee_rate(p) = 2 * (p * (1 - p))^3
//! ```
//!
//! The curve tops out at p = 0.5 with rate 2 * 0.25^3 = 0.03125. Hourly and
//! longer windows trade fee-free.

use rust_decimal::Decimal;

use dip_common::Timeframe;

/// Fee rate for a fill at price `p` on the given timeframe.
pub fn fee_rate(price: Decimal, timeframe: Timeframe) -> Decimal {
    if !timeframe.has_fees() {
        return Decimal::ZERO;
    }
    if price <= Decimal::ZERO || price >= Decimal::ONE {
        return Decimal::ZERO;
    }
    let q = price * (Decimal::ONE - price);
    Decimal::TWO * q * q * q
}

/// Fee charged on a fill: `cost * fee_rate(price)`.
///
/// `price` is the quoted per-share price (sets the rate), `cost` the actual
/// notional paid for the leg.
pub fn fee_for(cost: Decimal, price: Decimal, timeframe: Timeframe) -> Decimal {
    cost * fee_rate(price, timeframe)
}
