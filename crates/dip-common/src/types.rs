//! Core vocabulary shared by the market plumbing and the trading engine.
//!
//! CRITICAL: All prices and quantities use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Exchange price quantum: all quoted prices land on a 0.01 grid.
pub const TICK_SIZE: Decimal = dec!(0.01);

/// Supported cryptocurrency underlyings for up/down markets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CryptoAsset {
    Btc,
    Eth,
    Sol,
    Xrp,
}

impl CryptoAsset {
    /// Short uppercase display symbol.
    pub fn as_str(&self) -> &'static str {
        match self {
            CryptoAsset::Btc => "BTC",
            CryptoAsset::Eth => "ETH",
            CryptoAsset::Sol => "SOL",
            CryptoAsset::Xrp => "XRP",
        }
    }

    /// Lowercase symbol used in 15-minute market slugs (`btc-updown-15m-...`).
    pub fn slug_symbol(&self) -> &'static str {
        match self {
            CryptoAsset::Btc => "btc",
            CryptoAsset::Eth => "eth",
            CryptoAsset::Sol => "sol",
            CryptoAsset::Xrp => "xrp",
        }
    }

    /// Full lowercase name used in hourly/daily slugs
    /// (`bitcoin-up-or-down-...`).
    pub fn full_name(&self) -> &'static str {
        match self {
            CryptoAsset::Btc => "bitcoin",
            CryptoAsset::Eth => "ethereum",
            CryptoAsset::Sol => "solana",
            CryptoAsset::Xrp => "xrp",
        }
    }

    /// All supported assets.
    pub fn all() -> &'static [CryptoAsset] {
        &[
            CryptoAsset::Btc,
            CryptoAsset::Eth,
            CryptoAsset::Sol,
            CryptoAsset::Xrp,
        ]
    }
}

impl std::fmt::Display for CryptoAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CryptoAsset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BTC" | "BITCOIN" => Ok(CryptoAsset::Btc),
            "ETH" | "ETHEREUM" => Ok(CryptoAsset::Eth),
            "SOL" | "SOLANA" => Ok(CryptoAsset::Sol),
            "XRP" | "RIPPLE" => Ok(CryptoAsset::Xrp),
            _ => Err(format!("Unknown asset: {}", s)),
        }
    }
}

/// Market window timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    /// 15-minute markets (slugged by Unix period start).
    #[default]
    #[serde(rename = "15m")]
    FifteenMin,
    /// Hourly markets (ET calendar slugs).
    #[serde(rename = "1h")]
    OneHour,
    /// 4-hour markets (ET calendar slugs).
    #[serde(rename = "4h")]
    FourHour,
    /// Daily markets (ET calendar slugs, no hour fragment).
    #[serde(rename = "daily")]
    Daily,
}

impl Timeframe {
    /// Period length in seconds.
    pub fn period_secs(&self) -> i64 {
        match self {
            Timeframe::FifteenMin => 15 * 60,
            Timeframe::OneHour => 60 * 60,
            Timeframe::FourHour => 4 * 60 * 60,
            Timeframe::Daily => 24 * 60 * 60,
        }
    }

    /// Whether the exchange charges the price-dependent taker fee.
    ///
    /// Only the 15-minute markets carry the fee curve; hourly and longer
    /// windows trade fee-free.
    pub fn has_fees(&self) -> bool {
        matches!(self, Timeframe::FifteenMin)
    }

    /// Returns the display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::FifteenMin => "15m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHour => "4h",
            Timeframe::Daily => "daily",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "15m" | "15min" | "15" => Ok(Timeframe::FifteenMin),
            "1h" | "1hour" | "60" | "hourly" => Ok(Timeframe::OneHour),
            "4h" | "4hour" | "240" => Ok(Timeframe::FourHour),
            "1d" | "daily" | "day" => Ok(Timeframe::Daily),
            _ => Err(format!("Unknown timeframe: {}", s)),
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// One of the two complementary outcomes of a binary market.
///
/// Exactly one side resolves to $1.00, the other to $0.00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeSide {
    Up,
    Down,
}

impl OutcomeSide {
    pub fn opposite(&self) -> Self {
        match self {
            OutcomeSide::Up => OutcomeSide::Down,
            OutcomeSide::Down => OutcomeSide::Up,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeSide::Up => "UP",
            OutcomeSide::Down => "DOWN",
        }
    }
}

impl std::fmt::Display for OutcomeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single level in an order book ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Price in USDC (0.00 to 1.00).
    pub price: Decimal,
    /// Share quantity available at this price.
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    /// Notional cost to take the whole level.
    #[inline]
    pub fn cost(&self) -> Decimal {
        self.price * self.size
    }
}

/// Identifies one market window: underlying, timeframe, and period start.
///
/// This is the key under which orderbooks, active dips, pending admissions
/// and positions are tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowKey {
    pub asset: CryptoAsset,
    pub timeframe: Timeframe,
    /// Unix seconds of the period start.
    pub period_ts: i64,
}

impl WindowKey {
    pub fn new(asset: CryptoAsset, timeframe: Timeframe, period_ts: i64) -> Self {
        Self {
            asset,
            timeframe,
            period_ts,
        }
    }

    /// Unix seconds of the period end.
    pub fn period_end_ts(&self) -> i64 {
        self.period_ts + self.timeframe.period_secs()
    }

    /// True once the window has fully elapsed.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.period_end_ts()
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.asset.slug_symbol(),
            self.timeframe,
            self.period_ts
        )
    }
}

impl std::str::FromStr for WindowKey {
    type Err = String;

    /// Parses the `Display` form, e.g. `btc:15m:1700000100`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let asset: CryptoAsset = parts
            .next()
            .ok_or_else(|| format!("malformed window key: {}", s))?
            .parse()?;
        let timeframe: Timeframe = parts
            .next()
            .ok_or_else(|| format!("malformed window key: {}", s))?
            .parse()?;
        let period_ts: i64 = parts
            .next()
            .ok_or_else(|| format!("malformed window key: {}", s))?
            .parse()
            .map_err(|e| format!("bad period in window key {}: {}", s, e))?;
        Ok(WindowKey::new(asset, timeframe, period_ts))
    }
}

/// Resolved token identifiers for one market window.
///
/// Created by the catalog on lookup, replaced wholesale on rotation, and
/// retired once the window has ended and no open position references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketTokens {
    pub asset: CryptoAsset,
    pub timeframe: Timeframe,
    /// Which future window this record names: 0 = current, 1 = next, ...
    pub window_offset: u8,
    /// The exchange slug this window was resolved from.
    pub window_label: String,
    /// Unix seconds of the period start.
    pub period_ts: i64,
    pub token_id_up: String,
    pub token_id_down: String,
    pub condition_id: String,
    pub question: String,
}

impl MarketTokens {
    /// Window key for this record.
    pub fn window_key(&self) -> WindowKey {
        WindowKey::new(self.asset, self.timeframe, self.period_ts)
    }

    /// Which outcome a token id belongs to, if either.
    pub fn side_of(&self, token_id: &str) -> Option<OutcomeSide> {
        if token_id == self.token_id_up {
            Some(OutcomeSide::Up)
        } else if token_id == self.token_id_down {
            Some(OutcomeSide::Down)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_slug_fragments() {
        assert_eq!(CryptoAsset::Btc.slug_symbol(), "btc");
        assert_eq!(CryptoAsset::Btc.full_name(), "bitcoin");
        assert_eq!(CryptoAsset::Sol.full_name(), "solana");
        assert_eq!(CryptoAsset::Xrp.full_name(), "xrp");
    }

    #[test]
    fn test_asset_from_str() {
        assert_eq!("btc".parse::<CryptoAsset>(), Ok(CryptoAsset::Btc));
        assert_eq!("Ethereum".parse::<CryptoAsset>(), Ok(CryptoAsset::Eth));
        assert!("doge".parse::<CryptoAsset>().is_err());
    }

    #[test]
    fn test_timeframe_periods() {
        assert_eq!(Timeframe::FifteenMin.period_secs(), 900);
        assert_eq!(Timeframe::OneHour.period_secs(), 3600);
        assert_eq!(Timeframe::FourHour.period_secs(), 14400);
        assert_eq!(Timeframe::Daily.period_secs(), 86400);
    }

    #[test]
    fn test_timeframe_fees() {
        assert!(Timeframe::FifteenMin.has_fees());
        assert!(!Timeframe::OneHour.has_fees());
        assert!(!Timeframe::FourHour.has_fees());
        assert!(!Timeframe::Daily.has_fees());
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(OutcomeSide::Up.opposite(), OutcomeSide::Down);
    }

    #[test]
    fn test_window_key_end() {
        let key = WindowKey::new(CryptoAsset::Btc, Timeframe::FifteenMin, 1_700_000_100);
        assert_eq!(key.period_end_ts(), 1_700_001_000);
        assert_eq!(key.to_string(), "btc:15m:1700000100");
    }

    #[test]
    fn test_window_key_round_trip() {
        let key = WindowKey::new(CryptoAsset::Eth, Timeframe::Daily, 1_700_006_400);
        let parsed: WindowKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
        assert!("btc:15m".parse::<WindowKey>().is_err());
        assert!("btc:15m:abc".parse::<WindowKey>().is_err());
    }

    #[test]
    fn test_market_tokens_side_of() {
        let tokens = MarketTokens {
            asset: CryptoAsset::Eth,
            timeframe: Timeframe::OneHour,
            window_offset: 0,
            window_label: "ethereum-up-or-down-january-3-4pm-et".to_string(),
            period_ts: 1_700_000_000,
            token_id_up: "tok_up".to_string(),
            token_id_down: "tok_down".to_string(),
            condition_id: "0xcond".to_string(),
            question: "Ethereum Up or Down?".to_string(),
        };
        assert_eq!(tokens.side_of("tok_up"), Some(OutcomeSide::Up));
        assert_eq!(tokens.side_of("tok_down"), Some(OutcomeSide::Down));
        assert_eq!(tokens.side_of("other"), None);
    }
}
