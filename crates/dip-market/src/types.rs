//! Wire types for the Gamma REST API and the CLOB market channel.
//!
//! The exchange is loose with shapes: `clobTokenIds`, `outcomes` and
//! `outcomePrices` arrive either as JSON arrays or as JSON-encoded strings,
//! and integer fields arrive either as numbers or as strings. Prices and
//! sizes are decoded from strings only: a bare JSON number has already
//! passed through binary float, so it is refused rather than converted.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// Gamma REST shapes
// ============================================================================

/// A market object from the Gamma `/markets` endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaMarket {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    /// Token ids, array or JSON-string-of-array.
    #[serde(default, deserialize_with = "de_string_or_vec")]
    pub clob_token_ids: Option<Vec<String>>,
    /// Outcome labels, array or JSON-string-of-array.
    #[serde(default, deserialize_with = "de_string_or_vec")]
    pub outcomes: Option<Vec<String>>,
    /// Resolution prices, array or JSON-string-of-array.
    #[serde(default, deserialize_with = "de_string_or_vec")]
    pub outcome_prices: Option<Vec<String>>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default)]
    pub resolved: Option<bool>,
    #[serde(default)]
    pub accepting_orders: Option<bool>,
}

impl GammaMarket {
    /// Resolution prices parsed to decimals, in outcome order.
    pub fn outcome_prices_decimal(&self) -> Option<Vec<Decimal>> {
        let raw = self.outcome_prices.as_ref()?;
        let parsed: Vec<Decimal> = raw.iter().filter_map(|s| s.parse().ok()).collect();
        if parsed.len() == raw.len() {
            Some(parsed)
        } else {
            None
        }
    }
}

// ============================================================================
// CLOB market channel shapes
// ============================================================================

/// Subscription payload for the market channel.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeMessage {
    /// Always null for the public market channel.
    pub auth: Option<serde_json::Value>,
    #[serde(rename = "type")]
    pub channel: &'static str,
    pub assets_ids: Vec<String>,
}

impl SubscribeMessage {
    pub fn market(assets_ids: Vec<String>) -> Self {
        Self {
            auth: None,
            channel: "MARKET",
            assets_ids,
        }
    }
}

/// One ladder level as carried on the wire (both fields are strings).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LevelMsg {
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub price: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub size: Option<Decimal>,
}

/// A single best-price change inside a `price_changes` batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriceChange {
    /// Present on nested per-asset entries; inherits the envelope's
    /// `asset_id` when absent.
    #[serde(default, alias = "assetId")]
    pub asset_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub price: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub best_bid: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub best_ask: Option<Decimal>,
}

/// One event object from the market channel.
///
/// Covers book snapshots (`event_type` of `book`/`book_snapshot`), price
/// change batches (`price_changes` present), and control messages
/// (`subscribed`, `error`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamMessage {
    #[serde(default, alias = "type")]
    pub event_type: Option<String>,
    #[serde(default, alias = "assetId")]
    pub asset_id: Option<String>,
    /// Condition id of the market the token belongs to.
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub bids: Option<Vec<LevelMsg>>,
    #[serde(default)]
    pub asks: Option<Vec<LevelMsg>>,
    #[serde(default)]
    pub price_changes: Vec<PriceChange>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub best_bid: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub best_ask: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_i64")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StreamMessage {
    /// True for full book snapshots.
    pub fn is_snapshot(&self) -> bool {
        matches!(
            self.event_type.as_deref(),
            Some("book") | Some("book_snapshot")
        )
    }
}

/// Envelope: the channel delivers either a single event object or an array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum StreamEnvelope {
    Many(Vec<StreamMessage>),
    One(Box<StreamMessage>),
}

impl StreamEnvelope {
    pub fn into_events(self) -> Vec<StreamMessage> {
        match self {
            StreamEnvelope::Many(v) => v,
            StreamEnvelope::One(m) => vec![*m],
        }
    }
}

// ============================================================================
// Tolerant decoders
// ============================================================================

/// Accepts `["a","b"]` or `"[\"a\",\"b\"]"`.
fn de_string_or_vec<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum VecOrStr {
        Vec(Vec<String>),
        Str(String),
    }

    let parsed = Option::<VecOrStr>::deserialize(deserializer)?;
    Ok(match parsed {
        Some(VecOrStr::Vec(v)) => Some(v),
        Some(VecOrStr::Str(s)) => serde_json::from_str(&s).ok(),
        None => None,
    })
}

/// Accepts `"0.45"` or null. A bare JSON number has been through f64 on
/// the way in, so it decodes to `None` instead of a lossy `Decimal`.
pub fn de_opt_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        Str(String),
        Num(serde_json::Number),
    }

    let parsed = Option::<StrOrNum>::deserialize(deserializer)?;
    Ok(match parsed {
        Some(StrOrNum::Str(s)) => s.parse().ok(),
        Some(StrOrNum::Num(_)) => None,
        None => None,
    })
}

/// Accepts `1700000000000`, `"1700000000000"`, or null.
fn de_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(i64),
        Str(String),
    }

    let parsed = Option::<NumOrStr>::deserialize(deserializer)?;
    Ok(match parsed {
        Some(NumOrStr::Num(v)) => Some(v),
        Some(NumOrStr::Str(s)) => s.parse().ok(),
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_gamma_tokens_as_array() {
        let json = r#"{"id":"1","clobTokenIds":["up","down"],"outcomes":["Up","Down"]}"#;
        let market: GammaMarket = serde_json::from_str(json).unwrap();
        assert_eq!(
            market.clob_token_ids,
            Some(vec!["up".to_string(), "down".to_string()])
        );
        assert_eq!(
            market.outcomes,
            Some(vec!["Up".to_string(), "Down".to_string()])
        );
    }

    #[test]
    fn test_gamma_tokens_as_json_string() {
        let json = r#"{"id":"1","clobTokenIds":"[\"up\",\"down\"]","outcomes":"[\"Up\",\"Down\"]"}"#;
        let market: GammaMarket = serde_json::from_str(json).unwrap();
        assert_eq!(
            market.clob_token_ids,
            Some(vec!["up".to_string(), "down".to_string()])
        );
    }

    #[test]
    fn test_gamma_outcome_prices_both_shapes() {
        let json = r#"{"id":"1","outcomePrices":"[\"0.98\",\"0.02\"]"}"#;
        let market: GammaMarket = serde_json::from_str(json).unwrap();
        assert_eq!(
            market.outcome_prices_decimal(),
            Some(vec![dec!(0.98), dec!(0.02)])
        );

        let json = r#"{"id":"1","outcomePrices":["1","0"]}"#;
        let market: GammaMarket = serde_json::from_str(json).unwrap();
        assert_eq!(
            market.outcome_prices_decimal(),
            Some(vec![dec!(1), dec!(0)])
        );
    }

    #[test]
    fn test_subscribe_payload_shape() {
        let msg = SubscribeMessage::market(vec!["t1".to_string(), "t2".to_string()]);
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json["auth"].is_null());
        assert_eq!(json["type"], "MARKET");
        assert_eq!(json["assets_ids"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_stream_envelope_array() {
        let json = r#"[{"event_type":"book","asset_id":"t1","bids":[],"asks":[]}]"#;
        let env: StreamEnvelope = serde_json::from_str(json).unwrap();
        let events = env.into_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_snapshot());
    }

    #[test]
    fn test_stream_price_changes() {
        let json = r#"{
            "event_type":"price_change",
            "asset_id":"t1",
            "timestamp":"1700000000000",
            "price_changes":[
                {"price":"0.45","size":"120","side":"SELL","best_ask":"0.45"},
                {"asset_id":"t2","price":"0.52","size":"90","side":"SELL"}
            ]
        }"#;
        let env: StreamEnvelope = serde_json::from_str(json).unwrap();
        let events = env.into_events();
        assert_eq!(events.len(), 1);
        let msg = &events[0];
        assert_eq!(msg.timestamp, Some(1_700_000_000_000));
        assert_eq!(msg.price_changes.len(), 2);
        assert_eq!(msg.price_changes[0].price, Some(dec!(0.45)));
        assert_eq!(msg.price_changes[0].best_ask, Some(dec!(0.45)));
        assert_eq!(msg.price_changes[1].asset_id.as_deref(), Some("t2"));
        assert_eq!(msg.price_changes[1].price, Some(dec!(0.52)));
        assert_eq!(msg.price_changes[1].size, Some(dec!(90)));
    }

    #[test]
    fn test_bare_number_prices_are_refused() {
        // Prices and sizes are strings on the wire; a bare number has been
        // through f64 and must not reach Decimal.
        let json = r#"{
            "event_type":"price_change",
            "asset_id":"t1",
            "price_changes":[{"price":0.52,"size":90,"side":"SELL"}]
        }"#;
        let msg: StreamMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.price_changes.len(), 1);
        assert_eq!(msg.price_changes[0].price, None);
        assert_eq!(msg.price_changes[0].size, None);
        // The surrounding message still parses.
        assert_eq!(msg.asset_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_snapshot_levels_parse_as_strings() {
        let json = r#"{
            "event_type":"book",
            "asset_id":"t1",
            "bids":[{"price":"0.44","size":"100"}],
            "asks":[{"price":"0.46","size":"250"}]
        }"#;
        let msg: StreamMessage = serde_json::from_str(json).unwrap();
        let asks = msg.asks.unwrap();
        assert_eq!(asks[0].price, Some(dec!(0.46)));
        assert_eq!(asks[0].size, Some(dec!(250)));
    }
}
