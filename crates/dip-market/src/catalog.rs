//! Market catalog: slug construction and token resolution via the Gamma API.
//!
//! Given `(asset, window_offset)` the catalog produces a `MarketTokens`
//! record. Lookup goes by exact slug first; if the exchange has not listed
//! the window under the expected slug yet, a contains-search fallback picks
//! the lexicographically greatest matching slug.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};

use dip_common::{CryptoAsset, MarketTokens, OutcomeSide, Timeframe};

use crate::clock::{self, SlugFragments};
use crate::types::GammaMarket;

/// Gamma API base URL.
const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";

/// Errors that can occur during catalog lookups.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no active market for slug {slug}")]
    MarketNotFound { slug: String },

    #[error("invalid market data: {0}")]
    InvalidData(String),
}

/// Configuration for the catalog.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Gamma API base URL.
    pub endpoint: String,
    /// Assets to resolve windows for.
    pub assets: Vec<CryptoAsset>,
    /// Timeframe the bot trades.
    pub timeframe: Timeframe,
    /// Highest window offset to resolve (0 = current only).
    pub max_offset: u8,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: GAMMA_API_URL.to_string(),
            assets: vec![CryptoAsset::Btc, CryptoAsset::Eth],
            timeframe: Timeframe::FifteenMin,
            max_offset: 1,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Build the exchange slug for a window. Formats are bit-exact:
///
/// - 15-minute: `{symbol}-updown-15m-{unix_seconds}`
/// - hourly/4h: `{full_name}-up-or-down-{month}-{day}-{hour12}{am|pm}-et`
/// - daily:     `{full_name}-up-or-down-{month}-{day}-et`
pub fn slug_for(asset: CryptoAsset, timeframe: Timeframe, period_ts: i64) -> String {
    match timeframe {
        Timeframe::FifteenMin => {
            format!("{}-updown-15m-{}", asset.slug_symbol(), period_ts)
        }
        Timeframe::OneHour | Timeframe::FourHour => {
            let f = SlugFragments::for_period(period_ts, timeframe);
            format!(
                "{}-up-or-down-{}-{}-{}{}-et",
                asset.full_name(),
                f.month_name,
                f.day,
                f.hour12,
                f.am_pm
            )
        }
        Timeframe::Daily => {
            let f = SlugFragments::for_period(period_ts, timeframe);
            format!(
                "{}-up-or-down-{}-{}-et",
                asset.full_name(),
                f.month_name,
                f.day
            )
        }
    }
}

/// Prefix used by the contains-search fallback.
fn slug_prefix(asset: CryptoAsset, timeframe: Timeframe) -> String {
    match timeframe {
        Timeframe::FifteenMin => format!("{}-updown-15m-", asset.slug_symbol()),
        _ => format!("{}-up-or-down-", asset.full_name()),
    }
}

/// From a fallback result set, pick the lexicographically greatest slug that
/// actually matches the prefix.
fn pick_latest_slug(markets: Vec<GammaMarket>, prefix: &str) -> Option<GammaMarket> {
    markets
        .into_iter()
        .filter(|m| {
            m.slug
                .as_deref()
                .map(|s| s.starts_with(prefix))
                .unwrap_or(false)
        })
        .max_by(|a, b| a.slug.cmp(&b.slug))
}

/// Extract the UP and DOWN token ids from a Gamma market by case-insensitive
/// outcome match. `Yes` maps to UP, `No` to DOWN.
fn identify_tokens(market: &GammaMarket) -> Result<(String, String), CatalogError> {
    let tokens = market
        .clob_token_ids
        .as_ref()
        .ok_or_else(|| CatalogError::InvalidData("missing clobTokenIds".to_string()))?;
    if tokens.len() != 2 {
        return Err(CatalogError::InvalidData(format!(
            "expected 2 token ids, got {}",
            tokens.len()
        )));
    }

    let outcomes = market
        .outcomes
        .clone()
        .unwrap_or_else(|| vec!["Up".to_string(), "Down".to_string()]);

    let up_idx = outcomes
        .iter()
        .position(|o| {
            let o = o.to_lowercase();
            o == "up" || o == "yes"
        })
        .unwrap_or(0);
    let down_idx = outcomes
        .iter()
        .position(|o| {
            let o = o.to_lowercase();
            o == "down" || o == "no"
        })
        .unwrap_or(1);

    Ok((
        tokens
            .get(up_idx)
            .cloned()
            .ok_or_else(|| CatalogError::InvalidData("up token index out of range".into()))?,
        tokens
            .get(down_idx)
            .cloned()
            .ok_or_else(|| CatalogError::InvalidData("down token index out of range".into()))?,
    ))
}

/// Which outcome won, from resolution prices: a side wins iff its price
/// exceeds 0.9. Returns `None` while prices are ambiguous.
pub fn winning_side(market: &GammaMarket) -> Option<OutcomeSide> {
    use rust_decimal_macros::dec;
    let prices = market.outcome_prices_decimal()?;
    if prices.len() < 2 {
        return None;
    }
    let outcomes = market
        .outcomes
        .clone()
        .unwrap_or_else(|| vec!["Up".to_string(), "Down".to_string()]);
    let up_idx = outcomes
        .iter()
        .position(|o| {
            let o = o.to_lowercase();
            o == "up" || o == "yes"
        })
        .unwrap_or(0);
    let down_idx = if up_idx == 0 { 1 } else { 0 };

    if prices[up_idx] > dec!(0.9) {
        Some(OutcomeSide::Up)
    } else if prices[down_idx] > dec!(0.9) {
        Some(OutcomeSide::Down)
    } else {
        None
    }
}

/// Market catalog client.
///
/// Holds the current `MarketTokens` record per `(asset, offset)`. Records
/// are replaced wholesale by the rotation task; readers clone on access.
pub struct MarketCatalog {
    http: Client,
    config: CatalogConfig,
    tokens: RwLock<HashMap<(CryptoAsset, u8), MarketTokens>>,
}

impl MarketCatalog {
    pub fn new(config: CatalogConfig) -> Self {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            config,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Resolve the market for `(asset, offset)` anchored at `now`.
    pub async fn lookup(
        &self,
        asset: CryptoAsset,
        offset: u8,
        now: DateTime<Utc>,
    ) -> Result<MarketTokens, CatalogError> {
        let timeframe = self.config.timeframe;
        let period_ts = clock::period_start(now, timeframe, offset);
        let slug = slug_for(asset, timeframe, period_ts);

        let market = match self.fetch_by_slug(&slug).await? {
            Some(m) => m,
            None => {
                debug!(slug = %slug, "exact slug miss, trying contains fallback");
                let prefix = slug_prefix(asset, timeframe);
                let candidates = self.fetch_by_slug_contains(&prefix).await?;
                pick_latest_slug(candidates, &prefix)
                    .ok_or(CatalogError::MarketNotFound { slug: slug.clone() })?
            }
        };

        let (token_id_up, token_id_down) = identify_tokens(&market)?;

        Ok(MarketTokens {
            asset,
            timeframe,
            window_offset: offset,
            window_label: market.slug.unwrap_or(slug),
            period_ts,
            token_id_up,
            token_id_down,
            condition_id: market.condition_id.unwrap_or_default(),
            question: market.question.unwrap_or_default(),
        })
    }

    /// Resolve every configured `(asset, offset)` pair and install the
    /// results. Offsets the exchange has not listed yet are recorded as
    /// absent and logged; they are retried on the next cycle.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Vec<MarketTokens> {
        let mut resolved = Vec::new();
        for &asset in &self.config.assets {
            for offset in 0..=self.config.max_offset {
                match self.lookup(asset, offset, now).await {
                    Ok(tokens) => {
                        info!(
                            asset = %asset,
                            offset,
                            slug = %tokens.window_label,
                            "resolved market window"
                        );
                        resolved.push(tokens);
                    }
                    Err(CatalogError::MarketNotFound { slug }) => {
                        debug!(asset = %asset, offset, slug = %slug, "window not listed yet");
                    }
                    Err(e) => {
                        warn!(asset = %asset, offset, error = %e, "catalog lookup failed");
                    }
                }
            }
        }

        let mut map = self.tokens.write().expect("catalog lock poisoned");
        map.clear();
        for tokens in &resolved {
            map.insert((tokens.asset, tokens.window_offset), tokens.clone());
        }
        resolved
    }

    /// Current record for `(asset, offset)`, if resolved.
    pub fn get(&self, asset: CryptoAsset, offset: u8) -> Option<MarketTokens> {
        self.tokens
            .read()
            .expect("catalog lock poisoned")
            .get(&(asset, offset))
            .cloned()
    }

    /// All current records.
    pub fn all(&self) -> Vec<MarketTokens> {
        self.tokens
            .read()
            .expect("catalog lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Fetch one market by exact slug. Used by lookups and by the
    /// resolution tracker.
    pub async fn fetch_by_slug(&self, slug: &str) -> Result<Option<GammaMarket>, CatalogError> {
        let url = format!("{}/markets", self.config.endpoint);
        let response = self
            .http
            .get(&url)
            .query(&[("slug", slug), ("active", "true")])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(CatalogError::InvalidData(format!(
                "gamma returned status {}",
                response.status()
            )));
        }

        let markets: Vec<GammaMarket> = response.json().await?;
        Ok(markets.into_iter().next())
    }

    /// Fetch one market by exact slug without the `active` filter; resolved
    /// markets are no longer active.
    pub async fn fetch_resolved_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<GammaMarket>, CatalogError> {
        let url = format!("{}/markets", self.config.endpoint);
        let response = self.http.get(&url).query(&[("slug", slug)]).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(CatalogError::InvalidData(format!(
                "gamma returned status {}",
                response.status()
            )));
        }

        let markets: Vec<GammaMarket> = response.json().await?;
        Ok(markets.into_iter().next())
    }

    async fn fetch_by_slug_contains(
        &self,
        fragment: &str,
    ) -> Result<Vec<GammaMarket>, CatalogError> {
        let url = format!("{}/markets", self.config.endpoint);
        let response = self
            .http
            .get(&url)
            .query(&[("slug_contains", fragment), ("active", "true")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }
        Ok(response.json().await?)
    }
}
