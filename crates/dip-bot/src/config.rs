//! Configuration for dip-bot.
//!
//! Loads from a TOML file with environment variable overrides for
//! credentials and CLI overrides for mode/assets/timeframe. Bad values are
//! fatal at boot.

use std::path::Path;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

use dip_common::{CryptoAsset, Timeframe};

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Trading mode: live or paper.
    pub mode: TradingMode,

    /// Assets to watch.
    pub assets: Vec<CryptoAsset>,

    /// Window timeframe (drives period length, slug format, fee model).
    pub timeframe: Timeframe,

    /// Logging level.
    pub log_level: String,

    /// SQLite database path.
    pub db_path: String,

    /// Feed the engine from a synthetic book generator instead of the
    /// exchange push channel (paper experiments without network).
    pub simulate_feed: bool,

    /// Trading thresholds and sizing.
    pub trading: TradingConfig,

    /// Execution parameters.
    pub execution: ExecutionConfig,

    /// Pre-signing parameters.
    pub presign: PresignConfig,

    /// Exchange endpoints.
    pub endpoints: EndpointsConfig,

    /// Wallet credentials (env only, never in the config file).
    pub wallet: WalletConfig,
}

/// Trading mode determines the leg client behind the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    /// Real orders against the exchange.
    Live,
    /// Real data, simulated fills.
    Paper,
}

impl TradingMode {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "live" => Some(TradingMode::Live),
            "paper" => Some(TradingMode::Paper),
            _ => None,
        }
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

/// Dip admission thresholds and position sizing.
#[derive(Debug, Clone)]
pub struct TradingConfig {
    /// Dip admission cutoff: trade only while ask_up + ask_down < threshold.
    pub threshold: Decimal,

    /// Executor-side rejection cutoff on the final combined cost.
    pub max_total_cost: Decimal,

    /// Per-trade position cap (USDC).
    pub max_position_usd: Decimal,

    /// Absolute floor below which a trade is not worth the fees (USDC).
    pub min_trade_usd: Decimal,

    /// Concurrent admissions across all markets.
    pub max_open_positions: u32,

    /// Per-market debounce after a successful trade.
    pub cooldown_ms: u64,

    /// Reject when the combined VWAP slippage exceeds this fraction.
    pub max_slippage_pct: Decimal,

    /// Minimum profit percentage after fees and slippage.
    pub min_profit_pct: Decimal,

    /// Minimum absolute profit (USDC).
    pub min_profit_usd: Decimal,

    /// Fraction of the balance risked per trade.
    pub risk_per_trade_fraction: Decimal,

    /// Balance available for sizing (USDC).
    pub available_balance: Decimal,
}

impl Default for TradingConfig {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            threshold: dec!(0.94),
            max_total_cost: dec!(0.94),
            max_position_usd: dec!(100),
            min_trade_usd: dec!(20),
            max_open_positions: 3,
            cooldown_ms: 30_000,
            max_slippage_pct: dec!(0.02),
            min_profit_pct: dec!(0.01),
            min_profit_usd: dec!(0.50),
            risk_per_trade_fraction: dec!(0.10),
            available_balance: dec!(1000),
        }
    }
}

impl TradingConfig {
    /// USDC budget for one trade: the hard cap bounded by the per-trade
    /// risk fraction of the balance.
    pub fn trade_budget_usd(&self) -> Decimal {
        self.max_position_usd
            .min(self.available_balance * self.risk_per_trade_fraction)
            .max(self.min_trade_usd)
    }
}

/// Execution parameters.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Price-protection buffer added to each leg's limit price.
    pub price_buffer: Decimal,

    /// Order submission timeout (milliseconds).
    pub order_timeout_ms: u64,

    /// Simulated fill latency floor for paper trading (milliseconds).
    pub paper_latency_min_ms: u64,

    /// Simulated fill latency ceiling for paper trading (milliseconds).
    pub paper_latency_max_ms: u64,

    /// Paper order failure probability (0.0 to 1.0).
    pub paper_failure_rate: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            price_buffer: dec!(0.02),
            order_timeout_ms: 10_000,
            paper_latency_min_ms: 50,
            paper_latency_max_ms: 150,
            paper_failure_rate: 0.05,
        }
    }
}

/// Pre-signing parameters.
#[derive(Debug, Clone)]
pub struct PresignConfig {
    /// Enable the pre-sign task (live mode only).
    pub enabled: bool,

    /// A market is "hot" when its combined cost is within this margin of
    /// the admission threshold.
    pub hot_margin: Decimal,

    /// Re-sign cache entries older than this (seconds).
    pub refresh_secs: u64,

    /// Evict cache entries older than this (seconds).
    pub evict_secs: u64,

    /// Pre-sign task cadence (milliseconds).
    pub task_interval_ms: u64,
}

impl Default for PresignConfig {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            enabled: true,
            hot_margin: dec!(0.05),
            refresh_secs: 25,
            evict_secs: 30,
            task_interval_ms: 500,
        }
    }
}

/// Exchange endpoints.
#[derive(Debug, Clone)]
pub struct EndpointsConfig {
    pub gamma: String,
    pub clob_rest: String,
    pub clob_ws: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            gamma: "https://gamma-api.polymarket.com".to_string(),
            clob_rest: "https://clob.polymarket.com".to_string(),
            clob_ws: "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string(),
        }
    }
}

/// Wallet credentials for live trading. Loaded from the environment only.
#[derive(Debug, Clone, Default)]
pub struct WalletConfig {
    pub private_key: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub api_passphrase: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::Paper,
            assets: vec![CryptoAsset::Btc, CryptoAsset::Eth],
            timeframe: Timeframe::FifteenMin,
            log_level: "info".to_string(),
            db_path: "data/dip-bot.sqlite".to_string(),
            simulate_feed: false,
            trading: TradingConfig::default(),
            execution: ExecutionConfig::default(),
            presign: PresignConfig::default(),
            endpoints: EndpointsConfig::default(),
            wallet: WalletConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        file.try_into()
    }

    /// Apply environment variable overrides for credentials.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("DIP_PRIVATE_KEY") {
            self.wallet.private_key = Some(key);
        }
        if let Ok(key) = std::env::var("DIP_API_KEY") {
            self.wallet.api_key = Some(key);
        }
        if let Ok(secret) = std::env::var("DIP_API_SECRET") {
            self.wallet.api_secret = Some(secret);
        }
        if let Ok(pass) = std::env::var("DIP_API_PASSPHRASE") {
            self.wallet.api_passphrase = Some(pass);
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_cli_overrides(
        &mut self,
        mode: Option<String>,
        assets: Option<Vec<String>>,
        timeframe: Option<String>,
    ) {
        if let Some(mode_str) = mode {
            if let Some(m) = TradingMode::parse(&mode_str) {
                self.mode = m;
            }
        }
        if let Some(list) = assets {
            let parsed: Vec<CryptoAsset> =
                list.iter().filter_map(|s| s.parse().ok()).collect();
            if !parsed.is_empty() {
                self.assets = parsed;
            }
        }
        if let Some(tf) = timeframe {
            if let Ok(parsed) = tf.parse::<Timeframe>() {
                self.timeframe = parsed;
            }
        }
    }

    /// Validate configuration. Violations are fatal at boot.
    pub fn validate(&self) -> Result<()> {
        use rust_decimal_macros::dec;

        if self.mode == TradingMode::Live && self.wallet.private_key.is_none() {
            bail!("Live mode requires DIP_PRIVATE_KEY environment variable");
        }

        let t = &self.trading;
        if t.threshold < dec!(0.80) || t.threshold > dec!(0.99) {
            bail!("threshold must be within [0.80, 0.99]");
        }
        if t.max_total_cost < dec!(0.80) || t.max_total_cost > dec!(0.99) {
            bail!("max_total_cost must be within [0.80, 0.99]");
        }
        if t.max_position_usd < dec!(10) || t.max_position_usd > dec!(1000) {
            bail!("max_position_usd must be within [10, 1000]");
        }
        if t.max_open_positions == 0 || t.max_open_positions > 10 {
            bail!("max_open_positions must be within [1, 10]");
        }
        if t.min_trade_usd <= Decimal::ZERO || t.min_trade_usd > t.max_position_usd {
            bail!("min_trade_usd must be positive and not exceed max_position_usd");
        }
        if t.max_slippage_pct <= Decimal::ZERO || t.max_slippage_pct >= Decimal::ONE {
            bail!("max_slippage_pct must be a fraction in (0, 1)");
        }
        if t.min_profit_pct < Decimal::ZERO {
            bail!("min_profit_pct must be non-negative");
        }
        if t.risk_per_trade_fraction <= Decimal::ZERO || t.risk_per_trade_fraction > Decimal::ONE
        {
            bail!("risk_per_trade_fraction must be a fraction in (0, 1]");
        }

        if self.execution.paper_latency_min_ms > self.execution.paper_latency_max_ms {
            bail!("paper_latency_min_ms cannot exceed paper_latency_max_ms");
        }
        if !(0.0..=1.0).contains(&self.execution.paper_failure_rate) {
            bail!("paper_failure_rate must be within [0, 1]");
        }
        if self.presign.refresh_secs >= self.presign.evict_secs {
            bail!("presign refresh_secs must be below evict_secs");
        }

        if self.assets.is_empty() {
            bail!("At least one asset must be configured");
        }

        Ok(())
    }
}

// ============================================================================
// TOML deserialization structures
// ============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TomlConfig {
    general: GeneralToml,
    trading: TradingToml,
    execution: ExecutionToml,
    presign: PresignToml,
    endpoints: EndpointsToml,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralToml {
    mode: String,
    assets: Vec<String>,
    timeframe: String,
    log_level: String,
    db_path: String,
    simulate_feed: bool,
}

impl Default for GeneralToml {
    fn default() -> Self {
        Self {
            mode: "paper".to_string(),
            assets: vec!["BTC".to_string(), "ETH".to_string()],
            timeframe: "15m".to_string(),
            log_level: "info".to_string(),
            db_path: "data/dip-bot.sqlite".to_string(),
            simulate_feed: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct TradingToml {
    threshold: f64,
    max_total_cost: f64,
    max_position_usd: f64,
    min_trade_usd: f64,
    max_open_positions: u32,
    cooldown_ms: u64,
    max_slippage_pct: f64,
    min_profit_pct: f64,
    min_profit_usd: f64,
    risk_per_trade_fraction: f64,
    available_balance: f64,
}

impl Default for TradingToml {
    fn default() -> Self {
        Self {
            threshold: 0.94,
            max_total_cost: 0.94,
            max_position_usd: 100.0,
            min_trade_usd: 20.0,
            max_open_positions: 3,
            cooldown_ms: 30_000,
            max_slippage_pct: 0.02,
            min_profit_pct: 0.01,
            min_profit_usd: 0.50,
            risk_per_trade_fraction: 0.10,
            available_balance: 1000.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ExecutionToml {
    price_buffer: f64,
    order_timeout_ms: u64,
    paper_latency_min_ms: u64,
    paper_latency_max_ms: u64,
    paper_failure_rate: f64,
}

impl Default for ExecutionToml {
    fn default() -> Self {
        Self {
            price_buffer: 0.02,
            order_timeout_ms: 10_000,
            paper_latency_min_ms: 50,
            paper_latency_max_ms: 150,
            paper_failure_rate: 0.05,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct PresignToml {
    enabled: bool,
    hot_margin: f64,
    refresh_secs: u64,
    evict_secs: u64,
    task_interval_ms: u64,
}

impl Default for PresignToml {
    fn default() -> Self {
        Self {
            enabled: true,
            hot_margin: 0.05,
            refresh_secs: 25,
            evict_secs: 30,
            task_interval_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct EndpointsToml {
    gamma: String,
    clob_rest: String,
    clob_ws: String,
}

impl Default for EndpointsToml {
    fn default() -> Self {
        let defaults = EndpointsConfig::default();
        Self {
            gamma: defaults.gamma,
            clob_rest: defaults.clob_rest,
            clob_ws: defaults.clob_ws,
        }
    }
}

/// Convert f64 config values to Decimal. Lossy inputs fail loudly later in
/// `validate()` by landing outside their range.
fn f64_to_decimal(val: f64) -> Decimal {
    Decimal::try_from(val).unwrap_or(Decimal::ZERO)
}

impl TryFrom<TomlConfig> for BotConfig {
    type Error = anyhow::Error;

    fn try_from(toml: TomlConfig) -> Result<Self> {
        let assets: Vec<CryptoAsset> = toml
            .general
            .assets
            .iter()
            .map(|s| s.parse().map_err(|e: String| anyhow::anyhow!(e)))
            .collect::<Result<_>>()?;

        let timeframe: Timeframe = toml
            .general
            .timeframe
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        Ok(Self {
            mode: TradingMode::parse(&toml.general.mode).unwrap_or(TradingMode::Paper),
            assets,
            timeframe,
            log_level: toml.general.log_level,
            db_path: toml.general.db_path,
            simulate_feed: toml.general.simulate_feed,
            trading: TradingConfig {
                threshold: f64_to_decimal(toml.trading.threshold),
                max_total_cost: f64_to_decimal(toml.trading.max_total_cost),
                max_position_usd: f64_to_decimal(toml.trading.max_position_usd),
                min_trade_usd: f64_to_decimal(toml.trading.min_trade_usd),
                max_open_positions: toml.trading.max_open_positions,
                cooldown_ms: toml.trading.cooldown_ms,
                max_slippage_pct: f64_to_decimal(toml.trading.max_slippage_pct),
                min_profit_pct: f64_to_decimal(toml.trading.min_profit_pct),
                min_profit_usd: f64_to_decimal(toml.trading.min_profit_usd),
                risk_per_trade_fraction: f64_to_decimal(toml.trading.risk_per_trade_fraction),
                available_balance: f64_to_decimal(toml.trading.available_balance),
            },
            execution: ExecutionConfig {
                price_buffer: f64_to_decimal(toml.execution.price_buffer),
                order_timeout_ms: toml.execution.order_timeout_ms,
                paper_latency_min_ms: toml.execution.paper_latency_min_ms,
                paper_latency_max_ms: toml.execution.paper_latency_max_ms,
                paper_failure_rate: toml.execution.paper_failure_rate,
            },
            presign: PresignConfig {
                enabled: toml.presign.enabled,
                hot_margin: f64_to_decimal(toml.presign.hot_margin),
                refresh_secs: toml.presign.refresh_secs,
                evict_secs: toml.presign.evict_secs,
                task_interval_ms: toml.presign.task_interval_ms,
            },
            endpoints: EndpointsConfig {
                gamma: toml.endpoints.gamma,
                clob_rest: toml.endpoints.clob_rest,
                clob_ws: toml.endpoints.clob_ws,
            },
            wallet: WalletConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_validates() {
        let config = BotConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mode, TradingMode::Paper);
        assert_eq!(config.timeframe, Timeframe::FifteenMin);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [general]
            mode = "paper"
            assets = ["BTC", "SOL"]
            timeframe = "1h"
            log_level = "debug"

            [trading]
            threshold = 0.97
            max_position_usd = 250.0
            cooldown_ms = 15000

            [execution]
            order_timeout_ms = 8000
        "#;

        let config = BotConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.mode, TradingMode::Paper);
        assert_eq!(config.assets, vec![CryptoAsset::Btc, CryptoAsset::Sol]);
        assert_eq!(config.timeframe, Timeframe::OneHour);
        assert_eq!(config.trading.threshold, dec!(0.97));
        assert_eq!(config.trading.max_position_usd, dec!(250));
        assert_eq!(config.trading.cooldown_ms, 15_000);
        assert_eq!(config.execution.order_timeout_ms, 8_000);
    }

    #[test]
    fn test_unknown_asset_rejected() {
        let toml = r#"
            [general]
            assets = ["DOGE"]
        "#;
        assert!(BotConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_validate_live_requires_key() {
        let mut config = BotConfig::default();
        config.mode = TradingMode::Live;
        assert!(config.validate().is_err());

        config.wallet.private_key = Some("0xabc".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_threshold_range() {
        let mut config = BotConfig::default();
        config.trading.threshold = dec!(0.75);
        assert!(config.validate().is_err());
        config.trading.threshold = dec!(1.0);
        assert!(config.validate().is_err());
        config.trading.threshold = dec!(0.94);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_position_range() {
        let mut config = BotConfig::default();
        config.trading.max_position_usd = dec!(5);
        assert!(config.validate().is_err());
        config.trading.max_position_usd = dec!(2000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_open_positions_range() {
        let mut config = BotConfig::default();
        config.trading.max_open_positions = 0;
        assert!(config.validate().is_err());
        config.trading.max_open_positions = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_presign_ordering() {
        let mut config = BotConfig::default();
        config.presign.refresh_secs = 30;
        config.presign.evict_secs = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = BotConfig::default();
        config.apply_cli_overrides(
            Some("live".to_string()),
            Some(vec!["XRP".to_string()]),
            Some("daily".to_string()),
        );
        assert_eq!(config.mode, TradingMode::Live);
        assert_eq!(config.assets, vec![CryptoAsset::Xrp]);
        assert_eq!(config.timeframe, Timeframe::Daily);
    }

    #[test]
    fn test_trade_budget_capped_by_risk_fraction() {
        let mut config = TradingConfig::default();
        config.available_balance = dec!(500);
        config.risk_per_trade_fraction = dec!(0.10);
        config.max_position_usd = dec!(100);
        // 500 * 0.10 = 50 < 100 cap
        assert_eq!(config.trade_budget_usd(), dec!(50));

        config.available_balance = dec!(5000);
        // 5000 * 0.10 = 500, capped at 100
        assert_eq!(config.trade_budget_usd(), dec!(100));
    }
}
