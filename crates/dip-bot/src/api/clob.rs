//! CLOB order signing and submission.
//!
//! Orders are EIP-712 structs signed against the CTF Exchange contract and
//! POSTed to `/order` with L2 headers. The signing step costs 200-400 ms on
//! the wire-to-wire path, which is why the pre-signer caches `SignedOrder`
//! blobs ahead of need; `post_order` takes either a fresh or a cached blob.

use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use chrono::Utc;
use rand::Rng;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use dip_common::Side;
use dip_market::types::de_opt_decimal;

use super::auth::{
    address_word, eip712_digest, hash_words, u256_word, ApiCreds, AuthError, ClobAuth, L2Headers,
    CHAIN_ID,
};

/// CTF Exchange contract on Polygon.
const CTF_EXCHANGE_ADDRESS: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";

/// Any counterparty may fill.
const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// USDC and CTF shares both use 6 decimals on-chain.
const UNIT_SCALE: Decimal = rust_decimal_macros::dec!(1000000);

/// Errors from the CLOB client.
#[derive(Debug, Error)]
pub enum ClobError {
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid order parameter: {0}")]
    InvalidOrder(String),

    #[error("order rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("order submission timed out")]
    Timeout,

    #[error("not authenticated")]
    NotAuthenticated,
}

/// Exchange order time-in-force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Fill-or-kill: all or nothing.
    Fok,
    /// Fill-and-kill: take what is there, cancel the rest.
    Fak,
    /// Good-till-cancelled resting order.
    Gtc,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Fok => "FOK",
            OrderType::Fak => "FAK",
            OrderType::Gtc => "GTC",
        }
    }
}

/// The signed order payload POSTed to the exchange. Field names and types
/// match the documented wire shape exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedOrder {
    pub salt: u64,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    #[serde(rename = "tokenId")]
    pub token_id: String,
    #[serde(rename = "makerAmount")]
    pub maker_amount: String,
    #[serde(rename = "takerAmount")]
    pub taker_amount: String,
    pub expiration: String,
    pub nonce: String,
    #[serde(rename = "feeRateBps")]
    pub fee_rate_bps: String,
    pub side: String,
    #[serde(rename = "signatureType")]
    pub signature_type: u8,
    pub signature: String,
}

/// Wrapper for POST /order.
#[derive(Debug, Serialize)]
struct PostOrderBody<'a> {
    order: &'a SignedOrder,
    owner: &'a str,
    #[serde(rename = "orderType")]
    order_type: &'static str,
}

/// Response from POST /order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default, rename = "orderID")]
    pub order_id: Option<String>,
    #[serde(default, rename = "transactionHash")]
    pub transaction_hash: Option<String>,
    #[serde(default, rename = "filledAmount", deserialize_with = "de_opt_decimal")]
    pub filled_amount: Option<Decimal>,
    #[serde(default, rename = "avgPrice", deserialize_with = "de_opt_decimal")]
    pub avg_price: Option<Decimal>,
    #[serde(default, rename = "errorMsg")]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Signs EIP-712 orders for the CTF Exchange.
pub struct OrderSigner {
    signer: PrivateKeySigner,
    maker: Address,
    exchange: Address,
}

impl OrderSigner {
    pub fn new(private_key: &str) -> Result<Self, ClobError> {
        let signer = PrivateKeySigner::from_str(private_key)
            .map_err(|e| ClobError::InvalidOrder(format!("invalid private key: {}", e)))?;
        let maker = signer.address();
        let exchange = Address::from_str(CTF_EXCHANGE_ADDRESS)
            .expect("static exchange address parses");
        Ok(Self {
            signer,
            maker,
            exchange,
        })
    }

    pub fn maker_address(&self) -> Address {
        self.maker
    }

    /// Build and sign one order.
    ///
    /// BUY: maker pays `price * size` USDC for `size` shares.
    /// SELL: maker gives `size` shares for `price * size` USDC.
    pub fn sign_order(
        &self,
        token_id: &str,
        price: Decimal,
        size: Decimal,
        side: Side,
        fee_rate_bps: u32,
    ) -> Result<SignedOrder, ClobError> {
        if price <= Decimal::ZERO || price >= Decimal::ONE {
            return Err(ClobError::InvalidOrder(format!(
                "price {} outside (0, 1)",
                price
            )));
        }
        if size <= Decimal::ZERO {
            return Err(ClobError::InvalidOrder(format!("size {} not positive", size)));
        }
        let token = U256::from_str(token_id)
            .map_err(|e| ClobError::InvalidOrder(format!("invalid token id: {}", e)))?;

        let usdc_units = to_units(price * size)?;
        let share_units = to_units(size)?;
        let (maker_amount, taker_amount) = match side {
            Side::Buy => (usdc_units, share_units),
            Side::Sell => (share_units, usdc_units),
        };

        let salt: u64 = rand::thread_rng().gen();
        let side_code: u8 = match side {
            Side::Buy => 0,
            Side::Sell => 1,
        };

        let hash = self.order_hash(
            salt,
            token,
            maker_amount,
            taker_amount,
            fee_rate_bps,
            side_code,
        );
        let sig = self
            .signer
            .sign_hash_sync(&hash)
            .map_err(|e| ClobError::InvalidOrder(format!("signing failed: {}", e)))?;

        Ok(SignedOrder {
            salt,
            maker: format!("{:#x}", self.maker),
            signer: format!("{:#x}", self.maker),
            taker: ZERO_ADDRESS.to_string(),
            token_id: token_id.to_string(),
            maker_amount: maker_amount.to_string(),
            taker_amount: taker_amount.to_string(),
            expiration: "0".to_string(),
            nonce: "0".to_string(),
            fee_rate_bps: fee_rate_bps.to_string(),
            side: side.to_string(),
            signature_type: 0,
            signature: format!("0x{}", hex::encode(sig.as_bytes())),
        })
    }

    fn order_hash(
        &self,
        salt: u64,
        token_id: U256,
        maker_amount: U256,
        taker_amount: U256,
        fee_rate_bps: u32,
        side_code: u8,
    ) -> B256 {
        let domain_typehash = keccak256(
            b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
        );
        let domain_hash = hash_words(&[
            domain_typehash,
            keccak256(b"Polymarket CTF Exchange"),
            keccak256(b"1"),
            u256_word(U256::from(CHAIN_ID)),
            address_word(self.exchange),
        ]);

        let order_typehash = keccak256(
            b"Order(uint256 salt,address maker,address signer,address taker,uint256 tokenId,uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,uint256 feeRateBps,uint8 side,uint8 signatureType)",
        );
        let zero = Address::from_str(ZERO_ADDRESS).expect("static zero address parses");
        let struct_hash = hash_words(&[
            order_typehash,
            u256_word(U256::from(salt)),
            address_word(self.maker),
            address_word(self.maker),
            address_word(zero),
            u256_word(token_id),
            u256_word(maker_amount),
            u256_word(taker_amount),
            u256_word(U256::ZERO),
            u256_word(U256::ZERO),
            u256_word(U256::from(fee_rate_bps)),
            u256_word(U256::from(side_code)),
            u256_word(U256::ZERO),
        ]);

        eip712_digest(domain_hash, struct_hash)
    }
}

/// 6-decimal on-chain units.
fn to_units(value: Decimal) -> Result<U256, ClobError> {
    let scaled = (value * UNIT_SCALE).round();
    let units = scaled
        .to_u128()
        .ok_or_else(|| ClobError::InvalidOrder(format!("amount {} out of range", value)))?;
    Ok(U256::from(units))
}

/// Configuration for the CLOB client.
#[derive(Debug, Clone)]
pub struct ClobClientConfig {
    pub base_url: String,
    pub order_timeout: Duration,
}

impl Default for ClobClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://clob.polymarket.com".to_string(),
            order_timeout: Duration::from_secs(10),
        }
    }
}

/// Authenticated CLOB REST client.
pub struct ClobClient {
    http: Client,
    config: ClobClientConfig,
    signer: OrderSigner,
    creds: Option<ApiCreds>,
}

impl ClobClient {
    pub fn new(config: ClobClientConfig, signer: OrderSigner) -> Self {
        let http = Client::builder()
            .timeout(config.order_timeout)
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            config,
            signer,
            creds: None,
        }
    }

    pub fn with_creds(mut self, creds: ApiCreds) -> Self {
        self.creds = Some(creds);
        self
    }

    pub fn signer(&self) -> &OrderSigner {
        &self.signer
    }

    /// Derive (or create) API credentials via the L1 signature.
    pub async fn authenticate(&mut self) -> Result<(), ClobError> {
        let timestamp = Utc::now().timestamp();
        let nonce = 0u64;
        let signature = ClobAuth::sign(&self.signer.signer, &timestamp.to_string(), nonce)?;
        let address = format!("{:#x}", self.signer.maker);

        let derive = self
            .http
            .get(format!("{}/auth/derive-api-key", self.config.base_url))
            .header("POLY_ADDRESS", &address)
            .header("POLY_SIGNATURE", &signature)
            .header("POLY_TIMESTAMP", timestamp.to_string())
            .header("POLY_NONCE", nonce.to_string())
            .send()
            .await?;

        if derive.status().is_success() {
            let creds: ApiCreds = derive.json().await?;
            info!("derived existing CLOB API credentials");
            self.creds = Some(creds);
            return Ok(());
        }

        debug!(status = %derive.status(), "derive-api-key miss, creating credentials");
        let create = self
            .http
            .post(format!("{}/auth/api-key", self.config.base_url))
            .header("POLY_ADDRESS", &address)
            .header("POLY_SIGNATURE", &signature)
            .header("POLY_TIMESTAMP", timestamp.to_string())
            .header("POLY_NONCE", nonce.to_string())
            .send()
            .await?;

        if !create.status().is_success() {
            return Err(ClobError::Rejected {
                status: create.status().as_u16(),
                message: create.text().await.unwrap_or_default(),
            });
        }
        let creds: ApiCreds = create.json().await?;
        info!("created CLOB API credentials");
        self.creds = Some(creds);
        Ok(())
    }

    /// Sign an order without posting it (the pre-signer's entry point).
    pub fn sign_order(
        &self,
        token_id: &str,
        price: Decimal,
        size: Decimal,
        side: Side,
        fee_rate_bps: u32,
    ) -> Result<SignedOrder, ClobError> {
        self.signer
            .sign_order(token_id, price, size, side, fee_rate_bps)
    }

    /// Sign and post in one step.
    pub async fn create_and_post_order(
        &self,
        token_id: &str,
        price: Decimal,
        size: Decimal,
        side: Side,
        order_type: OrderType,
        fee_rate_bps: u32,
    ) -> Result<OrderResponse, ClobError> {
        let signed = self.sign_order(token_id, price, size, side, fee_rate_bps)?;
        self.post_order(&signed, order_type).await
    }

    /// Post a (possibly pre-signed) order.
    pub async fn post_order(
        &self,
        order: &SignedOrder,
        order_type: OrderType,
    ) -> Result<OrderResponse, ClobError> {
        let creds = self.creds.as_ref().ok_or(ClobError::NotAuthenticated)?;

        let body = PostOrderBody {
            order,
            owner: &creds.api_key,
            order_type: order_type.as_str(),
        };
        let body_json =
            serde_json::to_string(&body).map_err(|e| ClobError::InvalidOrder(e.to_string()))?;

        let timestamp = Utc::now().timestamp();
        let headers = L2Headers::build(
            self.signer.maker,
            creds,
            timestamp,
            "POST",
            "/order",
            &body_json,
        )?;

        let request = self
            .http
            .post(format!("{}/order", self.config.base_url))
            .header("Content-Type", "application/json")
            .body(body_json);
        let response = headers.apply(request).send().await.map_err(|e| {
            if e.is_timeout() {
                ClobError::Timeout
            } else {
                ClobError::Http(e)
            }
        })?;

        let status = response.status();
        let parsed: OrderResponse = response.json().await.unwrap_or_default();

        if !status.is_success() || parsed.success == Some(false) {
            let message = parsed
                .error_msg
                .clone()
                .unwrap_or_else(|| format!("status {}", status));
            warn!(status = %status, message = %message, "order rejected");
            return Err(ClobError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_signer() -> OrderSigner {
        OrderSigner::new("0x0000000000000000000000000000000000000000000000000000000000000001")
            .unwrap()
    }

    #[test]
    fn test_buy_amounts() {
        let signer = test_signer();
        let order = signer
            .sign_order("123456", dec!(0.50), dec!(100), Side::Buy, 0)
            .unwrap();
        // Pay 50 USDC (50_000_000 units) for 100 shares (100_000_000 units).
        assert_eq!(order.maker_amount, "50000000");
        assert_eq!(order.taker_amount, "100000000");
        assert_eq!(order.side, "BUY");
        assert_eq!(order.signature_type, 0);
        assert!(order.signature.starts_with("0x"));
    }

    #[test]
    fn test_sell_amounts_swap() {
        let signer = test_signer();
        let order = signer
            .sign_order("123456", dec!(0.40), dec!(50), Side::Sell, 0)
            .unwrap();
        // Give 50 shares for 20 USDC.
        assert_eq!(order.maker_amount, "50000000");
        assert_eq!(order.taker_amount, "20000000");
        assert_eq!(order.side, "SELL");
    }

    #[test]
    fn test_rejects_bad_price() {
        let signer = test_signer();
        assert!(signer
            .sign_order("1", dec!(0), dec!(10), Side::Buy, 0)
            .is_err());
        assert!(signer
            .sign_order("1", dec!(1.00), dec!(10), Side::Buy, 0)
            .is_err());
        assert!(signer
            .sign_order("1", dec!(0.5), dec!(0), Side::Buy, 0)
            .is_err());
    }

    #[test]
    fn test_rejects_bad_token_id() {
        let signer = test_signer();
        assert!(signer
            .sign_order("not-a-number", dec!(0.5), dec!(10), Side::Buy, 0)
            .is_err());
    }

    #[test]
    fn test_fractional_sizes_round_to_units() {
        let signer = test_signer();
        let order = signer
            .sign_order("7", dec!(0.47), dec!(105.26), Side::Buy, 0)
            .unwrap();
        // 0.47 * 105.26 = 49.4722 USDC.
        assert_eq!(order.maker_amount, "49472200");
        assert_eq!(order.taker_amount, "105260000");
    }

    #[test]
    fn test_salts_vary() {
        let signer = test_signer();
        let a = signer
            .sign_order("7", dec!(0.5), dec!(10), Side::Buy, 0)
            .unwrap();
        let b = signer
            .sign_order("7", dec!(0.5), dec!(10), Side::Buy, 0)
            .unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.signature, b.signature);
    }

    #[test]
    fn test_order_response_decode() {
        let json = r#"{
            "success": true,
            "orderID": "0xabc",
            "transactionHash": "0xdef",
            "filledAmount": "105.26",
            "avgPrice": "0.47",
            "status": "matched"
        }"#;
        let resp: OrderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.order_id.as_deref(), Some("0xabc"));
        assert_eq!(resp.filled_amount, Some(dec!(105.26)));
        assert_eq!(resp.avg_price, Some(dec!(0.47)));
        assert!(resp.error_msg.is_none());
    }

    #[test]
    fn test_order_response_refuses_bare_number_amounts() {
        // Amounts are strings on the wire; a bare number would carry float
        // imprecision and decodes to None.
        let json = r#"{"success": true, "orderID": "0xabc", "avgPrice": 0.47}"#;
        let resp: OrderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.order_id.as_deref(), Some("0xabc"));
        assert_eq!(resp.avg_price, None);
    }

    #[test]
    fn test_post_body_shape() {
        let signer = test_signer();
        let order = signer
            .sign_order("7", dec!(0.5), dec!(10), Side::Buy, 0)
            .unwrap();
        let body = PostOrderBody {
            order: &order,
            owner: "api-key",
            order_type: OrderType::Fak.as_str(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["orderType"], "FAK");
        assert_eq!(json["owner"], "api-key");
        assert_eq!(json["order"]["tokenId"], "7");
        assert_eq!(json["order"]["side"], "BUY");
    }
}
