//! CLOB authentication.
//!
//! Two layers, matching the exchange's scheme:
//!
//! - **L1**: an EIP-712 `ClobAuth` signature over the wallet address proves
//!   key ownership; used once to derive (or create) API credentials.
//! - **L2**: every authenticated REST call carries an HMAC-SHA256 signature
//!   of `timestamp + METHOD + path + body` under the API secret.
//!
//! The `ClobAuth` struct has a field literally named `address`, which the
//! `sol!` macro rejects, so the struct hash is assembled by hand.

use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

/// Polygon mainnet.
pub const CHAIN_ID: u64 = 137;

/// Attestation message fixed by the exchange.
const AUTH_MESSAGE: &str = "This message attests that I control the given wallet";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("invalid API secret: {0}")]
    BadSecret(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("credential derivation rejected: {0}")]
    Rejected(String),
}

/// Derived API credentials for L2 calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCreds {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

/// L1 EIP-712 auth payload builder.
pub struct ClobAuth;

impl ClobAuth {
    /// EIP-712 signing hash for the `ClobAuth` struct.
    ///
    /// Domain: `ClobAuthDomain` v1 on the configured chain (no verifying
    /// contract). Struct: `(address, timestamp, nonce, message)`.
    pub fn signing_hash(address: Address, timestamp: &str, nonce: u64) -> B256 {
        let domain_typehash =
            keccak256(b"EIP712Domain(string name,string version,uint256 chainId)");
        let domain_hash = hash_words(&[
            domain_typehash,
            keccak256(b"ClobAuthDomain"),
            keccak256(b"1"),
            u256_word(U256::from(CHAIN_ID)),
        ]);

        let struct_typehash = keccak256(
            b"ClobAuth(address address,string timestamp,uint256 nonce,string message)",
        );
        let struct_hash = hash_words(&[
            struct_typehash,
            address_word(address),
            keccak256(timestamp.as_bytes()),
            u256_word(U256::from(nonce)),
            keccak256(AUTH_MESSAGE.as_bytes()),
        ]);

        eip712_digest(domain_hash, struct_hash)
    }

    /// Produce the `0x`-prefixed L1 signature for the headers.
    pub fn sign(
        signer: &PrivateKeySigner,
        timestamp: &str,
        nonce: u64,
    ) -> Result<String, AuthError> {
        let hash = Self::signing_hash(signer.address(), timestamp, nonce);
        let sig = signer
            .sign_hash_sync(&hash)
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        Ok(format!("0x{}", hex::encode(sig.as_bytes())))
    }
}

/// L2 request headers.
#[derive(Debug, Clone)]
pub struct L2Headers {
    pub poly_address: String,
    pub poly_signature: String,
    pub poly_timestamp: String,
    pub poly_api_key: String,
    pub poly_passphrase: String,
}

impl L2Headers {
    /// Build the header set for one request.
    ///
    /// `body` must be exactly the serialized request body (empty for GET).
    pub fn build(
        address: Address,
        creds: &ApiCreds,
        timestamp_secs: i64,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<Self, AuthError> {
        let message = format!(
            "{}{}{}{}",
            timestamp_secs,
            method.to_uppercase(),
            path,
            body
        );
        let secret_bytes = URL_SAFE
            .decode(&creds.secret)
            .map_err(|e| AuthError::BadSecret(e.to_string()))?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&secret_bytes)
            .map_err(|e| AuthError::BadSecret(e.to_string()))?;
        mac.update(message.as_bytes());
        let signature = URL_SAFE.encode(mac.finalize().into_bytes());

        Ok(Self {
            poly_address: format!("{:#x}", address),
            poly_signature: signature,
            poly_timestamp: timestamp_secs.to_string(),
            poly_api_key: creds.api_key.clone(),
            poly_passphrase: creds.passphrase.clone(),
        })
    }

    /// Apply the headers to a request builder.
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("POLY_ADDRESS", &self.poly_address)
            .header("POLY_SIGNATURE", &self.poly_signature)
            .header("POLY_TIMESTAMP", &self.poly_timestamp)
            .header("POLY_API_KEY", &self.poly_api_key)
            .header("POLY_PASSPHRASE", &self.poly_passphrase)
    }
}

// ============================================================================
// EIP-712 word plumbing
// ============================================================================

/// keccak of concatenated 32-byte words (hand-rolled `abi.encode` for
/// word-aligned fields).
pub(crate) fn hash_words(words: &[B256]) -> B256 {
    let mut buf = Vec::with_capacity(words.len() * 32);
    for w in words {
        buf.extend_from_slice(w.as_slice());
    }
    keccak256(&buf)
}

/// Address left-padded to a 32-byte word.
pub(crate) fn address_word(address: Address) -> B256 {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    B256::from(word)
}

/// U256 as a 32-byte big-endian word.
pub(crate) fn u256_word(value: U256) -> B256 {
    B256::from(value.to_be_bytes::<32>())
}

/// `keccak256(0x1901 || domain || struct)`.
pub(crate) fn eip712_digest(domain_hash: B256, struct_hash: B256) -> B256 {
    let mut buf = Vec::with_capacity(66);
    buf.extend_from_slice(&[0x19, 0x01]);
    buf.extend_from_slice(domain_hash.as_slice());
    buf.extend_from_slice(struct_hash.as_slice());
    keccak256(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn test_signer() -> PrivateKeySigner {
        // Throwaway key, never funded.
        PrivateKeySigner::from_str(
            "0x0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap()
    }

    #[test]
    fn test_auth_hash_is_deterministic() {
        let addr = test_signer().address();
        let a = ClobAuth::signing_hash(addr, "1700000000", 0);
        let b = ClobAuth::signing_hash(addr, "1700000000", 0);
        assert_eq!(a, b);
        // Different timestamp, different hash.
        let c = ClobAuth::signing_hash(addr, "1700000001", 0);
        assert_ne!(a, c);
    }

    #[test]
    fn test_auth_signature_format() {
        let signer = test_signer();
        let sig = ClobAuth::sign(&signer, "1700000000", 0).unwrap();
        assert!(sig.starts_with("0x"));
        // 65 bytes hex-encoded.
        assert_eq!(sig.len(), 2 + 130);
    }

    #[test]
    fn test_l2_signature_covers_body() {
        let creds = ApiCreds {
            api_key: "key".to_string(),
            secret: URL_SAFE.encode(b"super-secret"),
            passphrase: "pass".to_string(),
        };
        let addr = test_signer().address();

        let a = L2Headers::build(addr, &creds, 1_700_000_000, "post", "/order", "{}").unwrap();
        let b =
            L2Headers::build(addr, &creds, 1_700_000_000, "post", "/order", "{\"x\":1}").unwrap();
        assert_ne!(a.poly_signature, b.poly_signature);
        // Method is uppercased into the message.
        let c = L2Headers::build(addr, &creds, 1_700_000_000, "POST", "/order", "{}").unwrap();
        assert_eq!(a.poly_signature, c.poly_signature);
    }

    #[test]
    fn test_l2_rejects_bad_secret() {
        let creds = ApiCreds {
            api_key: "key".to_string(),
            secret: "!!not-base64!!".to_string(),
            passphrase: "pass".to_string(),
        };
        let result = L2Headers::build(test_signer().address(), &creds, 0, "GET", "/", "");
        assert!(matches!(result, Err(AuthError::BadSecret(_))));
    }

    #[test]
    fn test_word_helpers() {
        let addr = Address::from_str("0x00000000000000000000000000000000000000ff").unwrap();
        let word = address_word(addr);
        assert_eq!(word.as_slice()[31], 0xff);
        assert!(word.as_slice()[..12].iter().all(|&b| b == 0));

        let word = u256_word(U256::from(256u64));
        assert_eq!(word.as_slice()[30], 1);
        assert_eq!(word.as_slice()[31], 0);
    }
}
