//! Raw CLOB REST surface: authentication and order submission.

pub mod auth;
pub mod clob;

pub use auth::{ApiCreds, AuthError, ClobAuth, L2Headers};
pub use clob::{
    ClobClient, ClobClientConfig, ClobError, OrderResponse, OrderSigner, OrderType, SignedOrder,
};
