//! Live leg submission via the CLOB REST client.
//!
//! Each submission consults the pre-sign cache first; a hit posts the
//! cached blob and skips the signing step. Grid misses (odd sizes, prices
//! off the grid) fall back to sign-and-post.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::api::{ClobClient, ClobError};
use crate::presign::{PresignCache, PresignKey};

use super::{LegClient, LegError, LegFill, LegRequest};

pub struct LiveLegClient {
    clob: Arc<ClobClient>,
    presign: Option<Arc<PresignCache>>,
    /// Blobs older than this are unusable even if still cached.
    presign_max_age: Duration,
}

impl LiveLegClient {
    pub fn new(clob: Arc<ClobClient>) -> Self {
        Self {
            clob,
            presign: None,
            presign_max_age: Duration::from_secs(30),
        }
    }

    pub fn with_presign(mut self, cache: Arc<PresignCache>, max_age: Duration) -> Self {
        self.presign = Some(cache);
        self.presign_max_age = max_age;
        self
    }
}

impl From<ClobError> for LegError {
    fn from(err: ClobError) -> Self {
        match err {
            ClobError::Timeout => LegError::Timeout,
            ClobError::Rejected { message, .. } => LegError::Rejected(message),
            other => LegError::Transport(other.to_string()),
        }
    }
}

#[async_trait]
impl LegClient for LiveLegClient {
    async fn submit(&self, request: LegRequest) -> Result<LegFill, LegError> {
        let cached = self.presign.as_ref().and_then(|cache| {
            let key = PresignKey::new(
                request.market,
                request.outcome,
                request.side,
                request.price,
                request.size,
            );
            cache.take(&key, self.presign_max_age)
        });

        let response = match cached {
            Some(order) => {
                debug!(
                    market = %request.market,
                    outcome = %request.outcome,
                    price = %request.price,
                    "posting pre-signed order"
                );
                self.clob.post_order(&order, request.order_type).await?
            }
            None => {
                self.clob
                    .create_and_post_order(
                        &request.token_id,
                        request.price,
                        request.size,
                        request.side,
                        request.order_type,
                        0,
                    )
                    .await?
            }
        };

        // A successful HTTP response is a successful leg; the reported fill
        // may be smaller than requested.
        Ok(LegFill {
            order_id: response.order_id,
            filled_size: response.filled_amount.unwrap_or(request.size),
            avg_price: response.avg_price.unwrap_or(request.price),
        })
    }
}
