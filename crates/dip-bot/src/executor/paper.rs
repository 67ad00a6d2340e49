//! Paper-mode fill simulator.
//!
//! Simulates exchange behaviour on real market data: fills land with up to
//! 1% adverse slippage, 50-150 ms of latency, and a 5% outright failure
//! rate. Paper fills flow through the same position pipeline as live ones.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;
use uuid::Uuid;

use dip_common::Side;

use crate::config::ExecutionConfig;

use super::{LegClient, LegError, LegFill, LegRequest};

pub struct PaperLegClient {
    latency_min_ms: u64,
    latency_max_ms: u64,
    failure_rate: f64,
    rng: Mutex<StdRng>,
}

impl PaperLegClient {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            latency_min_ms: config.paper_latency_min_ms,
            latency_max_ms: config.paper_latency_max_ms,
            failure_rate: config.paper_failure_rate,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Seeded variant for reproducible tests.
    pub fn with_seed(config: &ExecutionConfig, seed: u64) -> Self {
        Self {
            latency_min_ms: config.paper_latency_min_ms,
            latency_max_ms: config.paper_latency_max_ms,
            failure_rate: config.paper_failure_rate,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn sample(&self) -> (u64, f64, bool) {
        let mut rng = self.rng.lock().expect("paper rng poisoned");
        let delay = if self.latency_max_ms > self.latency_min_ms {
            rng.gen_range(self.latency_min_ms..=self.latency_max_ms)
        } else {
            self.latency_min_ms
        };
        let slip: f64 = rng.gen_range(0.0..0.01);
        let fails = rng.gen_bool(self.failure_rate.clamp(0.0, 1.0));
        (delay, slip, fails)
    }
}

#[async_trait]
impl LegClient for PaperLegClient {
    async fn submit(&self, request: LegRequest) -> Result<LegFill, LegError> {
        let (delay_ms, slip, fails) = self.sample();
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        if fails {
            debug!(market = %request.market, outcome = %request.outcome, "paper leg failed");
            return Err(LegError::Rejected("simulated rejection".to_string()));
        }

        // Slippage is always adverse: buys fill higher, sells fill lower.
        let slip = Decimal::try_from(slip).unwrap_or(Decimal::ZERO);
        let fill_price = match request.side {
            Side::Buy => (request.price * (Decimal::ONE + slip)).min(dec!(0.99)),
            Side::Sell => (request.price * (Decimal::ONE - slip)).max(dec!(0.01)),
        };

        Ok(LegFill {
            order_id: Some(format!("paper-{}", Uuid::new_v4())),
            filled_size: request.size,
            avg_price: fill_price.round_dp(4),
        })
    }
}
