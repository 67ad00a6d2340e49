//! Synthetic book feed for paper experiments without network access.
//!
//! Generates plausible UP/DOWN ask ladders that random-walk around fair
//! value and occasionally dip below $1 combined, exercising the whole
//! detection and (paper) execution pipeline.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use dip_common::PriceLevel;
use dip_market::{BookUpdate, StreamEvent, TokenIndex};

/// Tick cadence of the generator.
const SIM_TICK: Duration = Duration::from_millis(200);

/// Probability per tick that a market dips below the arbitrage line.
const DIP_PROBABILITY: f64 = 0.03;

/// Drive the engine's event channel with synthetic snapshots for every
/// token the index currently knows.
pub async fn run_simulated_feed(
    index: Arc<TokenIndex>,
    events: mpsc::Sender<StreamEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut rng = StdRng::from_entropy();
    let mut tick = tokio::time::interval(SIM_TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!("simulated feed running");
    let _ = events.send(StreamEvent::Connected { token_count: 0 }).await;

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.recv() => {
                debug!("simulated feed: shutdown");
                return;
            }
        }

        for token_id in index.token_ids() {
            let Some(route) = index.route(&token_id) else {
                continue;
            };
            // Half-fair value plus noise; a rare dip prices both sides low
            // enough that the pair sums below one.
            let dip = rng.gen_bool(DIP_PROBABILITY);
            let base = if dip {
                rng.gen_range(0.42..0.46)
            } else {
                rng.gen_range(0.49..0.53)
            };
            let best = Decimal::try_from(base).unwrap_or_default().round_dp(2);
            let tick_up = |p: Decimal, n: i64| p + Decimal::new(n, 2);

            let asks = vec![
                PriceLevel::new(best, Decimal::from(rng.gen_range(50..400))),
                PriceLevel::new(tick_up(best, 1), Decimal::from(rng.gen_range(100..600))),
                PriceLevel::new(tick_up(best, 2), Decimal::from(rng.gen_range(100..600))),
            ];
            let bids = vec![PriceLevel::new(
                tick_up(best, -1).max(Decimal::new(1, 2)),
                Decimal::from(rng.gen_range(50..400)),
            )];

            let event = StreamEvent::Update {
                route,
                update: BookUpdate::Snapshot { bids, asks },
                exchange_ts: None,
            };
            if events.send(event).await.is_err() {
                return;
            }
        }
    }
}
