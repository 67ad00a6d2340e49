//! The engine: one logical event loop tying the subsystems together.
//!
//! The stream (or the simulator) feeds a single-consumer channel. The
//! consumer owns every orderbook, applies each update, and runs detection
//! inline: no awaits between the book write and the detect call, so
//! detection always sees monotonically ordered state. Admitted
//! opportunities spawn execution tasks; admission slots serialise them per
//! market and per symbol.
//!
//! Rotation runs on its own task as the sole writer of catalog records and
//! the token index: prefetch two minutes before the boundary, swap at the
//! boundary, cycle the push connection, then tell the loop to prune
//! rotated-out state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use dip_common::{MarketTokens, WindowKey};
use dip_market::{
    ms_until_next_boundary, MarketCatalog, Orderbook, StreamClient, StreamCommand, StreamConfig,
    StreamEvent, TokenIndex,
};

use crate::config::BotConfig;
use crate::executor::{ExecutionResult, TradeExecutor};
use crate::presign::{HotMarket, PresignCache, Presigner};
use crate::resolution::ResolutionTracker;
use crate::sim;
use crate::state::{CooldownTracker, Metrics, PendingAdmissions};
use crate::store::{PositionStore, SnapshotRecord};
use crate::strategy::{Detection, Detector, DipEvent, DipOpportunity};

/// Prefetch lead before the window boundary.
const ROTATION_PREFETCH_LEAD: Duration = Duration::from_secs(120);

/// Cadence of the hot-market publication and metrics logging.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(10);

/// Update channel depth; the feed is bursty around boundaries.
const EVENT_CHANNEL_CAPACITY: usize = 8_192;

/// Message from the rotation task to the engine loop.
enum EngineControl {
    /// Catalog and index were swapped; prune state for dead windows.
    Rotated { live: Vec<MarketTokens> },
}

/// Everything the engine needs, prewired by `main`.
pub struct Engine {
    pub config: BotConfig,
    pub catalog: Arc<MarketCatalog>,
    pub index: Arc<TokenIndex>,
    pub store: Arc<PositionStore>,
    pub executor: Arc<TradeExecutor>,
    pub presign_cache: Option<Arc<PresignCache>>,
    pub presigner: Option<Presigner>,
    pub resolution: Option<ResolutionTracker>,
    pub detector: Detector,
    pub admissions: Arc<PendingAdmissions>,
    pub cooldowns: Arc<CooldownTracker>,
    pub metrics: Arc<Metrics>,
}

impl Engine {
    /// Run to shutdown.
    pub async fn run(mut self, shutdown: broadcast::Sender<()>) -> Result<()> {
        // Initial catalog fill. An empty result is survivable; rotation
        // retries every cycle.
        let records = self.catalog.refresh(Utc::now()).await;
        if records.is_empty() {
            warn!("no market windows resolved at boot; will retry at rotation");
        }
        self.index.rebuild(&records);
        let mut tokens_by_key: HashMap<WindowKey, MarketTokens> = records
            .iter()
            .map(|r| (r.window_key(), r.clone()))
            .collect();

        let (event_tx, mut event_rx) = mpsc::channel::<StreamEvent>(EVENT_CHANNEL_CAPACITY);
        let (stream_cmd_tx, stream_cmd_rx) = mpsc::channel::<StreamCommand>(4);
        let (control_tx, mut control_rx) = mpsc::channel::<EngineControl>(4);
        let (hot_tx, hot_rx) = watch::channel(Vec::<HotMarket>::new());

        let mut background = JoinSet::new();

        // Feed: live push connection or the simulator.
        if self.config.simulate_feed {
            let index = self.index.clone();
            let rx = shutdown.subscribe();
            background.spawn(async move {
                sim::run_simulated_feed(index, event_tx, rx).await;
            });
        } else {
            let stream = StreamClient::new(
                StreamConfig {
                    ws_url: self.config.endpoints.clob_ws.clone(),
                    ..StreamConfig::default()
                },
                self.index.clone(),
                event_tx,
            );
            let rx = shutdown.subscribe();
            background.spawn(async move {
                if let Err(e) = stream.run(stream_cmd_rx, rx).await {
                    error!(error = %e, "stream client exited");
                }
            });
        }

        // Rotation task: sole writer of catalog records and token index.
        {
            let catalog = self.catalog.clone();
            let index = self.index.clone();
            let timeframe = self.config.timeframe;
            let cmd_tx = stream_cmd_tx.clone();
            let control = control_tx.clone();
            let mut rx = shutdown.subscribe();
            background.spawn(async move {
                run_rotation(catalog, index, timeframe, cmd_tx, control, &mut rx).await;
            });
        }

        // Pre-sign task (live mode with the feature enabled).
        if let Some(presigner) = self.presigner.take() {
            let rx = shutdown.subscribe();
            background.spawn(async move {
                presigner.run(hot_rx, rx).await;
            });
        }

        // Resolution tracker.
        if let Some(resolution) = self.resolution.take() {
            let rx = shutdown.subscribe();
            background.spawn(async move {
                resolution.run(rx).await;
            });
        }

        // The single-consumer loop.
        let mut books: HashMap<WindowKey, Orderbook> = HashMap::new();
        let mut executions: JoinSet<()> = JoinSet::new();
        let mut dip_events: Vec<DipEvent> = Vec::new();
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut shutdown_rx = shutdown.subscribe();

        info!(
            mode = %self.config.mode,
            timeframe = %self.config.timeframe,
            assets = ?self.config.assets,
            "engine running"
        );

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(StreamEvent::Update { route, update, .. }) => {
                            let book = books.entry(route.key).or_insert_with(|| {
                                Orderbook::new(route.key, route.window_offset, route.window_label.clone())
                            });
                            book.apply(route.outcome, update, Utc::now().timestamp_millis());
                            Metrics::incr(&self.metrics.updates_processed);

                            // Detection is synchronous: no awaits until the
                            // admission decision is made.
                            let detection = self.detector.detect(book, &mut dip_events);
                            self.flush_dip_events(&mut dip_events);
                            if let Detection::Trade(opportunity) = detection {
                                self.admit_and_execute(*opportunity, &tokens_by_key, &books, &mut executions);
                            } else {
                                Metrics::incr(&self.metrics.detections_skipped);
                            }
                        }
                        Some(StreamEvent::Connected { token_count }) => {
                            info!(token_count, "market feed connected");
                        }
                        Some(StreamEvent::Disconnected { reason }) => {
                            warn!(reason = %reason, "market feed disconnected");
                        }
                        None => {
                            warn!("event channel closed, stopping engine");
                            break;
                        }
                    }
                }

                control = control_rx.recv() => {
                    if let Some(EngineControl::Rotated { live }) = control {
                        let live_keys: Vec<WindowKey> =
                            live.iter().map(|t| t.window_key()).collect();
                        books.retain(|key, _| live_keys.contains(key));
                        self.cooldowns.retain_windows(&live_keys);
                        if let Some(cache) = &self.presign_cache {
                            let dead: Vec<WindowKey> = tokens_by_key
                                .keys()
                                .filter(|k| !live_keys.contains(k))
                                .copied()
                                .collect();
                            for key in dead {
                                cache.evict_market(&key);
                            }
                        }
                        // Every previous window ended at the boundary, so
                        // open dips end with it.
                        self.detector.close_all(&mut dip_events);
                        self.flush_dip_events(&mut dip_events);
                        tokens_by_key = live
                            .iter()
                            .map(|t| (t.window_key(), t.clone()))
                            .collect();
                        info!(windows = tokens_by_key.len(), "rotation applied");
                    }
                }

                Some(_) = executions.join_next(), if !executions.is_empty() => {}

                _ = housekeeping.tick() => {
                    self.publish_hot_markets(&books, &tokens_by_key, &hot_tx);
                    let snap = self.metrics.snapshot();
                    info!(
                        updates = snap.updates_processed,
                        dips = snap.dips_started,
                        admissions = snap.admissions,
                        executed = snap.executions_succeeded,
                        failed = snap.executions_failed,
                        rollbacks = snap.rollbacks,
                        resolved = snap.positions_resolved,
                        "engine metrics"
                    );
                }

                _ = shutdown_rx.recv() => {
                    info!("engine: shutdown signal");
                    break;
                }
            }
        }

        // Drain: close open dips, let in-flight executions finish, flush.
        self.detector.close_all(&mut dip_events);
        self.flush_dip_events(&mut dip_events);
        while executions.join_next().await.is_some() {}
        background.abort_all();
        info!("engine stopped");
        Ok(())
    }

    /// Claim the admission slot and spawn the execution task. Called with
    /// the books borrowed immutably; everything the task needs is cloned
    /// out before the spawn.
    fn admit_and_execute(
        &self,
        opportunity: DipOpportunity,
        tokens_by_key: &HashMap<WindowKey, MarketTokens>,
        books: &HashMap<WindowKey, Orderbook>,
        executions: &mut JoinSet<()>,
    ) {
        let key = opportunity.market;
        let Some(tokens) = tokens_by_key.get(&key) else {
            debug!(market = %key, "opportunity for unknown window, dropping");
            return;
        };

        if let Err(refusal) = self.admissions.try_admit(key) {
            debug!(market = %key, ?refusal, "admission refused");
            return;
        }
        Metrics::incr(&self.metrics.admissions);
        info!(
            market = %key,
            cost = %opportunity.best_case_cost,
            shares = %opportunity.shares,
            profit_pct = %opportunity.profit_pct,
            "opportunity admitted"
        );

        // Audit snapshot of the book as admitted.
        if let Some(book) = books.get(&key) {
            let depth = |side: &dip_market::SideBook| {
                side.levels()
                    .iter()
                    .map(|l| (l.price, l.size))
                    .collect::<Vec<_>>()
            };
            let record = SnapshotRecord {
                ts: Utc::now(),
                market: key.asset.as_str().to_string(),
                position_id: None,
                best_ask_up: opportunity.ask_up,
                best_ask_down: opportunity.ask_down,
                total_cost: opportunity.best_case_cost,
                liquidity_up_5pct: Some(book.up.asks.liquidity_within(rust_decimal_macros::dec!(0.05))),
                liquidity_down_5pct: Some(book.down.asks.liquidity_within(rust_decimal_macros::dec!(0.05))),
                depth_up: depth(&book.up.asks),
                depth_down: depth(&book.down.asks),
            };
            if let Err(e) = self.store.record_snapshot(&record) {
                warn!(error = %e, "failed to record admission snapshot");
            }
        }
        if let Err(e) = self.store.record_event(
            "opportunity_admitted",
            Utc::now(),
            &serde_json::json!({
                "market": key.to_string(),
                "cost": opportunity.best_case_cost.to_string(),
                "shares": opportunity.shares.to_string(),
                "expected_profit": opportunity.expected_profit.to_string(),
            }),
        ) {
            warn!(error = %e, "failed to journal admission");
        }

        let executor = self.executor.clone();
        let store = self.store.clone();
        let admissions = self.admissions.clone();
        let cooldowns = self.cooldowns.clone();
        let metrics = self.metrics.clone();
        let token_up = tokens.token_id_up.clone();
        let token_down = tokens.token_id_down.clone();
        let size = opportunity.shares;

        executions.spawn(async move {
            let result = executor
                .execute(&opportunity, size, size, &token_up, &token_down)
                .await;
            finish_execution(result, key, &store, &admissions, &cooldowns, &metrics);
        });
    }

    fn flush_dip_events(&self, events: &mut Vec<DipEvent>) {
        for event in events.drain(..) {
            match &event {
                DipEvent::Started { market, start_cost, .. } => {
                    Metrics::incr(&self.metrics.dips_started);
                    info!(market = %market, cost = %start_cost, "dip started");
                    if let Err(e) = self.store.record_event("dip_started", Utc::now(), &event) {
                        warn!(error = %e, "failed to journal dip start");
                    }
                }
                DipEvent::Ended {
                    market,
                    duration_ms,
                    min_cost,
                    ..
                } => {
                    Metrics::incr(&self.metrics.dips_ended);
                    info!(
                        market = %market,
                        duration_ms,
                        min_cost = %min_cost,
                        "dip ended"
                    );
                    if let Err(e) = self.store.record_event("dip_ended", Utc::now(), &event) {
                        warn!(error = %e, "failed to journal dip end");
                    }
                }
            }
        }
    }

    /// Publish which markets the pre-signer should keep warm.
    fn publish_hot_markets(
        &self,
        books: &HashMap<WindowKey, Orderbook>,
        tokens_by_key: &HashMap<WindowKey, MarketTokens>,
        hot_tx: &watch::Sender<Vec<HotMarket>>,
    ) {
        if self.presign_cache.is_none() {
            return;
        }
        let margin = self.config.presign.hot_margin;
        let hot: Vec<HotMarket> = books
            .values()
            .filter(|book| self.detector.is_hot(book, margin))
            .filter_map(|book| {
                tokens_by_key.get(&book.key).map(|tokens| HotMarket {
                    key: book.key,
                    token_up: tokens.token_id_up.clone(),
                    token_down: tokens.token_id_down.clone(),
                })
            })
            .collect();
        let _ = hot_tx.send(hot);
    }
}

/// Record the execution outcome: position persisted, slot released,
/// cooldown installed only on success.
fn finish_execution(
    result: ExecutionResult,
    key: WindowKey,
    store: &PositionStore,
    admissions: &PendingAdmissions,
    cooldowns: &CooldownTracker,
    metrics: &Metrics,
) {
    if result.success {
        Metrics::incr(&metrics.executions_succeeded);
        cooldowns.mark(key);
    } else {
        Metrics::incr(&metrics.executions_failed);
        if result.rolled_back {
            Metrics::incr(&metrics.rollbacks);
        }
        if result.rollback_failed {
            Metrics::incr(&metrics.rollback_failures);
        }
    }

    if let Some(position) = &result.position {
        if let Err(e) = store.save(position) {
            error!(error = %e, id = %position.id, "failed to persist position");
        }
    }
    if let Some(error) = &result.error {
        if let Err(e) = store.record_event(
            "execution_failed",
            Utc::now(),
            &serde_json::json!({ "market": key.to_string(), "error": error }),
        ) {
            warn!(error = %e, "failed to journal execution failure");
        }
    }

    // Always release, whatever happened.
    admissions.release(key);
}

/// Rotation task body: prefetch at T−2 min, swap at the boundary.
async fn run_rotation(
    catalog: Arc<MarketCatalog>,
    index: Arc<TokenIndex>,
    timeframe: dip_common::Timeframe,
    stream_cmd: mpsc::Sender<StreamCommand>,
    control: mpsc::Sender<EngineControl>,
    shutdown: &mut broadcast::Receiver<()>,
) {
    loop {
        let until_boundary = Duration::from_millis(ms_until_next_boundary(Utc::now(), timeframe));

        // Prefetch leg (skipped when already inside the lead window).
        if until_boundary > ROTATION_PREFETCH_LEAD {
            let prefetch_in = until_boundary - ROTATION_PREFETCH_LEAD;
            tokio::select! {
                _ = tokio::time::sleep(prefetch_in) => {}
                _ = shutdown.recv() => return,
            }
            // Stage the next window's tokens; failures are fine, the
            // boundary refresh retries.
            let now = Utc::now();
            for &asset in &catalog.config().assets {
                match catalog.lookup(asset, 1, now).await {
                    Ok(tokens) => {
                        debug!(asset = %asset, slug = %tokens.window_label, "prefetched next window")
                    }
                    Err(e) => debug!(asset = %asset, error = %e, "next window not stageable yet"),
                }
            }
        }

        // Boundary leg. Re-anchor on the wall clock to avoid drift.
        let remaining = Duration::from_millis(ms_until_next_boundary(Utc::now(), timeframe));
        tokio::select! {
            _ = tokio::time::sleep(remaining) => {}
            _ = shutdown.recv() => return,
        }

        info!("window boundary: rotating markets");
        let mut records = catalog.refresh(Utc::now()).await;
        // The exchange sometimes lists the new window a beat late; retry a
        // few times before giving up until the next cycle.
        for _ in 0..3 {
            if !records.is_empty() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(30)) => {}
                _ = shutdown.recv() => return,
            }
            records = catalog.refresh(Utc::now()).await;
        }
        index.rebuild(&records);
        // Cycle the push connection so it subscribes to the fresh set.
        // In-flight messages for old tokens die at the index lookup. With
        // the simulated feed nobody drains this channel; try_send keeps the
        // rotation task from wedging on a full buffer.
        let _ = stream_cmd.try_send(StreamCommand::Resubscribe);
        let _ = control.send(EngineControl::Rotated { live: records }).await;
    }
}
