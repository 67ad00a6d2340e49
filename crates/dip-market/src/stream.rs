//! CLOB market-channel streaming client.
//!
//! One long-lived WebSocket connection carries every subscribed token.
//! Incoming updates are keyed only by token id, so routing goes through the
//! `TokenIndex`, an O(1) map rebuilt atomically on every catalog change.
//! Updates for tokens the index no longer knows are dropped; that is how
//! in-flight messages from a rotated-out window die harmlessly.
//!
//! The client does not own orderbooks. It parses and routes; the engine's
//! single consumer applies updates and runs detection inline.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message, Error as WsError},
};
use tracing::{debug, info, warn};

use dip_common::{CryptoAsset, MarketTokens, OutcomeSide, PriceLevel, Side, WindowKey};

use crate::orderbook::BookUpdate;
use crate::types::{StreamEnvelope, StreamMessage, SubscribeMessage};

/// Polymarket CLOB market channel URL.
const CLOB_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

/// Keepalive interval (the exchange expects a PING every 10 s).
const PING_INTERVAL: Duration = Duration::from_secs(9);

/// Errors from the streaming client.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("WebSocket connection failed: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("connection timeout")]
    Timeout,

    #[error("stream ended unexpectedly")]
    StreamEnded,
}

/// Demux target for one token id.
#[derive(Debug, Clone)]
pub struct TokenRoute {
    pub asset: CryptoAsset,
    pub outcome: OutcomeSide,
    pub key: WindowKey,
    pub window_offset: u8,
    pub window_label: String,
}

/// Token id → route map with atomic wholesale replacement.
///
/// Single writer (the rotation task), many readers. Readers always observe
/// either the old or the new map, never a partially updated one.
#[derive(Debug, Default)]
pub struct TokenIndex {
    inner: RwLock<Arc<HashMap<String, TokenRoute>>>,
}

impl TokenIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from the catalog's current records and swap it in.
    pub fn rebuild(&self, records: &[MarketTokens]) {
        let mut map = HashMap::with_capacity(records.len() * 2);
        for rec in records {
            let key = rec.window_key();
            map.insert(
                rec.token_id_up.clone(),
                TokenRoute {
                    asset: rec.asset,
                    outcome: OutcomeSide::Up,
                    key,
                    window_offset: rec.window_offset,
                    window_label: rec.window_label.clone(),
                },
            );
            map.insert(
                rec.token_id_down.clone(),
                TokenRoute {
                    asset: rec.asset,
                    outcome: OutcomeSide::Down,
                    key,
                    window_offset: rec.window_offset,
                    window_label: rec.window_label.clone(),
                },
            );
        }
        *self.inner.write().expect("token index lock poisoned") = Arc::new(map);
    }

    /// O(1) route lookup.
    pub fn route(&self, token_id: &str) -> Option<TokenRoute> {
        self.inner
            .read()
            .expect("token index lock poisoned")
            .get(token_id)
            .cloned()
    }

    /// All currently indexed token ids (the subscription set).
    pub fn token_ids(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("token index lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("token index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How one connection lifetime ended.
enum ConnectionExit {
    /// Shutdown signal observed.
    Shutdown,
    /// Rotation asked for a fresh subscription; reconnect immediately.
    Resubscribe,
}

/// Events delivered to the engine's single consumer.
#[derive(Debug)]
pub enum StreamEvent {
    /// A routed orderbook update for a known token.
    Update {
        route: TokenRoute,
        update: BookUpdate,
        exchange_ts: Option<i64>,
    },
    /// Connection established and subscription sent.
    Connected { token_count: usize },
    /// Connection lost; the client reconnects on its own.
    Disconnected { reason: String },
}

/// Commands from the rotation task.
#[derive(Debug, Clone, Copy)]
pub enum StreamCommand {
    /// Tear the connection down and reconnect with the index's current
    /// token set (fired at the window boundary after the index swap).
    Resubscribe,
}

/// Configuration for the streaming client.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub ws_url: String,
    pub connect_timeout: Duration,
    /// Delay before the first reconnect attempt.
    pub reconnect_delay: Duration,
    /// Backoff ceiling for repeated failures.
    pub max_reconnect_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: CLOB_WS_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_delay: Duration::from_secs(60),
        }
    }
}

/// The streaming client. Owns the push connection; routes via the shared
/// `TokenIndex`; emits `StreamEvent`s to a single consumer.
pub struct StreamClient {
    config: StreamConfig,
    index: Arc<TokenIndex>,
    event_tx: mpsc::Sender<StreamEvent>,
}

impl StreamClient {
    pub fn new(
        config: StreamConfig,
        index: Arc<TokenIndex>,
        event_tx: mpsc::Sender<StreamEvent>,
    ) -> Self {
        Self {
            config,
            index,
            event_tx,
        }
    }

    /// Run with automatic reconnection until shutdown.
    pub async fn run(
        &self,
        mut commands: mpsc::Receiver<StreamCommand>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), StreamError> {
        let mut reconnect_delay = self.config.reconnect_delay;

        loop {
            if shutdown.try_recv().is_ok() {
                info!("stream client: shutdown signal received");
                return Ok(());
            }

            if self.index.is_empty() {
                debug!("no tokens to subscribe to, waiting");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(5)) => continue,
                    _ = shutdown.recv() => return Ok(()),
                }
            }

            match self
                .run_connection(&mut commands, &mut shutdown, &mut reconnect_delay)
                .await
            {
                Ok(ConnectionExit::Shutdown) => {
                    info!("stream client: clean shutdown");
                    return Ok(());
                }
                Ok(ConnectionExit::Resubscribe) => {
                    // Deliberate cycle at a window boundary: no backoff.
                    reconnect_delay = self.config.reconnect_delay;
                    continue;
                }
                Err(e) => {
                    warn!("stream error: {e}, reconnecting in {reconnect_delay:?}");
                    let _ = self
                        .event_tx
                        .send(StreamEvent::Disconnected {
                            reason: e.to_string(),
                        })
                        .await;

                    tokio::select! {
                        _ = tokio::time::sleep(reconnect_delay) => {}
                        _ = shutdown.recv() => return Ok(()),
                    }
                    reconnect_delay =
                        (reconnect_delay * 2).min(self.config.max_reconnect_delay);
                }
            }
        }
    }

    /// One connection lifetime. A successful subscription resets the
    /// caller's backoff; rotation resubscribes surface as a typed exit so
    /// the outer loop reconnects without delay.
    async fn run_connection(
        &self,
        commands: &mut mpsc::Receiver<StreamCommand>,
        shutdown: &mut broadcast::Receiver<()>,
        backoff: &mut Duration,
    ) -> Result<ConnectionExit, StreamError> {
        let connect = timeout(
            self.config.connect_timeout,
            connect_async(self.config.ws_url.as_str()),
        );
        let (ws_stream, _) = match connect.await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(StreamError::Connection(e.to_string())),
            Err(_) => return Err(StreamError::Timeout),
        };

        let (mut write, mut read) = ws_stream.split();

        let token_ids = self.index.token_ids();
        let subscribe = SubscribeMessage::market(token_ids.clone());
        let payload =
            serde_json::to_string(&subscribe).map_err(|e| StreamError::Connection(e.to_string()))?;
        write.send(Message::Text(payload)).await?;
        info!(tokens = token_ids.len(), "subscribed to market channel");
        *backoff = self.config.reconnect_delay;

        let _ = self
            .event_tx
            .send(StreamEvent::Connected {
                token_count: token_ids.len(),
            })
            .await;

        let mut ping_timer = interval(PING_INTERVAL);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            info!("market channel closed by server: {:?}", frame);
                            return Err(StreamError::StreamEnded);
                        }
                        Some(Err(e)) => return Err(StreamError::WebSocket(e)),
                        None => return Err(StreamError::StreamEnded),
                        _ => {}
                    }
                }

                _ = ping_timer.tick() => {
                    write.send(Message::Text("PING".to_string())).await?;
                }

                cmd = commands.recv() => {
                    match cmd {
                        Some(StreamCommand::Resubscribe) => {
                            info!("rotation resubscribe: cycling market channel connection");
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(ConnectionExit::Resubscribe);
                        }
                        None => return Err(StreamError::StreamEnded),
                    }
                }

                _ = shutdown.recv() => {
                    info!("stream client: shutdown during connection");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(ConnectionExit::Shutdown);
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        if text == "PONG" {
            return;
        }
        let envelope: StreamEnvelope = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "unparseable market channel message");
                return;
            }
        };

        for event in envelope.into_events() {
            match event.event_type.as_deref() {
                Some("subscribed") => {
                    info!("market channel subscription confirmed");
                    continue;
                }
                Some("error") => {
                    warn!(message = ?event.message, "market channel error message");
                    continue;
                }
                _ => {}
            }
            for (token_id, update) in extract_updates(&event) {
                let Some(route) = self.index.route(&token_id) else {
                    // Not ours (or rotated out); drop.
                    continue;
                };
                let _ = self
                    .event_tx
                    .send(StreamEvent::Update {
                        route,
                        update,
                        exchange_ts: event.timestamp,
                    })
                    .await;
            }
        }
    }
}

/// Flatten one channel event into `(token_id, BookUpdate)` pairs.
///
/// Snapshots become `BookUpdate::Snapshot`; `price_changes` entries become
/// best-price updates: either an explicit (side, price, size) triple or a
/// bare `best_bid`/`best_ask` with no trusted size.
fn extract_updates(event: &StreamMessage) -> Vec<(String, BookUpdate)> {
    let mut out = Vec::new();

    if event.is_snapshot() {
        if let Some(asset_id) = &event.asset_id {
            let bids = levels_from(event.bids.as_deref());
            let asks = levels_from(event.asks.as_deref());
            out.push((asset_id.clone(), BookUpdate::Snapshot { bids, asks }));
        }
        return out;
    }

    for change in &event.price_changes {
        let Some(token_id) = change.asset_id.as_ref().or(event.asset_id.as_ref()) else {
            continue;
        };

        if let Some(price) = change.price {
            let side = match change.side.as_deref().map(str::to_lowercase).as_deref() {
                Some("sell") | Some("ask") => Side::Sell,
                _ => Side::Buy,
            };
            out.push((
                token_id.clone(),
                BookUpdate::BestPrice {
                    side,
                    price,
                    size: change.size,
                },
            ));
        }
        if let Some(best_ask) = change.best_ask {
            if change.price.is_none() || change.side.is_none() {
                out.push((
                    token_id.clone(),
                    BookUpdate::BestPrice {
                        side: Side::Sell,
                        price: best_ask,
                        size: None,
                    },
                ));
            }
        }
        if let Some(best_bid) = change.best_bid {
            if change.price.is_none() || change.side.is_none() {
                out.push((
                    token_id.clone(),
                    BookUpdate::BestPrice {
                        side: Side::Buy,
                        price: best_bid,
                        size: None,
                    },
                ));
            }
        }
    }

    out
}

fn levels_from(levels: Option<&[crate::types::LevelMsg]>) -> Vec<PriceLevel> {
    levels
        .unwrap_or_default()
        .iter()
        .filter_map(|l| Some(PriceLevel::new(l.price?, l.size?)))
        .collect()
}
