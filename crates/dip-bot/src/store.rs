//! Durable position store on SQLite.
//!
//! Three tables: `positions` (upsert by id), `events` (append-only typed
//! JSON journal), and `orderbook_snapshots` (audit of the book at each
//! admitted opportunity, capped at 10 levels per side).
//!
//! Schema migrations are additive: `PRAGMA user_version` gates a sequence
//! of steps and later steps only ever ADD nullable columns, so old rows
//! survive upgrades untouched.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use dip_common::OutcomeSide;

/// Errors from the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Position lifecycle state. Transitions exactly once:
/// `Open -> Resolved` or `Open -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PositionStatus {
    Open,
    Resolved,
    Failed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Resolved => "resolved",
            PositionStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "open" => Ok(PositionStatus::Open),
            "resolved" => Ok(PositionStatus::Resolved),
            "failed" => Ok(PositionStatus::Failed),
            other => Err(StoreError::Corrupt(format!("unknown status {other}"))),
        }
    }

    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PositionStatus::Open)
    }
}

/// One dual-leg position.
#[derive(Debug, Clone)]
pub struct Position {
    pub id: String,
    /// Underlying symbol ("BTC").
    pub market: String,
    /// Typed window key string (`btc:15m:1700000100`).
    pub window_key: String,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub status: PositionStatus,
    pub cost_up: Decimal,
    pub cost_down: Decimal,
    pub size_up: Decimal,
    pub size_down: Decimal,
    pub total_cost: Decimal,
    pub expected_profit: Decimal,
    pub ask_up: Option<Decimal>,
    pub ask_down: Option<Decimal>,
    pub liquidity_up: Option<Decimal>,
    pub liquidity_down: Option<Decimal>,
    pub est_slippage: Option<Decimal>,
    pub latency_detect_ms: Option<i64>,
    pub latency_exec_ms: Option<i64>,
    pub latency_total_ms: Option<i64>,
    pub outcome: Option<OutcomeSide>,
    pub payout: Option<Decimal>,
    pub fees: Option<Decimal>,
    pub actual_profit: Option<Decimal>,
}

/// Aggregate statistics over the positions table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total: u64,
    pub open: u64,
    pub resolved: u64,
    pub failed: u64,
    pub wins: u64,
    /// Wins over resolved, 0..1.
    pub win_rate: Decimal,
    pub net_profit: Decimal,
}

/// Audit record of the orderbook at an admitted opportunity.
#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    pub ts: DateTime<Utc>,
    pub market: String,
    pub position_id: Option<String>,
    pub best_ask_up: Decimal,
    pub best_ask_down: Decimal,
    pub total_cost: Decimal,
    pub liquidity_up_5pct: Option<Decimal>,
    pub liquidity_down_5pct: Option<Decimal>,
    /// `[[price, size], ...]`, truncated to 10 levels on write.
    pub depth_up: Vec<(Decimal, Decimal)>,
    pub depth_down: Vec<(Decimal, Decimal)>,
}

const SNAPSHOT_DEPTH_CAP: usize = 10;

/// The store. Writes are serialised internally by the connection mutex.
pub struct PositionStore {
    conn: Mutex<Connection>,
}

impl PositionStore {
    /// Open (creating parent directories) and migrate.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

        if version < 1 {
            debug!("applying store migration 1: base schema");
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS positions (
                    id TEXT PRIMARY KEY,
                    market TEXT NOT NULL,
                    window_key TEXT NOT NULL,
                    opened_at INTEGER NOT NULL,
                    resolved_at INTEGER NULL,
                    status TEXT NOT NULL,
                    cost_up TEXT NOT NULL,
                    cost_down TEXT NOT NULL,
                    size_up TEXT NOT NULL,
                    size_down TEXT NOT NULL,
                    total_cost TEXT NOT NULL,
                    expected_profit TEXT NOT NULL,
                    ask_up TEXT NULL,
                    ask_down TEXT NULL,
                    outcome TEXT NULL,
                    payout TEXT NULL,
                    fees TEXT NULL,
                    actual_profit TEXT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status);
                CREATE INDEX IF NOT EXISTS idx_positions_market ON positions(market);
                CREATE INDEX IF NOT EXISTS idx_positions_opened ON positions(opened_at);

                CREATE TABLE IF NOT EXISTS events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    type TEXT NOT NULL,
                    ts INTEGER NOT NULL,
                    data_json TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);
                CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts);

                CREATE TABLE IF NOT EXISTS orderbook_snapshots (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ts INTEGER NOT NULL,
                    market TEXT NOT NULL,
                    position_id TEXT NULL,
                    best_ask_up TEXT NOT NULL,
                    best_ask_down TEXT NOT NULL,
                    total_cost TEXT NOT NULL,
                    depth_up_json TEXT NOT NULL,
                    depth_down_json TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_snapshots_ts ON orderbook_snapshots(ts);
                CREATE INDEX IF NOT EXISTS idx_snapshots_market ON orderbook_snapshots(market);

                PRAGMA user_version = 1;
                "#,
            )?;
        }

        if version < 2 {
            debug!("applying store migration 2: analytical columns");
            // Additive only: existing rows keep NULLs.
            conn.execute_batch(
                r#"
                ALTER TABLE positions ADD COLUMN liquidity_up TEXT NULL;
                ALTER TABLE positions ADD COLUMN liquidity_down TEXT NULL;
                ALTER TABLE positions ADD COLUMN est_slippage TEXT NULL;
                ALTER TABLE positions ADD COLUMN latency_detect_ms INTEGER NULL;
                ALTER TABLE positions ADD COLUMN latency_exec_ms INTEGER NULL;
                ALTER TABLE positions ADD COLUMN latency_total_ms INTEGER NULL;
                ALTER TABLE orderbook_snapshots ADD COLUMN liquidity_up_5pct TEXT NULL;
                ALTER TABLE orderbook_snapshots ADD COLUMN liquidity_down_5pct TEXT NULL;
                PRAGMA user_version = 2;
                "#,
            )?;
        }

        info!("position store ready (schema v2)");
        Ok(())
    }

    /// Upsert by id.
    pub fn save(&self, position: &Position) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            r#"
            INSERT INTO positions (
                id, market, window_key, opened_at, resolved_at, status,
                cost_up, cost_down, size_up, size_down, total_cost,
                expected_profit, ask_up, ask_down, outcome, payout, fees,
                actual_profit, liquidity_up, liquidity_down, est_slippage,
                latency_detect_ms, latency_exec_ms, latency_total_ms
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24
            )
            ON CONFLICT(id) DO UPDATE SET
                resolved_at = excluded.resolved_at,
                status = excluded.status,
                outcome = excluded.outcome,
                payout = excluded.payout,
                fees = excluded.fees,
                actual_profit = excluded.actual_profit,
                liquidity_up = excluded.liquidity_up,
                liquidity_down = excluded.liquidity_down,
                est_slippage = excluded.est_slippage,
                latency_detect_ms = excluded.latency_detect_ms,
                latency_exec_ms = excluded.latency_exec_ms,
                latency_total_ms = excluded.latency_total_ms
            "#,
            params![
                position.id,
                position.market,
                position.window_key,
                position.opened_at.timestamp_millis(),
                position.resolved_at.map(|t| t.timestamp_millis()),
                position.status.as_str(),
                position.cost_up.to_string(),
                position.cost_down.to_string(),
                position.size_up.to_string(),
                position.size_down.to_string(),
                position.total_cost.to_string(),
                position.expected_profit.to_string(),
                position.ask_up.map(|d| d.to_string()),
                position.ask_down.map(|d| d.to_string()),
                position.outcome.map(|o| o.as_str()),
                position.payout.map(|d| d.to_string()),
                position.fees.map(|d| d.to_string()),
                position.actual_profit.map(|d| d.to_string()),
                position.liquidity_up.map(|d| d.to_string()),
                position.liquidity_down.map(|d| d.to_string()),
                position.est_slippage.map(|d| d.to_string()),
                position.latency_detect_ms,
                position.latency_exec_ms,
                position.latency_total_ms,
            ],
        )?;
        Ok(())
    }

    pub fn by_id(&self, id: &str) -> Result<Option<Position>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_POSITION))?;
        let mut rows = stmt.query_map(params![id], row_to_position)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub fn open_positions(&self) -> Result<Vec<Position>, StoreError> {
        self.query_positions(
            &format!("{} WHERE status = 'open' ORDER BY opened_at", SELECT_POSITION),
            params![],
        )
    }

    pub fn recent(&self, limit: u32) -> Result<Vec<Position>, StoreError> {
        self.query_positions(
            &format!("{} ORDER BY opened_at DESC LIMIT ?1", SELECT_POSITION),
            params![limit],
        )
    }

    pub fn by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Position>, StoreError> {
        self.query_positions(
            &format!(
                "{} WHERE opened_at >= ?1 AND opened_at < ?2 ORDER BY opened_at",
                SELECT_POSITION
            ),
            params![start.timestamp_millis(), end.timestamp_millis()],
        )
    }

    pub fn by_market(&self, market: &str, limit: u32) -> Result<Vec<Position>, StoreError> {
        self.query_positions(
            &format!(
                "{} WHERE market = ?1 ORDER BY opened_at DESC LIMIT ?2",
                SELECT_POSITION
            ),
            params![market, limit],
        )
    }

    fn query_positions(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Position>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_position)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Totals, win rate, and net profit.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT status, actual_profit FROM positions",
        )?;
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(0)?;
            let profit: Option<String> = row.get(1)?;
            Ok((status, profit))
        })?;

        let mut stats = StoreStats::default();
        for row in rows {
            let (status, profit) = row?;
            stats.total += 1;
            match status.as_str() {
                "open" => stats.open += 1,
                "resolved" => stats.resolved += 1,
                "failed" => stats.failed += 1,
                _ => {}
            }
            if let Some(profit) = profit.and_then(|p| p.parse::<Decimal>().ok()) {
                stats.net_profit += profit;
                if status == "resolved" && profit > Decimal::ZERO {
                    stats.wins += 1;
                }
            }
        }
        if stats.resolved > 0 {
            stats.win_rate = Decimal::from(stats.wins) / Decimal::from(stats.resolved);
        }
        Ok(stats)
    }

    /// Append an event row.
    pub fn record_event(
        &self,
        event_type: &str,
        ts: DateTime<Utc>,
        data: &impl Serialize,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(data)
            .map_err(|e| StoreError::Corrupt(format!("event serialization: {e}")))?;
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "INSERT INTO events (type, ts, data_json) VALUES (?1, ?2, ?3)",
            params![event_type, ts.timestamp_millis(), json],
        )?;
        Ok(())
    }

    /// Count events of one type (used by tests and summaries).
    pub fn count_events(&self, event_type: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE type = ?1",
            params![event_type],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    /// Append an orderbook audit snapshot, keeping at most 10 levels per
    /// side.
    pub fn record_snapshot(&self, record: &SnapshotRecord) -> Result<(), StoreError> {
        let depth_json = |levels: &[(Decimal, Decimal)]| -> Result<String, StoreError> {
            let capped: Vec<[String; 2]> = levels
                .iter()
                .take(SNAPSHOT_DEPTH_CAP)
                .map(|(p, s)| [p.to_string(), s.to_string()])
                .collect();
            serde_json::to_string(&capped)
                .map_err(|e| StoreError::Corrupt(format!("depth serialization: {e}")))
        };
        let depth_up = depth_json(&record.depth_up)?;
        let depth_down = depth_json(&record.depth_down)?;

        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            r#"
            INSERT INTO orderbook_snapshots (
                ts, market, position_id, best_ask_up, best_ask_down,
                total_cost, depth_up_json, depth_down_json,
                liquidity_up_5pct, liquidity_down_5pct
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                record.ts.timestamp_millis(),
                record.market,
                record.position_id,
                record.best_ask_up.to_string(),
                record.best_ask_down.to_string(),
                record.total_cost.to_string(),
                depth_up,
                depth_down,
                record.liquidity_up_5pct.map(|d| d.to_string()),
                record.liquidity_down_5pct.map(|d| d.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn snapshot_count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM orderbook_snapshots", [], |r| r.get(0))?;
        Ok(count as u64)
    }
}

const SELECT_POSITION: &str = r#"
    SELECT id, market, window_key, opened_at, resolved_at, status,
           cost_up, cost_down, size_up, size_down, total_cost,
           expected_profit, ask_up, ask_down, outcome, payout, fees,
           actual_profit, liquidity_up, liquidity_down, est_slippage,
           latency_detect_ms, latency_exec_ms, latency_total_ms
    FROM positions
"#;

fn row_to_position(row: &Row<'_>) -> rusqlite::Result<Position> {
    let status_text: String = row.get(5)?;
    let status = PositionStatus::parse(&status_text)
        .map_err(|e| rusqlite::Error::InvalidColumnType(5, e.to_string(), rusqlite::types::Type::Text))?;

    let opened_ms: i64 = row.get(3)?;
    let resolved_ms: Option<i64> = row.get(4)?;
    let outcome_text: Option<String> = row.get(14)?;

    Ok(Position {
        id: row.get(0)?,
        market: row.get(1)?,
        window_key: row.get(2)?,
        opened_at: ms_to_utc(opened_ms),
        resolved_at: resolved_ms.map(ms_to_utc),
        status,
        cost_up: decimal_col(row, 6)?,
        cost_down: decimal_col(row, 7)?,
        size_up: decimal_col(row, 8)?,
        size_down: decimal_col(row, 9)?,
        total_cost: decimal_col(row, 10)?,
        expected_profit: decimal_col(row, 11)?,
        ask_up: opt_decimal_col(row, 12)?,
        ask_down: opt_decimal_col(row, 13)?,
        outcome: outcome_text.and_then(|s| match s.as_str() {
            "UP" => Some(OutcomeSide::Up),
            "DOWN" => Some(OutcomeSide::Down),
            _ => None,
        }),
        payout: opt_decimal_col(row, 15)?,
        fees: opt_decimal_col(row, 16)?,
        actual_profit: opt_decimal_col(row, 17)?,
        liquidity_up: opt_decimal_col(row, 18)?,
        liquidity_down: opt_decimal_col(row, 19)?,
        est_slippage: opt_decimal_col(row, 20)?,
        latency_detect_ms: row.get(21)?,
        latency_exec_ms: row.get(22)?,
        latency_total_ms: row.get(23)?,
    })
}

fn ms_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|_| {
        rusqlite::Error::InvalidColumnType(idx, text, rusqlite::types::Type::Text)
    })
}

fn opt_decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let text: Option<String> = row.get(idx)?;
    match text {
        Some(t) => t
            .parse()
            .map(Some)
            .map_err(|_| rusqlite::Error::InvalidColumnType(idx, t, rusqlite::types::Type::Text)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_position(id: &str, market: &str) -> Position {
        Position {
            id: id.to_string(),
            market: market.to_string(),
            window_key: format!("{}:15m:1700000100", market.to_lowercase()),
            opened_at: Utc::now(),
            resolved_at: None,
            status: PositionStatus::Open,
            cost_up: dec!(50.53),
            cost_down: dec!(49.47),
            size_up: dec!(105.26),
            size_down: dec!(105.26),
            total_cost: dec!(100),
            expected_profit: dec!(5.26),
            ask_up: Some(dec!(0.48)),
            ask_down: Some(dec!(0.47)),
            liquidity_up: Some(dec!(500)),
            liquidity_down: Some(dec!(500)),
            est_slippage: Some(dec!(0.001)),
            latency_detect_ms: Some(3),
            latency_exec_ms: Some(120),
            latency_total_ms: Some(123),
            outcome: None,
            payout: None,
            fees: None,
            actual_profit: None,
        }
    }

    #[test]
    fn test_save_and_read_back() {
        let store = PositionStore::open_in_memory().unwrap();
        let position = sample_position("p1", "BTC");
        store.save(&position).unwrap();

        let loaded = store.by_id("p1").unwrap().unwrap();
        assert_eq!(loaded.market, "BTC");
        assert_eq!(loaded.status, PositionStatus::Open);
        assert_eq!(loaded.cost_up, dec!(50.53));
        assert_eq!(loaded.size_up, dec!(105.26));
        assert_eq!(loaded.est_slippage, Some(dec!(0.001)));
        assert_eq!(loaded.latency_total_ms, Some(123));
        assert!(loaded.outcome.is_none());
    }

    #[test]
    fn test_upsert_transitions_status() {
        let store = PositionStore::open_in_memory().unwrap();
        let mut position = sample_position("p1", "BTC");
        store.save(&position).unwrap();

        position.status = PositionStatus::Resolved;
        position.resolved_at = Some(Utc::now());
        position.outcome = Some(OutcomeSide::Up);
        position.payout = Some(dec!(105.26));
        position.actual_profit = Some(dec!(5.26));
        store.save(&position).unwrap();

        let loaded = store.by_id("p1").unwrap().unwrap();
        assert_eq!(loaded.status, PositionStatus::Resolved);
        assert_eq!(loaded.outcome, Some(OutcomeSide::Up));
        assert_eq!(loaded.payout, Some(dec!(105.26)));
        // One row, not two.
        assert_eq!(store.stats().unwrap().total, 1);
    }

    #[test]
    fn test_open_positions_filter() {
        let store = PositionStore::open_in_memory().unwrap();
        store.save(&sample_position("p1", "BTC")).unwrap();
        let mut resolved = sample_position("p2", "ETH");
        resolved.status = PositionStatus::Resolved;
        store.save(&resolved).unwrap();

        let open = store.open_positions().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "p1");
    }

    #[test]
    fn test_recent_and_by_market() {
        let store = PositionStore::open_in_memory().unwrap();
        for i in 0..5 {
            let mut p = sample_position(&format!("p{i}"), "BTC");
            p.opened_at = Utc::now() - chrono::Duration::minutes(5 - i);
            store.save(&p).unwrap();
        }
        store.save(&sample_position("e1", "ETH")).unwrap();

        let recent = store.recent(3).unwrap();
        assert_eq!(recent.len(), 3);

        let btc = store.by_market("BTC", 10).unwrap();
        assert_eq!(btc.len(), 5);
        assert!(btc.iter().all(|p| p.market == "BTC"));
    }

    #[test]
    fn test_by_date_range() {
        let store = PositionStore::open_in_memory().unwrap();
        let mut old = sample_position("old", "BTC");
        old.opened_at = Utc::now() - chrono::Duration::days(2);
        store.save(&old).unwrap();
        store.save(&sample_position("new", "BTC")).unwrap();

        let start = Utc::now() - chrono::Duration::hours(1);
        let end = Utc::now() + chrono::Duration::hours(1);
        let in_range = store.by_date_range(start, end).unwrap();
        assert_eq!(in_range.len(), 1);
        assert_eq!(in_range[0].id, "new");
    }

    #[test]
    fn test_stats_win_rate() {
        let store = PositionStore::open_in_memory().unwrap();
        let mut win = sample_position("w", "BTC");
        win.status = PositionStatus::Resolved;
        win.actual_profit = Some(dec!(5));
        store.save(&win).unwrap();

        let mut loss = sample_position("l", "BTC");
        loss.status = PositionStatus::Resolved;
        loss.actual_profit = Some(dec!(-2));
        store.save(&loss).unwrap();

        store.save(&sample_position("o", "ETH")).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.resolved, 2);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.win_rate, dec!(0.5));
        assert_eq!(stats.net_profit, dec!(3));
    }

    #[test]
    fn test_events_journal() {
        let store = PositionStore::open_in_memory().unwrap();
        store
            .record_event("dip_started", Utc::now(), &serde_json::json!({"cost": "0.92"}))
            .unwrap();
        store
            .record_event("dip_ended", Utc::now(), &serde_json::json!({"duration_ms": 1200}))
            .unwrap();
        assert_eq!(store.count_events("dip_started").unwrap(), 1);
        assert_eq!(store.count_events("dip_ended").unwrap(), 1);
        assert_eq!(store.count_events("nothing").unwrap(), 0);
    }

    #[test]
    fn test_snapshot_depth_capped() {
        let store = PositionStore::open_in_memory().unwrap();
        let deep: Vec<(Decimal, Decimal)> = (0..25)
            .map(|i| (Decimal::new(40 + i, 2), dec!(10)))
            .collect();
        store
            .record_snapshot(&SnapshotRecord {
                ts: Utc::now(),
                market: "BTC".to_string(),
                position_id: None,
                best_ask_up: dec!(0.40),
                best_ask_down: dec!(0.45),
                total_cost: dec!(0.85),
                liquidity_up_5pct: Some(dec!(100)),
                liquidity_down_5pct: None,
                depth_up: deep.clone(),
                depth_down: deep,
            })
            .unwrap();
        assert_eq!(store.snapshot_count().unwrap(), 1);

        let conn = store.conn.lock().unwrap();
        let depth_json: String = conn
            .query_row("SELECT depth_up_json FROM orderbook_snapshots", [], |r| {
                r.get(0)
            })
            .unwrap();
        let parsed: Vec<[String; 2]> = serde_json::from_str(&depth_json).unwrap();
        assert_eq!(parsed.len(), 10);
    }

    #[test]
    fn test_migration_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.sqlite");
        {
            let store = PositionStore::open(&path).unwrap();
            store.save(&sample_position("p1", "BTC")).unwrap();
        }
        // Re-opening re-runs the migration gate without clobbering data.
        let store = PositionStore::open(&path).unwrap();
        assert!(store.by_id("p1").unwrap().is_some());
    }
}
