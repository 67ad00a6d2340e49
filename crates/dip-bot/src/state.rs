//! Shared mutable state: admission gating, cooldowns, and metrics.
//!
//! Admission is the serialisation point between detection and execution:
//! while a market key sits in the pending set, no second trade can be
//! admitted for that window or for that symbol. The set is guarded by one
//! short critical section so the two uniqueness rules are checked and
//! applied atomically.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use dip_common::{CryptoAsset, WindowKey};

/// Why an admission attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionRefusal {
    /// This window already has a trade in flight.
    WindowPending,
    /// Another window of the same symbol has a trade in flight.
    SymbolPending,
    /// The concurrent-admission cap is reached.
    CapacityFull,
}

#[derive(Debug, Default)]
struct AdmissionInner {
    by_window: HashSet<WindowKey>,
    by_symbol: HashSet<CryptoAsset>,
}

/// The pending-admission set.
///
/// Invariant: at most one entry per (symbol, window) AND per symbol; entries
/// exist only between "admitted" and "order outcome observed".
#[derive(Debug)]
pub struct PendingAdmissions {
    inner: Mutex<AdmissionInner>,
    max_concurrent: usize,
}

impl PendingAdmissions {
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            inner: Mutex::new(AdmissionInner::default()),
            max_concurrent: max_concurrent as usize,
        }
    }

    /// Try to claim the admission slot for `key`. On success the caller MUST
    /// call `release` once the order outcome is observed.
    pub fn try_admit(&self, key: WindowKey) -> Result<(), AdmissionRefusal> {
        let mut inner = self.inner.lock().expect("admission lock poisoned");
        if inner.by_window.contains(&key) {
            return Err(AdmissionRefusal::WindowPending);
        }
        if inner.by_symbol.contains(&key.asset) {
            return Err(AdmissionRefusal::SymbolPending);
        }
        if inner.by_window.len() >= self.max_concurrent {
            return Err(AdmissionRefusal::CapacityFull);
        }
        inner.by_window.insert(key);
        inner.by_symbol.insert(key.asset);
        Ok(())
    }

    /// Release the slot. Idempotent.
    pub fn release(&self, key: WindowKey) {
        let mut inner = self.inner.lock().expect("admission lock poisoned");
        inner.by_window.remove(&key);
        inner.by_symbol.remove(&key.asset);
    }

    /// Whether this window currently holds the slot.
    pub fn is_pending(&self, key: &WindowKey) -> bool {
        self.inner
            .lock()
            .expect("admission lock poisoned")
            .by_window
            .contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("admission lock poisoned")
            .by_window
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-market cooldown stamps. A stamp is installed only on trade success.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    stamps: DashMap<WindowKey, Instant>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful trade for this market now.
    pub fn mark(&self, key: WindowKey) {
        self.stamps.insert(key, Instant::now());
    }

    /// True while the market is inside its cooldown window.
    pub fn is_cooling(&self, key: &WindowKey, cooldown: Duration) -> bool {
        self.stamps
            .get(key)
            .map(|t| t.elapsed() < cooldown)
            .unwrap_or(false)
    }

    /// Drop stamps for windows that have rotated away.
    pub fn retain_windows(&self, live: &[WindowKey]) {
        self.stamps.retain(|key, _| live.contains(key));
    }
}

/// Engine-wide counters. Fire-and-forget on the hot path; a periodic task
/// logs snapshots.
#[derive(Debug, Default)]
pub struct Metrics {
    pub updates_processed: AtomicU64,
    pub detections_skipped: AtomicU64,
    pub dips_started: AtomicU64,
    pub dips_ended: AtomicU64,
    pub admissions: AtomicU64,
    pub executions_succeeded: AtomicU64,
    pub executions_failed: AtomicU64,
    pub rollbacks: AtomicU64,
    pub rollback_failures: AtomicU64,
    pub positions_resolved: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub updates_processed: u64,
    pub detections_skipped: u64,
    pub dips_started: u64,
    pub dips_ended: u64,
    pub admissions: u64,
    pub executions_succeeded: u64,
    pub executions_failed: u64,
    pub rollbacks: u64,
    pub rollback_failures: u64,
    pub positions_resolved: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            updates_processed: self.updates_processed.load(Ordering::Relaxed),
            detections_skipped: self.detections_skipped.load(Ordering::Relaxed),
            dips_started: self.dips_started.load(Ordering::Relaxed),
            dips_ended: self.dips_ended.load(Ordering::Relaxed),
            admissions: self.admissions.load(Ordering::Relaxed),
            executions_succeeded: self.executions_succeeded.load(Ordering::Relaxed),
            executions_failed: self.executions_failed.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            rollback_failures: self.rollback_failures.load(Ordering::Relaxed),
            positions_resolved: self.positions_resolved.load(Ordering::Relaxed),
        }
    }
}
