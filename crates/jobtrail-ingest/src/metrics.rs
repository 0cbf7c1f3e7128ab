//! Process-wide delivery counters
//!
//! Every worker updates the same registry. Counters only grow until [`Metrics::reset`],
//! which the binary calls once at startup.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

static GLOBAL: LazyLock<Arc<Metrics>> = LazyLock::new(|| Arc::new(Metrics::default()));

/// The registry shared by the whole process
pub fn global() -> Arc<Metrics> {
    Arc::clone(&GLOBAL)
}

#[derive(Debug, Default)]
pub struct Metrics {
    rows_read: AtomicU64,
    rows_delivered: AtomicU64,
    rows_suppressed: AtomicU64,
    bytes_acked: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    runs_skipped: AtomicU64,
    events: Mutex<BTreeMap<String, u64>>,
    servers: Mutex<BTreeMap<String, u64>>,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub rows_read: u64,
    pub rows_delivered: u64,
    pub rows_suppressed: u64,
    pub bytes_acked: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub runs_skipped: u64,
    /// Delivered records per record name
    pub events: BTreeMap<String, u64>,
    /// Delivered records per `<domain>-<server>-<class>`
    pub servers: BTreeMap<String, u64>,
}

fn bump(map: &Mutex<BTreeMap<String, u64>>, key: &str) {
    let mut map = map.lock().unwrap_or_else(|e| e.into_inner());
    match map.get_mut(key) {
        Some(count) => *count += 1,
        None => {
            map.insert(key.to_string(), 1);
        },
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self) {
        self.rows_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, event: &str, server: &str, bytes: u64) {
        self.rows_delivered.fetch_add(1, Ordering::Relaxed);
        self.bytes_acked.fetch_add(bytes, Ordering::Relaxed);
        bump(&self.events, event);
        bump(&self.servers, server);
    }

    pub fn record_suppressed(&self) {
        self.rows_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run(&self, failed: bool) {
        if failed {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runs_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_skipped_run(&self) {
        self.runs_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for counter in [
            &self.rows_read,
            &self.rows_delivered,
            &self.rows_suppressed,
            &self.bytes_acked,
            &self.runs_completed,
            &self.runs_failed,
            &self.runs_skipped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.servers.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_read: self.rows_read.load(Ordering::Relaxed),
            rows_delivered: self.rows_delivered.load(Ordering::Relaxed),
            rows_suppressed: self.rows_suppressed.load(Ordering::Relaxed),
            bytes_acked: self.bytes_acked.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            runs_skipped: self.runs_skipped.load(Ordering::Relaxed),
            events: self
                .events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            servers: self
                .servers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}
