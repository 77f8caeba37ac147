//! Statistics and metrics for relay sessions

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Relay-wide counters
///
/// Shared via `Arc` between the listeners, the sessions and the router.
/// All counters use relaxed ordering; they are diagnostics, not
/// synchronization.
#[derive(Debug)]
pub struct RelayStats {
    started_at: Instant,
    /// Viewer connections currently open (the global connection counter)
    viewers_active: AtomicI64,
    viewers_total: AtomicU64,
    producers_active: AtomicI64,
    producers_total: AtomicU64,
    producers_rejected: AtomicU64,
    bytes_ingested: AtomicU64,
    chunks_relayed: AtomicU64,
    send_failures: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            viewers_active: AtomicI64::new(0),
            viewers_total: AtomicU64::new(0),
            producers_active: AtomicI64::new(0),
            producers_total: AtomicU64::new(0),
            producers_rejected: AtomicU64::new(0),
            bytes_ingested: AtomicU64::new(0),
            chunks_relayed: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
        }
    }

    /// Increment the viewer connection counter, returning the new value
    pub fn viewer_connected(&self) -> i64 {
        self.viewers_total.fetch_add(1, Ordering::Relaxed);
        self.viewers_active.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement the viewer connection counter, returning the new value
    pub fn viewer_disconnected(&self) -> i64 {
        self.viewers_active.fetch_sub(1, Ordering::Relaxed) - 1
    }

    /// Current number of open viewer connections
    pub fn viewer_connections(&self) -> i64 {
        self.viewers_active.load(Ordering::Relaxed)
    }

    pub fn producer_connected(&self) {
        self.producers_total.fetch_add(1, Ordering::Relaxed);
        self.producers_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn producer_disconnected(&self) {
        self.producers_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn producer_rejected(&self) {
        self.producers_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one ingested chunk of `len` bytes
    pub fn add_ingested(&self, len: usize) {
        self.chunks_relayed.fetch_add(1, Ordering::Relaxed);
        self.bytes_ingested.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Record a chunk that could not be queued for a viewer
    pub fn add_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.started_at.elapsed(),
            viewers_active: self.viewers_active.load(Ordering::Relaxed),
            viewers_total: self.viewers_total.load(Ordering::Relaxed),
            producers_active: self.producers_active.load(Ordering::Relaxed),
            producers_total: self.producers_total.load(Ordering::Relaxed),
            producers_rejected: self.producers_rejected.load(Ordering::Relaxed),
            bytes_ingested: self.bytes_ingested.load(Ordering::Relaxed),
            chunks_relayed: self.chunks_relayed.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Time since the stats were created
    pub uptime: Duration,
    /// Current open viewer connections
    pub viewers_active: i64,
    /// Viewer connections ever accepted
    pub viewers_total: u64,
    /// Current producer connections
    pub producers_active: i64,
    /// Producer connections ever accepted
    pub producers_total: u64,
    /// Producer connections rejected for a bad secret
    pub producers_rejected: u64,
    /// Total bytes received from producers
    pub bytes_ingested: u64,
    /// Total chunks handed to the router
    pub chunks_relayed: u64,
    /// Chunks dropped for a viewer whose outbox was full
    pub send_failures: u64,
}

impl StatsSnapshot {
    /// Average ingest bitrate in bits per second over the uptime
    pub fn ingest_bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes_ingested * 8) / secs
        } else {
            0
        }
    }
}
