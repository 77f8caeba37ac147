//! Relay statistics
//!
//! Process-wide counters plus a background task that periodically logs them.

pub mod metrics;

pub use metrics::{RelayStats, StatsSnapshot};

use std::sync::Arc;
use std::time::Duration;

/// Spawn a task that logs a stats snapshot every `interval`
///
/// Returns `None` when `interval` is zero.
pub fn spawn_stats_logger(
    stats: Arc<RelayStats>,
    interval: Duration,
) -> Option<tokio::task::JoinHandle<()>> {
    if interval.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let snap = stats.snapshot();
            tracing::info!(
                viewers = snap.viewers_active,
                producers = snap.producers_active,
                rejected = snap.producers_rejected,
                bytes_ingested = snap.bytes_ingested,
                chunks = snap.chunks_relayed,
                send_failures = snap.send_failures,
                bitrate = snap.ingest_bitrate(),
                "Relay stats"
            );
        }
    }))
}
