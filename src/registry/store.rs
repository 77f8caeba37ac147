//! Channel router implementation
//!
//! The central registry that maps channel identifiers to attached viewers and
//! fans ingested chunks out to them.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;

use super::channel::ChannelId;
use super::entry::{ChannelEntry, ChannelStats, Delivery};
use super::viewer::{SendFailure, ViewerHandle};
use crate::stats::RelayStats;

/// Central registry for all channels
///
/// Thread-safe via `RwLock`. The outer lock guards the map and is only taken
/// for writing when an entry is created or torn down; broadcasting takes the
/// outer lock for reading and the channel's own lock for the duration of the
/// fan-out, so a concurrent `unregister` on the same channel waits until the
/// iteration is done.
pub struct ChannelRouter {
    /// Map of channel id to channel entry
    channels: RwLock<HashMap<ChannelId, RwLock<ChannelEntry>>>,

    /// Relay-wide counters (send failures are reported here)
    stats: Arc<RelayStats>,
}

impl ChannelRouter {
    /// Create a router with its own stats
    pub fn new() -> Self {
        Self::with_stats(Arc::new(RelayStats::new()))
    }

    /// Create a router reporting into shared stats
    pub fn with_stats(stats: Arc<RelayStats>) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            stats,
        }
    }

    /// Stats this router reports into
    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Attach a viewer to a channel
    ///
    /// Creates the channel if it does not exist. No de-duplication is done;
    /// each viewer session registers exactly once.
    pub async fn register(&self, channel: &ChannelId, viewer: ViewerHandle) {
        let mut channels = self.channels.write().await;
        let entry = channels
            .entry(channel.clone())
            .or_insert_with(|| RwLock::new(ChannelEntry::new()));
        let entry = entry.get_mut();

        let viewer_id = viewer.id();
        entry.push_viewer(viewer);

        tracing::info!(
            channel = %channel,
            viewer_id = viewer_id,
            viewers = entry.viewer_count(),
            "Viewer registered"
        );
    }

    /// Detach a viewer from a channel
    ///
    /// Removes the first handle with `viewer_id`; no-op if absent. The
    /// channel is torn down once it has neither viewers nor producers.
    pub async fn unregister(&self, channel: &ChannelId, viewer_id: u64) {
        let mut channels = self.channels.write().await;

        let Some(entry) = channels.get_mut(channel) else {
            return;
        };
        let entry = entry.get_mut();

        if entry.remove_viewer(viewer_id).is_none() {
            return;
        }

        tracing::debug!(
            channel = %channel,
            viewer_id = viewer_id,
            viewers = entry.viewer_count(),
            "Viewer unregistered"
        );

        if entry.is_unused() {
            channels.remove(channel);
            tracing::debug!(channel = %channel, "Channel removed");
        }
    }

    /// Bind a producer connection to a channel
    ///
    /// Keeps the channel alive while the producer is connected, even with no
    /// viewers attached.
    pub async fn bind_producer(&self, channel: &ChannelId) {
        let mut channels = self.channels.write().await;
        let entry = channels
            .entry(channel.clone())
            .or_insert_with(|| RwLock::new(ChannelEntry::new()));
        let entry = entry.get_mut();
        entry.bind_producer();

        tracing::debug!(
            channel = %channel,
            producers = entry.producer_count(),
            viewers = entry.viewer_count(),
            "Producer bound"
        );
    }

    /// Release a producer binding made by [`bind_producer`](Self::bind_producer)
    pub async fn release_producer(&self, channel: &ChannelId) {
        let mut channels = self.channels.write().await;

        let Some(entry) = channels.get_mut(channel) else {
            return;
        };
        let entry = entry.get_mut();
        entry.release_producer();

        if entry.is_unused() {
            channels.remove(channel);
            tracing::debug!(channel = %channel, "Channel removed");
        }
    }

    /// Send a chunk to every open viewer of a channel
    ///
    /// Never fails: unknown channels and channels without viewers are a
    /// no-op. A viewer whose outbox is full loses this chunk; the failure is
    /// logged and counted and the remaining viewers still receive it.
    pub async fn broadcast(&self, channel: &ChannelId, chunk: Bytes) -> Delivery {
        let channels = self.channels.read().await;

        let Some(entry) = channels.get(channel) else {
            return Delivery::default();
        };
        let mut entry = entry.write().await;

        entry.fan_out(&chunk, |viewer, failure| {
            self.stats.add_send_failure();
            match failure {
                SendFailure::Full => tracing::warn!(
                    channel = %channel,
                    viewer_id = viewer.id(),
                    len = chunk.len(),
                    "Viewer outbox full, chunk dropped"
                ),
                _ => tracing::debug!(
                    channel = %channel,
                    viewer_id = viewer.id(),
                    failure = ?failure,
                    "Viewer send failed"
                ),
            }
        })
    }

    /// Number of viewers registered on a channel
    pub async fn viewer_count(&self, channel: &ChannelId) -> usize {
        let channels = self.channels.read().await;

        match channels.get(channel) {
            Some(entry) => entry.read().await.viewer_count(),
            None => 0,
        }
    }

    /// Check if a channel is present in the registry
    pub async fn has_channel(&self, channel: &ChannelId) -> bool {
        self.channels.read().await.contains_key(channel)
    }

    /// Get channel statistics
    pub async fn channel_stats(&self, channel: &ChannelId) -> Option<ChannelStats> {
        let channels = self.channels.read().await;

        match channels.get(channel) {
            Some(entry) => Some(entry.read().await.stats()),
            None => None,
        }
    }

    /// Get total number of channels
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for ChannelRouter {
    fn default() -> Self {
        Self::new()
    }
}
