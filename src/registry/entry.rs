//! Channel entry and stats types
//!
//! This module defines the per-channel state stored in the registry.

use std::time::Instant;

use bytes::Bytes;

use super::viewer::{SendFailure, ViewerHandle};

/// Outcome of fanning one chunk out to a channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Viewers the chunk was queued for
    pub delivered: usize,
    /// Viewers skipped because they were not open
    pub skipped: usize,
    /// Viewers whose outbox rejected the chunk
    pub failed: usize,
}

/// Entry for a single channel in the registry
#[derive(Debug)]
pub struct ChannelEntry {
    /// Attached viewers, in registration order
    viewers: Vec<ViewerHandle>,

    /// Number of producer connections bound to this channel
    producers: u32,

    /// Chunks broadcast on this channel
    chunks: u64,

    /// Bytes broadcast on this channel
    bytes: u64,

    /// When the entry was created
    created_at: Instant,
}

impl ChannelEntry {
    pub(super) fn new() -> Self {
        Self {
            viewers: Vec::new(),
            producers: 0,
            chunks: 0,
            bytes: 0,
            created_at: Instant::now(),
        }
    }

    /// Number of attached viewers
    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Number of bound producers
    pub fn producer_count(&self) -> u32 {
        self.producers
    }

    /// Whether nothing references this channel any more
    pub fn is_unused(&self) -> bool {
        self.viewers.is_empty() && self.producers == 0
    }

    pub(super) fn push_viewer(&mut self, viewer: ViewerHandle) {
        self.viewers.push(viewer);
    }

    /// Remove the first viewer with the given id
    pub(super) fn remove_viewer(&mut self, viewer_id: u64) -> Option<ViewerHandle> {
        let pos = self.viewers.iter().position(|v| v.id() == viewer_id)?;
        Some(self.viewers.remove(pos))
    }

    pub(super) fn bind_producer(&mut self) {
        self.producers += 1;
    }

    pub(super) fn release_producer(&mut self) {
        self.producers = self.producers.saturating_sub(1);
    }

    /// Queue a chunk for every open viewer
    ///
    /// Each send is independent: a full or closed outbox only affects that
    /// viewer. `on_failure` is invoked once per viewer that rejected the chunk.
    pub(super) fn fan_out<F>(&mut self, chunk: &Bytes, mut on_failure: F) -> Delivery
    where
        F: FnMut(&ViewerHandle, SendFailure),
    {
        self.chunks += 1;
        self.bytes += chunk.len() as u64;

        let mut delivery = Delivery::default();
        for viewer in &self.viewers {
            if !viewer.is_open() {
                delivery.skipped += 1;
                continue;
            }
            match viewer.try_send(chunk.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(SendFailure::NotOpen) | Err(SendFailure::Closed) => delivery.skipped += 1,
                Err(failure) => {
                    delivery.failed += 1;
                    on_failure(viewer, failure);
                }
            }
        }
        delivery
    }

    pub(super) fn stats(&self) -> ChannelStats {
        ChannelStats {
            viewer_count: self.viewers.len(),
            open_viewers: self.viewers.iter().filter(|v| v.is_open()).count(),
            producer_count: self.producers,
            chunks_relayed: self.chunks,
            bytes_relayed: self.bytes,
            age: self.created_at.elapsed(),
        }
    }
}

/// Statistics for a channel
#[derive(Debug, Clone)]
pub struct ChannelStats {
    /// Registered viewers
    pub viewer_count: usize,
    /// Registered viewers currently in the open state
    pub open_viewers: usize,
    /// Bound producers
    pub producer_count: u32,
    /// Chunks broadcast on this channel
    pub chunks_relayed: u64,
    /// Bytes broadcast on this channel
    pub bytes_relayed: u64,
    /// Time since the entry was created
    pub age: std::time::Duration,
}
