//! Viewer handles
//!
//! The router never owns a viewer's socket. It holds a [`ViewerHandle`]: the
//! sending half of the viewer's outbox plus the readiness state that the
//! viewer session updates as its connection moves from open to closed.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Readiness state of a viewer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Connection is open and accepting chunks
    Open,
    /// Close has started; no further chunks are delivered
    Closing,
    /// Connection is gone
    Closed,
}

impl ReadyState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ReadyState::Open,
            1 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ReadyState::Open => 0,
            ReadyState::Closing => 1,
            ReadyState::Closed => 2,
        }
    }
}

/// Why a chunk could not be queued for a viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// Viewer is not in the open state
    NotOpen,
    /// Outbox is full; the viewer is not draining fast enough
    Full,
    /// Viewer session has dropped its receiver
    Closed,
}

/// Handle to a viewer connection, as held by the router
///
/// Cloning is cheap; all clones share the same outbox and readiness state.
/// Two handles are equal when they refer to the same viewer.
#[derive(Debug, Clone)]
pub struct ViewerHandle {
    id: u64,
    tx: mpsc::Sender<Bytes>,
    state: Arc<AtomicU8>,
}

impl ViewerHandle {
    /// Create a handle and the receiving end of its outbox
    ///
    /// The session reads chunks from the returned receiver and writes them to
    /// its socket.
    pub fn new(id: u64, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id,
            tx,
            state: Arc::new(AtomicU8::new(ReadyState::Open.as_u8())),
        };
        (handle, rx)
    }

    /// Viewer id (unique per process)
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current readiness state
    pub fn state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the viewer accepts chunks
    pub fn is_open(&self) -> bool {
        self.state() == ReadyState::Open && !self.tx.is_closed()
    }

    /// Move to `Closing`; a closed viewer stays closed
    pub fn mark_closing(&self) {
        let _ = self.state.compare_exchange(
            ReadyState::Open.as_u8(),
            ReadyState::Closing.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Move to `Closed`
    pub fn mark_closed(&self) {
        self.state.store(ReadyState::Closed.as_u8(), Ordering::Release);
    }

    /// Queue a chunk without waiting
    ///
    /// `Bytes` is reference counted, so every viewer shares the producer's
    /// allocation.
    pub fn try_send(&self, chunk: Bytes) -> Result<(), SendFailure> {
        if self.state() != ReadyState::Open {
            return Err(SendFailure::NotOpen);
        }
        self.tx.try_send(chunk).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendFailure::Full,
            mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
        })
    }
}

impl PartialEq for ViewerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ViewerHandle {}
