//! Channel registry for pub/sub routing
//!
//! The registry maps channel identifiers to the viewers attached to them and
//! routes every ingested chunk to the viewers of its channel.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<ChannelRouter>
//!                     ┌─────────────────────────┐
//!                     │ channels: HashMap<Id,   │
//!                     │   ChannelEntry {        │
//!                     │     viewers: Vec<       │
//!                     │       ViewerHandle>,    │
//!                     │     producers,          │
//!                     │   }                     │
//!                     │ >                       │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!    [Producer]              [Viewer]                [Viewer]
//!    body chunk              outbox.recv()           outbox.recv()
//!         │                       │                       │
//!         └──► router.broadcast() ──► try_send() ──► WebSocket
//! ```
//!
//! # Zero-Copy Design
//!
//! `bytes::Bytes` uses reference counting, so every viewer outbox holds the
//! same allocation as the producer's read buffer.

pub mod channel;
pub mod entry;
pub mod store;
pub mod viewer;

pub use channel::ChannelId;
pub use entry::{ChannelStats, Delivery};
pub use store::ChannelRouter;
pub use viewer::{ReadyState, SendFailure, ViewerHandle};
