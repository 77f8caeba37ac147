//! Live MPEG-TS relay
//!
//! Encoders push a transport stream over HTTP or HTTPS to
//! `/<secret>/<channel>`; viewers open a WebSocket on `/<anything>/<channel>`
//! and receive the producer's bytes verbatim, one binary message per
//! ingested chunk.
//!
//! ```text
//!   ffmpeg ──POST /secret/cam1──► RelayServer ──► ChannelRouter ──► WebSocket viewers
//!                                     │
//!                                     └──► Recorder (optional)
//! ```
//!
//! # Example
//! ```no_run
//! use ts_relay::{RelayServer, ServerConfig};
//!
//! # async fn example() -> ts_relay::error::Result<()> {
//! let server = RelayServer::bind(ServerConfig::new("secret123")).await?;
//! server.run().await
//! # }
//! ```

pub mod error;
pub mod recorder;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use error::{Error, Result};
pub use registry::{ChannelId, ChannelRouter, ViewerHandle};
pub use server::{ListenerConfig, RelayServer, ServerConfig, TlsConfig};
pub use stats::{RelayStats, StatsSnapshot};
