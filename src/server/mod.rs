//! Relay server
//!
//! Listeners accept connections, optionally terminate TLS, and serve the
//! relay router over each one. Plain and TLS listeners share the same
//! connection handling.

pub mod config;
pub mod connection;
pub mod listener;
pub mod routes;
pub mod tls;

pub use config::{
    ListenerConfig, ServerConfig, TlsConfig, DEFAULT_INGEST_PORT, DEFAULT_VIEWER_PORT,
};
pub use connection::serve_connection;
pub use listener::RelayServer;
pub use routes::relay_router;
