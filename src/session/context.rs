//! Session context
//!
//! Per-connection identity plus the process-wide state every session needs.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::registry::ChannelRouter;
use crate::server::config::ServerConfig;
use crate::stats::RelayStats;

/// Identity of one accepted connection
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Unique session ID
    pub session_id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Whether the connection arrived over TLS
    pub secure: bool,
}

impl SessionContext {
    /// Create a new context
    pub fn new(session_id: u64, peer_addr: SocketAddr, secure: bool) -> Self {
        Self {
            session_id,
            peer_addr,
            secure,
        }
    }
}

/// State shared by all sessions
///
/// Cheap to clone; the router and stats are injected here rather than
/// reached through globals.
#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<ServerConfig>,
    pub router: Arc<ChannelRouter>,
    pub stats: Arc<RelayStats>,
}

impl SharedState {
    /// Build shared state around a fresh router
    pub fn new(config: ServerConfig) -> Self {
        let stats = Arc::new(RelayStats::new());
        Self {
            config: Arc::new(config),
            router: Arc::new(ChannelRouter::with_stats(Arc::clone(&stats))),
            stats,
        }
    }
}
