//! Server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default port for producer (ingest) connections
pub const DEFAULT_INGEST_PORT: u16 = 8081;

/// Default port for viewer connections
pub const DEFAULT_VIEWER_PORT: u16 = 8082;

/// PEM certificate chain and private key for a TLS listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Certificate chain (PEM)
    pub cert_path: PathBuf,
    /// Private key (PEM; PKCS#8, PKCS#1 or SEC1)
    pub key_path: PathBuf,
}

impl TlsConfig {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }
}

/// One listening socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Terminate TLS on this listener
    pub tls: Option<TlsConfig>,
}

impl ListenerConfig {
    /// Plain TCP listener
    pub fn plain(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            tls: None,
        }
    }

    /// TLS listener
    pub fn tls(bind_addr: SocketAddr, tls: TlsConfig) -> Self {
        Self {
            bind_addr,
            tls: Some(tls),
        }
    }

    /// Scheme name for logs
    pub fn scheme(&self) -> &'static str {
        if self.tls.is_some() {
            "https"
        } else {
            "http"
        }
    }
}

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listening sockets; every listener accepts both ingest and viewer requests
    pub listeners: Vec<ListenerConfig>,

    /// Shared secret producers must put in the first path segment
    pub secret: String,

    /// Maximum concurrent connections across all listeners (0 = unlimited)
    pub max_connections: usize,

    /// TLS handshake and request head must both complete within this time
    pub header_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Chunks queued per viewer before new chunks are dropped for it
    pub viewer_queue_capacity: usize,

    /// Record each producer stream into this directory
    pub record_dir: Option<PathBuf>,

    /// Chunks queued per recording before new chunks are dropped for it
    pub record_queue_capacity: usize,

    /// Stats log interval (zero disables)
    pub stats_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listeners: vec![
                ListenerConfig::plain(SocketAddr::from(([0, 0, 0, 0], DEFAULT_INGEST_PORT))),
                ListenerConfig::plain(SocketAddr::from(([0, 0, 0, 0], DEFAULT_VIEWER_PORT))),
            ],
            secret: String::new(),
            max_connections: 0, // Unlimited
            header_timeout: Duration::from_secs(10),
            tcp_nodelay: true, // Important for low latency
            viewer_queue_capacity: 1024,
            record_dir: None,
            record_queue_capacity: 4096,
            stats_interval: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Create a config with the given shared secret and default listeners
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ..Default::default()
        }
    }

    /// Replace all listeners
    pub fn listeners(mut self, listeners: Vec<ListenerConfig>) -> Self {
        self.listeners = listeners;
        self
    }

    /// Add a listener
    pub fn listener(mut self, listener: ListenerConfig) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set request head timeout
    pub fn header_timeout(mut self, timeout: Duration) -> Self {
        self.header_timeout = timeout;
        self
    }

    /// Set per-viewer queue capacity (at least 1)
    pub fn viewer_queue_capacity(mut self, capacity: usize) -> Self {
        self.viewer_queue_capacity = capacity.max(1);
        self
    }

    /// Record producer streams into `dir`
    pub fn record_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.record_dir = Some(dir.into());
        self
    }

    /// Set per-recording queue capacity (at least 1)
    pub fn record_queue_capacity(mut self, capacity: usize) -> Self {
        self.record_queue_capacity = capacity.max(1);
        self
    }

    /// Set stats log interval
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Check the configuration before binding anything
    pub fn validate(&self) -> Result<()> {
        if self.secret.is_empty() {
            return Err(Error::Config("shared secret must not be empty".into()));
        }
        if self.listeners.is_empty() {
            return Err(Error::Config("no listeners configured".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.listeners.len(), 2);
        assert_eq!(config.listeners[0].bind_addr.port(), DEFAULT_INGEST_PORT);
        assert_eq!(config.listeners[1].bind_addr.port(), DEFAULT_VIEWER_PORT);
        assert!(config.listeners.iter().all(|l| l.tls.is_none()));
        assert_eq!(config.max_connections, 0);
        assert!(config.tcp_nodelay);
        assert!(config.record_dir.is_none());
    }

    #[test]
    fn test_new_sets_secret() {
        let config = ServerConfig::new("secret123");

        assert_eq!(config.secret, "secret123");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_secret() {
        let config = ServerConfig::default();

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_no_listeners() {
        let config = ServerConfig::new("s").listeners(Vec::new());

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_listener_scheme() {
        let addr: SocketAddr = "127.0.0.1:8443".parse().unwrap();

        assert_eq!(ListenerConfig::plain(addr).scheme(), "http");
        assert_eq!(
            ListenerConfig::tls(addr, TlsConfig::new("cert.pem", "key.pem")).scheme(),
            "https"
        );
    }

    #[test]
    fn test_builder_viewer_queue_capacity_min() {
        let config = ServerConfig::default().viewer_queue_capacity(0);

        assert_eq!(config.viewer_queue_capacity, 1);

        let config = ServerConfig::default().record_queue_capacity(0);
        assert_eq!(config.record_queue_capacity, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = ServerConfig::new("s")
            .listeners(vec![ListenerConfig::plain(addr)])
            .max_connections(50)
            .header_timeout(Duration::from_secs(5))
            .viewer_queue_capacity(64)
            .record_to("/tmp/recordings")
            .stats_interval(Duration::ZERO);

        assert_eq!(config.listeners, vec![ListenerConfig::plain(addr)]);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.header_timeout, Duration::from_secs(5));
        assert_eq!(config.viewer_queue_capacity, 64);
        assert_eq!(config.record_dir, Some(PathBuf::from("/tmp/recordings")));
        assert!(config.stats_interval.is_zero());
    }
}
