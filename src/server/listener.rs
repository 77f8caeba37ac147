//! Relay server listener
//!
//! Handles the TCP accept loops (one per configured listener), optional TLS
//! termination, and spawns a task per connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::Router;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;

use crate::error::{Error, Result};
use crate::registry::ChannelRouter;
use crate::server::config::ServerConfig;
use crate::server::connection::serve_connection;
use crate::server::routes::relay_router;
use crate::server::tls::load_acceptor;
use crate::session::{SessionContext, SharedState};
use crate::stats::{spawn_stats_logger, RelayStats};

/// A bound listening socket
struct BoundListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
}

/// Relay server
///
/// Created with [`RelayServer::bind`], which performs every fallible startup
/// step (validation, TLS material, binding) so that a misconfigured relay
/// fails before accepting a single connection.
pub struct RelayServer {
    shared: SharedState,
    listeners: Vec<BoundListener>,
    next_session_id: Arc<AtomicU64>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl RelayServer {
    /// Validate the config, load TLS material and bind all listeners
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let mut listeners = Vec::with_capacity(config.listeners.len());
        for listener_config in &config.listeners {
            let tls = match &listener_config.tls {
                Some(tls) => Some(load_acceptor(tls)?),
                None => None,
            };

            let listener = TcpListener::bind(listener_config.bind_addr)
                .await
                .map_err(|e| {
                    Error::Config(format!("cannot bind {}: {}", listener_config.bind_addr, e))
                })?;
            let local_addr = listener.local_addr()?;

            tracing::info!(
                addr = %local_addr,
                scheme = listener_config.scheme(),
                "Relay listening"
            );

            listeners.push(BoundListener {
                listener,
                local_addr,
                tls,
            });
        }

        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Ok(Self {
            shared: SharedState::new(config),
            listeners,
            next_session_id: Arc::new(AtomicU64::new(1)),
            connection_semaphore,
        })
    }

    /// Get a reference to the channel router
    pub fn router(&self) -> &Arc<ChannelRouter> {
        &self.shared.router
    }

    /// Get a reference to the relay stats
    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.shared.stats
    }

    /// Actual bound addresses, in listener order
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(|l| l.local_addr).collect()
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    ///
    /// Stops accepting when `shutdown` completes. Connections already in
    /// progress are left to finish on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let stats_interval = self.shared.config.stats_interval;
        let stats_handle = spawn_stats_logger(Arc::clone(&self.shared.stats), stats_interval);

        let app = relay_router(self.shared.clone());
        let mut accept_loops = JoinSet::new();
        for bound in self.listeners {
            let acceptor = Acceptor {
                shared: self.shared.clone(),
                app: app.clone(),
                next_session_id: Arc::clone(&self.next_session_id),
                connection_semaphore: self.connection_semaphore.clone(),
                tls: bound.tls,
            };
            accept_loops.spawn(acceptor.accept_loop(bound.listener));
        }

        tokio::pin!(shutdown);
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
            }
            Some(joined) = accept_loops.join_next() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Accept loop terminated");
                }
            }
        }

        accept_loops.abort_all();
        if let Some(handle) = stats_handle {
            handle.abort();
        }

        Ok(())
    }
}

/// Per-listener accept state
struct Acceptor {
    shared: SharedState,
    app: Router,
    next_session_id: Arc<AtomicU64>,
    connection_semaphore: Option<Arc<Semaphore>>,
    tls: Option<TlsAcceptor>,
}

impl Acceptor {
    async fn accept_loop(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        // Generate session ID
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        if self.shared.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        // TLS handshake and request head share one deadline
        let deadline = Instant::now() + self.shared.config.header_timeout;
        let app = self.app.clone();
        let tls = self.tls.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let result = match tls {
                Some(acceptor) => {
                    match tokio::time::timeout_at(deadline, acceptor.accept(socket)).await {
                        Ok(Ok(stream)) => {
                            let ctx = SessionContext::new(session_id, peer_addr, true);
                            serve_connection(stream, ctx, app, deadline).await
                        }
                        Ok(Err(e)) => {
                            tracing::debug!(
                                session_id = session_id,
                                peer = %peer_addr,
                                error = %e,
                                "TLS handshake failed"
                            );
                            return;
                        }
                        Err(_) => {
                            tracing::debug!(
                                session_id = session_id,
                                peer = %peer_addr,
                                "TLS handshake timed out"
                            );
                            return;
                        }
                    }
                }
                None => {
                    let ctx = SessionContext::new(session_id, peer_addr, false);
                    serve_connection(socket, ctx, app, deadline).await
                }
            };

            if let Err(e) = result {
                tracing::debug!(
                    session_id = session_id,
                    error = %e,
                    "Connection error"
                );
            }

            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::{ListenerConfig, TlsConfig};
    use std::path::Path;
    use std::time::Duration;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
    use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};
    use tokio_rustls::TlsConnector;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    /// Write a self-signed `localhost` certificate and key into `dir`
    fn self_signed(dir: &Path) -> (TlsConfig, CertificateDer<'static>) {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, generated.cert.pem()).unwrap();
        std::fs::write(&key_path, generated.key_pair.serialize_pem()).unwrap();

        (TlsConfig::new(&cert_path, &key_path), generated.cert.der().clone())
    }

    async fn tls_connect(
        addr: SocketAddr,
        cert: &CertificateDer<'static>,
    ) -> tokio_rustls::client::TlsStream<TcpStream> {
        let mut roots = RootCertStore::empty();
        roots.add(cert.clone()).unwrap();
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let tcp = TcpStream::connect(addr).await.unwrap();
        let server_name = ServerName::try_from("localhost").unwrap();
        TlsConnector::from(Arc::new(config)).connect(server_name, tcp).await.unwrap()
    }

    /// Read until the peer closes or errors
    async fn read_all<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return out,
                Ok(n) => out.extend_from_slice(&buf[..n]),
            }
        }
    }

    #[tokio::test]
    async fn test_bind_reports_local_addrs() {
        let config = ServerConfig::new("s")
            .listeners(vec![ListenerConfig::plain(loopback()), ListenerConfig::plain(loopback())]);

        let server = RelayServer::bind(config).await.unwrap();
        let addrs = server.local_addrs();

        assert_eq!(addrs.len(), 2);
        assert!(addrs.iter().all(|a| a.port() != 0));
        assert_ne!(addrs[0], addrs[1]);
    }

    #[tokio::test]
    async fn test_bind_fails_without_secret() {
        let config = ServerConfig::default().listeners(vec![ListenerConfig::plain(loopback())]);

        assert!(matches!(RelayServer::bind(config).await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_bind_fails_on_bad_tls_material() {
        let tls = TlsConfig::new("/nonexistent/cert.pem", "/nonexistent/key.pem");
        let config = ServerConfig::new("s").listeners(vec![ListenerConfig::tls(loopback(), tls)]);

        assert!(matches!(RelayServer::bind(config).await, Err(Error::Tls(_))));
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let config = ServerConfig::new("s").listeners(vec![ListenerConfig::plain(loopback())]);
        let server = RelayServer::bind(config).await.unwrap();

        server.run_until(async {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_tls_client_releases_its_slot() {
        let dir = tempfile::tempdir().unwrap();
        let (tls, cert) = self_signed(dir.path());
        let config = ServerConfig::new("s")
            .listeners(vec![ListenerConfig::tls(loopback(), tls)])
            .max_connections(1)
            .header_timeout(Duration::from_millis(100))
            .stats_interval(Duration::ZERO);
        let server = RelayServer::bind(config).await.unwrap();
        let addr = server.local_addrs()[0];
        tokio::spawn(server.run());

        // Takes the only slot and never starts the handshake
        let mut silent = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(5), silent.read(&mut buf))
            .await
            .expect("silent client kept its slot");
        assert!(matches!(read, Ok(0) | Err(_)));

        // Let the dropped connection hand its permit back
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut client = tls_connect(addr, &cert).await;
        client
            .write_all(b"POST /wrong/cam1 HTTP/1.1\r\nHost: relay\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        let response = tokio::time::timeout(Duration::from_secs(5), read_all(&mut client))
            .await
            .unwrap();

        assert!(response.starts_with(b"HTTP/1.1 403 Forbidden\r\n"));
    }
}
