//! ts-relay - push an MPEG-TS stream over HTTP(S), watch it over WebSocket
//!
//! Run with: ts-relay <secret> [ingest-port] [viewer-port]
//!
//! Feed it with ffmpeg:
//!   ffmpeg -i <input> -f mpegts -codec:v mpeg1video http://localhost:8081/<secret>/<channel>
//!
//! Viewers connect to ws(s)://localhost:8082/<anything>/<channel>.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ts_relay::server::{DEFAULT_INGEST_PORT, DEFAULT_VIEWER_PORT};
use ts_relay::{ListenerConfig, RelayServer, ServerConfig, TlsConfig};

#[derive(Debug, Parser)]
#[command(
    name = "ts-relay",
    version,
    about = "Live MPEG-TS relay: HTTP(S) ingest to WebSocket viewers"
)]
struct Cli {
    /// Shared secret producers must send as the first path segment
    secret: String,

    /// Port for producer (ingest) connections
    #[arg(default_value_t = DEFAULT_INGEST_PORT)]
    ingest_port: u16,

    /// Port for viewer connections (TLS when a certificate is given)
    #[arg(default_value_t = DEFAULT_VIEWER_PORT)]
    viewer_port: u16,

    /// Address to bind both listeners to
    #[arg(long, env = "TS_RELAY_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// PEM certificate chain for the viewer listener
    #[arg(long, env = "TS_RELAY_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key for the viewer listener
    #[arg(long, env = "TS_RELAY_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Record every producer stream into this directory
    #[arg(long, env = "TS_RELAY_RECORD_DIR")]
    record_dir: Option<PathBuf>,

    /// Maximum concurrent connections (0 = unlimited)
    #[arg(long, env = "TS_RELAY_MAX_CONNECTIONS", default_value_t = 0)]
    max_connections: usize,

    /// Seconds between stats log lines (0 disables)
    #[arg(long, env = "TS_RELAY_STATS_INTERVAL", default_value_t = 30)]
    stats_interval: u64,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        let ingest = ListenerConfig::plain((self.bind, self.ingest_port).into());
        let viewer_addr = (self.bind, self.viewer_port).into();
        let viewer = match (self.tls_cert, self.tls_key) {
            (Some(cert), Some(key)) => ListenerConfig::tls(viewer_addr, TlsConfig::new(cert, key)),
            _ => ListenerConfig::plain(viewer_addr),
        };

        let mut config = ServerConfig::new(self.secret)
            .listeners(vec![ingest, viewer])
            .max_connections(self.max_connections)
            .stats_interval(Duration::from_secs(self.stats_interval));
        if let Some(dir) = self.record_dir {
            config = config.record_to(dir);
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.into_config();

    let server = RelayServer::bind(config)
        .await
        .context("failed to start relay")?;

    let addrs = server.local_addrs();
    tracing::info!(
        ingest = %addrs[0],
        viewer = %addrs[1],
        "Awaiting MPEG-TS streams on /<secret>/<channel> and WebSocket viewers on /<any>/<channel>"
    );

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
