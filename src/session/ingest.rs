//! Producer (ingest) session
//!
//! A producer opens `/<secret>/<channel>` and streams its payload as the
//! request body for as long as it runs. Every body chunk is broadcast to the
//! channel's viewers as-is and, when recording is enabled, appended to this
//! connection's recording file.

use axum::body::Body;
use axum::http::StatusCode;
use futures_util::StreamExt;

use super::context::{SessionContext, SharedState};
use crate::error::Error;
use crate::recorder::Recorder;
use crate::registry::ChannelId;

/// Compare secrets without short-circuiting on the first differing byte
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// One producer request
pub struct IngestSession {
    ctx: SessionContext,
    shared: SharedState,
    channel: ChannelId,
    chunks: u64,
    bytes: u64,
}

impl IngestSession {
    pub fn new(ctx: SessionContext, shared: SharedState, channel: ChannelId) -> Self {
        Self {
            ctx,
            shared,
            channel,
            chunks: 0,
            bytes: 0,
        }
    }

    /// Channel this producer feeds
    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Authorize and relay the request body until the producer goes away
    ///
    /// A wrong secret is answered with `403` before the body is touched, so
    /// nothing is relayed. Returns the status for the (best-effort) response.
    pub async fn run(mut self, secret: &str, body: Body) -> StatusCode {
        if !secrets_match(secret, &self.shared.config.secret) {
            tracing::warn!(
                session_id = self.ctx.session_id,
                peer = %self.ctx.peer_addr,
                "Failed stream connection: wrong secret"
            );
            self.shared.stats.producer_rejected();
            return StatusCode::FORBIDDEN;
        }

        tracing::info!(
            session_id = self.ctx.session_id,
            peer = %self.ctx.peer_addr,
            channel = %self.channel,
            secure = self.ctx.secure,
            "Stream connected"
        );

        self.shared.stats.producer_connected();
        self.shared.router.bind_producer(&self.channel).await;

        let mut recorder = match &self.shared.config.record_dir {
            Some(dir) => {
                let capacity = self.shared.config.record_queue_capacity;
                match Recorder::start(dir, self.ctx.session_id, capacity).await {
                    Ok(recorder) => Some(recorder),
                    Err(e) => {
                        tracing::error!(
                            session_id = self.ctx.session_id,
                            error = %e,
                            "Cannot open recording, relaying without it"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        // Polling the body sends `100 Continue` to producers that asked for it
        let mut stream = body.into_data_stream();
        let outcome = loop {
            match stream.next().await {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    self.chunks += 1;
                    self.bytes += chunk.len() as u64;
                    self.shared.stats.add_ingested(chunk.len());

                    if let Some(recorder) = &mut recorder {
                        recorder.append(chunk.clone());
                    }
                    self.shared.router.broadcast(&self.channel, chunk).await;
                }
                Some(Err(e)) => break Err(Error::Body(e)),
                None => break Ok(()),
            }
        };

        if let Some(recorder) = recorder {
            recorder.finish().await;
        }
        self.shared.router.release_producer(&self.channel).await;
        self.shared.stats.producer_disconnected();

        tracing::info!(
            session_id = self.ctx.session_id,
            channel = %self.channel,
            chunks = self.chunks,
            bytes = self.bytes,
            "Stream closed"
        );

        match outcome {
            Ok(()) => StatusCode::OK,
            Err(e) => {
                tracing::debug!(session_id = self.ctx.session_id, error = %e, "Stream read error");
                StatusCode::BAD_REQUEST
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ViewerHandle;
    use crate::server::config::ServerConfig;
    use bytes::Bytes;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn ctx() -> SessionContext {
        SessionContext::new(1, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 50000), false)
    }

    fn chunked(chunks: &[&'static [u8]]) -> Body {
        let items: Vec<std::io::Result<Bytes>> =
            chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
        Body::from_stream(futures_util::stream::iter(items))
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("secret123", "secret123"));
        assert!(!secrets_match("secret124", "secret123"));
        assert!(!secrets_match("secret", "secret123"));
        assert!(!secrets_match("", "secret123"));
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let shared = SharedState::new(ServerConfig::new("secret123"));
        let (viewer, mut rx) = ViewerHandle::new(9, 16);
        shared.router.register(&ChannelId::new("cam1"), viewer).await;

        let session = IngestSession::new(ctx(), shared.clone(), ChannelId::new("cam1"));
        let status = session.run("wrongsecret", chunked(&[&[0xAA, 0xBB]])).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(rx.try_recv().is_err());
        let snap = shared.stats.snapshot();
        assert_eq!(snap.producers_rejected, 1);
        assert_eq!(snap.producers_total, 0);
    }

    #[tokio::test]
    async fn test_relays_body_to_viewer() {
        let shared = SharedState::new(ServerConfig::new("secret123"));
        let (viewer, mut rx) = ViewerHandle::new(9, 16);
        shared.router.register(&ChannelId::new("cam1"), viewer).await;

        let session = IngestSession::new(ctx(), shared.clone(), ChannelId::new("cam1"));
        let status = session.run("secret123", chunked(&[&[0xAA], &[], &[0xBB]])).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(&[0xAA]));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(&[0xBB]));
        assert!(rx.try_recv().is_err());
        let snap = shared.stats.snapshot();
        assert_eq!(snap.bytes_ingested, 2);
        assert_eq!(snap.chunks_relayed, 2);
        assert_eq!(snap.producers_active, 0);
        assert_eq!(snap.producers_total, 1);
    }

    #[tokio::test]
    async fn test_body_error_ends_session() {
        let shared = SharedState::new(ServerConfig::new("s"));
        let items: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"ok")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let body = Body::from_stream(futures_util::stream::iter(items));

        let session = IngestSession::new(ctx(), shared.clone(), ChannelId::new("cam1"));
        let status = session.run("s", body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(shared.stats.snapshot().producers_active, 0);
        assert_eq!(shared.router.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_producer_channel_released() {
        let shared = SharedState::new(ServerConfig::new("s"));

        let session = IngestSession::new(ctx(), shared.clone(), ChannelId::new("cam1"));
        assert_eq!(session.run("s", Body::empty()).await, StatusCode::OK);

        assert_eq!(shared.router.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_recording_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedState::new(ServerConfig::new("s").record_to(dir.path()));

        let session = IngestSession::new(ctx(), shared, ChannelId::new("cam1"));
        let status = session.run("s", chunked(&[&[0x47, 0x01], &[0x02]])).await;
        assert_eq!(status, StatusCode::OK);

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let path = files[0].as_ref().unwrap().path();
        assert_eq!(std::fs::read(path).unwrap(), vec![0x47, 0x01, 0x02]);
    }
}
