//! Error types for the relay

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error as returned by hyper connection drivers
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level relay error
#[derive(Debug, Error)]
pub enum Error {
    /// Socket or file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS material could not be loaded or the handshake failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// HTTP connection failure (malformed request, reset mid-request)
    #[error("HTTP error: {0}")]
    Http(#[source] BoxError),

    /// Producer request body could not be read
    #[error("ingest body error: {0}")]
    Body(#[source] axum::Error),

    /// WebSocket protocol failure on a viewer connection
    #[error("WebSocket error: {0}")]
    WebSocket(#[source] axum::Error),

    /// Invalid configuration detected at startup
    #[error("configuration error: {0}")]
    Config(String),
}
