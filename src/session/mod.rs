//! Per-connection sessions
//!
//! Every accepted connection becomes exactly one session once its request
//! head has been read:
//! - [`IngestSession`] for producers pushing a stream
//! - [`ViewerSession`] for WebSocket viewers

pub mod context;
pub mod ingest;
pub mod viewer;

pub use context::{SessionContext, SharedState};
pub use ingest::IngestSession;
pub use viewer::ViewerSession;
