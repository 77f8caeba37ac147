//! Recorder sink
//!
//! Appends everything a producer sends to a timestamped file for the lifetime
//! of that producer connection. Appends are queued to a background writer
//! task so a slow disk never stalls the broadcast path; the queue is bounded,
//! and a chunk that does not fit is dropped from the recording only.
//!
//! ```text
//!   IngestSession ── append(chunk) ──► mpsc ──► writer task ──► <millis>-<session>.ts
//!                 ── finish() ────────► (channel closed) ──► flush + close
//! ```

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Extension of recording files (the payload is written verbatim)
pub const RECORDING_EXTENSION: &str = "ts";

/// An open recording for one producer connection
pub struct Recorder {
    path: PathBuf,
    tx: Option<mpsc::Sender<Bytes>>,
    writer: Option<JoinHandle<u64>>,
    dropped: u64,
}

impl Recorder {
    /// Open a new recording file in `dir`
    ///
    /// The directory is created if missing. The file is named after the
    /// current time in milliseconds and the producer's session id. At most
    /// `capacity` chunks wait for the disk at any time.
    pub async fn start(dir: &Path, session_id: u64, capacity: usize) -> Result<Self> {
        fs::create_dir_all(dir).await?;
        let path = dir.join(recording_file_name(session_id));
        let file = File::create(&path).await?;

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let writer = tokio::spawn(write_loop(path.clone(), file, rx));

        tracing::info!(path = %path.display(), session_id = session_id, "Recording started");

        Ok(Self {
            path,
            tx: Some(tx),
            writer: Some(writer),
            dropped: 0,
        })
    }

    /// Path of the recording file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a chunk for writing; never waits for the disk
    ///
    /// Returns `false` when the chunk was not queued.
    pub fn append(&mut self, chunk: Bytes) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };

        match tx.try_send(chunk) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(chunk)) => {
                self.dropped += 1;
                tracing::warn!(
                    path = %self.path.display(),
                    len = chunk.len(),
                    dropped = self.dropped,
                    "Recording queue full, chunk not recorded"
                );
                false
            }
            // Writer has stopped after an error; it already logged why
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Chunks dropped because the writer fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Stop accepting chunks and wait for the file to be flushed and closed
    ///
    /// Returns the number of bytes written.
    pub async fn finish(mut self) -> u64 {
        self.tx.take();
        match self.writer.take() {
            Some(writer) => writer.await.unwrap_or(0),
            None => 0,
        }
    }
}

async fn write_loop(path: PathBuf, file: File, mut rx: mpsc::Receiver<Bytes>) -> u64 {
    let mut out = BufWriter::new(file);
    let mut written = 0u64;

    while let Some(chunk) = rx.recv().await {
        if let Err(e) = out.write_all(&chunk).await {
            tracing::error!(path = %path.display(), error = %e, "Recording write failed, stopping");
            return written;
        }
        written += chunk.len() as u64;
    }

    if let Err(e) = out.flush().await {
        tracing::error!(path = %path.display(), error = %e, "Recording flush failed");
    }

    tracing::info!(path = %path.display(), bytes = written, "Recording closed");
    written
}

fn recording_file_name(session_id: u64) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{}-{}.{}", millis, session_id, RECORDING_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_file_name() {
        let name = recording_file_name(42);

        assert!(name.ends_with("-42.ts"));
        let millis: u128 = name.split('-').next().unwrap().parse().unwrap();
        assert!(millis > 0);
    }

    #[tokio::test]
    async fn test_recorder_writes_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::start(dir.path(), 1, 16).await.unwrap();
        let path = recorder.path().to_path_buf();

        assert!(recorder.append(Bytes::from_static(&[0x47, 0x00])));
        assert!(recorder.append(Bytes::from_static(&[0xAA, 0xBB])));
        let written = recorder.finish().await;

        assert_eq!(written, 4);
        assert_eq!(std::fs::read(&path).unwrap(), vec![0x47, 0x00, 0xAA, 0xBB]);
    }

    #[tokio::test]
    async fn test_recorder_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("recordings").join("today");

        let recorder = Recorder::start(&nested, 7, 16).await.unwrap();
        assert!(recorder.path().starts_with(&nested));
        assert_eq!(recorder.finish().await, 0);
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn test_separate_files_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let a = Recorder::start(dir.path(), 1, 16).await.unwrap();
        let b = Recorder::start(dir.path(), 2, 16).await.unwrap();

        assert_ne!(a.path(), b.path());
        a.finish().await;
        b.finish().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_growing() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::start(dir.path(), 3, 1).await.unwrap();
        let path = recorder.path().to_path_buf();

        // The writer task cannot run until this task yields, so the queue stays full
        assert!(recorder.append(Bytes::from_static(b"kept")));
        assert!(!recorder.append(Bytes::from_static(b"lost")));
        assert!(!recorder.append(Bytes::from_static(b"lost")));
        assert_eq!(recorder.dropped(), 2);

        assert_eq!(recorder.finish().await, 4);
        assert_eq!(std::fs::read(&path).unwrap(), b"kept");
    }
}
