use crate::error::FrameError;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

/// Reads text lines and exact-length binary bodies off the same byte queue.
///
/// Both `read_line` and `read_exact` draw from the one `BufReader` wrapping
/// the socket's read half, so a binary body that immediately follows a text
/// frame is consumed exactly, with no bytes lost or re-ordered across the
/// seam between the two read styles.
pub struct FrameReader {
    inner: BufReader<OwnedReadHalf>,
}

impl FrameReader {
    pub fn new(read_half: OwnedReadHalf) -> Self {
        Self {
            inner: BufReader::new(read_half),
        }
    }

    /// Returns the next line with its trailing `\n` (and any `\r`) stripped,
    /// or `None` on a clean EOF with no partial line pending.
    pub async fn read_line(&mut self) -> Result<Option<String>, FrameError> {
        let mut buf = String::new();
        let n = self.inner.read_line(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        while buf.ends_with('\n') || buf.ends_with('\r') {
            buf.pop();
        }
        Ok(Some(buf))
    }

    /// Reads exactly `n` bytes, blocking on the socket as needed.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, FrameError> {
        let mut buf = vec![0u8; n];
        self.inner.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

/// Serializes writes to the socket's write half behind a mutex, so that the
/// session's own reply path and any other task writing to the same
/// connection (the operator console injecting a command, the monitor loop
/// sending a timeout notice) never interleave a partial frame.
#[derive(Clone)]
pub struct FrameWriter {
    inner: Arc<Mutex<OwnedWriteHalf>>,
}

impl FrameWriter {
    pub fn new(write_half: OwnedWriteHalf) -> Self {
        Self {
            inner: Arc::new(Mutex::new(write_half)),
        }
    }

    pub async fn write_line(&self, line: &str) -> Result<(), FrameError> {
        let mut guard = self.inner.lock().await;
        guard.write_all(line.as_bytes()).await?;
        guard.write_all(b"\n").await?;
        guard.flush().await?;
        Ok(())
    }

    pub async fn write_bytes(&self, bytes: &[u8]) -> Result<(), FrameError> {
        let mut guard = self.inner.lock().await;
        guard.write_all(bytes).await?;
        guard.flush().await?;
        Ok(())
    }
}
