//! Caller adapter over a Unix Domain Socket
//!
//! A server front-end (one call per incoming request) connects, sends a
//! `Reload` message for its subject and renders the answer. Each connection is
//! served by its own task, so callers queue into the coordinator concurrently
//! and same-subject callers can share one build.

use std::path::PathBuf;

use eyre::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

pub mod client;
pub mod listener;
pub mod messages;

pub use client::ReloadClient;
pub use listener::{cleanup_socket, create_listener_at, serve};
pub use messages::{ReloadMessage, ReloadResponse};

/// Get the default socket path for the reload server
pub fn get_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("codereload")
        .join("reload.sock")
}

/// Read one newline-terminated frame of at most `limit` bytes
///
/// At most `limit + 1` bytes are pulled from `reader`, so an oversized frame is
/// rejected without buffering the rest of it. `None` means the peer closed the
/// stream before sending anything.
pub(crate) async fn read_frame<R>(reader: R, limit: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut bounded = reader.take(limit as u64 + 1);
    let mut frame = Vec::new();
    let n = bounded
        .read_until(b'\n', &mut frame)
        .await
        .context("Failed to read IPC frame")?;

    if n == 0 {
        return Ok(None);
    }
    if n > limit {
        return Err(eyre::eyre!("Frame exceeds the {} byte limit", limit));
    }
    Ok(Some(frame))
}
