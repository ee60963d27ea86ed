//! IPC listener for the server side
//!
//! Socket setup and teardown plus the accept loop that forwards reload
//! requests into the coordinator.

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::messages::{ReloadMessage, ReloadResponse};
use crate::coordinator::CoordinatorHandle;

/// Maximum request size; requests only carry a subject
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Create and bind a listener at `socket_path`
///
/// Handles cleanup of stale socket files from previous runs.
pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener_at: creating IPC socket");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener_at: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind IPC socket")?;
    debug!(?socket_path, "create_listener_at: socket bound successfully");

    Ok((listener, socket_path.to_path_buf()))
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Accept connections forever, one task per connection
///
/// A `Shutdown` message is acknowledged and forwarded on `shutdown_tx`; the
/// owner decides how to stop.
pub async fn serve(listener: UnixListener, handle: CoordinatorHandle, shutdown_tx: mpsc::Sender<()>) {
    info!("Reload server accepting connections");
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let handle = handle.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, handle, shutdown_tx).await {
                        warn!(error = %e, "IPC connection failed");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept IPC connection");
            }
        }
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    handle: CoordinatorHandle,
    shutdown_tx: mpsc::Sender<()>,
) -> Result<()> {
    let response = match read_message(&mut stream).await {
        Ok(ReloadMessage::Reload { subject }) => match handle.reload(subject).await {
            Ok(result) => ReloadResponse::from(result),
            Err(e) => ReloadResponse::Error { message: e.to_string() },
        },
        Ok(ReloadMessage::Ping) => ReloadResponse::Pong {
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        Ok(ReloadMessage::Shutdown) => {
            info!("Shutdown requested over IPC");
            let _ = shutdown_tx.send(()).await;
            ReloadResponse::Ok
        }
        Err(e) => ReloadResponse::Error {
            message: format!("{:#}", e),
        },
    };
    send_response(&mut stream, response).await
}

/// Read one request from the stream, refusing anything over the size cap
pub async fn read_message(stream: &mut UnixStream) -> Result<ReloadMessage> {
    let frame = super::read_frame(BufReader::new(stream), MAX_MESSAGE_SIZE)
        .await?
        .ok_or_else(|| eyre::eyre!("Connection closed before a request arrived"))?;

    let msg: ReloadMessage = serde_json::from_slice(&frame).context("Failed to parse IPC message")?;
    debug!(?msg, len = frame.len(), "read_message: parsed request");
    Ok(msg)
}

/// Send a response on the stream
pub async fn send_response(stream: &mut UnixStream, response: ReloadResponse) -> Result<()> {
    let response_json = serde_json::to_string(&response).context("Failed to serialize response")?;
    stream
        .write_all(response_json.as_bytes())
        .await
        .context("Failed to write response")?;
    stream.write_all(b"\n").await.context("Failed to write newline")?;
    stream.flush().await.context("Failed to flush response")?;
    debug!(len = response_json.len(), "send_response: sent response");
    Ok(())
}
