//! IPC client for talking to a running reload server

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::get_socket_path;
use super::messages::{ReloadMessage, ReloadResponse};
use crate::domain::{BuildResult, ReloadStatus};

/// Timeout for connecting and for non-reload requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum response size; build output can be long
const MAX_RESPONSE_SIZE: usize = 8 * 1024 * 1024;

/// Client for the reload server
#[derive(Debug, Clone)]
pub struct ReloadClient {
    socket_path: PathBuf,
    timeout: Duration,
    /// Wait for a reload reply this long; `None` waits for the build to finish
    reload_timeout: Option<Duration>,
}

impl Default for ReloadClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadClient {
    /// Create a new client with the default socket path
    pub fn new() -> Self {
        Self::with_socket_path(get_socket_path())
    }

    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_TIMEOUT,
            reload_timeout: None,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Give up on reload replies after `timeout`
    pub fn with_reload_timeout(mut self, timeout: Duration) -> Self {
        self.reload_timeout = Some(timeout);
        self
    }

    /// Check if the server socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Reload on behalf of `subject`; a failed build is `Ok` with status `Error`
    pub async fn reload(&self, subject: &str) -> Result<BuildResult> {
        debug!(%subject, "ReloadClient: requesting reload");
        let msg = ReloadMessage::Reload {
            subject: subject.to_string(),
        };
        match self.send_message(msg, self.reload_timeout).await? {
            ReloadResponse::Reload { status, output, .. } => Ok(match status {
                ReloadStatus::Ok => BuildResult::ok(output),
                ReloadStatus::Error => BuildResult::error(output),
            }),
            ReloadResponse::Error { message } => Err(eyre::eyre!("Server error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected response")),
        }
    }

    /// Check if the server is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("ReloadClient: pinging server");
        match self.send_message(ReloadMessage::Ping, Some(self.timeout)).await? {
            ReloadResponse::Pong { version } => Ok(version),
            ReloadResponse::Error { message } => Err(eyre::eyre!("Server error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected response")),
        }
    }

    /// Request the server to stop
    pub async fn shutdown(&self) -> Result<()> {
        debug!("ReloadClient: requesting shutdown");
        match self.send_message(ReloadMessage::Shutdown, Some(self.timeout)).await? {
            ReloadResponse::Ok => Ok(()),
            ReloadResponse::Error { message } => Err(eyre::eyre!("Server error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected response")),
        }
    }

    async fn send_message(&self, msg: ReloadMessage, read_timeout: Option<Duration>) -> Result<ReloadResponse> {
        debug!(?self.socket_path, ?msg, "ReloadClient: sending message");

        let mut stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to reload socket")?;

        let msg_json = serde_json::to_string(&msg).context("Failed to serialize message")?;
        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(msg_json.as_bytes())
                .await
                .context("Failed to write message")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        let read = super::read_frame(BufReader::new(&mut stream), MAX_RESPONSE_SIZE);
        let frame = match read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, read).await.context("Read timeout")??,
            None => read.await?,
        }
        .ok_or_else(|| eyre::eyre!("Server closed the connection without a response"))?;

        let response: ReloadResponse = serde_json::from_slice(&frame).context("Failed to parse server response")?;
        debug!(?response, "ReloadClient: received response");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncBufReadExt;

    #[test]
    fn test_client_default() {
        let client = ReloadClient::default();
        assert!(client.socket_path.ends_with("reload.sock"));
        assert!(client.reload_timeout.is_none());
    }

    #[test]
    fn test_client_with_timeouts() {
        let client = ReloadClient::new()
            .with_timeout(Duration::from_secs(10))
            .with_reload_timeout(Duration::from_secs(60));
        assert_eq!(client.timeout, Duration::from_secs(10));
        assert_eq!(client.reload_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_socket_exists_false() {
        let temp = TempDir::new().unwrap();
        let client = ReloadClient::with_socket_path(temp.path().join("nonexistent.sock"));
        assert!(!client.socket_exists());
    }

    #[tokio::test]
    async fn test_reload_without_server_fails() {
        let temp = TempDir::new().unwrap();
        let client = ReloadClient::with_socket_path(temp.path().join("nonexistent.sock"));
        assert!(client.reload("web").await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_response_is_rejected() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("big.sock");
        let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = String::new();
            let _ = BufReader::new(&mut stream).read_line(&mut request).await;
            let output = vec![b'x'; MAX_RESPONSE_SIZE + 1024];
            let _ = stream.write_all(&output).await;
        });

        let client = ReloadClient::with_socket_path(socket_path);
        let err = client.ping().await.unwrap_err();
        assert!(format!("{:#}", err).contains("byte limit"));
    }
}
