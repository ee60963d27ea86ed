//! CoordinatorHandle - Client interface for reload callers

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::messages::{CoordRequest, CoordinatorMetrics};
use crate::domain::{BuildResult, Subject};
use crate::error::CoordinatorError;

/// Handle for callers to interact with the Coordinator
///
/// Cheap to clone; every clone feeds the same inbox.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordRequest>,
    reply_timeout: Option<Duration>,
}

impl CoordinatorHandle {
    pub(crate) fn new(tx: mpsc::Sender<CoordRequest>, reply_timeout: Option<Duration>) -> Self {
        Self { tx, reply_timeout }
    }

    /// Reload on behalf of `subject` and wait for the attempt's result
    ///
    /// Waits indefinitely unless the coordinator was configured with a reply
    /// timeout. A failed build is `Ok` with status `Error`.
    pub async fn reload(&self, subject: impl Into<Subject>) -> Result<BuildResult, CoordinatorError> {
        match self.reply_timeout {
            Some(timeout) => self.reload_with_timeout(subject, timeout).await,
            None => {
                let subject = subject.into();
                debug!(%subject, "CoordinatorHandle::reload: called");
                self.send_reload(subject).await?.await.map_err(|_| CoordinatorError::ChannelClosed)
            }
        }
    }

    /// Like [`reload`](Self::reload) but gives up after `timeout`
    ///
    /// The build itself is not cancelled; its reply to this caller is dropped.
    pub async fn reload_with_timeout(
        &self,
        subject: impl Into<Subject>,
        timeout: Duration,
    ) -> Result<BuildResult, CoordinatorError> {
        let subject = subject.into();
        debug!(%subject, ?timeout, "CoordinatorHandle::reload_with_timeout: called");
        let reply_rx = self.send_reload(subject).await?;
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(reply) => reply.map_err(|_| CoordinatorError::ChannelClosed),
            Err(_) => Err(CoordinatorError::Timeout(timeout)),
        }
    }

    async fn send_reload(&self, subject: Subject) -> Result<oneshot::Receiver<BuildResult>, CoordinatorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CoordRequest::Reload { subject, reply_tx })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        Ok(reply_rx)
    }

    /// Run the one-time environment probe; true when the fast path is usable
    pub async fn probe_environment(&self) -> Result<bool, CoordinatorError> {
        debug!("CoordinatorHandle::probe_environment: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CoordRequest::ProbeEnvironment { reply_tx })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CoordinatorError::ChannelClosed)
    }

    /// Wait until every request sent before this one has been handled
    pub async fn sync(&self) -> Result<(), CoordinatorError> {
        debug!("CoordinatorHandle::sync: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CoordRequest::Sync { reply_tx })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CoordinatorError::ChannelClosed)
    }

    /// Get current coordinator metrics
    pub async fn metrics(&self) -> Result<CoordinatorMetrics, CoordinatorError> {
        debug!("CoordinatorHandle::metrics: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CoordRequest::GetMetrics { reply_tx })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CoordinatorError::ChannelClosed)
    }

    /// Request shutdown of the Coordinator
    pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
        debug!("CoordinatorHandle::shutdown: called");
        self.tx
            .send(CoordRequest::Shutdown)
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)
    }

    /// Requests sitting in the inbox right now
    pub fn pending_requests(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether the coordinator task has stopped receiving
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
