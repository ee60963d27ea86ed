//! Coordinator message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::domain::{BuildResult, Subject};

/// Requests sent to the Coordinator task
#[derive(Debug)]
pub enum CoordRequest {
    /// Rebuild and reply with the attempt's result
    Reload {
        subject: Subject,
        reply_tx: oneshot::Sender<BuildResult>,
    },

    /// Run the environment probe if it has not run yet
    ProbeEnvironment { reply_tx: oneshot::Sender<bool> },

    /// Reply once everything queued before this request was handled
    Sync { reply_tx: oneshot::Sender<()> },

    /// Get coordinator metrics
    GetMetrics {
        reply_tx: oneshot::Sender<CoordinatorMetrics>,
    },

    /// Stop the coordinator
    Shutdown,
}

impl CoordRequest {
    /// Subject of a reload request
    pub fn subject(&self) -> Option<&Subject> {
        match self {
            CoordRequest::Reload { subject, .. } => Some(subject),
            _ => None,
        }
    }
}

/// Coordinator metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CoordinatorMetrics {
    /// Build attempts started
    pub attempts: u64,
    pub builds_ok: u64,
    pub builds_failed: u64,
    /// Reload requests answered by another request's build
    pub coalesced_requests: u64,
    /// Artifacts written back after a failed build
    pub restores: u64,
    /// Units reloaded after an out-of-band rebuild
    pub units_reloaded: u64,
    pub messages_received: u64,
    /// Last build timestamp, advanced after every attempt
    pub last_build_at: DateTime<Utc>,
}
