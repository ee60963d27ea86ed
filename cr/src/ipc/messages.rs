//! IPC message types
//!
//! JSON-over-newline protocol: one line of JSON per message, one message per
//! connection in each direction.

use serde::{Deserialize, Serialize};

use crate::domain::{BuildResult, Headline, ReloadStatus};

/// Messages from callers to the reload server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ReloadMessage {
    /// Rebuild on behalf of a subject and report the result
    Reload { subject: String },

    /// Ping to check if the server is alive
    Ping,

    /// Request the server to stop
    Shutdown,
}

/// Responses from the reload server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ReloadResponse {
    /// Outcome of a reload; `headline` is set only for failed builds
    Reload {
        status: ReloadStatus,
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headline: Option<Headline>,
    },

    /// Pong response to ping
    Pong { version: String },

    /// Acknowledgment
    Ok,

    /// The request could not be served
    Error { message: String },
}

impl From<BuildResult> for ReloadResponse {
    fn from(result: BuildResult) -> Self {
        let headline = (!result.is_ok()).then(|| result.headline());
        ReloadResponse::Reload {
            status: result.status,
            output: result.output,
            headline,
        }
    }
}
