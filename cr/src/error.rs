//! Error types for reload attempts and coordinator calls

use std::time::Duration;

use thiserror::Error;

use crate::domain::StepName;

/// A build attempt that ended outside the normal pass/fail protocol
///
/// These never reach a caller as `Err`: the coordinator folds them into an
/// `Error` build result with the message appended to the captured output.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("could not prepare build output directory: {0}")]
    OutputStructure(String),

    #[error("build step {step} aborted: {message}")]
    StepAborted { step: StepName, message: String },

    #[error("build panicked: {0}")]
    Panicked(String),

    #[error("build task failed: {0}")]
    TaskFailed(String),
}

/// Errors seen by callers of the coordinator handle
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Coordinator channel closed")]
    ChannelClosed,

    #[error("Timed out after {0:?} waiting for reload")]
    Timeout(Duration),
}
