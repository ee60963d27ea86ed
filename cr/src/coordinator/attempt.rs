//! One reload attempt, run on a blocking thread
//!
//! snapshot -> captured build -> restore on failure, or reload stale units
//! when the manifests moved. Nothing here returns an error: every way a build
//! can go wrong becomes an `Error` result with the reason in the output.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::backup::Backup;
use crate::capture::OutputCapture;
use crate::domain::{BuildResult, ReloadStatus, Subject};
use crate::error::BuildError;
use crate::host::ModuleLoader;
use crate::invoker::{BuildInvoker, InvokeOutcome};
use crate::staleness::StalenessDetector;

/// Collaborators shared by every attempt
pub(crate) struct AttemptContext {
    pub(crate) invoker: BuildInvoker,
    pub(crate) detector: StalenessDetector,
    pub(crate) loader: Arc<dyn ModuleLoader>,
}

/// What an attempt did, for the reply and for metrics
#[derive(Debug, Clone)]
pub(crate) struct AttemptReport {
    pub(crate) result: BuildResult,
    pub(crate) restored: bool,
    pub(crate) units_reloaded: usize,
}

impl AttemptReport {
    /// The blocking task itself died before producing a report
    pub(crate) fn task_failed(message: impl Into<String>) -> Self {
        Self {
            result: BuildResult::error(BuildError::TaskFailed(message.into()).to_string()),
            restored: false,
            units_reloaded: 0,
        }
    }
}

pub(crate) fn run_attempt(ctx: &AttemptContext, subject: &Subject, last_build: SystemTime) -> AttemptReport {
    debug!(%subject, "run_attempt: called");
    let backup = Backup::snapshot(ctx.loader.as_ref(), subject);

    let (invoked, mut output) = OutputCapture::wrap(|| {
        panic::catch_unwind(AssertUnwindSafe(|| ctx.invoker.run(&ctx.detector, last_build)))
    });

    let outcome = match invoked {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!(%subject, error = %e, "Build aborted");
            append_line(&mut output, &e.to_string());
            failed()
        }
        Err(payload) => {
            let e = BuildError::Panicked(panic_message(payload.as_ref()));
            warn!(%subject, error = %e, "Build panicked");
            append_line(&mut output, &e.to_string());
            failed()
        }
    };

    if !outcome.status.is_ok() {
        let restored = backup.restore();
        return AttemptReport {
            result: BuildResult::error(output),
            restored,
            units_reloaded: 0,
        };
    }

    let units_reloaded = if outcome.manifests_changed {
        debug!(%subject, "run_attempt: manifests changed since last build");
        ctx.detector.reload_stale_units()
    } else {
        0
    };

    AttemptReport {
        result: BuildResult::ok(output),
        restored: false,
        units_reloaded,
    }
}

fn failed() -> InvokeOutcome {
    InvokeOutcome {
        status: ReloadStatus::Error,
        manifests_changed: false,
    }
}

fn append_line(output: &mut String, line: &str) {
    if !output.is_empty() && !output.ends_with('\n') {
        output.push('\n');
    }
    output.push_str(line);
    output.push('\n');
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
