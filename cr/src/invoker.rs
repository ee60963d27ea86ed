//! BuildInvoker - run the configured steps and aggregate one pass/fail result
//!
//! Order of an invocation:
//!
//! 1. stale-config pre-check; stale config files fail the attempt before any step
//! 2. ensure the build output directory structure exists
//! 3. re-enable then run every configured step, even after one failed
//! 4. run the finalize step only when every step succeeded
//!
//! Runs inside the capture scope, so anything written through
//! [`capture::print`] ends up in the caller's output.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use crate::capture;
use crate::domain::{ReloadStatus, StepName, StepStatus};
use crate::error::BuildError;
use crate::host::BuildBackend;
use crate::staleness::StalenessDetector;

/// What one invocation produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeOutcome {
    pub status: ReloadStatus,

    /// Manifests were touched after the last build and the build succeeded
    pub manifests_changed: bool,
}

impl InvokeOutcome {
    fn failed() -> Self {
        Self {
            status: ReloadStatus::Error,
            manifests_changed: false,
        }
    }
}

pub struct BuildInvoker {
    backend: Arc<dyn BuildBackend>,
    steps: Vec<StepName>,
    finalize_step: Option<StepName>,
}

impl BuildInvoker {
    pub fn new(backend: Arc<dyn BuildBackend>, steps: Vec<StepName>, finalize_step: Option<StepName>) -> Self {
        Self {
            backend,
            steps,
            finalize_step,
        }
    }

    /// Run one build against the backend
    ///
    /// `Err` means the step machinery itself broke; a step that merely failed
    /// is `Ok` with status `Error`.
    pub fn run(&self, detector: &StalenessDetector, last_build: SystemTime) -> Result<InvokeOutcome, BuildError> {
        debug!(steps = self.steps.len(), "BuildInvoker::run: called");

        let stale = detector.stale_config_files();
        if !stale.is_empty() {
            debug!(count = stale.len(), "BuildInvoker::run: stale config, skipping build");
            capture::print(&stale_config_message(&stale));
            return Ok(InvokeOutcome::failed());
        }

        self.backend
            .ensure_output_structure()
            .map_err(|e| BuildError::OutputStructure(format!("{:#}", e)))?;

        let mut all_ok = true;
        for step in &self.steps {
            if self.run_one(step)? == StepStatus::Error {
                all_ok = false;
            }
        }

        if all_ok && let Some(finalize) = &self.finalize_step {
            debug!(step = %finalize, "BuildInvoker::run: running finalize step");
            if self.run_one(finalize)? == StepStatus::Error {
                all_ok = false;
            }
        }

        if !all_ok {
            debug!("BuildInvoker::run: build failed");
            return Ok(InvokeOutcome::failed());
        }

        Ok(InvokeOutcome {
            status: ReloadStatus::Ok,
            manifests_changed: detector.manifests_newer_than(last_build),
        })
    }

    fn run_one(&self, step: &StepName) -> Result<StepStatus, BuildError> {
        self.backend.reenable(step);
        let status = self.backend.run_step(step).map_err(|e| BuildError::StepAborted {
            step: step.clone(),
            message: format!("{:#}", e),
        })?;
        debug!(%step, ?status, "BuildInvoker::run_one: step finished");
        Ok(status)
    }
}

fn stale_config_message(files: &[std::path::PathBuf]) -> String {
    let mut message = String::from(
        "Configuration files changed since the last build. Restart the server to pick them up:\n",
    );
    for file in files {
        message.push_str(&format!("  * {}\n", file.display()));
    }
    message
}
