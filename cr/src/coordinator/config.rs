//! Coordinator configuration

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::domain::StepName;
use crate::staleness::UnitReloadPolicy;

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Channel buffer size for coordinator requests
    pub channel_buffer: usize,

    /// Caller-side timeout for `reload`; `None` waits for the build indefinitely
    pub reply_timeout: Option<Duration>,

    /// Ordered build steps run on every attempt
    pub steps: Vec<StepName>,

    /// Consolidation step run after every step succeeded
    pub finalize_step: Option<StepName>,

    /// Build output directory, probed for symlink support
    pub output_dir: PathBuf,

    /// Busy-unit policy for out-of-band reloads
    pub unit_reload: UnitReloadPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        debug!("CoordinatorConfig::default: called");
        Self {
            channel_buffer: 256,
            reply_timeout: None,
            steps: Vec::new(),
            finalize_step: None,
            output_dir: PathBuf::from("_build"),
            unit_reload: UnitReloadPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn with_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepName>,
    {
        self.steps = steps.into_iter().map(Into::into).collect();
        self
    }
}
