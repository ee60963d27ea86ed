//! CommandBackend - build steps as shell commands

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::{Context, Result, eyre};
use tracing::debug;

use super::BuildBackend;
use crate::capture;
use crate::config::Config;
use crate::domain::{StepName, StepStatus};

/// Environment variable telling steps whether symlinked outputs are allowed
pub const SYMLINKS_ENV: &str = "CODERELOAD_SYMLINKS";

/// Runs each build step as `sh -c <command>` in the project root
///
/// A step that already completed reports `Noop` until it is re-enabled,
/// mirroring build tools that run a task at most once per session.
pub struct CommandBackend {
    root: PathBuf,
    output_dir: PathBuf,
    commands: HashMap<StepName, String>,
    completed: Mutex<HashSet<StepName>>,
    symlinks: AtomicBool,
}

impl CommandBackend {
    pub fn new(root: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            output_dir: output_dir.into(),
            commands: HashMap::new(),
            completed: Mutex::new(HashSet::new()),
            symlinks: AtomicBool::new(true),
        }
    }

    /// Build a backend with every step and the finalize step from config
    pub fn from_config(config: &Config) -> Self {
        debug!("CommandBackend::from_config: called");
        config
            .build
            .steps
            .iter()
            .chain(config.build.finalize.iter())
            .fold(Self::new(config.project.root.clone(), config.output_dir()), |backend, step| {
                backend.with_step(step.name.as_str(), step.command.as_str())
            })
    }

    pub fn with_step(mut self, name: impl Into<StepName>, command: impl Into<String>) -> Self {
        self.commands.insert(name.into(), command.into());
        self
    }

    pub fn symlinks_enabled(&self) -> bool {
        self.symlinks.load(Ordering::SeqCst)
    }
}

impl BuildBackend for CommandBackend {
    fn run_step(&self, step: &StepName) -> Result<StepStatus> {
        debug!(%step, "CommandBackend::run_step: called");
        let command = self
            .commands
            .get(step)
            .ok_or_else(|| eyre!("No command configured for build step '{}'", step))?;

        if self.completed.lock().unwrap_or_else(|e| e.into_inner()).contains(step) {
            debug!(%step, "CommandBackend::run_step: already ran, skipping");
            return Ok(StepStatus::Noop);
        }

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .env(SYMLINKS_ENV, if self.symlinks_enabled() { "1" } else { "0" })
            .output()
            .context(format!("Failed to execute build step '{}'", step))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(stdout_len = %stdout.len(), stderr_len = %stderr.len(), "CommandBackend::run_step: output lengths");
        capture::print(&stdout);
        capture::print(&stderr);

        self.completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(step.clone());

        if output.status.success() {
            debug!(%step, "CommandBackend::run_step: step succeeded");
            Ok(StepStatus::Ok)
        } else {
            debug!(%step, exit_code = ?output.status.code(), "CommandBackend::run_step: step failed");
            Ok(StepStatus::Error)
        }
    }

    fn reenable(&self, step: &StepName) {
        debug!(%step, "CommandBackend::reenable: called");
        self.completed.lock().unwrap_or_else(|e| e.into_inner()).remove(step);
    }

    fn ensure_output_structure(&self) -> Result<()> {
        debug!(output_dir = %self.output_dir.display(), "CommandBackend::ensure_output_structure: called");
        std::fs::create_dir_all(&self.output_dir).context("Failed to create build output directory")
    }

    fn disable_fast_path(&self) {
        debug!("CommandBackend::disable_fast_path: called");
        self.symlinks.store(false, Ordering::SeqCst);
    }
}
