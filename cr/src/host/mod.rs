//! Host collaborators of the reload coordinator
//!
//! The coordinator never compiles, loads or stats anything itself. It drives
//! three collaborators supplied by the host:
//!
//! - [`BuildBackend`] - runs named build steps
//! - [`ModuleLoader`] - resolves, unloads and loads code units
//! - [`ManifestReader`] - lists build manifests and config files and reads mtimes
//!
//! All methods are synchronous: they are only ever called from the blocking
//! thread that runs the current reload attempt.

mod command;
mod loader;
mod manifest;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use eyre::Result;

use crate::domain::{StepName, StepStatus, Subject, UnitId};

pub use command::CommandBackend;
pub use loader::{ArtifactDirLoader, UnitLease};
pub use manifest::FsManifestReader;

/// The external build backend
pub trait BuildBackend: Send + Sync {
    /// Run one step. `Err` means the step machinery itself failed.
    fn run_step(&self, step: &StepName) -> Result<StepStatus>;

    /// Allow a step that already ran in this session to run again
    fn reenable(&self, step: &StepName);

    /// Create the build output directory layout
    fn ensure_output_structure(&self) -> Result<()>;

    /// Fall back to the slower build path after a failed environment probe
    fn disable_fast_path(&self) {}
}

/// The runtime's module table
pub trait ModuleLoader: Send + Sync {
    /// On-disk artifact backing the subject, if it can be resolved
    fn resolve_artifact_path(&self, subject: &Subject) -> Option<PathBuf>;

    /// Loaded units whose on-disk code differs from what is loaded
    fn modified_units(&self) -> BTreeSet<UnitId>;

    /// Non-blocking check whether a unit is executing
    fn is_in_use(&self, unit: &UnitId) -> bool;

    fn unload(&self, unit: &UnitId) -> Result<()>;

    /// Unload regardless of in-use state
    fn force_unload(&self, unit: &UnitId) -> Result<()>;

    fn load(&self, unit: &UnitId) -> Result<()>;
}

/// Read-only view of the ManifestSet
pub trait ManifestReader: Send + Sync {
    fn manifest_paths(&self) -> Vec<PathBuf>;

    fn config_paths(&self) -> Vec<PathBuf>;

    /// Modification time, or `None` when the file is missing
    fn mod_time(&self, path: &Path) -> Option<SystemTime>;
}
