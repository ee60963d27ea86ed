//! ArtifactBackup - keep the subject's last good artifact across a build
//!
//! A missing backup is a normal state (first build, unresolvable subject), so
//! neither snapshot nor restore ever fails the caller. A failed restore is
//! logged and swallowed: it runs while reporting a build error and must not
//! replace that error.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::domain::Subject;
use crate::host::ModuleLoader;

/// Bytes of an artifact captured before a build attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backup {
    /// Nothing to restore
    None,
    /// Artifact contents at snapshot time
    Saved { path: PathBuf, bytes: Vec<u8> },
}

impl Backup {
    /// Read the subject's current artifact, if it can be resolved and read
    pub fn snapshot(loader: &dyn ModuleLoader, subject: &Subject) -> Self {
        debug!(%subject, "Backup::snapshot: called");
        let Some(path) = loader.resolve_artifact_path(subject) else {
            debug!(%subject, "Backup::snapshot: subject has no artifact");
            return Backup::None;
        };

        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!(path = %path.display(), len = bytes.len(), "Backup::snapshot: saved");
                Backup::Saved { path, bytes }
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Backup::snapshot: artifact unreadable");
                Backup::None
            }
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self, Backup::Saved { .. })
    }

    /// Write the saved bytes back; returns whether anything was restored
    pub fn restore(self) -> bool {
        let Backup::Saved { path, bytes } = self else {
            debug!("Backup::restore: no backup, nothing to do");
            return false;
        };

        match std::fs::write(&path, &bytes) {
            Ok(()) => {
                info!(path = %path.display(), "Restored previous artifact after failed build");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to restore artifact backup");
                false
            }
        }
    }
}
