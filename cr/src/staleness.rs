//! StalenessDetector - out-of-band rebuild detection
//!
//! Two signals are checked:
//!
//! - build manifests touched after the last build attempt, meaning something
//!   (often another process) rebuilt the project behind the coordinator's back
//! - config files newer than every manifest, meaning the build would run under
//!   stale configuration and needs a restart rather than a rebuild
//!
//! When manifests moved, every loaded unit whose on-disk code changed is
//! unloaded and loaded again.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::UnitId;
use crate::host::{ManifestReader, ModuleLoader};

/// What to do with a unit that is busy when it must be reloaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReloadPolicy {
    /// Single wait before retrying a graceful unload
    pub busy_wait: Duration,

    /// Unload anyway if the unit is still busy after the wait
    pub force_after_wait: bool,
}

impl Default for UnitReloadPolicy {
    fn default() -> Self {
        Self {
            busy_wait: Duration::from_millis(100),
            force_after_wait: true,
        }
    }
}

/// How a unit ended up being reloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitReload {
    /// Unloaded without disturbing anyone
    Graceful,
    /// Unloaded while still in use
    Forced,
    /// Left alone because it stayed busy and forcing is disabled
    Skipped,
}

pub struct StalenessDetector {
    reader: Arc<dyn ManifestReader>,
    loader: Arc<dyn ModuleLoader>,
    policy: UnitReloadPolicy,
}

impl StalenessDetector {
    pub fn new(reader: Arc<dyn ManifestReader>, loader: Arc<dyn ModuleLoader>, policy: UnitReloadPolicy) -> Self {
        Self { reader, loader, policy }
    }

    /// Newest modification time across existing manifests
    pub fn latest_manifest_mtime(&self) -> Option<SystemTime> {
        self.reader
            .manifest_paths()
            .iter()
            .filter_map(|path| self.reader.mod_time(path))
            .max()
    }

    /// True iff any manifest was modified after `timestamp`
    pub fn manifests_newer_than(&self, timestamp: SystemTime) -> bool {
        let newer = self.latest_manifest_mtime().is_some_and(|latest| latest > timestamp);
        debug!(newer, "StalenessDetector::manifests_newer_than: checked");
        newer
    }

    /// Config files modified after the newest manifest
    ///
    /// Without any manifest nothing has been built yet, so nothing is stale.
    pub fn stale_config_files(&self) -> Vec<PathBuf> {
        let Some(latest) = self.latest_manifest_mtime() else {
            debug!("StalenessDetector::stale_config_files: no manifests yet");
            return Vec::new();
        };

        self.reader
            .config_paths()
            .into_iter()
            .filter(|path| self.reader.mod_time(path).is_some_and(|mtime| mtime > latest))
            .collect()
    }

    pub fn stale_loaded_units(&self) -> BTreeSet<UnitId> {
        self.loader.modified_units()
    }

    /// Unload then load one unit, honoring the busy-unit policy
    pub fn reload_unit(&self, unit: &UnitId) -> eyre::Result<UnitReload> {
        debug!(%unit, "StalenessDetector::reload_unit: called");
        let how = if !self.loader.is_in_use(unit) {
            self.loader.unload(unit)?;
            UnitReload::Graceful
        } else {
            std::thread::sleep(self.policy.busy_wait);
            if !self.loader.is_in_use(unit) {
                self.loader.unload(unit)?;
                UnitReload::Graceful
            } else if self.policy.force_after_wait {
                warn!(%unit, wait = ?self.policy.busy_wait, "Unit still in use, forcing unload");
                self.loader.force_unload(unit)?;
                UnitReload::Forced
            } else {
                warn!(%unit, wait = ?self.policy.busy_wait, "Unit still in use, skipping reload");
                return Ok(UnitReload::Skipped);
            }
        };

        self.loader.load(unit)?;
        Ok(how)
    }

    /// Reload every unit whose on-disk code no longer matches what is loaded
    ///
    /// Returns the number of units that were loaded again. Failures are logged
    /// per unit and do not stop the others.
    pub fn reload_stale_units(&self) -> usize {
        let units = self.stale_loaded_units();
        debug!(count = units.len(), "StalenessDetector::reload_stale_units: called");

        let mut reloaded = 0;
        for unit in &units {
            match self.reload_unit(unit) {
                Ok(UnitReload::Skipped) => {}
                Ok(how) => {
                    debug!(%unit, ?how, "StalenessDetector::reload_stale_units: reloaded");
                    reloaded += 1;
                }
                Err(e) => {
                    warn!(%unit, error = %e, "Failed to reload unit");
                }
            }
        }

        if reloaded > 0 {
            info!(reloaded, "Reloaded units changed on disk");
        }
        reloaded
    }
}
