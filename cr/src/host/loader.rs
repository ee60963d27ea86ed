//! ArtifactDirLoader - module table over a directory of built artifacts
//!
//! Each unit is one file `<dir>/<unit>.<ext>`. Loading a unit records the
//! artifact generation (mtime and size) that is now "in memory"; a unit is
//! modified when the file on disk no longer matches that generation.
//!
//! Swapping machine code inside a running process is a capability of the host
//! runtime. This loader tracks which generation is live and who holds it, so a
//! host can plug its own load hook behind the same table.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use eyre::{Context, Result, eyre};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::ModuleLoader;
use crate::config::Config;
use crate::domain::{Subject, UnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Generation {
    modified: SystemTime,
    len: u64,
}

#[derive(Debug, Default)]
struct LoaderState {
    loaded: HashMap<UnitId, Generation>,
    leases: HashMap<UnitId, usize>,
}

/// Marks a unit as in use until dropped
pub struct UnitLease {
    unit: UnitId,
    state: Arc<Mutex<LoaderState>>,
}

impl Drop for UnitLease {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = state.leases.get_mut(&self.unit) {
            *count -= 1;
            if *count == 0 {
                state.leases.remove(&self.unit);
            }
        }
    }
}

/// Module table over `<dir>/<unit>.<ext>` artifacts
#[derive(Clone)]
pub struct ArtifactDirLoader {
    dir: PathBuf,
    extension: String,
    state: Arc<Mutex<LoaderState>>,
}

impl ArtifactDirLoader {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
            state: Arc::new(Mutex::new(LoaderState::default())),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.artifacts_dir(), config.artifacts.extension.clone())
    }

    pub fn artifact_path(&self, unit: &UnitId) -> PathBuf {
        self.dir.join(format!("{}.{}", unit, self.extension))
    }

    /// Load every artifact currently in the directory
    pub fn load_all(&self) -> Result<usize> {
        debug!(dir = %self.dir.display(), "ArtifactDirLoader::load_all: called");
        if !self.dir.exists() {
            return Ok(0);
        }

        let mut count = 0;
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.context("Failed to scan artifact directory")?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                self.load(&UnitId::new(stem))?;
                count += 1;
            }
        }

        info!(count, dir = %self.dir.display(), "Loaded artifacts");
        Ok(count)
    }

    /// Mark a unit as in use for the lifetime of the returned lease
    pub fn lease(&self, unit: &UnitId) -> UnitLease {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state.leases.entry(unit.clone()).or_insert(0) += 1;
        UnitLease {
            unit: unit.clone(),
            state: Arc::clone(&self.state),
        }
    }

    pub fn is_loaded(&self, unit: &UnitId) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).loaded.contains_key(unit)
    }

    pub fn loaded_units(&self) -> BTreeSet<UnitId> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.loaded.keys().cloned().collect()
    }

    fn disk_generation(&self, unit: &UnitId) -> Option<Generation> {
        let meta = self.artifact_path(unit).metadata().ok()?;
        Some(Generation {
            modified: meta.modified().ok()?,
            len: meta.len(),
        })
    }
}

impl ModuleLoader for ArtifactDirLoader {
    fn resolve_artifact_path(&self, subject: &Subject) -> Option<PathBuf> {
        let path = self.artifact_path(&UnitId::new(subject.as_str()));
        path.is_file().then_some(path)
    }

    fn modified_units(&self) -> BTreeSet<UnitId> {
        let loaded: Vec<(UnitId, Generation)> = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.loaded.iter().map(|(unit, generation)| (unit.clone(), *generation)).collect()
        };

        loaded
            .into_iter()
            .filter(|(unit, generation)| {
                self.disk_generation(unit)
                    .is_some_and(|on_disk| on_disk != *generation)
            })
            .map(|(unit, _)| unit)
            .collect()
    }

    fn is_in_use(&self, unit: &UnitId) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.leases.get(unit).is_some_and(|count| *count > 0)
    }

    fn unload(&self, unit: &UnitId) -> Result<()> {
        debug!(%unit, "ArtifactDirLoader::unload: called");
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.leases.get(unit).is_some_and(|count| *count > 0) {
            return Err(eyre!("Unit {} is in use", unit));
        }
        state.loaded.remove(unit);
        Ok(())
    }

    fn force_unload(&self, unit: &UnitId) -> Result<()> {
        debug!(%unit, "ArtifactDirLoader::force_unload: called");
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.loaded.remove(unit);
        Ok(())
    }

    fn load(&self, unit: &UnitId) -> Result<()> {
        debug!(%unit, "ArtifactDirLoader::load: called");
        let generation = self
            .disk_generation(unit)
            .ok_or_else(|| eyre!("Artifact for unit {} not found at {}", unit, self.artifact_path(unit).display()))?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.loaded.insert(unit.clone(), generation);
        Ok(())
    }
}
