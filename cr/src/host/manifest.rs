//! FsManifestReader - ManifestSet backed by glob patterns on disk

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

use super::ManifestReader;
use crate::config::Config;

/// Expands manifest and config globs relative to a project root
#[derive(Debug, Clone)]
pub struct FsManifestReader {
    root: PathBuf,
    manifests: Vec<String>,
    configs: Vec<String>,
}

impl FsManifestReader {
    pub fn new(root: impl Into<PathBuf>, manifests: Vec<String>, configs: Vec<String>) -> Self {
        Self {
            root: root.into(),
            manifests,
            configs,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.project.root.clone(),
            config.manifests.manifests.clone(),
            config.manifests.configs.clone(),
        )
    }

    /// Expand patterns in order; each pattern's matches are sorted
    fn expand(&self, patterns: &[String]) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for pattern in patterns {
            let full = if Path::new(pattern).is_absolute() {
                pattern.clone()
            } else {
                self.root.join(pattern).to_string_lossy().into_owned()
            };

            match glob::glob(&full) {
                Ok(entries) => {
                    let mut matched: Vec<PathBuf> = entries.filter_map(|entry| entry.ok()).collect();
                    matched.sort();
                    for path in matched {
                        if !paths.contains(&path) {
                            paths.push(path);
                        }
                    }
                }
                Err(e) => {
                    warn!(%pattern, error = %e, "Invalid manifest pattern");
                }
            }
        }
        debug!(count = paths.len(), "FsManifestReader::expand: resolved paths");
        paths
    }
}

impl ManifestReader for FsManifestReader {
    fn manifest_paths(&self) -> Vec<PathBuf> {
        self.expand(&self.manifests)
    }

    fn config_paths(&self) -> Vec<PathBuf> {
        self.expand(&self.configs)
    }

    fn mod_time(&self, path: &Path) -> Option<SystemTime> {
        path.metadata().and_then(|m| m.modified()).ok()
    }
}
