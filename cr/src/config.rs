//! Codereload configuration types and loading

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::coordinator::CoordinatorConfig;
use crate::domain::StepName;
use crate::staleness::UnitReloadPolicy;

/// Main codereload configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Project location
    pub project: ProjectConfig,

    /// Build steps and output layout
    pub build: BuildConfig,

    /// Files consulted for staleness
    pub manifests: ManifestsConfig,

    /// Where loadable artifacts live
    pub artifacts: ArtifactsConfig,

    /// Busy-unit reload policy
    pub reload: ReloadConfig,

    /// Coordinator tuning
    pub coordinator: CoordinatorSection,

    /// Socket adapter
    pub ipc: IpcConfig,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.channel_buffer == 0 {
            return Err(eyre::eyre!("coordinator.channel-buffer must be at least 1"));
        }
        let mut seen = HashSet::new();
        for step in self.build.steps.iter().chain(self.build.finalize.iter()) {
            if step.command.trim().is_empty() {
                return Err(eyre::eyre!("Build step '{}' has an empty command", step.name));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(eyre::eyre!("Build step '{}' is defined more than once", step.name));
            }
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .codereload.yml
        let local_config = PathBuf::from(".codereload.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/codereload/codereload.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("codereload").join("codereload.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Resolve a configured path against the project root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project.root.join(path)
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.build.output_dir)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.resolve(&self.artifacts.dir)
    }

    /// Coordinator settings derived from the build and reload sections
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            channel_buffer: self.coordinator.channel_buffer,
            reply_timeout: self.coordinator.reply_timeout_ms.map(Duration::from_millis),
            steps: self.build.steps.iter().map(|s| StepName::new(s.name.clone())).collect(),
            finalize_step: self.build.finalize.as_ref().map(|s| StepName::new(s.name.clone())),
            output_dir: self.output_dir(),
            unit_reload: UnitReloadPolicy {
                busy_wait: Duration::from_millis(self.reload.busy_wait_ms),
                force_after_wait: self.reload.force_after_wait,
            },
        }
    }
}

/// Project location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Working directory for build steps and base for relative paths
    pub root: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

/// One configured build step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step name used in logs and by the backend
    pub name: String,

    /// Shell command run with `sh -c`
    pub command: String,
}

/// Build steps and output layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Build output directory
    #[serde(rename = "output-dir")]
    pub output_dir: PathBuf,

    /// Ordered build steps
    pub steps: Vec<StepConfig>,

    /// Step run after every step succeeded (protocol consolidation)
    pub finalize: Option<StepConfig>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("_build"),
            steps: Vec::new(),
            finalize: None,
        }
    }
}

/// Glob patterns making up the ManifestSet
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestsConfig {
    /// Build manifests (record what was last built)
    pub manifests: Vec<String>,

    /// Project configuration files
    pub configs: Vec<String>,
}

/// Where loadable artifacts live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    /// Directory holding one artifact per unit
    pub dir: PathBuf,

    /// Artifact file extension (without the dot)
    pub extension: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("_build/lib"),
            extension: "so".to_string(),
        }
    }
}

/// Busy-unit reload policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// How long to wait once for a busy unit before retrying
    #[serde(rename = "busy-wait-ms")]
    pub busy_wait_ms: u64,

    /// Force the unload if the unit is still busy after the wait
    #[serde(rename = "force-after-wait")]
    pub force_after_wait: bool,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            busy_wait_ms: 100,
            force_after_wait: true,
        }
    }
}

/// Coordinator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSection {
    /// Inbox capacity
    #[serde(rename = "channel-buffer")]
    pub channel_buffer: usize,

    /// Caller-side reply timeout; unset waits for the build indefinitely
    #[serde(rename = "reply-timeout-ms")]
    pub reply_timeout_ms: Option<u64>,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            channel_buffer: 256,
            reply_timeout_ms: None,
        }
    }
}

/// Socket adapter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Socket path override
    #[serde(rename = "socket-path")]
    pub socket_path: Option<PathBuf>,
}

impl IpcConfig {
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(crate::ipc::get_socket_path)
    }
}
