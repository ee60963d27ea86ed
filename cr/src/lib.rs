//! codereload - per-request recompile and hot-swap for long-running servers
//!
//! A server calls the coordinator once per incoming request. The coordinator
//! runs the configured build steps, one build at a time, and answers with the
//! status and the captured compiler output. Requests for the same subject that
//! pile up during a build share the next build's result.
//!
//! # Modules
//!
//! - [`coordinator`] - the reload actor and its handle
//! - [`invoker`] - runs the ordered build steps
//! - [`staleness`] - out-of-band rebuild detection and unit reloads
//! - [`backup`] - keeps the subject's artifact across a failed build
//! - [`capture`] - scoped redirection of build diagnostics
//! - [`host`] - collaborator traits and their filesystem implementations
//! - [`ipc`] - Unix socket adapter for callers in other processes
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod backup;
pub mod capture;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod host;
pub mod invoker;
pub mod ipc;
pub mod probe;
pub mod staleness;

// Re-export commonly used types
pub use backup::Backup;
pub use capture::OutputCapture;
pub use config::Config;
pub use coordinator::{CoordRequest, Coordinator, CoordinatorConfig, CoordinatorHandle, CoordinatorMetrics};
pub use domain::{BuildResult, Headline, ReloadStatus, StepName, StepStatus, Subject, UnitId};
pub use error::{BuildError, CoordinatorError};
pub use host::{ArtifactDirLoader, BuildBackend, CommandBackend, FsManifestReader, ManifestReader, ModuleLoader, UnitLease};
pub use invoker::{BuildInvoker, InvokeOutcome};
pub use staleness::{StalenessDetector, UnitReload, UnitReloadPolicy};
