//! Main Coordinator task implementation

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::attempt::{self, AttemptContext, AttemptReport};
use super::config::CoordinatorConfig;
use super::handle::CoordinatorHandle;
use super::messages::{CoordRequest, CoordinatorMetrics};
use crate::domain::{BuildResult, StepName, Subject};
use crate::host::{BuildBackend, ManifestReader, ModuleLoader};
use crate::invoker::BuildInvoker;
use crate::probe;
use crate::staleness::StalenessDetector;

/// State owned by the coordinator task and mutated only there
#[derive(Debug)]
struct CoordinatorState {
    /// Environment probe already ran
    checked_environment: bool,
    /// Result of the probe; assumed until it runs
    fast_path: bool,
    build_steps: Vec<StepName>,
    /// Advanced after every attempt, never moves backwards
    last_build: SystemTime,
}

impl CoordinatorState {
    fn new(build_steps: Vec<StepName>) -> Self {
        Self {
            checked_environment: false,
            fast_path: true,
            build_steps,
            last_build: SystemTime::now(),
        }
    }

    fn advance_last_build(&mut self) {
        self.last_build = self.last_build.max(SystemTime::now());
    }
}

/// The reload coordinator
///
/// A single task owns the inbox and runs one build at a time. Reload requests
/// for the same subject that are already queued when an attempt starts share
/// that attempt's result. The task ends on `Shutdown` or once every handle is
/// dropped.
pub struct Coordinator {
    config: CoordinatorConfig,
    tx: mpsc::Sender<CoordRequest>,
    rx: mpsc::Receiver<CoordRequest>,
    backend: Arc<dyn BuildBackend>,
    ctx: Arc<AttemptContext>,
}

/// What the running task keeps; the inbox sender lives only in handles
struct Worker {
    output_dir: PathBuf,
    backlog_limit: usize,
    rx: mpsc::Receiver<CoordRequest>,
    backend: Arc<dyn BuildBackend>,
    ctx: Arc<AttemptContext>,
}

impl Coordinator {
    /// Create a new Coordinator over the host's collaborators
    pub fn new(
        config: CoordinatorConfig,
        backend: Arc<dyn BuildBackend>,
        loader: Arc<dyn ModuleLoader>,
        reader: Arc<dyn ManifestReader>,
    ) -> Self {
        debug!(steps = config.steps.len(), "Coordinator::new: called");
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        let ctx = AttemptContext {
            invoker: BuildInvoker::new(
                Arc::clone(&backend),
                config.steps.clone(),
                config.finalize_step.clone(),
            ),
            detector: StalenessDetector::new(reader, Arc::clone(&loader), config.unit_reload.clone()),
            loader,
        };
        Self {
            config,
            tx,
            rx,
            backend,
            ctx: Arc::new(ctx),
        }
    }

    /// Create a handle that talks to this coordinator
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle::new(self.tx.clone(), self.config.reply_timeout)
    }

    /// Spawn the coordinator task, returning a handle and the task
    pub fn spawn(self) -> (CoordinatorHandle, JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run());
        (handle, task)
    }

    /// Run the Coordinator task
    ///
    /// This consumes the Coordinator and runs until shutdown is requested or
    /// the last handle is dropped.
    pub async fn run(self) {
        let Self {
            config,
            tx,
            rx,
            backend,
            ctx,
        } = self;
        drop(tx);
        let worker = Worker {
            output_dir: config.output_dir,
            backlog_limit: config.channel_buffer.max(1),
            rx,
            backend,
            ctx,
        };
        worker.run(config.steps).await;
    }
}

impl Worker {
    async fn run(mut self, steps: Vec<StepName>) {
        let mut state = CoordinatorState::new(steps);
        let mut metrics = CoordinatorMetrics {
            last_build_at: state.last_build.into(),
            ..Default::default()
        };
        // Requests pulled off the inbox while coalescing, kept in arrival order
        let mut backlog: VecDeque<CoordRequest> = VecDeque::new();

        info!(steps = ?state.build_steps, "Coordinator started");

        loop {
            let req = match backlog.pop_front() {
                Some(req) => req,
                None => match self.rx.recv().await {
                    Some(req) => {
                        metrics.messages_received += 1;
                        req
                    }
                    None => break,
                },
            };

            match req {
                CoordRequest::Reload { subject, reply_tx } => {
                    metrics.messages_received += drain_inbox(&mut self.rx, &mut backlog, self.backlog_limit);
                    let mut waiters = vec![reply_tx];
                    waiters.extend(take_same_subject(&mut backlog, &subject));
                    metrics.coalesced_requests += (waiters.len() - 1) as u64;
                    debug!(%subject, waiters = waiters.len(), "Starting reload attempt");

                    if !state.checked_environment {
                        self.probe_environment(&mut state).await;
                    }

                    let report = self.attempt(&subject, state.last_build).await;
                    state.advance_last_build();

                    metrics.attempts += 1;
                    metrics.last_build_at = state.last_build.into();
                    if report.result.is_ok() {
                        metrics.builds_ok += 1;
                    } else {
                        metrics.builds_failed += 1;
                    }
                    if report.restored {
                        metrics.restores += 1;
                    }
                    metrics.units_reloaded += report.units_reloaded as u64;

                    info!(
                        %subject,
                        status = ?report.result.status,
                        waiters = waiters.len(),
                        units_reloaded = report.units_reloaded,
                        "Reload attempt finished"
                    );
                    reply_all(waiters, &report.result);
                }

                CoordRequest::ProbeEnvironment { reply_tx } => {
                    if !state.checked_environment {
                        self.probe_environment(&mut state).await;
                    }
                    let _ = reply_tx.send(state.fast_path);
                }

                CoordRequest::Sync { reply_tx } => {
                    let _ = reply_tx.send(());
                }

                CoordRequest::GetMetrics { reply_tx } => {
                    let _ = reply_tx.send(metrics.clone());
                }

                CoordRequest::Shutdown => {
                    info!("Coordinator shutting down");
                    break;
                }
            }
        }

        info!(attempts = metrics.attempts, "Coordinator stopped");
    }

    async fn probe_environment(&self, state: &mut CoordinatorState) {
        let dir = self.output_dir.clone();
        let supported = tokio::task::spawn_blocking(move || probe::probe_symlinks(&dir))
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "Environment probe task failed");
                false
            });
        if !supported {
            self.backend.disable_fast_path();
        }
        state.checked_environment = true;
        state.fast_path = supported;
        debug!(supported, "Coordinator::probe_environment: done");
    }

    async fn attempt(&self, subject: &Subject, last_build: SystemTime) -> AttemptReport {
        let ctx = Arc::clone(&self.ctx);
        let subject = subject.clone();
        match tokio::task::spawn_blocking(move || attempt::run_attempt(&ctx, &subject, last_build)).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Reload attempt task failed");
                AttemptReport::task_failed(e.to_string())
            }
        }
    }
}

/// Move requests already waiting in the inbox to the backlog, without blocking
///
/// The backlog never grows past `limit`, so the bounded inbox keeps applying
/// backpressure to callers while a build runs.
fn drain_inbox(rx: &mut mpsc::Receiver<CoordRequest>, backlog: &mut VecDeque<CoordRequest>, limit: usize) -> u64 {
    let mut drained = 0;
    while backlog.len() < limit {
        match rx.try_recv() {
            Ok(req) => {
                backlog.push_back(req);
                drained += 1;
            }
            Err(_) => break,
        }
    }
    drained
}

/// Remove queued reloads for `subject` from the backlog, keeping the rest in order
///
/// Requests behind a `Shutdown` are left alone.
fn take_same_subject(backlog: &mut VecDeque<CoordRequest>, subject: &Subject) -> Vec<oneshot::Sender<BuildResult>> {
    let mut waiters = Vec::new();
    let mut kept = VecDeque::with_capacity(backlog.len());
    let mut past_shutdown = false;
    for req in backlog.drain(..) {
        match req {
            CoordRequest::Reload {
                subject: queued,
                reply_tx,
            } if !past_shutdown && queued == *subject => waiters.push(reply_tx),
            other => {
                past_shutdown |= matches!(other, CoordRequest::Shutdown);
                kept.push_back(other);
            }
        }
    }
    *backlog = kept;
    waiters
}

/// Send one result to every waiter; callers that went away are skipped
fn reply_all(waiters: Vec<oneshot::Sender<BuildResult>>, result: &BuildResult) {
    for reply_tx in waiters {
        if reply_tx.send(result.clone()).is_err() {
            debug!("reply_all: caller gone, dropping reply");
        }
    }
}
