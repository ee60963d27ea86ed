//! Integration tests for the reload coordinator
//!
//! The coordinator runs for real; the build backend, module loader and
//! manifest reader are in-memory fakes that record what was asked of them.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use codereload::capture;
use codereload::coordinator::{Coordinator, CoordinatorConfig, CoordinatorHandle};
use codereload::domain::{BuildResult, ReloadStatus, StepName, StepStatus, Subject, UnitId};
use codereload::error::CoordinatorError;
use codereload::host::{BuildBackend, ManifestReader, ModuleLoader};
use tempfile::TempDir;

// =============================================================================
// Fakes
// =============================================================================

/// What a scripted step does when run
#[derive(Clone)]
enum Script {
    Ok,
    Noop,
    Fail,
    /// Print text, then report the status
    Print(&'static str, StepStatus),
    /// Overwrite a file, then report the status (a build rewriting an artifact)
    Write(PathBuf, &'static [u8], StepStatus),
    Sleep(Duration),
    Panic,
    Abort,
}

#[derive(Default)]
struct FakeBackend {
    scripts: HashMap<String, Script>,
    runs: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    events: Mutex<Vec<String>>,
}

impl FakeBackend {
    fn new(scripts: &[(&str, Script)]) -> Self {
        Self {
            scripts: scripts.iter().map(|(n, s)| (n.to_string(), s.clone())).collect(),
            ..Default::default()
        }
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl BuildBackend for FakeBackend {
    fn run_step(&self, step: &StepName) -> eyre::Result<StepStatus> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.events.lock().unwrap().push(format!("run {}", step));

        let script = self.scripts.get(step.as_str()).cloned().unwrap_or(Script::Ok);
        let result = match script {
            Script::Ok => Ok(StepStatus::Ok),
            Script::Noop => Ok(StepStatus::Noop),
            Script::Fail => Ok(StepStatus::Error),
            Script::Print(text, status) => {
                capture::print(text);
                Ok(status)
            }
            Script::Write(path, bytes, status) => {
                std::fs::write(&path, bytes).unwrap();
                Ok(status)
            }
            Script::Sleep(duration) => {
                std::thread::sleep(duration);
                Ok(StepStatus::Ok)
            }
            Script::Panic => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                panic!("compiler exploded");
            }
            Script::Abort => Err(eyre::eyre!("backend crashed")),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn reenable(&self, _step: &StepName) {}

    fn ensure_output_structure(&self) -> eyre::Result<()> {
        Ok(())
    }

    fn disable_fast_path(&self) {
        self.events.lock().unwrap().push("disable_fast_path".to_string());
    }
}

#[derive(Default)]
struct FakeLoader {
    artifacts: HashMap<Subject, PathBuf>,
    modified: Mutex<BTreeSet<UnitId>>,
    calls: Mutex<Vec<String>>,
}

impl FakeLoader {
    fn with_artifact(subject: &str, path: PathBuf) -> Self {
        Self {
            artifacts: HashMap::from([(Subject::from(subject), path)]),
            ..Default::default()
        }
    }

    fn mark_modified(&self, unit: &str) {
        self.modified.lock().unwrap().insert(UnitId::from(unit));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ModuleLoader for FakeLoader {
    fn resolve_artifact_path(&self, subject: &Subject) -> Option<PathBuf> {
        self.artifacts.get(subject).cloned()
    }

    fn modified_units(&self) -> BTreeSet<UnitId> {
        self.modified.lock().unwrap().clone()
    }

    fn is_in_use(&self, _unit: &UnitId) -> bool {
        false
    }

    fn unload(&self, unit: &UnitId) -> eyre::Result<()> {
        self.calls.lock().unwrap().push(format!("unload {}", unit));
        Ok(())
    }

    fn force_unload(&self, unit: &UnitId) -> eyre::Result<()> {
        self.calls.lock().unwrap().push(format!("force_unload {}", unit));
        Ok(())
    }

    fn load(&self, unit: &UnitId) -> eyre::Result<()> {
        self.calls.lock().unwrap().push(format!("load {}", unit));
        self.modified.lock().unwrap().remove(unit);
        Ok(())
    }
}

#[derive(Default)]
struct FakeReader {
    manifests: Mutex<Vec<(PathBuf, SystemTime)>>,
    configs: Mutex<Vec<(PathBuf, SystemTime)>>,
}

impl FakeReader {
    fn touch_manifest(&self, path: &str, at: SystemTime) {
        self.manifests.lock().unwrap().push((PathBuf::from(path), at));
    }

    fn touch_config(&self, path: &str, at: SystemTime) {
        self.configs.lock().unwrap().push((PathBuf::from(path), at));
    }
}

impl ManifestReader for FakeReader {
    fn manifest_paths(&self) -> Vec<PathBuf> {
        self.manifests.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    fn config_paths(&self) -> Vec<PathBuf> {
        self.configs.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    fn mod_time(&self, path: &Path) -> Option<SystemTime> {
        let manifests = self.manifests.lock().unwrap();
        let configs = self.configs.lock().unwrap();
        manifests
            .iter()
            .chain(configs.iter())
            .find(|(p, _)| p == path)
            .map(|(_, t)| *t)
    }
}

// =============================================================================
// Helpers
// =============================================================================

struct Rig {
    _temp: TempDir,
    backend: Arc<FakeBackend>,
    loader: Arc<FakeLoader>,
    reader: Arc<FakeReader>,
    handle: CoordinatorHandle,
    coordinator: Option<Coordinator>,
}

fn rig_with(temp: TempDir, steps: &[&str], backend: FakeBackend, loader: FakeLoader) -> Rig {
    let config = CoordinatorConfig {
        output_dir: temp.path().join("_build"),
        ..Default::default()
    }
    .with_steps(steps.iter().copied());
    let backend = Arc::new(backend);
    let loader = Arc::new(loader);
    let reader = Arc::new(FakeReader::default());
    let coordinator = Coordinator::new(config, backend.clone(), loader.clone(), reader.clone());
    Rig {
        _temp: temp,
        backend,
        loader,
        reader,
        handle: coordinator.handle(),
        coordinator: Some(coordinator),
    }
}

fn rig(steps: &[&str], backend: FakeBackend) -> Rig {
    rig_with(TempDir::new().unwrap(), steps, backend, FakeLoader::default())
}

impl Rig {
    /// The coordinator, not yet running
    fn take(&mut self) -> Coordinator {
        self.coordinator.take().expect("coordinator already started")
    }

    fn spawn(&mut self) -> CoordinatorHandle {
        tokio::spawn(self.take().run());
        self.handle.clone()
    }
}

/// Wait until `count` requests sit in the coordinator's inbox
async fn wait_queued(handle: &CoordinatorHandle, count: usize) {
    for _ in 0..1000 {
        if handle.pending_requests() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("requests were never queued");
}

fn hour_from_now() -> SystemTime {
    SystemTime::now() + Duration::from_secs(3600)
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_successful_build_without_output() {
    let mut rig = rig(&["compile"], FakeBackend::new(&[("compile", Script::Ok)]));
    let handle = rig.spawn();
    let backend = rig.backend.clone();

    let before = handle.metrics().await.unwrap().last_build_at;
    let result = handle.reload("web").await.unwrap();
    let after = handle.metrics().await.unwrap().last_build_at;

    assert_eq!(result, BuildResult::ok(""));
    assert_eq!(backend.runs(), 1);
    assert!(after >= before);
}

#[tokio::test]
async fn test_failed_build_reports_output_and_restores_artifact() {
    let temp = TempDir::new().unwrap();
    let artifact = temp.path().join("web.so");
    std::fs::write(&artifact, b"previous good build").unwrap();

    let backend = FakeBackend::new(&[
        ("write", Script::Write(artifact.clone(), b"half-written", StepStatus::Ok)),
        ("compile", Script::Print("syntax error on line 4", StepStatus::Error)),
    ]);
    let loader = FakeLoader::with_artifact("web", artifact.clone());
    let mut rig = rig_with(temp, &["write", "compile"], backend, loader);
    let handle = rig.spawn();

    let result = handle.reload("web").await.unwrap();
    assert_eq!(result.status, ReloadStatus::Error);
    assert_eq!(result.output, "syntax error on line 4");
    assert_eq!(std::fs::read(&artifact).unwrap(), b"previous good build");

    let metrics = handle.metrics().await.unwrap();
    assert_eq!(metrics.builds_failed, 1);
    assert_eq!(metrics.restores, 1);
}

#[tokio::test]
async fn test_successful_build_keeps_new_artifact() {
    let temp = TempDir::new().unwrap();
    let artifact = temp.path().join("web.so");
    std::fs::write(&artifact, b"old").unwrap();

    let backend = FakeBackend::new(&[("compile", Script::Write(artifact.clone(), b"new", StepStatus::Ok))]);
    let loader = FakeLoader::with_artifact("web", artifact.clone());
    let mut rig = rig_with(temp, &["compile"], backend, loader);
    let handle = rig.spawn();

    assert!(handle.reload("web").await.unwrap().is_ok());
    assert_eq!(std::fs::read(&artifact).unwrap(), b"new");
}

#[tokio::test]
async fn test_failed_build_without_artifact_still_replies() {
    let mut rig = rig(&["compile"], FakeBackend::new(&[("compile", Script::Fail)]));
    let handle = rig.spawn();

    let result = handle.reload("never-built").await.unwrap();
    assert_eq!(result.status, ReloadStatus::Error);
    assert_eq!(handle.metrics().await.unwrap().restores, 0);
}

#[tokio::test]
async fn test_tracing_events_during_build_are_captured() {
    struct ChattyBackend;

    impl BuildBackend for ChattyBackend {
        fn run_step(&self, _step: &StepName) -> eyre::Result<StepStatus> {
            tracing::info!("Compiling 2 files (.ex)");
            Ok(StepStatus::Ok)
        }
        fn reenable(&self, _step: &StepName) {}
        fn ensure_output_structure(&self) -> eyre::Result<()> {
            Ok(())
        }
    }

    let temp = TempDir::new().unwrap();
    let config = CoordinatorConfig {
        output_dir: temp.path().join("_build"),
        ..Default::default()
    }
    .with_steps(["compile"]);
    let coordinator = Coordinator::new(
        config,
        Arc::new(ChattyBackend),
        Arc::new(FakeLoader::default()),
        Arc::new(FakeReader::default()),
    );
    let (handle, _task) = coordinator.spawn();

    let result = handle.reload("web").await.unwrap();
    assert!(result.output.contains("Compiling 2 files (.ex)"));
}

// =============================================================================
// Serialization and coalescing
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_at_most_one_build_in_flight() {
    let mut rig = rig(
        &["compile"],
        FakeBackend::new(&[("compile", Script::Sleep(Duration::from_millis(15)))]),
    );
    let handle = rig.spawn();
    let backend = rig.backend.clone();

    let calls: Vec<_> = (0..8)
        .map(|i| {
            let handle = handle.clone();
            tokio::spawn(async move { handle.reload(format!("subject-{}", i)).await })
        })
        .collect();

    for call in futures::future::join_all(calls).await {
        assert!(call.unwrap().unwrap().is_ok());
    }
    assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_queued_same_subject_requests_share_one_build() {
    let mut rig = rig(
        &["compile"],
        FakeBackend::new(&[("compile", Script::Print("compiled web\n", StepStatus::Ok))]),
    );
    let backend = rig.backend.clone();
    let handle = rig.handle.clone();

    let calls: Vec<_> = (0..5)
        .map(|_| {
            let handle = handle.clone();
            tokio::spawn(async move { handle.reload("web").await })
        })
        .collect();
    wait_queued(&handle, 5).await;
    tokio::spawn(rig.take().run());

    let results: Vec<BuildResult> = futures::future::join_all(calls)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(backend.runs(), 1);
    assert!(results.iter().all(|r| *r == BuildResult::ok("compiled web\n")));

    let metrics = handle.metrics().await.unwrap();
    assert_eq!(metrics.attempts, 1);
    assert_eq!(metrics.coalesced_requests, 4);
}

#[tokio::test]
async fn test_different_subjects_are_not_coalesced() {
    let mut rig = rig(&["compile"], FakeBackend::new(&[]));
    let backend = rig.backend.clone();
    let handle = rig.handle.clone();

    let mut calls = Vec::new();
    for subject in ["web", "api", "web"] {
        let h = handle.clone();
        calls.push(tokio::spawn(async move { h.reload(subject).await }));
        // Keep arrival order deterministic
        wait_queued(&handle, calls.len()).await;
    }
    tokio::spawn(rig.take().run());

    for call in futures::future::join_all(calls).await {
        assert!(call.unwrap().unwrap().is_ok());
    }
    assert_eq!(backend.runs(), 2);
    assert_eq!(handle.metrics().await.unwrap().coalesced_requests, 1);
}

#[tokio::test]
async fn test_sync_waits_for_queued_reloads() {
    let mut rig = rig(
        &["compile"],
        FakeBackend::new(&[("compile", Script::Sleep(Duration::from_millis(10)))]),
    );
    let backend = rig.backend.clone();
    let handle = rig.handle.clone();

    let h = handle.clone();
    let call = tokio::spawn(async move { h.reload("web").await });
    wait_queued(&handle, 1).await;
    tokio::spawn(rig.take().run());

    handle.sync().await.unwrap();
    assert_eq!(backend.runs(), 1);
    assert!(call.await.unwrap().unwrap().is_ok());
}

#[tokio::test]
async fn test_caller_that_gives_up_does_not_disturb_others() {
    let mut rig = rig(
        &["compile"],
        FakeBackend::new(&[("compile", Script::Sleep(Duration::from_millis(100)))]),
    );
    let handle = rig.spawn();

    let impatient = handle.reload_with_timeout("web", Duration::from_millis(5)).await;
    assert!(matches!(impatient, Err(CoordinatorError::Timeout(_))));

    // The abandoned build finishes; the next caller gets its own answer
    assert!(handle.reload("web").await.unwrap().is_ok());
    assert_eq!(handle.metrics().await.unwrap().attempts, 2);
}

#[tokio::test]
async fn test_same_subject_arriving_mid_build_waits_for_next_attempt() {
    let mut rig = rig(
        &["compile"],
        FakeBackend::new(&[("compile", Script::Sleep(Duration::from_millis(100)))]),
    );
    let handle = rig.spawn();
    let backend = rig.backend.clone();

    let first = tokio::spawn({
        let handle = handle.clone();
        async move { handle.reload("web").await }
    });
    for _ in 0..1000 {
        if backend.runs() >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(backend.runs(), 1);

    // The first attempt's bookkeeping is done; this one gets a build of its own
    let second = handle.reload("web").await.unwrap();
    assert!(second.is_ok());
    assert!(first.await.unwrap().unwrap().is_ok());

    assert_eq!(backend.runs(), 2);
    let metrics = handle.metrics().await.unwrap();
    assert_eq!(metrics.attempts, 2);
    assert_eq!(metrics.coalesced_requests, 0);
}

// =============================================================================
// Timestamps and staleness
// =============================================================================

#[tokio::test]
async fn test_last_build_timestamp_is_monotonic() {
    let mut rig = rig(&["compile"], FakeBackend::new(&[("compile", Script::Fail)]));
    let handle = rig.spawn();

    let mut previous = handle.metrics().await.unwrap().last_build_at;
    for _ in 0..3 {
        let result = handle.reload("web").await.unwrap();
        assert_eq!(result.status, ReloadStatus::Error);
        let current = handle.metrics().await.unwrap().last_build_at;
        assert!(current >= previous);
        previous = current;
    }
    assert_eq!(handle.metrics().await.unwrap().attempts, 3);
}

#[tokio::test]
async fn test_out_of_band_rebuild_reloads_modified_units() {
    let mut rig = rig(&["compile"], FakeBackend::new(&[("compile", Script::Noop)]));
    let handle = rig.spawn();
    let (loader, reader) = (rig.loader.clone(), rig.reader.clone());

    // Another process rebuilt the project: manifests moved and X changed on disk
    reader.touch_manifest("_build/app.manifest", hour_from_now());
    loader.mark_modified("X");

    let result = handle.reload("web").await.unwrap();
    assert!(result.is_ok());
    assert_eq!(loader.calls(), vec!["unload X", "load X"]);
    assert_eq!(handle.metrics().await.unwrap().units_reloaded, 1);
}

#[tokio::test]
async fn test_modified_units_left_alone_without_manifest_change() {
    let mut rig = rig(&["compile"], FakeBackend::new(&[("compile", Script::Noop)]));
    let handle = rig.spawn();
    let (loader, reader) = (rig.loader.clone(), rig.reader.clone());

    reader.touch_manifest("_build/app.manifest", SystemTime::UNIX_EPOCH);
    loader.mark_modified("X");

    assert!(handle.reload("web").await.unwrap().is_ok());
    assert!(loader.calls().is_empty());
}

#[tokio::test]
async fn test_failed_build_skips_unit_reload() {
    let mut rig = rig(&["compile"], FakeBackend::new(&[("compile", Script::Fail)]));
    let handle = rig.spawn();
    let (loader, reader) = (rig.loader.clone(), rig.reader.clone());

    reader.touch_manifest("_build/app.manifest", hour_from_now());
    loader.mark_modified("X");

    assert_eq!(handle.reload("web").await.unwrap().status, ReloadStatus::Error);
    assert!(loader.calls().is_empty());
}

#[tokio::test]
async fn test_stale_config_fails_without_running_steps() {
    let mut rig = rig(&["compile"], FakeBackend::new(&[]));
    let handle = rig.spawn();
    let (backend, reader) = (rig.backend.clone(), rig.reader.clone());

    let built = SystemTime::now() - Duration::from_secs(60);
    reader.touch_manifest("_build/app.manifest", built);
    reader.touch_config("config/dev.exs", built + Duration::from_secs(30));
    reader.touch_config("config/prod.exs", built - Duration::from_secs(30));

    let result = handle.reload("web").await.unwrap();
    assert_eq!(result.status, ReloadStatus::Error);
    assert_eq!(backend.runs(), 0);
    assert!(result.output.contains("config/dev.exs"));
    assert!(!result.output.contains("config/prod.exs"));
}

// =============================================================================
// Failure handling
// =============================================================================

#[tokio::test]
async fn test_panicking_build_is_an_error_and_coordinator_survives() {
    let mut rig = rig(&["compile"], FakeBackend::new(&[("compile", Script::Panic)]));
    let handle = rig.spawn();

    let result = handle.reload("web").await.unwrap();
    assert_eq!(result.status, ReloadStatus::Error);
    assert!(result.output.contains("compiler exploded"));

    // Still serving
    let again = handle.reload("web").await.unwrap();
    assert_eq!(again.status, ReloadStatus::Error);
    assert_eq!(handle.metrics().await.unwrap().attempts, 2);
}

#[tokio::test]
async fn test_aborted_step_is_an_error_with_reason() {
    let mut rig = rig(&["compile"], FakeBackend::new(&[("compile", Script::Abort)]));
    let handle = rig.spawn();

    let result = handle.reload("web").await.unwrap();
    assert_eq!(result.status, ReloadStatus::Error);
    assert!(result.output.contains("compile"));
    assert!(result.output.contains("backend crashed"));
}

#[tokio::test]
async fn test_every_step_runs_even_after_a_failure() {
    let mut rig = rig(
        &["compile", "assets"],
        FakeBackend::new(&[("compile", Script::Fail), ("assets", Script::Ok)]),
    );
    let handle = rig.spawn();
    let backend = rig.backend.clone();

    let result = handle.reload("web").await.unwrap();
    assert_eq!(result.status, ReloadStatus::Error);
    assert_eq!(backend.events(), vec!["run compile", "run assets"]);
}

// =============================================================================
// Environment probe and lifecycle
// =============================================================================

#[tokio::test]
async fn test_failed_probe_disables_fast_path_once() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("_build");
    std::fs::write(&blocker, "not a directory").unwrap();

    let config = CoordinatorConfig {
        output_dir: blocker,
        ..Default::default()
    }
    .with_steps(["compile"]);
    let backend = Arc::new(FakeBackend::new(&[]));
    let coordinator = Coordinator::new(
        config,
        backend.clone(),
        Arc::new(FakeLoader::default()),
        Arc::new(FakeReader::default()),
    );
    let (handle, _task) = coordinator.spawn();

    assert!(!handle.probe_environment().await.unwrap());
    assert!(!handle.probe_environment().await.unwrap());
    handle.reload("web").await.unwrap();

    let disabled = backend.events().iter().filter(|e| *e == "disable_fast_path").count();
    assert_eq!(disabled, 1);
}

#[tokio::test]
async fn test_probe_runs_lazily_before_first_reload() {
    let temp = TempDir::new().unwrap();
    let output_dir = temp.path().join("_build");
    let mut rig = rig_with(temp, &["compile"], FakeBackend::new(&[]), FakeLoader::default());
    let handle = rig.spawn();

    assert!(!output_dir.exists());
    handle.reload("web").await.unwrap();
    // The probe creates the directory it checks
    assert!(output_dir.is_dir());
}

#[tokio::test]
async fn test_shutdown_closes_the_handle() {
    let mut rig = rig(&["compile"], FakeBackend::new(&[]));
    let (handle, task) = rig.take().spawn();

    handle.shutdown().await.unwrap();
    task.await.unwrap();

    assert!(matches!(handle.reload("web").await, Err(CoordinatorError::ChannelClosed)));
}

#[tokio::test]
async fn test_coordinator_stops_when_every_handle_is_dropped() {
    let mut rig = rig(&["compile"], FakeBackend::new(&[]));
    let coordinator = rig.take();
    drop(rig);
    let (handle, task) = coordinator.spawn();

    assert!(handle.reload("web").await.unwrap().is_ok());
    drop(handle);

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("coordinator task kept running without handles")
        .unwrap();
}
