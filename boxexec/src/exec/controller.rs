//! Exec session lifecycle controller.
//!
//! Drives sessions through `Created → Starting → Running → Exited`. The store's
//! compare-and-transition is the only synchronization point: whichever start
//! request moves a session out of `Created` owns the launch, everyone else
//! gets `AlreadyStarted`.

use super::exec_handle::ExecHandle;
use super::inspect;
use super::launcher::{LaunchSpec, Launcher};
use super::output;
use super::state::{ExecConfig, ExecSession, ExecStatus};
use super::store::SessionStore;
use crate::container::ContainerSupervisor;
use crate::types::ExecId;
use boxexec_shared::constants::exit_codes;
use boxexec_shared::errors::{BoxexecError, BoxexecResult};
use boxexec_shared::wire::ExecInspectResponse;
use bytes::Bytes;
use chrono::Utc;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Result of a successful start.
#[derive(Debug)]
pub struct StartedExec {
    pub id: ExecId,
    pub pid: u32,
    /// Whether output is passed through unframed.
    pub tty: bool,
    /// Framed stdout/stderr, present for attached starts. Ends when the
    /// process closes its output.
    pub output: Option<mpsc::Receiver<io::Result<Bytes>>>,
}

/// Lifecycle controller for exec sessions.
#[derive(Clone)]
pub struct ExecController {
    store: SessionStore,
    containers: Arc<dyn ContainerSupervisor>,
    launcher: Arc<dyn Launcher>,
}

impl ExecController {
    pub fn new(containers: Arc<dyn ContainerSupervisor>, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            store: SessionStore::new(),
            containers,
            launcher,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Allocate a session for a validated config.
    pub fn create(&self, config: ExecConfig) -> BoxexecResult<ExecId> {
        let session = self
            .store
            .create(self.containers.as_ref(), config)
            .inspect_err(|e| debug!(error = %e, "Exec create rejected"))?;

        info!(
            exec_id = %session.id(),
            container = %session.container().name,
            cmd = ?session.config().command,
            "Exec session created"
        );
        Ok(session.id().clone())
    }

    /// Start a session.
    ///
    /// Runs on its own task so a caller that goes away mid-launch cannot
    /// strand the session in `Starting`.
    pub async fn start(&self, id: &str, detach: bool) -> BoxexecResult<StartedExec> {
        let this = self.clone();
        let id = id.to_string();
        tokio::spawn(async move { this.start_session(&id, detach).await })
            .await
            .map_err(|e| BoxexecError::Internal(format!("exec start task failed: {}", e)))?
    }

    async fn start_session(&self, id: &str, detach: bool) -> BoxexecResult<StartedExec> {
        let session = self.store.get(id)?;

        if !self.containers.is_running(session.container()) {
            debug!(exec_id = %id, container = %session.container().name, "Container not running");
            return Err(BoxexecError::ContainerNotRunning(
                session.container().name.clone(),
            ));
        }

        let session = self
            .store
            .compare_and_transition(id, ExecStatus::Created, ExecStatus::Starting, |s| {
                s.set_detach(detach)
            })
            .map_err(|e| match e {
                BoxexecError::StateConflict { actual, .. } => BoxexecError::AlreadyStarted {
                    id: id.to_string(),
                    state: actual,
                },
                other => other,
            })?;

        let config = session.config();
        let capture = !detach && (config.attach_stdout || config.attach_stderr);
        let tty = config.tty;
        let spec = LaunchSpec::from_session(&session, capture);

        let mut handle = match self.launcher.launch(&spec).await {
            Ok(handle) => handle,
            Err(e) => {
                let exit_code = match &e {
                    BoxexecError::LaunchFailed { exit_code, .. } => *exit_code,
                    _ => exit_codes::CANNOT_EXECUTE,
                };
                warn!(exec_id = %id, launcher = self.launcher.name(), exit_code, error = %e, "Exec launch failed");
                if let Err(record_err) = self.store.compare_and_transition(
                    id,
                    ExecStatus::Starting,
                    ExecStatus::Exited,
                    |s| s.record_exit(exit_code),
                ) {
                    warn!(exec_id = %id, error = %record_err, "Failed to record launch failure");
                }
                return Err(e);
            }
        };

        let pid = handle.pid();
        let output = capture.then(|| output::forward(&mut handle, tty));

        let running = self.store.compare_and_transition(
            id,
            ExecStatus::Starting,
            ExecStatus::Running,
            |s| s.record_start(pid),
        );
        // Reap the process even if the session vanished meanwhile
        self.spawn_watcher(session.id().clone(), handle);
        running?;

        info!(exec_id = %id, pid, detach, launcher = self.launcher.name(), "Exec process started");
        Ok(StartedExec {
            id: session.id().clone(),
            pid,
            tty,
            output,
        })
    }

    /// Record the exit of `handle` once it finishes.
    fn spawn_watcher(&self, id: ExecId, handle: ExecHandle) {
        let store = self.store.clone();
        tokio::spawn(async move {
            let exit_code = match handle.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(exec_id = %id, error = %e, "Failed to wait for exec process");
                    exit_codes::UNKNOWN
                }
            };

            match store.compare_and_transition(
                id.as_str(),
                ExecStatus::Running,
                ExecStatus::Exited,
                |s| s.record_exit(exit_code),
            ) {
                Ok(_) => info!(exec_id = %id, exit_code, "Exec process exited"),
                Err(e) => debug!(exec_id = %id, exit_code, error = %e, "Exit not recorded"),
            }
        });
    }

    /// Current external view of a session.
    pub fn inspect(&self, id: &str) -> BoxexecResult<ExecInspectResponse> {
        Ok(inspect::project(&self.store.get(id)?))
    }

    /// Wait until the session has exited and return its exit code.
    pub async fn wait(&self, id: &str) -> BoxexecResult<i32> {
        let mut rx = self.store.subscribe(id)?;
        rx.wait_for(|status| status.is_exited())
            .await
            .map_err(|_| BoxexecError::SessionNotFound(id.to_string()))?;

        self.store
            .get(id)?
            .exit_code()
            .ok_or_else(|| BoxexecError::Internal(format!("exec {} exited without exit code", id)))
    }

    /// Drop a session record. Idempotent.
    pub fn remove(&self, id: &str) -> bool {
        self.store.remove(id).is_some()
    }

    pub fn list(&self) -> Vec<ExecSession> {
        self.store.list()
    }

    /// Remove sessions that have been `Exited` for longer than `ttl`.
    pub fn reap_exited(&self, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(ttl)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let removed = self.store.remove_exited_before(cutoff);
        for id in &removed {
            debug!(exec_id = %id, "Reaped exited exec session");
        }
        removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::HostContainers;
    use crate::exec::exec_handle::ExitStatus;
    use crate::exec::launcher::HostLauncher;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    /// Launcher that never spawns anything and exits when told to.
    #[derive(Default)]
    struct FakeLauncher {
        launches: AtomicUsize,
        exits: parking_lot::Mutex<Vec<oneshot::Sender<ExitStatus>>>,
        fail_with: Option<i32>,
    }

    impl FakeLauncher {
        fn exit_all(&self, status: ExitStatus) {
            for tx in self.exits.lock().drain(..) {
                let _ = tx.send(status);
            }
        }
    }

    #[async_trait]
    impl Launcher for FakeLauncher {
        async fn launch(&self, _spec: &LaunchSpec) -> BoxexecResult<ExecHandle> {
            let n = self.launches.fetch_add(1, Ordering::SeqCst);
            if let Some(exit_code) = self.fail_with {
                return Err(BoxexecError::LaunchFailed {
                    message: "no such file".into(),
                    exit_code,
                });
            }
            // Give racing starts time to pile up
            tokio::time::sleep(Duration::from_millis(10)).await;

            let (tx, rx) = oneshot::channel();
            self.exits.lock().push(tx);
            Ok(ExecHandle::new(1000 + n as u32, async move {
                rx.await
                    .map_err(|_| BoxexecError::Internal("fake process dropped".into()))
            }))
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn controller_with(launcher: Arc<dyn Launcher>) -> (ExecController, HostContainers) {
        let containers = HostContainers::new();
        containers.register("web", std::process::id());
        let controller = ExecController::new(Arc::new(containers.clone()), launcher);
        (controller, containers)
    }

    fn create(controller: &ExecController, cmd: &[&str]) -> ExecId {
        controller
            .create(ExecConfig::new("web", cmd.iter().copied()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_detached_and_exit() {
        let launcher = Arc::new(FakeLauncher::default());
        let (controller, _containers) = controller_with(launcher.clone());
        let id = create(&controller, &["true"]);

        let started = controller.start(id.as_str(), true).await.unwrap();
        assert!(started.output.is_none());

        let view = controller.inspect(id.as_str()).unwrap();
        assert!(view.running);
        assert_eq!(view.exit_code, None);
        assert_eq!(view.pid, started.pid);

        launcher.exit_all(ExitStatus::Code(0));
        assert_eq!(controller.wait(id.as_str()).await.unwrap(), 0);

        let view = controller.inspect(id.as_str()).unwrap();
        assert!(!view.running);
        assert_eq!(view.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_signal_exit_code() {
        let launcher = Arc::new(FakeLauncher::default());
        let (controller, _containers) = controller_with(launcher.clone());
        let id = create(&controller, &["sleep", "100"]);

        controller.start(id.as_str(), true).await.unwrap();
        launcher.exit_all(ExitStatus::Signal(9));
        assert_eq!(controller.wait(id.as_str()).await.unwrap(), 137);
    }

    #[tokio::test]
    async fn test_second_start_conflicts() {
        let launcher = Arc::new(FakeLauncher::default());
        let (controller, _containers) = controller_with(launcher.clone());
        let id = create(&controller, &["true"]);

        controller.start(id.as_str(), true).await.unwrap();
        let err = controller.start(id.as_str(), true).await.unwrap_err();
        assert!(matches!(err, BoxexecError::AlreadyStarted { ref state, .. } if state == "running"));

        launcher.exit_all(ExitStatus::Code(0));
        controller.wait(id.as_str()).await.unwrap();
        let err = controller.start(id.as_str(), true).await.unwrap_err();
        assert!(matches!(err, BoxexecError::AlreadyStarted { ref state, .. } if state == "exited"));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_launch_once() {
        let launcher = Arc::new(FakeLauncher::default());
        let (controller, _containers) = controller_with(launcher.clone());
        let id = create(&controller, &["true"]);

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let controller = controller.clone();
                let id = id.clone();
                tokio::spawn(async move { controller.start(id.as_str(), true).await })
            })
            .collect();

        let mut ok = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(BoxexecError::AlreadyStarted { .. }) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(conflicts, 31);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        launcher.exit_all(ExitStatus::Code(0));
    }

    #[tokio::test]
    async fn test_launch_failure_moves_to_exited() {
        let launcher = Arc::new(FakeLauncher {
            fail_with: Some(127),
            ..Default::default()
        });
        let (controller, _containers) = controller_with(launcher);
        let id = create(&controller, &["missing"]);

        let err = controller.start(id.as_str(), true).await.unwrap_err();
        assert_eq!(err.status_code(), 500);

        let session = controller.store().get(id.as_str()).unwrap();
        assert_eq!(session.status(), ExecStatus::Exited);
        assert_eq!(session.exit_code(), Some(127));
        assert!(session.started_at().is_none());
        assert_eq!(controller.wait(id.as_str()).await.unwrap(), 127);
    }

    /// Fails every launch after dropping the session from `store`.
    #[derive(Default)]
    struct RemovingLauncher {
        store: parking_lot::Mutex<Option<SessionStore>>,
    }

    #[async_trait]
    impl Launcher for RemovingLauncher {
        async fn launch(&self, spec: &LaunchSpec) -> BoxexecResult<ExecHandle> {
            if let Some(store) = self.store.lock().as_ref() {
                store.remove(spec.exec_id.as_str());
            }
            Err(BoxexecError::LaunchFailed {
                message: "no such file".into(),
                exit_code: 127,
            })
        }

        fn name(&self) -> &'static str {
            "removing"
        }
    }

    #[tokio::test]
    async fn test_launch_failure_reported_when_session_removed() {
        let launcher = Arc::new(RemovingLauncher::default());
        let (controller, _containers) = controller_with(launcher.clone());
        *launcher.store.lock() = Some(controller.store().clone());
        let id = create(&controller, &["missing"]);

        let err = controller.start(id.as_str(), true).await.unwrap_err();
        assert!(matches!(err, BoxexecError::LaunchFailed { exit_code: 127, .. }));
        assert!(!controller.store().exists(id.as_str()));
    }

    #[tokio::test]
    async fn test_start_unknown_session() {
        let (controller, _containers) = controller_with(Arc::new(FakeLauncher::default()));
        let err = controller.start("nope", true).await.unwrap_err();
        assert!(matches!(err, BoxexecError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_stopped_container_stays_not_running_after_restart() {
        let launcher = Arc::new(FakeLauncher::default());
        let (controller, containers) = controller_with(launcher.clone());
        let id = create(&controller, &["true"]);

        containers.mark_stopped("web").unwrap();
        let err = controller.start(id.as_str(), true).await.unwrap_err();
        assert!(matches!(err, BoxexecError::ContainerNotRunning(_)));

        containers.register("web", std::process::id());
        let err = controller.start(id.as_str(), true).await.unwrap_err();
        assert!(matches!(err, BoxexecError::ContainerNotRunning(_)));

        assert_eq!(
            controller.store().get(id.as_str()).unwrap().status(),
            ExecStatus::Created
        );
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_attached_start_streams_output() {
        let (controller, _containers) = controller_with(Arc::new(HostLauncher));
        let id = create(&controller, &["sh", "-c", "printf hi"]);

        let started = controller.start(id.as_str(), false).await.unwrap();
        let mut output = started.output.unwrap();
        let mut bytes = Vec::new();
        while let Some(chunk) = output.recv().await {
            bytes.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(bytes, [1, 0, 0, 0, 0, 0, 0, 2, b'h', b'i']);
        assert_eq!(controller.wait(id.as_str()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reap_exited() {
        let launcher = Arc::new(FakeLauncher::default());
        let (controller, _containers) = controller_with(launcher.clone());
        let done = create(&controller, &["true"]);
        let pending = create(&controller, &["true"]);

        controller.start(done.as_str(), true).await.unwrap();
        launcher.exit_all(ExitStatus::Code(0));
        controller.wait(done.as_str()).await.unwrap();

        assert_eq!(controller.reap_exited(Duration::from_secs(3600)), 0);
        assert_eq!(controller.reap_exited(Duration::ZERO), 1);
        assert!(controller.inspect(done.as_str()).is_err());
        assert!(controller.inspect(pending.as_str()).is_ok());
    }

    #[tokio::test]
    async fn test_wait_on_removed_session() {
        let (controller, _containers) = controller_with(Arc::new(FakeLauncher::default()));
        let id = create(&controller, &["true"]);

        let waiter = {
            let controller = controller.clone();
            let id = id.clone();
            tokio::spawn(async move { controller.wait(id.as_str()).await })
        };
        tokio::task::yield_now().await;
        assert!(controller.remove(id.as_str()));

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, BoxexecError::SessionNotFound(_)));
    }
}
