//! Process supervisor for the managed server slot
//!
//! Owns the only inference server process the daemon runs. Every state
//! change happens with the slot lock held, and every background task is
//! tagged with the slot generation it was spawned for, so a task that
//! outlives its server instance cannot touch the next one.
//!
//! ```text
//! stopped -> starting -> running -> stopping -> stopped
//!               |           |
//!               +--> failed <+
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::state::{validate_identifier, ManagedServerState, ServerStatus};
use crate::config::{StreamConfig, SupervisorConfig};
use crate::error::{Error, Result};
use crate::launcher::{ExitInfo, ProcessHandle, ServerLauncher};
use crate::stream::{StreamHub, Subscription};

/// Output that means the server cannot recover on its own
pub const FATAL_MARKERS: [&str; 3] = [
    "Address already in use",
    "CUDA out of memory",
    "OutOfMemoryError",
];

/// Lets the supervisor see and cancel the workload running on the server
pub trait WorkloadGuard: Send + Sync {
    /// Id of the queued or running job, if any
    fn running_job(&self) -> Option<String>;

    /// Cancel the queued or running job; returns its id
    fn cancel_running(&self, reason: &str) -> Option<String>;
}

struct Slot {
    generation: u64,
    process: Option<Arc<ProcessHandle>>,
    tap: Option<StreamHub<String>>,
}

/// What the reconciler sees in one pass
#[derive(Debug, Clone)]
pub(crate) struct Observation {
    pub generation: u64,
    pub state: ManagedServerState,
    pub exited: Option<ExitInfo>,
}

/// Supervisor of the single managed server slot
pub struct ProcessSupervisor {
    launcher: Arc<dyn ServerLauncher>,
    config: SupervisorConfig,
    stream: StreamConfig,
    slot: tokio::sync::Mutex<Slot>,
    state: watch::Sender<ManagedServerState>,
    tap: Mutex<Option<StreamHub<String>>>,
    guard: RwLock<Option<Weak<dyn WorkloadGuard>>>,
}

impl ProcessSupervisor {
    pub fn new(
        launcher: Arc<dyn ServerLauncher>,
        config: SupervisorConfig,
        stream: StreamConfig,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ManagedServerState::stopped());
        Arc::new(Self {
            launcher,
            config,
            stream,
            slot: tokio::sync::Mutex::new(Slot {
                generation: 0,
                process: None,
                tap: None,
            }),
            state,
            tap: Mutex::new(None),
            guard: RwLock::new(None),
        })
    }

    /// Register the job engine consulted by [`stop`](Self::stop)
    pub fn set_workload_guard(&self, guard: Weak<dyn WorkloadGuard>) {
        *self.guard.write().unwrap_or_else(PoisonError::into_inner) = Some(guard);
    }

    fn workload_guard(&self) -> Option<Arc<dyn WorkloadGuard>> {
        self.guard
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub fn launcher(&self) -> &Arc<dyn ServerLauncher> {
        &self.launcher
    }

    /// Whether `framework` can be started
    pub fn supports(&self, framework: &str) -> bool {
        self.launcher.supports(framework)
    }

    fn current_tap(&self) -> MutexGuard<'_, Option<StreamHub<String>>> {
        self.tap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn raw_state(&self) -> ManagedServerState {
        self.state.borrow().clone()
    }

    /// Replace the state. Callers hold the slot lock.
    fn set_state(&self, update: impl FnOnce(&mut ManagedServerState)) {
        self.state.send_modify(update);
        let state = self.state.borrow();
        info!(
            framework = state.framework.as_deref().unwrap_or("-"),
            status = %state.status,
            managed = state.managed,
            "server state changed"
        );
    }

    /// Open a fresh log tap for a new server instance. Callers hold the slot lock.
    fn open_tap(&self, slot: &mut Slot) -> StreamHub<String> {
        let tap = StreamHub::log(self.stream);
        if let Some(old) = slot.tap.replace(tap.clone()) {
            old.finish();
        }
        *self.current_tap() = Some(tap.clone());
        tap
    }

    /// Start `framework` serving `model`.
    ///
    /// Returns as soon as the slot is `starting`; launch and readiness
    /// probing continue in the background.
    pub async fn start(self: &Arc<Self>, framework: &str, model: &str) -> Result<ManagedServerState> {
        validate_identifier("framework", framework)?;
        validate_identifier("model", model)?;
        if !self.supports(framework) {
            return Err(Error::invalid(format!("unknown framework '{}'", framework)));
        }

        let mut slot = self.slot.lock().await;
        let current = self.raw_state();
        if current.status.is_occupied() {
            return Err(Error::conflict(format!(
                "{} server is {}; stop it first",
                current.framework.as_deref().unwrap_or("another"),
                current.status
            )));
        }

        // Leftover from a failed instance
        if let Some(old) = slot.process.take() {
            let grace = self.config.stop_timeout();
            tokio::spawn(async move {
                old.terminate(grace).await;
            });
        }

        slot.generation += 1;
        let generation = slot.generation;
        let tap = self.open_tap(&mut slot);
        if let Some(line) = self.launcher.command_line(framework, model) {
            tap.push(format!("$ {}", line));
        }

        self.set_state(|state| {
            *state = ManagedServerState {
                framework: Some(framework.to_string()),
                model: Some(model.to_string()),
                status: ServerStatus::Starting,
                managed: true,
                ..ManagedServerState::stopped()
            };
        });
        let snapshot = self.status();
        drop(slot);

        tokio::spawn(Arc::clone(self).launch(
            generation,
            framework.to_string(),
            model.to_string(),
            tap,
        ));

        Ok(snapshot)
    }

    async fn launch(self: Arc<Self>, generation: u64, framework: String, model: String, tap: StreamHub<String>) {
        let handle = match self.launcher.launch(&framework, &model).await {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                self.fail(generation, format!("Failed to launch {}: {}", framework, e))
                    .await;
                return;
            }
        };

        {
            let mut slot = self.slot.lock().await;
            if slot.generation != generation || self.raw_state().status != ServerStatus::Starting {
                drop(slot);
                debug!(framework = %framework, "launch superseded, tearing down");
                handle.terminate(Duration::ZERO).await;
                return;
            }
            slot.process = Some(Arc::clone(&handle));
            let pid = handle.pid();
            self.state.send_modify(|state| state.pid = pid);
        }

        if let Some(output) = handle.take_output() {
            tokio::spawn(Arc::clone(&self).pump_output(generation, output, tap.clone()));
        }

        if !self.await_ready(generation, &framework, &handle).await {
            return;
        }

        {
            let slot = self.slot.lock().await;
            if slot.generation != generation || self.raw_state().status != ServerStatus::Starting {
                return;
            }
            self.set_state(|state| {
                state.status = ServerStatus::Running;
                state.started_at = Some(Utc::now());
            });
            tap.push(format!("[{} server is ready]", framework));
        }

        self.run_post_ready(generation, &framework, &model, &tap).await;
    }

    /// Poll readiness until healthy, exit, supersession, or timeout
    async fn await_ready(&self, generation: u64, framework: &str, handle: &ProcessHandle) -> bool {
        let deadline = Instant::now() + self.config.startup_timeout();

        loop {
            if !self.is_current(generation, ServerStatus::Starting).await {
                return false;
            }
            if let Some(exit) = handle.exit_status() {
                self.fail(generation, format!("Server exited during startup ({})", exit))
                    .await;
                return false;
            }
            if self.launcher.probe_health(framework).await {
                return true;
            }
            if Instant::now() >= deadline {
                self.fail(
                    generation,
                    format!(
                        "Server failed to start within {}s",
                        self.config.startup_timeout().as_secs()
                    ),
                )
                .await;
                return false;
            }
            debug!(framework, "waiting for server readiness");
            tokio::time::sleep(self.config.probe_interval()).await;
        }
    }

    async fn is_current(&self, generation: u64, status: ServerStatus) -> bool {
        let slot = self.slot.lock().await;
        slot.generation == generation && self.raw_state().status == status
    }

    async fn pump_output(self: Arc<Self>, generation: u64, mut output: mpsc::Receiver<String>, tap: StreamHub<String>) {
        while let Some(line) = output.recv().await {
            let fatal = FATAL_MARKERS.iter().find(|marker| line.contains(*marker));
            tap.push(line);
            if let Some(marker) = fatal {
                self.fail(generation, format!("Fatal server error: {}", marker))
                    .await;
            }
        }
        debug!(generation, "server output closed");
    }

    async fn run_post_ready(&self, generation: u64, framework: &str, model: &str, tap: &StreamHub<String>) {
        let hook = match self.launcher.post_ready(framework, model).await {
            Ok(Some(hook)) => hook,
            Ok(None) => return,
            Err(e) => {
                warn!(framework, error = %e, "post-ready command failed to start");
                tap.push(format!("[Post-ready command failed: {}]", e));
                return;
            }
        };

        tap.push("[Running post-ready command]".to_string());
        if let Some(mut output) = hook.take_output() {
            while let Some(line) = output.recv().await {
                tap.push(line);
            }
        }

        let exit = hook.wait().await;
        if !self.is_current(generation, ServerStatus::Running).await {
            return;
        }
        if exit.success() {
            tap.push("[Post-ready command finished]".to_string());
        } else {
            warn!(framework, exit = %exit, "post-ready command failed");
            tap.push(format!("[Post-ready command failed: {}]", exit));
        }
    }

    /// Move a `starting` or `running` instance to `failed` and tear it down
    pub(crate) async fn fail(&self, generation: u64, message: String) -> bool {
        let mut slot = self.slot.lock().await;
        let status = self.raw_state().status;
        if slot.generation != generation
            || !matches!(status, ServerStatus::Starting | ServerStatus::Running)
        {
            return false;
        }

        let process = slot.process.take();
        let tap = slot.tap.clone();
        self.set_state(|state| {
            state.status = ServerStatus::Failed;
            state.pid = None;
        });
        drop(slot);

        warn!(generation, reason = %message, "server failed");
        if let Some(tap) = tap {
            tap.push(format!("[{}]", message));
            tap.fail(message);
        }
        if let Some(process) = process {
            process.terminate(self.config.stop_timeout()).await;
        }
        true
    }

    /// Stop the server.
    ///
    /// Without `force` a running benchmark job blocks the stop. With `force`
    /// the job is cancelled and the process killed without a grace period;
    /// this never fails.
    pub async fn stop(self: &Arc<Self>, force: bool) -> Result<ManagedServerState> {
        let mut slot = self.slot.lock().await;
        let current = self.raw_state();
        if current.status == ServerStatus::Stopping && force {
            // Escalate a graceful stop that is still waiting out its grace period
            if let Some(process) = slot.process.clone() {
                if let Some(tap) = &slot.tap {
                    tap.push("[Force stopping server...]".to_string());
                }
                info!(pid = ?process.pid(), "escalating stop to kill");
                tokio::spawn(async move {
                    process.terminate(Duration::ZERO).await;
                });
            }
        }
        if matches!(current.status, ServerStatus::Stopped | ServerStatus::Stopping) {
            return Ok(self.status());
        }

        if let Some(guard) = self.workload_guard() {
            if force {
                if let Some(job_id) = guard.cancel_running("server stopped") {
                    info!(job_id = %job_id, "cancelled benchmark for forced stop");
                }
            } else if let Some(job_id) = guard.running_job() {
                return Err(Error::BenchmarkRunning { job_id });
            }
        }

        slot.generation += 1;
        let generation = slot.generation;
        let tap = slot.tap.clone();

        if !current.managed && current.status == ServerStatus::Running {
            // Detected server: not ours to kill
            self.set_state(|state| *state = ManagedServerState::stopped());
            drop(slot);
            if let Some(tap) = tap {
                tap.push("[Released external server]".to_string());
                tap.finish();
            }
            return Ok(self.status());
        }

        // Stays in the slot while stopping so a forced stop can escalate
        let process = slot.process.clone();
        self.set_state(|state| state.status = ServerStatus::Stopping);
        if let Some(tap) = &tap {
            tap.push("[Stopping server...]".to_string());
        }
        drop(slot);

        let grace = if force {
            Duration::ZERO
        } else {
            self.config.stop_timeout()
        };
        let snapshot = self.status();
        tokio::spawn(Arc::clone(self).finish_stop(generation, process, grace, tap));
        Ok(snapshot)
    }

    async fn finish_stop(
        self: Arc<Self>,
        generation: u64,
        process: Option<Arc<ProcessHandle>>,
        grace: Duration,
        tap: Option<StreamHub<String>>,
    ) {
        if let Some(process) = &process {
            match process.terminate(grace).await {
                Some(exit) => debug!(exit = %exit, "server process stopped"),
                None => warn!(pid = ?process.pid(), "server process did not confirm exit"),
            }
        }

        let mut slot = self.slot.lock().await;
        let same_process = matches!(
            (&process, &slot.process),
            (Some(stopped), Some(current)) if Arc::ptr_eq(stopped, current)
        );
        if same_process {
            slot.process = None;
        }
        if slot.generation == generation {
            self.set_state(|state| *state = ManagedServerState::stopped());
        }
        drop(slot);

        if let Some(tap) = tap {
            tap.push("[Server stopped]".to_string());
            tap.finish();
        }
    }

    /// Last recorded snapshot; never waits on a transition
    pub fn status(&self) -> ManagedServerState {
        let mut state = self.raw_state();
        state.uptime_secs = state.uptime_at(Utc::now());
        state.log_lines = self
            .current_tap()
            .as_ref()
            .map(StreamHub::emitted)
            .unwrap_or(0);
        state
    }

    /// Change notifications (uptime and line counts are not filled in)
    pub fn status_watch(&self) -> watch::Receiver<ManagedServerState> {
        self.state.subscribe()
    }

    /// Attach to the current server instance's log
    pub fn tail_log(&self) -> Subscription<String> {
        match self.current_tap().as_ref() {
            Some(tap) => tap.subscribe(),
            None => Subscription::empty(),
        }
    }

    /// Whether `framework` is running and ready for work
    pub fn is_serving(&self, framework: &str) -> bool {
        self.state.borrow().is_serving(framework)
    }

    /// Fail with `Precondition` unless `framework` is running and ready
    pub fn ensure_serving(&self, framework: &str) -> Result<()> {
        let state = self.raw_state();
        if state.is_serving(framework) {
            return Ok(());
        }
        Err(Error::precondition(match state.framework {
            Some(current) if current != framework => format!(
                "{} is not running (current server: {} {})",
                framework, current, state.status
            ),
            _ => format!("{} server is not running", framework),
        }))
    }

    /// Run `admit` while the slot cannot change, provided `framework` is serving
    pub async fn admit<T>(&self, framework: &str, admit: impl FnOnce() -> Result<T>) -> Result<T> {
        let _slot = self.slot.lock().await;
        self.ensure_serving(framework)?;
        admit()
    }

    pub(crate) async fn observe(&self) -> Observation {
        let slot = self.slot.lock().await;
        Observation {
            generation: slot.generation,
            state: self.raw_state(),
            exited: slot.process.as_ref().and_then(|p| p.exit_status()),
        }
    }

    /// Record a healthy endpoint nobody launched
    pub(crate) async fn adopt_external(&self, generation: u64, framework: &str) -> bool {
        let mut slot = self.slot.lock().await;
        if slot.generation != generation || self.raw_state().status != ServerStatus::Stopped {
            return false;
        }
        slot.generation += 1;
        let tap = self.open_tap(&mut slot);
        tap.push(format!(
            "[Detected running {} server not started by benchd]",
            framework
        ));
        self.set_state(|state| {
            *state = ManagedServerState {
                framework: Some(framework.to_string()),
                status: ServerStatus::Running,
                managed: false,
                started_at: Some(Utc::now()),
                ..ManagedServerState::stopped()
            };
        });
        true
    }

    /// Drop an adopted server whose endpoint went away
    pub(crate) async fn release_external(&self, generation: u64) -> bool {
        let mut slot = self.slot.lock().await;
        let state = self.raw_state();
        if slot.generation != generation || state.managed || state.status != ServerStatus::Running {
            return false;
        }
        slot.generation += 1;
        let tap = slot.tap.clone();
        self.set_state(|state| *state = ManagedServerState::stopped());
        drop(slot);

        if let Some(tap) = tap {
            tap.push("[External server stopped responding]".to_string());
            tap.finish();
        }
        true
    }
}
