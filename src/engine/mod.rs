//! Server lifecycle and job orchestration engine
//!
//! - ProcessSupervisor: owns the single managed server slot
//! - JobOrchestrator: runs benchmark jobs against the serving framework
//! - StatusReconciler: periodically corrects drift in the server record
//! - MetricsSampler: broadcasts GPU samples
//!
//! [`Engine`] wires them together and owns their background tasks.

mod orchestrator;
mod reconciler;
mod sampler;
mod state;
mod supervisor;


pub use orchestrator::{JobOrchestrator, ALL_SCENARIOS};
pub use reconciler::{ReconcileOutcome, StatusReconciler};
pub use sampler::MetricsSampler;
pub use state::{
    validate_identifier, BenchmarkJob, JobRequest, JobStatus, JobSummary, ManagedServerState,
    ServerStatus,
};
pub use supervisor::{ProcessSupervisor, WorkloadGuard, FATAL_MARKERS};

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bench::{CommandScenarioRunner, ScenarioRunner};
use crate::config::BenchdConfig;
use crate::gpu::{GpuGauge, NvidiaSmiGauge};
use crate::launcher::{CommandLauncher, ServerLauncher};

/// Extra time allowed on shutdown beyond the stop grace period
const SHUTDOWN_SLACK: Duration = Duration::from_secs(10);

/// The assembled engine
pub struct Engine {
    pub supervisor: Arc<ProcessSupervisor>,
    pub jobs: Arc<JobOrchestrator>,
    pub reconciler: Arc<StatusReconciler>,
    pub sampler: Arc<MetricsSampler>,
    shutdown: CancellationToken,
    stop_timeout: Duration,
}

impl Engine {
    /// Build the engine around the given collaborators
    pub fn new(
        config: &BenchdConfig,
        launcher: Arc<dyn ServerLauncher>,
        runner: Arc<dyn ScenarioRunner>,
        gauge: Arc<dyn GpuGauge>,
    ) -> Self {
        let supervisor = ProcessSupervisor::new(launcher, config.supervisor.clone(), config.stream);
        let jobs = JobOrchestrator::new(
            Arc::clone(&supervisor),
            runner,
            &config.bench,
            config.engine.job_history,
            config.stream,
        );
        let reconciler = Arc::new(StatusReconciler::new(
            Arc::clone(&supervisor),
            config.engine.reconcile_interval(),
        ));
        let sampler = Arc::new(MetricsSampler::new(
            gauge,
            config.engine.metrics_interval(),
            config.stream,
        ));

        Self {
            supervisor,
            jobs,
            reconciler,
            sampler,
            shutdown: CancellationToken::new(),
            stop_timeout: config.supervisor.stop_timeout(),
        }
    }

    /// Build the engine with the command-driven collaborators
    pub fn from_config(config: &BenchdConfig) -> Self {
        let launcher = CommandLauncher::new(config.frameworks.clone(), &config.supervisor);
        let runner = CommandScenarioRunner::new(config.bench.clone());
        let gauge = NvidiaSmiGauge::new(&config.gpu);
        Self::new(config, Arc::new(launcher), Arc::new(runner), Arc::new(gauge))
    }

    /// Start the reconciler and sampler loops
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(&self.reconciler).run(self.shutdown.child_token())),
            tokio::spawn(Arc::clone(&self.sampler).run(self.shutdown.child_token())),
        ]
    }

    /// Token cancelled by [`shutdown`](Self::shutdown)
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop background loops, cancel any job, and kill the managed server
    pub async fn shutdown(&self) {
        info!("shutting down engine");
        self.shutdown.cancel();

        let state = match self.supervisor.stop(true).await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "forced stop failed");
                return;
            }
        };
        if state.status != ServerStatus::Stopping {
            return;
        }

        let mut watch = self.supervisor.status_watch();
        let stopped = tokio::time::timeout(self.stop_timeout + SHUTDOWN_SLACK, async {
            watch
                .wait_for(|state| state.status == ServerStatus::Stopped)
                .await
                .is_ok()
        })
        .await
        .unwrap_or(false);
        if !stopped {
            warn!("server did not reach stopped before shutdown");
        }
    }
}
