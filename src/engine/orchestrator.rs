//! Benchmark job orchestration
//!
//! At most one job is queued or running at a time, and only against the
//! framework currently serving. Jobs execute scenario by scenario and trial
//! by trial; cancellation is checked between trials and handed to the
//! runner so it can abort the trial in flight.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::state::{validate_identifier, BenchmarkJob, JobRequest, JobStatus, JobSummary};
use super::supervisor::{ProcessSupervisor, WorkloadGuard};
use crate::bench::{ScenarioRunner, Trial};
use crate::config::{BenchConfig, StreamConfig};
use crate::error::{Error, Result};
use crate::stream::{StreamHub, Subscription};

/// Expands to every catalogued scenario
pub const ALL_SCENARIOS: &str = "all";

struct JobEntry {
    job: BenchmarkJob,
    log: StreamHub<String>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct JobTable {
    active: Option<String>,
    jobs: HashMap<String, JobEntry>,
    /// Oldest first
    order: VecDeque<String>,
}

/// Runs benchmark jobs against the managed server
pub struct JobOrchestrator {
    supervisor: Arc<ProcessSupervisor>,
    runner: Arc<dyn ScenarioRunner>,
    scenarios: Vec<String>,
    max_trials: u32,
    history: usize,
    stream: StreamConfig,
    table: Mutex<JobTable>,
}

impl JobOrchestrator {
    /// Create the orchestrator and register it with the supervisor
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        runner: Arc<dyn ScenarioRunner>,
        bench: &BenchConfig,
        history: usize,
        stream: StreamConfig,
    ) -> Arc<Self> {
        let orchestrator = Arc::new(Self {
            supervisor: Arc::clone(&supervisor),
            runner,
            scenarios: bench.scenarios.clone(),
            max_trials: bench.max_trials,
            history: history.max(1),
            stream,
            table: Mutex::new(JobTable::default()),
        });

        let guard: Weak<JobOrchestrator> = Arc::downgrade(&orchestrator);
        supervisor.set_workload_guard(guard);
        orchestrator
    }

    fn lock(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve requested scenarios against the catalogue, expanding `all`
    fn resolve_scenarios(&self, requested: &[String]) -> Result<Vec<String>> {
        if requested.is_empty() {
            return Err(Error::invalid("at least one scenario is required"));
        }

        let mut resolved: Vec<String> = Vec::new();
        for name in requested {
            validate_identifier("scenario", name)?;
            if name == ALL_SCENARIOS {
                if requested.len() > 1 {
                    return Err(Error::invalid(format!(
                        "'{}' cannot be combined with other scenarios",
                        ALL_SCENARIOS
                    )));
                }
                return Ok(self.scenarios.clone());
            }
            if !self.scenarios.contains(name) {
                return Err(Error::invalid(format!(
                    "unknown scenario '{}' (known: {})",
                    name,
                    self.scenarios.join(", ")
                )));
            }
            if resolved.contains(name) {
                return Err(Error::invalid(format!("duplicate scenario '{}'", name)));
            }
            resolved.push(name.clone());
        }
        Ok(resolved)
    }

    /// Queue a job against the framework currently serving.
    ///
    /// Returns once the job is recorded as `queued`; execution continues in
    /// the background.
    pub async fn submit(self: &Arc<Self>, request: JobRequest) -> Result<JobSummary> {
        validate_identifier("framework", &request.framework)?;
        validate_identifier("model", &request.model)?;
        if !self.supervisor.supports(&request.framework) {
            return Err(Error::invalid(format!(
                "unknown framework '{}'",
                request.framework
            )));
        }
        // Checked again under the slot lock by `admit`
        self.supervisor.ensure_serving(&request.framework)?;
        if request.trials == 0 || request.trials > self.max_trials {
            return Err(Error::invalid(format!(
                "trials must be between 1 and {}, got {}",
                self.max_trials, request.trials
            )));
        }
        let scenarios = self.resolve_scenarios(&request.scenarios)?;

        let (job, log, cancel) = self
            .supervisor
            .admit(&request.framework, || self.record_job(&request, scenarios))
            .await?;

        info!(
            job_id = %job.job_id,
            framework = %job.framework,
            scenarios = ?job.scenarios,
            trials = job.trials,
            "benchmark job queued"
        );

        let summary = job.summary();
        tokio::spawn(Arc::clone(self).execute(job, log, cancel));
        Ok(summary)
    }

    /// Record a new job. Runs under the supervisor's slot lock.
    fn record_job(
        &self,
        request: &JobRequest,
        scenarios: Vec<String>,
    ) -> Result<(BenchmarkJob, StreamHub<String>, CancellationToken)> {
        let mut guard = self.lock();
        let table = &mut *guard;
        if let Some(active) = &table.active {
            return Err(Error::conflict(format!(
                "benchmark job {} is already running",
                active
            )));
        }

        let job_id = Uuid::new_v4().to_string();
        let total_trials = scenarios.len() as u32 * request.trials;
        let job = BenchmarkJob {
            job_id: job_id.clone(),
            framework: request.framework.clone(),
            model: request.model.clone(),
            scenarios,
            trials: request.trials,
            status: JobStatus::Queued,
            log_line_count: 0,
            completed_trials: 0,
            total_trials,
            created_at: Utc::now(),
            finished_at: None,
            error: None,
        };
        let log = StreamHub::log(self.stream);
        let cancel = CancellationToken::new();

        table.jobs.insert(
            job_id.clone(),
            JobEntry {
                job: job.clone(),
                log: log.clone(),
                cancel: cancel.clone(),
            },
        );
        table.order.push_back(job_id.clone());
        table.active = Some(job_id);

        // Forget the oldest finished jobs beyond the history window
        while table.order.len() > self.history {
            let jobs = &table.jobs;
            let oldest_finished = table.order.iter().position(|id| {
                jobs.get(id)
                    .map(|entry| entry.job.status.is_terminal())
                    .unwrap_or(true)
            });
            let Some(pos) = oldest_finished else { break };
            if let Some(id) = table.order.remove(pos) {
                table.jobs.remove(&id);
            }
        }

        Ok((job, log, cancel))
    }

    async fn execute(self: Arc<Self>, job: BenchmarkJob, log: StreamHub<String>, cancel: CancellationToken) {
        let job_id = job.job_id.clone();
        if !self.mark_running(&job_id) {
            return;
        }

        log.push(format!(
            "[Benchmark {}: {} x{} on {} ({})]",
            job_id,
            job.scenarios.join(", "),
            job.trials,
            job.framework,
            job.model
        ));

        let mut plan = Vec::with_capacity(job.total_trials as usize);
        for scenario in &job.scenarios {
            for index in 0..job.trials {
                plan.push(Trial {
                    job_id: job_id.clone(),
                    framework: job.framework.clone(),
                    model: job.model.clone(),
                    scenario: scenario.clone(),
                    index,
                    trials: job.trials,
                });
            }
        }

        let result = self.run_trials(&job_id, &plan, &log, &cancel).await;
        if cancel.is_cancelled() {
            return;
        }
        match result {
            Ok(()) => {
                self.finalize(
                    &job_id,
                    JobStatus::Completed,
                    format!("[Benchmark completed successfully: {} trial(s)]", plan.len()),
                    None,
                );
            }
            Err(e) => {
                let message = e.to_string();
                self.finalize(
                    &job_id,
                    JobStatus::Failed,
                    format!("[Error: {}]", message),
                    Some(message),
                );
            }
        }
    }

    async fn run_trials(
        &self,
        job_id: &str,
        plan: &[Trial],
        log: &StreamHub<String>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for trial in plan {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if !self.supervisor.is_serving(&trial.framework) {
                return Err(Error::precondition(format!(
                    "{} server is no longer running",
                    trial.framework
                )));
            }

            log.push(format!(
                "[{}] trial {}/{}",
                trial.scenario,
                trial.number(),
                trial.trials
            ));
            self.runner.run_trial(trial, log, cancel).await?;

            if cancel.is_cancelled() {
                return Ok(());
            }
            self.record_progress(job_id);
        }
        Ok(())
    }

    fn mark_running(&self, job_id: &str) -> bool {
        let mut table = self.lock();
        match table.jobs.get_mut(job_id) {
            Some(entry) if entry.job.status == JobStatus::Queued => {
                entry.job.status = JobStatus::Running;
                info!(job_id, "benchmark job running");
                true
            }
            _ => false,
        }
    }

    fn record_progress(&self, job_id: &str) {
        if let Some(entry) = self.lock().jobs.get_mut(job_id) {
            entry.job.completed_trials += 1;
        }
    }

    /// Move a live job to a terminal status and close its log.
    ///
    /// No-op for jobs that are already terminal.
    fn finalize(&self, job_id: &str, status: JobStatus, last_line: String, error: Option<String>) -> bool {
        let mut guard = self.lock();
        let table = &mut *guard;
        let Some(entry) = table.jobs.get_mut(job_id) else {
            return false;
        };
        if entry.job.status.is_terminal() {
            return false;
        }

        entry.job.status = status;
        entry.job.finished_at = Some(Utc::now());
        entry.job.error = error.clone();
        if table.active.as_deref() == Some(job_id) {
            table.active = None;
        }

        entry.log.push(last_line);
        match (status, error) {
            (JobStatus::Failed, Some(message)) => {
                warn!(job_id, error = %message, "benchmark job failed");
                entry.log.fail(message);
            }
            _ => {
                info!(job_id, status = %status, "benchmark job finished");
                entry.log.finish();
            }
        }
        if status == JobStatus::Cancelled {
            entry.cancel.cancel();
        }
        true
    }

    fn cancel_with(&self, job_id: &str, line: String) -> Result<JobSummary> {
        {
            let table = self.lock();
            let entry = table
                .jobs
                .get(job_id)
                .ok_or_else(|| Error::not_found(format!("job {}", job_id)))?;
            if entry.job.status.is_terminal() {
                return Ok(entry.job.summary());
            }
        }

        self.finalize(job_id, JobStatus::Cancelled, line, None);
        self.status(job_id).map(|job| job.summary())
    }

    /// Cancel a job. Terminal jobs are returned unchanged.
    pub fn cancel(&self, job_id: &str) -> Result<JobSummary> {
        self.cancel_with(job_id, "[Benchmark cancelled by user]".to_string())
    }

    /// Snapshot of a job
    pub fn status(&self, job_id: &str) -> Result<BenchmarkJob> {
        let table = self.lock();
        let entry = table
            .jobs
            .get(job_id)
            .ok_or_else(|| Error::not_found(format!("job {}", job_id)))?;
        let mut job = entry.job.clone();
        job.log_line_count = entry.log.emitted();
        Ok(job)
    }

    /// Attach to a job's log
    pub fn tail_log(&self, job_id: &str) -> Result<Subscription<String>> {
        let table = self.lock();
        table
            .jobs
            .get(job_id)
            .map(|entry| entry.log.subscribe())
            .ok_or_else(|| Error::not_found(format!("job {}", job_id)))
    }

    /// Id of the queued or running job
    pub fn active_job(&self) -> Option<String> {
        self.lock().active.clone()
    }

    /// Retained jobs, oldest first
    pub fn jobs(&self) -> Vec<BenchmarkJob> {
        let table = self.lock();
        table
            .order
            .iter()
            .filter_map(|id| table.jobs.get(id))
            .map(|entry| {
                let mut job = entry.job.clone();
                job.log_line_count = entry.log.emitted();
                job
            })
            .collect()
    }
}

impl WorkloadGuard for JobOrchestrator {
    fn running_job(&self) -> Option<String> {
        self.active_job()
    }

    fn cancel_running(&self, reason: &str) -> Option<String> {
        let job_id = self.active_job()?;
        self.cancel_with(&job_id, format!("[Benchmark cancelled: {}]", reason))
            .ok()
            .map(|summary| summary.job_id)
    }
}
