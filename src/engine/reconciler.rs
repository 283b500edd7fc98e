//! Periodic correction of the recorded server state

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::state::ServerStatus;
use super::supervisor::ProcessSupervisor;

/// What one reconciliation pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Recorded state matches what was observed
    Unchanged,
    /// A start or stop is in flight; retry next tick
    Deferred,
    /// The managed process was found dead
    MarkedFailed,
    /// A healthy server nobody launched was recorded as running
    Adopted(String),
    /// A previously adopted server stopped answering
    Released,
    /// The slot changed while probing; nothing applied
    Superseded,
}

/// Brings the supervisor's record in line with the processes and endpoints
/// that actually exist
pub struct StatusReconciler {
    supervisor: Arc<ProcessSupervisor>,
    interval: Duration,
}

impl StatusReconciler {
    pub fn new(supervisor: Arc<ProcessSupervisor>, interval: Duration) -> Self {
        Self {
            supervisor,
            interval,
        }
    }

    /// Run one pass
    pub async fn tick(&self) -> ReconcileOutcome {
        let observed = self.supervisor.observe().await;
        let state = &observed.state;

        match state.status {
            ServerStatus::Starting | ServerStatus::Stopping => ReconcileOutcome::Deferred,
            ServerStatus::Failed => ReconcileOutcome::Unchanged,
            ServerStatus::Running if state.managed => match observed.exited {
                Some(exit) => {
                    let applied = self
                        .supervisor
                        .fail(
                            observed.generation,
                            format!("Server process exited unexpectedly ({})", exit),
                        )
                        .await;
                    if applied {
                        ReconcileOutcome::MarkedFailed
                    } else {
                        ReconcileOutcome::Superseded
                    }
                }
                None => ReconcileOutcome::Unchanged,
            },
            ServerStatus::Running => {
                let framework = state.framework.clone().unwrap_or_default();
                if self.supervisor.launcher().probe_health(&framework).await {
                    return ReconcileOutcome::Unchanged;
                }
                if self.supervisor.release_external(observed.generation).await {
                    info!(framework = %framework, "external server went away");
                    ReconcileOutcome::Released
                } else {
                    ReconcileOutcome::Superseded
                }
            }
            ServerStatus::Stopped => {
                for framework in self.supervisor.launcher().frameworks() {
                    if !self.supervisor.launcher().probe_health(&framework).await {
                        continue;
                    }
                    return if self
                        .supervisor
                        .adopt_external(observed.generation, &framework)
                        .await
                    {
                        info!(framework = %framework, "adopted externally started server");
                        ReconcileOutcome::Adopted(framework)
                    } else {
                        ReconcileOutcome::Superseded
                    };
                }
                ReconcileOutcome::Unchanged
            }
        }
    }

    /// Reconcile every interval until cancelled; the first pass runs at once
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let outcome = self.tick().await;
                    debug!(?outcome, "reconcile pass");
                }
            }
        }
        debug!("reconciler stopped");
    }
}
