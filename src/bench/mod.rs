//! Benchmark client invocation
//!
//! A job runs its trials through a [`ScenarioRunner`]. The runner owns the
//! client side of a trial; the orchestrator only sequences trials, watches
//! cancellation, and records the outcome.

mod command;

pub use command::CommandScenarioRunner;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::stream::StreamHub;

/// One scenario execution within a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trial {
    pub job_id: String,
    pub framework: String,
    pub model: String,
    pub scenario: String,
    /// Zero-based trial index within the scenario
    pub index: u32,
    /// Trials per scenario
    pub trials: u32,
}

impl Trial {
    /// One-based trial number for display
    pub fn number(&self) -> u32 {
        self.index + 1
    }
}

/// Runs one trial of a benchmark scenario
#[async_trait]
pub trait ScenarioRunner: Send + Sync {
    /// Execute `trial`, writing client output to `log`.
    ///
    /// Implementations should stop promptly once `cancel` fires; the job is
    /// already finalized by then and the return value is ignored.
    async fn run_trial(
        &self,
        trial: &Trial,
        log: &StreamHub<String>,
        cancel: &CancellationToken,
    ) -> Result<()>;
}
