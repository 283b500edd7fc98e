//! Snapshots of the server slot and benchmark jobs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest accepted identifier
const MAX_IDENTIFIER_LEN: usize = 256;

/// Lifecycle of the managed server slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl ServerStatus {
    /// Whether the slot is taken
    pub fn is_occupied(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single system-wide server slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServerState {
    pub framework: Option<String>,
    pub model: Option<String>,
    pub status: ServerStatus,
    /// Launched by this daemon, as opposed to detected
    pub managed: bool,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds since the server became ready
    pub uptime_secs: Option<u64>,
    /// Lines emitted on the current server log tap
    pub log_lines: u64,
}

impl ManagedServerState {
    pub fn stopped() -> Self {
        Self {
            framework: None,
            model: None,
            status: ServerStatus::Stopped,
            managed: false,
            pid: None,
            started_at: None,
            uptime_secs: None,
            log_lines: 0,
        }
    }

    /// Whether `framework` is up and ready for work
    pub fn is_serving(&self, framework: &str) -> bool {
        self.status == ServerStatus::Running && self.framework.as_deref() == Some(framework)
    }

    pub(crate) fn uptime_at(&self, now: DateTime<Utc>) -> Option<u64> {
        if self.status != ServerStatus::Running {
            return None;
        }
        self.started_at
            .map(|started| (now - started).num_seconds().max(0) as u64)
    }
}

impl Default for ManagedServerState {
    fn default() -> Self {
        Self::stopped()
    }
}

/// Lifecycle of a benchmark job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Cancelled,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a benchmark submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub framework: String,
    pub scenarios: Vec<String>,
    pub model: String,
    pub trials: u32,
}

/// Snapshot of a benchmark job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkJob {
    pub job_id: String,
    pub framework: String,
    pub model: String,
    pub scenarios: Vec<String>,
    pub trials: u32,
    pub status: JobStatus,
    pub log_line_count: u64,
    pub completed_trials: u32,
    pub total_trials: u32,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BenchmarkJob {
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id.clone(),
            status: self.status,
        }
    }
}

/// Id and status, as returned by submit and cancel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
}

/// Reject empty, oversized, or whitespace-bearing identifiers
pub fn validate_identifier(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid(format!("{} must not be empty", what)));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::invalid(format!(
            "{} is longer than {} bytes",
            what, MAX_IDENTIFIER_LEN
        )));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::invalid(format!(
            "{} '{}' contains whitespace or control characters",
            what,
            value.escape_debug()
        )));
    }
    Ok(())
}
