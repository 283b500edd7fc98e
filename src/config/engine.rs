//! Supervisor, background-task and streaming settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Process supervisor timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// How long a server may stay in `starting` before it is failed
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Interval between readiness probes
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,

    /// Per-request timeout of a readiness probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL on a normal stop
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

fn default_startup_timeout() -> u64 {
    120
}

fn default_probe_interval() -> u64 {
    2000
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_stop_timeout() -> u64 {
    10
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_timeout_secs: default_startup_timeout(),
            probe_interval_ms: default_probe_interval(),
            probe_timeout_secs: default_probe_timeout(),
            stop_timeout_secs: default_stop_timeout(),
        }
    }
}

impl SupervisorConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Background task cadence and job bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Status reconciler tick, in seconds
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Metrics sampler tick, in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Number of recent jobs kept queryable after they finish
    #[serde(default = "default_job_history")]
    pub job_history: usize,
}

fn default_reconcile_interval() -> u64 {
    5
}

fn default_metrics_interval() -> u64 {
    2
}

fn default_job_history() -> usize {
    16
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval(),
            metrics_interval_secs: default_metrics_interval(),
            job_history: default_job_history(),
        }
    }
}

impl EngineConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }
}

/// Streaming channel buffer sizes
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Live messages buffered per consumer before it is disconnected
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,

    /// Lines retained for replay to late subscribers
    #[serde(default = "default_backlog_limit")]
    pub backlog_limit: usize,
}

fn default_subscriber_capacity() -> usize {
    1024
}

fn default_backlog_limit() -> usize {
    10_000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: default_subscriber_capacity(),
            backlog_limit: default_backlog_limit(),
        }
    }
}
