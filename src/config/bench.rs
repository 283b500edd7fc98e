//! Benchmark client and GPU gauge settings

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::framework::CommandConfig;

/// Benchmark client invocation
///
/// The client is run once per scenario and trial. Argument templates may
/// use `{framework}`, `{scenario}`, `{model}`, `{trial}` and `{job_id}`;
/// each run needs its own output location or trials overwrite each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Client command
    #[serde(flatten)]
    pub client: CommandConfig,

    /// Working directory for the client
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Known scenario identifiers, in execution order for `all`
    #[serde(default = "default_scenarios")]
    pub scenarios: Vec<String>,

    /// Upper bound on trials per job
    #[serde(default = "default_max_trials")]
    pub max_trials: u32,
}

fn default_scenarios() -> Vec<String> {
    ["single", "concurrent", "long_context", "prefix_cache", "korean"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_trials() -> u32 {
    100
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            client: CommandConfig {
                command: "python".to_string(),
                args: [
                    "-m",
                    "bench",
                    "--framework",
                    "{framework}",
                    "--scenario",
                    "{scenario}",
                    "--model",
                    "{model}",
                    "--trials",
                    "1",
                    "--output-dir",
                    "results/{framework}/{job_id}/{scenario}/trial-{trial}",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
                env: Default::default(),
            },
            working_dir: None,
            scenarios: default_scenarios(),
            max_trials: default_max_trials(),
        }
    }
}

/// GPU gauge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuConfig {
    /// nvidia-smi binary
    #[serde(default = "default_gpu_command")]
    pub command: String,

    /// Timeout for one query
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

fn default_gpu_command() -> String {
    "nvidia-smi".to_string()
}

fn default_query_timeout() -> u64 {
    10
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            command: default_gpu_command(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

impl GpuConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}
