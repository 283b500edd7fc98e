//! Configuration system for benchd
//!
//! BenchdConfig collects the HTTP surface, the framework table, and the
//! timing of the supervisor and background tasks. Every field has a serde
//! default, so a partial file only needs the sections it changes.

mod bench;
mod engine;
mod framework;
mod server;

pub use bench::{BenchConfig, GpuConfig};
pub use engine::{EngineConfig, StreamConfig, SupervisorConfig};
pub use framework::{default_frameworks, CommandConfig, FrameworkConfig};
pub use server::ServerConfig;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "BENCHD_CONFIG";

/// Replace `{key}` placeholders in a template.
///
/// Unknown placeholders are left as-is.
pub fn expand_placeholders(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

/// benchd configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchdConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Framework backends competing for the GPU
    #[serde(default = "default_frameworks")]
    pub frameworks: BTreeMap<String, FrameworkConfig>,

    /// Process supervisor timing
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Reconciler, sampler, and job bookkeeping
    #[serde(default)]
    pub engine: EngineConfig,

    /// Streaming buffer sizes
    #[serde(default)]
    pub stream: StreamConfig,

    /// Benchmark client invocation
    #[serde(default)]
    pub bench: BenchConfig,

    /// GPU gauge
    #[serde(default)]
    pub gpu: GpuConfig,
}

impl BenchdConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load from an explicit path, `$BENCHD_CONFIG`, or the built-in defaults.
    ///
    /// The format follows the file extension (`.json`, otherwise YAML).
    /// The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let config = match path {
            Some(path) => {
                let is_json = path
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case("json"))
                    .unwrap_or(false);
                let loaded = if is_json {
                    Self::from_json(&path)
                } else {
                    Self::from_yaml(&path)
                };
                loaded.with_context(|| format!("loading config from {}", path.display()))?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.frameworks.is_empty() {
            bail!("at least one framework must be configured");
        }
        for (name, fw) in &self.frameworks {
            if fw.launch.command.trim().is_empty() {
                bail!("framework '{}' has an empty command", name);
            }
            if fw.port == 0 {
                bail!("framework '{}' has port 0", name);
            }
            if !fw.health_path.starts_with('/') {
                bail!(
                    "framework '{}' health_path must start with '/': {}",
                    name,
                    fw.health_path
                );
            }
        }
        if self.bench.client.command.trim().is_empty() {
            bail!("bench.command must not be empty");
        }
        if self.bench.scenarios.is_empty() {
            bail!("bench.scenarios must list at least one scenario");
        }
        if self.bench.max_trials == 0 {
            bail!("bench.max_trials must be positive");
        }

        let positive = [
            ("supervisor.probe_interval_ms", self.supervisor.probe_interval_ms),
            (
                "supervisor.startup_timeout_secs",
                self.supervisor.startup_timeout_secs,
            ),
            (
                "supervisor.probe_timeout_secs",
                self.supervisor.probe_timeout_secs,
            ),
            (
                "engine.reconcile_interval_secs",
                self.engine.reconcile_interval_secs,
            ),
            (
                "engine.metrics_interval_secs",
                self.engine.metrics_interval_secs,
            ),
            (
                "stream.subscriber_capacity",
                self.stream.subscriber_capacity as u64,
            ),
            ("stream.backlog_limit", self.stream.backlog_limit as u64),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(anyhow!("{} must be positive", field));
        }

        Ok(())
    }
}

impl Default for BenchdConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            frameworks: default_frameworks(),
            supervisor: SupervisorConfig::default(),
            engine: EngineConfig::default(),
            stream: StreamConfig::default(),
            bench: BenchConfig::default(),
            gpu: GpuConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_benchd_config_yaml() {
        let yaml = r#"
server:
  port: 9090
  host: 127.0.0.1

frameworks:
  vllm:
    command: vllm
    args: ["serve", "{model}", "--port", "{port}"]
    port: 8000
  ollama:
    command: ollama
    args: ["serve"]
    port: 11434
    health_path: /api/tags

supervisor:
  startup_timeout_secs: 300
  probe_interval_ms: 500

bench:
  command: python
  args: ["-m", "bench", "--scenario", "{scenario}"]
  scenarios: [single, concurrent]
"#;
        let config: BenchdConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.frameworks.len(), 2);
        assert_eq!(config.frameworks["ollama"].health_path, "/api/tags");
        assert_eq!(config.supervisor.startup_timeout_secs, 300);
        // Untouched fields keep their defaults
        assert_eq!(config.supervisor.stop_timeout_secs, 10);
        assert_eq!(config.engine.job_history, 16);
        assert_eq!(config.bench.scenarios, vec!["single", "concurrent"]);
        assert_eq!(config.bench.max_trials, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = BenchdConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.frameworks.keys().collect::<Vec<_>>(),
            vec!["ollama", "sglang", "vllm"]
        );
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = BenchdConfig::default();
        config.engine.reconcile_interval_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reconcile_interval_secs"));
    }

    #[test]
    fn test_validate_rejects_empty_frameworks() {
        let mut config = BenchdConfig::default();
        config.frameworks.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bench_without_command() {
        let yaml = "bench:\n  scenarios: [single]\n";
        let config: BenchdConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bench.command"));
    }

    #[test]
    fn test_load_json_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"server": {{"port": 7000}}}}"#).unwrap();

        let config = BenchdConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.frameworks.len(), 3);
    }

    #[test]
    fn test_load_missing_file_has_context() {
        let err = BenchdConfig::load(Some(Path::new("/nonexistent/benchd.yaml"))).unwrap_err();
        assert!(format!("{:#}", err).contains("loading config from"));
    }

    #[test]
    fn test_expand_placeholders() {
        let out = expand_placeholders(
            "--model {model} --port {port} {other}",
            &[("model", "openai/gpt-oss-20b"), ("port", "30000")],
        );
        assert_eq!(out, "--model openai/gpt-oss-20b --port 30000 {other}");
    }
}
