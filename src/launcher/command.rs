//! Configuration-driven launcher

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::health::{HealthProbe, HealthReport};
use super::process::{ProcessHandle, SpawnSpec};
use super::ServerLauncher;
use crate::config::{CommandConfig, FrameworkConfig, SupervisorConfig};
use crate::error::{Error, Result};

/// Launches the commands described by the framework table
#[derive(Clone)]
pub struct CommandLauncher {
    frameworks: Arc<BTreeMap<String, FrameworkConfig>>,
    probe: HealthProbe,
}

impl CommandLauncher {
    pub fn new(frameworks: BTreeMap<String, FrameworkConfig>, supervisor: &SupervisorConfig) -> Self {
        Self {
            frameworks: Arc::new(frameworks),
            probe: HealthProbe::new(supervisor.probe_timeout()),
        }
    }

    fn framework(&self, name: &str) -> Result<&FrameworkConfig> {
        self.frameworks
            .get(name)
            .ok_or_else(|| Error::invalid(format!("unknown framework '{}'", name)))
    }

    fn spec(&self, fw: &FrameworkConfig, command: &CommandConfig, model: &str) -> SpawnSpec {
        let port = fw.port.to_string();
        let vars = [
            ("model", fw.resolve_model(model)),
            ("port", port.as_str()),
            ("host", fw.host.as_str()),
        ];
        SpawnSpec::from_template(command, &vars, fw.working_dir.clone())
    }

    /// Probe one framework and report the details
    pub async fn check(&self, framework: &str) -> Result<HealthReport> {
        let fw = self.framework(framework)?;
        Ok(self.probe.check(&fw.health_url()).await)
    }
}

#[async_trait]
impl ServerLauncher for CommandLauncher {
    fn frameworks(&self) -> Vec<String> {
        self.frameworks.keys().cloned().collect()
    }

    fn supports(&self, framework: &str) -> bool {
        self.frameworks.contains_key(framework)
    }

    fn command_line(&self, framework: &str, model: &str) -> Option<String> {
        let fw = self.frameworks.get(framework)?;
        Some(self.spec(fw, &fw.launch, model).display())
    }

    async fn launch(&self, framework: &str, model: &str) -> Result<ProcessHandle> {
        let fw = self.framework(framework)?;
        let spec = self.spec(fw, &fw.launch, model);
        info!(framework, command = %spec.display(), "launching server");

        ProcessHandle::spawn(&spec)
            .map_err(|e| Error::internal(format!("failed to launch {}: {}", spec.program, e)))
    }

    async fn probe_health(&self, framework: &str) -> bool {
        match self.frameworks.get(framework) {
            Some(fw) => self.probe.is_healthy(&fw.health_url()).await,
            None => false,
        }
    }

    async fn post_ready(&self, framework: &str, model: &str) -> Result<Option<ProcessHandle>> {
        let fw = self.framework(framework)?;
        let Some(hook) = &fw.post_ready else {
            return Ok(None);
        };
        let spec = self.spec(fw, hook, model);
        info!(framework, command = %spec.display(), "running post-ready command");

        ProcessHandle::spawn(&spec)
            .map(Some)
            .map_err(|e| Error::internal(format!("failed to run {}: {}", spec.program, e)))
    }
}
