//! Benchmark client run as a subprocess

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ScenarioRunner, Trial};
use crate::config::BenchConfig;
use crate::error::{Error, Result};
use crate::launcher::{ProcessHandle, SpawnSpec};
use crate::stream::StreamHub;

/// Runs the configured benchmark client once per trial
#[derive(Debug, Clone)]
pub struct CommandScenarioRunner {
    config: BenchConfig,
}

impl CommandScenarioRunner {
    pub fn new(config: BenchConfig) -> Self {
        Self { config }
    }

    fn spec(&self, trial: &Trial) -> SpawnSpec {
        let number = trial.number().to_string();
        let vars = [
            ("framework", trial.framework.as_str()),
            ("scenario", trial.scenario.as_str()),
            ("model", trial.model.as_str()),
            ("trial", number.as_str()),
            ("job_id", trial.job_id.as_str()),
        ];
        SpawnSpec::from_template(&self.config.client, &vars, self.config.working_dir.clone())
    }
}

async fn next_line(output: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match output {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

#[async_trait]
impl ScenarioRunner for CommandScenarioRunner {
    async fn run_trial(
        &self,
        trial: &Trial,
        log: &StreamHub<String>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let spec = self.spec(trial);
        info!(
            job_id = %trial.job_id,
            scenario = %trial.scenario,
            trial = trial.number(),
            command = %spec.display(),
            "running benchmark client"
        );

        let handle = ProcessHandle::spawn(&spec).map_err(|e| {
            Error::internal(format!("failed to run benchmark client {}: {}", spec.program, e))
        })?;
        let mut output = handle.take_output();

        loop {
            tokio::select! {
                line = next_line(&mut output) => match line {
                    Some(line) => {
                        log.push(line);
                    }
                    None => break,
                },
                _ = cancel.cancelled() => {
                    debug!(job_id = %trial.job_id, "killing benchmark client");
                    handle.terminate(Duration::ZERO).await;
                    return Ok(());
                }
            }
        }

        let exit = tokio::select! {
            exit = handle.wait() => exit,
            _ = cancel.cancelled() => {
                handle.terminate(Duration::ZERO).await;
                return Ok(());
            }
        };

        if exit.success() {
            Ok(())
        } else {
            Err(Error::internal(format!(
                "{} trial {}/{} failed: benchmark client {}",
                trial.scenario,
                trial.number(),
                trial.trials,
                exit
            )))
        }
    }
}
