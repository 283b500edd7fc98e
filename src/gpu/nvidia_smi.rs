//! Gauge backed by `nvidia-smi`

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tracing::debug;

use super::{GpuGauge, GpuSample};
use crate::config::GpuConfig;
use crate::error::{Error, Result};

const QUERY_ARGS: [&str; 2] = [
    "--query-gpu=memory.used,memory.total,utilization.gpu",
    "--format=csv,noheader,nounits",
];

/// Samples the first GPU through `nvidia-smi`
#[derive(Debug, Clone)]
pub struct NvidiaSmiGauge {
    command: String,
    timeout: Duration,
}

impl NvidiaSmiGauge {
    pub fn new(config: &GpuConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: config.query_timeout(),
        }
    }
}

#[async_trait]
impl GpuGauge for NvidiaSmiGauge {
    async fn sample(&self) -> Result<GpuSample> {
        let query = Command::new(&self.command)
            .args(QUERY_ARGS)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, query)
            .await
            .map_err(|_| Error::internal(format!("{} timed out", self.command)))?
            .map_err(|e| Error::internal(format!("failed to run {}: {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::internal(format!(
                "{} failed: {}",
                self.command,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(output = %stdout.trim(), "gpu query");
        parse_query(&stdout)
    }
}

/// Parse the first line of `memory.used, memory.total, utilization.gpu`
fn parse_query(output: &str) -> Result<GpuSample> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| Error::internal("no GPU reported"))?;

    let values = line
        .split(',')
        .map(|field| field.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::internal(format!("unexpected GPU query output '{}': {}", line, e)))?;

    match values.as_slice() {
        [used, total, util] => Ok(GpuSample {
            memory_used_mb: *used,
            memory_total_mb: *total,
            gpu_utilization_pct: *util,
            timestamp: Utc::now(),
        }),
        _ => Err(Error::internal(format!(
            "expected 3 fields in GPU query output, got '{}'",
            line
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_first_gpu() {
        let sample = parse_query("20480, 81920, 87\n1024, 81920, 0\n").unwrap();
        assert_eq!(sample.memory_used_mb, 20480.0);
        assert_eq!(sample.memory_total_mb, 81920.0);
        assert_eq!(sample.gpu_utilization_pct, 87.0);
        assert_eq!(sample.memory_utilization_pct(), 25.0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_query("").is_err());
        assert!(parse_query("[N/A], 81920, 3").is_err());
        assert!(parse_query("1, 2").is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_is_internal() {
        let gauge = NvidiaSmiGauge::new(&GpuConfig {
            command: "/nonexistent/nvidia-smi".to_string(),
            query_timeout_secs: 1,
        });
        let err = gauge.sample().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }
}
