//! GPU resource gauge

mod nvidia_smi;

pub use nvidia_smi::NvidiaSmiGauge;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One reading of GPU utilization and memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuSample {
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub gpu_utilization_pct: f64,
    pub timestamp: DateTime<Utc>,
}

impl GpuSample {
    /// Memory in use as a percentage of the total
    pub fn memory_utilization_pct(&self) -> f64 {
        if self.memory_total_mb > 0.0 {
            self.memory_used_mb / self.memory_total_mb * 100.0
        } else {
            0.0
        }
    }
}

/// Source of GPU samples
#[async_trait]
pub trait GpuGauge: Send + Sync {
    async fn sample(&self) -> Result<GpuSample>;
}
