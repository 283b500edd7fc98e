//! GPU sample command

use std::path::Path;

use anyhow::Result;

use crate::config::BenchdConfig;
use crate::gpu::{GpuGauge, NvidiaSmiGauge};

/// Take a single GPU sample and print it
pub async fn gpu(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = BenchdConfig::load(config_path)?;
    let sample = NvidiaSmiGauge::new(&config.gpu).sample().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sample)?);
        return Ok(());
    }

    println!("GPU utilization: {:.1}%", sample.gpu_utilization_pct);
    println!(
        "Memory:          {:.0} / {:.0} MiB ({:.1}%)",
        sample.memory_used_mb,
        sample.memory_total_mb,
        sample.memory_utilization_pct()
    );
    println!("Sampled at:      {}", sample.timestamp.to_rfc3339());
    Ok(())
}
