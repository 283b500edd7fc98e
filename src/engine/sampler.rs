//! Periodic GPU sampling onto a shared feed

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::StreamConfig;
use crate::error::Result;
use crate::gpu::{GpuGauge, GpuSample};
use crate::stream::{StreamHub, Subscription};

/// Broadcasts gauge readings to every attached consumer
pub struct MetricsSampler {
    gauge: Arc<dyn GpuGauge>,
    feed: StreamHub<GpuSample>,
    latest: RwLock<Option<GpuSample>>,
    interval: Duration,
}

impl MetricsSampler {
    pub fn new(gauge: Arc<dyn GpuGauge>, interval: Duration, stream: StreamConfig) -> Self {
        Self {
            gauge,
            feed: StreamHub::broadcast(stream),
            latest: RwLock::new(None),
            interval,
        }
    }

    /// Read the gauge once and broadcast the sample
    pub async fn sample_once(&self) -> Result<GpuSample> {
        let sample = self.gauge.sample().await?;
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(sample.clone());
        self.feed.push(sample.clone());
        Ok(sample)
    }

    /// Most recent successful sample
    pub fn latest(&self) -> Option<GpuSample> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Attach to the feed; only samples taken from now on are delivered
    pub fn subscribe(&self) -> Subscription<GpuSample> {
        self.feed.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.feed.subscriber_count()
    }

    /// Sample every interval until cancelled, then close the feed
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut failing = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => match self.sample_once().await {
                    Ok(_) => {
                        failing = false;
                        trace!(subscribers = self.subscriber_count(), "gpu sample broadcast");
                    }
                    // Warn once per outage
                    Err(e) if !failing => {
                        warn!(error = %e, "gpu sample failed");
                        failing = true;
                    }
                    Err(e) => debug!(error = %e, "gpu sample failed"),
                },
            }
        }

        self.feed.finish();
        debug!("metrics sampler stopped");
    }
}
