//! Route definitions

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    benchmark_logs, benchmark_status, cancel_benchmark, gpu_feed, gpu_latest, health, list_jobs,
    managed_status, run_benchmark, server_health, server_logs, start_server, stop_server,
    AppState,
};

/// Create the API router
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Daemon liveness
        .route("/health", get(health))
        // Server lifecycle
        .route("/api/v1/server/start", post(start_server))
        .route("/api/v1/server/stop", post(stop_server))
        .route("/api/v1/server/managed", get(managed_status))
        .route("/api/v1/server/health", get(server_health))
        .route("/api/v1/server/gpu", get(gpu_latest))
        .route("/api/v1/server/logs", get(server_logs))
        // Benchmark jobs
        .route("/api/v1/benchmark/run", post(run_benchmark))
        .route("/api/v1/benchmark/jobs", get(list_jobs))
        .route("/api/v1/benchmark/status/:job_id", get(benchmark_status))
        .route("/api/v1/benchmark/cancel/:job_id", post(cancel_benchmark))
        .route("/api/v1/benchmark/logs/:job_id", get(benchmark_logs))
        // Push feeds
        .route("/api/v1/monitor/gpu", get(gpu_feed))
}
