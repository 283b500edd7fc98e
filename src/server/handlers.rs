//! HTTP request handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use super::streaming::subscription_stream;
use crate::engine::{BenchmarkJob, Engine, JobRequest, JobSummary, ManagedServerState};
use crate::error::{Error, ErrorKind};
use crate::gpu::GpuSample;

/// Shared application state
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Start a framework server
pub async fn start_server(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<ManagedServerState>, Error> {
    let status = state
        .engine
        .supervisor
        .start(&request.framework, &request.model)
        .await?;
    Ok(Json(status))
}

/// Stop the server.
///
/// The body is optional; an empty body means a graceful stop. A body that is
/// present must parse, whatever its content type.
pub async fn stop_server(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ManagedServerState>, Error> {
    let request = StopRequest::from_body(&body)?;
    let status = state.engine.supervisor.stop(request.force).await?;
    Ok(Json(status))
}

/// Retained jobs, oldest first
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<BenchmarkJob>> {
    Json(state.engine.jobs.jobs())
}

/// Current server slot
pub async fn managed_status(State(state): State<Arc<AppState>>) -> Json<ManagedServerState> {
    Json(state.engine.supervisor.status())
}

/// Probe every configured framework
pub async fn server_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let launcher = state.engine.supervisor.launcher();
    let names = launcher.frameworks();
    let probes = names.iter().map(|name| launcher.probe_health(name));
    let results = join_all(probes).await;

    Json(HealthResponse {
        frameworks: names.into_iter().zip(results).collect(),
        server: state.engine.supervisor.status(),
    })
}

/// Latest GPU sample, sampling on demand if none is cached
pub async fn gpu_latest(State(state): State<Arc<AppState>>) -> Result<Json<GpuSample>, Error> {
    let sampler = &state.engine.sampler;
    let sample = match sampler.latest() {
        Some(sample) => sample,
        None => sampler.sample_once().await?,
    };
    Ok(Json(sample))
}

/// Server log tap
pub async fn server_logs(State(state): State<Arc<AppState>>) -> Response {
    subscription_stream(state.engine.supervisor.tail_log()).into_response()
}

/// Submit a benchmark job
pub async fn run_benchmark(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RunRequest>,
) -> Result<Json<JobSummary>, Error> {
    let summary = state.engine.jobs.submit(request.into()).await?;
    Ok(Json(summary))
}

/// Job snapshot
pub async fn benchmark_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<BenchmarkJob>, Error> {
    Ok(Json(state.engine.jobs.status(&job_id)?))
}

/// Cancel a job
pub async fn cancel_benchmark(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSummary>, Error> {
    Ok(Json(state.engine.jobs.cancel(&job_id)?))
}

/// Job log tap
pub async fn benchmark_logs(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Response, Error> {
    let subscription = state.engine.jobs.tail_log(&job_id)?;
    Ok(subscription_stream(subscription).into_response())
}

/// GPU metrics feed
pub async fn gpu_feed(State(state): State<Arc<AppState>>) -> Response {
    subscription_stream(state.engine.sampler.subscribe()).into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, kind) = match (&self, self.kind()) {
            (Error::BenchmarkRunning { .. }, _) => (StatusCode::CONFLICT, "benchmark_running"),
            (_, ErrorKind::Conflict) => (StatusCode::CONFLICT, "conflict"),
            (_, ErrorKind::Precondition) => (StatusCode::PRECONDITION_FAILED, "precondition_failed"),
            (_, ErrorKind::NotFound) => (StatusCode::NOT_FOUND, "not_found"),
            (_, ErrorKind::Invalid) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            (_, ErrorKind::Internal) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorDetail {
                    message: self.to_string(),
                    r#type: kind.to_string(),
                },
            }),
        )
            .into_response()
    }
}

// Request/Response types

#[derive(Deserialize)]
pub struct StartRequest {
    pub framework: String,
    pub model: String,
}

#[derive(Deserialize, Default)]
pub struct StopRequest {
    #[serde(default)]
    pub force: bool,
}

impl StopRequest {
    fn from_body(body: &[u8]) -> Result<Self, Error> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| Error::invalid(format!("malformed stop request: {}", e)))
    }
}

#[derive(Deserialize)]
pub struct RunRequest {
    pub framework: String,
    pub scenarios: Vec<String>,
    pub model: String,
    #[serde(default = "default_trials")]
    pub trials: u32,
}

fn default_trials() -> u32 {
    1
}

impl From<RunRequest> for JobRequest {
    fn from(request: RunRequest) -> Self {
        JobRequest {
            framework: request.framework,
            scenarios: request.scenarios,
            model: request.model,
            trials: request.trials,
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub frameworks: BTreeMap<String, bool>,
    pub server: ManagedServerState,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
}
