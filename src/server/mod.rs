//! HTTP control surface
//!
//! Exposes the engine as a JSON API with SSE streams for logs and metrics.

mod handlers;
mod routes;
mod streaming;

use std::sync::Arc;

use anyhow::Result;
use axum::http::HeaderValue;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::engine::Engine;

pub use handlers::{AppState, ErrorDetail, ErrorResponse};
pub use routes::api_routes;
pub use streaming::subscription_stream;

/// Build the application router
pub fn router(engine: Arc<Engine>, config: &ServerConfig) -> Router {
    let state = Arc::new(AppState::new(engine));

    let mut app = Router::new().merge(api_routes());
    if config.cors_enabled {
        app = app.layer(cors_layer(config));
    }
    if config.request_logging {
        app = app.layer(TraceLayer::new_for_http());
    }
    app.with_state(state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.cors_origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let config = config.clone();
    cors.allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        origin
            .to_str()
            .map(|origin| config.allows_origin(origin))
            .unwrap_or(false)
    }))
}

/// Serve the API until `shutdown` is cancelled
pub async fn start(
    engine: Arc<Engine>,
    config: ServerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = router(engine, &config);

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  GET  /health - Daemon health check");
    tracing::info!("  POST /api/v1/server/start - Start a framework server");
    tracing::info!("  POST /api/v1/server/stop - Stop the managed server");
    tracing::info!("  GET  /api/v1/server/managed - Managed server status");
    tracing::info!("  GET  /api/v1/server/health - Probe all frameworks");
    tracing::info!("  GET  /api/v1/server/gpu - Latest GPU sample");
    tracing::info!("  GET  /api/v1/server/logs - Server log stream (SSE)");
    tracing::info!("  POST /api/v1/benchmark/run - Submit a benchmark job");
    tracing::info!("  GET  /api/v1/benchmark/jobs - Retained jobs");
    tracing::info!("  GET  /api/v1/benchmark/status/:job_id - Job status");
    tracing::info!("  POST /api/v1/benchmark/cancel/:job_id - Cancel a job");
    tracing::info!("  GET  /api/v1/benchmark/logs/:job_id - Job log stream (SSE)");
    tracing::info!("  GET  /api/v1/monitor/gpu - GPU metrics stream (SSE)");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BenchdConfig, FrameworkConfig};
    use std::net::SocketAddr;

    async fn spawn_app() -> (SocketAddr, Arc<Engine>) {
        let mut config = BenchdConfig::default();
        config.frameworks.clear();
        // Nothing listens on the discard port
        let mut fw = FrameworkConfig::new("sleep", 9);
        fw.host = "127.0.0.1".to_string();
        config.frameworks.insert("vllm".to_string(), fw);

        let engine = Arc::new(Engine::from_config(&config));
        let app = router(Arc::clone(&engine), &config.server);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, engine)
    }

    async fn get(addr: SocketAddr, path: &str) -> (u16, String) {
        let resp = reqwest::get(format!("http://{}{}", addr, path))
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.text().await.unwrap())
    }

    async fn post(addr: SocketAddr, path: &str, body: Option<&str>) -> (u16, serde_json::Value) {
        let client = reqwest::Client::new();
        let mut req = client.post(format!("http://{}{}", addr, path));
        if let Some(body) = body {
            req = req
                .header("content-type", "application/json")
                .body(body.to_string());
        }
        let resp = req.send().await.unwrap();
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap();
        (status, serde_json::from_str(&text).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (addr, _engine) = spawn_app().await;
        let (status, body) = get(addr, "/health").await;
        assert_eq!(status, 200);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_managed_status_starts_stopped() {
        let (addr, _engine) = spawn_app().await;
        let (status, body) = get(addr, "/api/v1/server/managed").await;
        assert_eq!(status, 200);
        let state: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(state["status"], "stopped");
        assert_eq!(state["managed"], false);
    }

    #[tokio::test]
    async fn test_start_unknown_framework_is_bad_request() {
        let (addr, _engine) = spawn_app().await;
        let (status, body) = post(
            addr,
            "/api/v1/server/start",
            Some(r#"{"framework": "tgi", "model": "llama"}"#),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn test_stop_without_body_when_stopped() {
        let (addr, _engine) = spawn_app().await;
        let (status, body) = post(addr, "/api/v1/server/stop", None).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "stopped");
    }

    #[tokio::test]
    async fn test_benchmark_without_server_is_precondition_failed() {
        let (addr, _engine) = spawn_app().await;
        let (status, body) = post(
            addr,
            "/api/v1/benchmark/run",
            Some(r#"{"framework": "vllm", "scenarios": ["all"], "model": "llama"}"#),
        )
        .await;
        assert_eq!(status, 412);
        assert_eq!(body["error"]["type"], "precondition_failed");

        // Scenario names outside the catalogue still report the stopped server
        let (status, _) = post(
            addr,
            "/api/v1/benchmark/run",
            Some(r#"{"framework": "vllm", "scenarios": ["single_request"], "model": "llama"}"#),
        )
        .await;
        assert_eq!(status, 412);
    }

    #[tokio::test]
    async fn test_stop_body_parsed_without_content_type() {
        let (addr, _engine) = spawn_app().await;
        let client = reqwest::Client::new();
        let url = format!("http://{}/api/v1/server/stop", addr);

        let resp = client.post(&url).body(r#"{"force": true}"#).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        let resp = client.post(&url).body("force=true").send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 400);
        let error: ErrorResponse = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
        assert_eq!(error.error.r#type, "invalid_request_error");
        assert!(error.error.message.contains("malformed stop request"));
    }

    #[tokio::test]
    async fn test_list_jobs_starts_empty() {
        let (addr, _engine) = spawn_app().await;
        let (status, body) = get(addr, "/api/v1/benchmark/jobs").await;
        assert_eq!(status, 200);
        assert_eq!(body, "[]");
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let (addr, _engine) = spawn_app().await;
        let (status, body) = get(addr, "/api/v1/benchmark/status/missing").await;
        assert_eq!(status, 404);
        let error: ErrorResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(error.error.r#type, "not_found");

        let (status, _) = post(addr, "/api/v1/benchmark/cancel/missing", None).await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_server_health_reports_each_framework() {
        let (addr, _engine) = spawn_app().await;
        let (status, body) = get(addr, "/api/v1/server/health").await;
        assert_eq!(status, 200);
        let health: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(health["frameworks"]["vllm"], false);
        assert_eq!(health["server"]["status"], "stopped");
    }

    #[tokio::test]
    async fn test_server_logs_without_tap_ends_immediately() {
        let (addr, _engine) = spawn_app().await;
        let (status, body) = get(addr, "/api/v1/server/logs").await;
        assert_eq!(status, 200);
        assert!(body.contains("event: done"));
    }

    #[tokio::test]
    async fn test_cors_echoes_allowed_origin_only() {
        let (_, engine) = spawn_app().await;
        let config = ServerConfig {
            cors_origins: vec!["http://localhost:3000".to_string()],
            ..ServerConfig::default()
        };
        let app = router(engine, &config);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::new();
        let allowed = client
            .get(format!("http://{}/health", addr))
            .header("origin", "http://localhost:3000")
            .send()
            .await
            .unwrap();
        assert_eq!(
            allowed.headers()["access-control-allow-origin"],
            "http://localhost:3000"
        );

        let denied = client
            .get(format!("http://{}/health", addr))
            .header("origin", "http://evil.example")
            .send()
            .await
            .unwrap();
        assert!(denied.headers().get("access-control-allow-origin").is_none());
    }
}
