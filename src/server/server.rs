use anyhow::{Context, Result};
use std::time::{Duration, Instant};

use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use serde::Serialize;
use tracing::{error, info};

use super::audio_routes::{make_audio_routes, ApiError};
use super::metrics::metrics_handler;
use super::{log_requests, state::*, ServerConfig};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    };
    Json(stats)
}

async fn no_route() -> ApiError {
    ApiError::bind_error("No handler found for this request")
}

impl ServerState {
    fn new(config: ServerConfig, pipeline: GuardedPipeline) -> ServerState {
        ServerState {
            config,
            start_time: Instant::now(),
            pipeline,
            hash: env!("BUILD_GIT_HASH").to_owned(),
        }
    }
}

pub fn make_app(config: ServerConfig, pipeline: GuardedPipeline) -> Router {
    let state = ServerState::new(config.clone(), pipeline);

    Router::new()
        .route("/", get(home))
        .nest("/audio", make_audio_routes(&config))
        .fallback(no_route)
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

pub async fn run_server(
    config: ServerConfig,
    pipeline: GuardedPipeline,
    metrics_port: u16,
) -> Result<()> {
    let port = config.port;
    let app = make_app(config, pipeline);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    info!("Serving audio API on port {}", port);
    info!("Serving metrics on port {}", metrics_port);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, make_metrics_app()).await {
            error!("Metrics server stopped: {}", e);
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
