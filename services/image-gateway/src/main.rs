//! Image Gateway
//!
//! Single-binary Rust service that:
//! 1. Loads a pool of provider API keys (2 requests/minute, 400/day each)
//! 2. Accepts image generation requests for 1 to 10 images
//! 3. Fans each request out across distinct keys, retrying on other keys
//! 4. Returns every image or one clear error

mod api;
mod config;
mod error;
mod metrics;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use key_pool::{Engine, Pool};
use metrics_exporter_prometheus::PrometheusHandle;
use provider::{HttpProvider, ImageProvider};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::ApiState;
use crate::config::Config;

/// Time allowed for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    api: ApiState,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

impl axum::extract::FromRef<AppState> for ApiState {
    fn from_ref(state: &AppState) -> Self {
        state.api.clone()
    }
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/v1/generate", post(api::generate_handler))
        .route("/api/v1/generate-parallel", post(api::generate_handler))
        .route("/api/v1/validate", post(api::validate_handler))
        .route("/api/v1/models", get(api::models_handler))
        .route("/api/v1/stats", get(api::stats_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting image-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder().context("failed to install metrics recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let keys_path = config
        .pool
        .keys_file
        .clone()
        .context("keys file not configured")?;
    let keys = config::load_keys(&keys_path)
        .with_context(|| format!("failed to load keys from {}", keys_path.display()))?;

    let pool = Pool::new(keys, config.pool_config()).context("failed to build key pool")?;

    info!(
        listen_addr = %config.server.listen_addr,
        base_url = %config.provider.base_url,
        credentials = pool.len(),
        max_in_flight = config.pool.max_in_flight,
        request_timeout_secs = config.server.request_timeout_secs,
        "configuration loaded"
    );

    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let provider: Arc<dyn ImageProvider> = Arc::new(HttpProvider::new(
        client,
        config.provider.base_url.clone(),
        config.provider_timeout(),
    ));

    let engine = Engine::new(
        Arc::new(pool),
        provider,
        config.pool.max_in_flight,
        config.retry_policy(),
    );

    let app_state = AppState {
        api: ApiState {
            engine: Arc::new(engine),
            request_timeout: config.request_timeout(),
        },
        prometheus,
        started_at: Instant::now(),
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: notify the server to drain, then race it against the
    // timeout.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: pool status, credential counts and uptime.
/// Returns 200 while any credential is active, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state
        .api
        .engine
        .pool()
        .snapshot(tokio::time::Instant::now());

    let status_code = if snapshot.status == "unhealthy" {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    } else {
        axum::http::StatusCode::OK
    };
    let body = serde_json::json!({
        "status": snapshot.status,
        "credentials_total": snapshot.total,
        "credentials_active": snapshot.active,
        "credentials_cooling": snapshot.cooling,
        "credentials_exhausted": snapshot.exhausted,
        "credentials_invalid": snapshot.invalid,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
