//! Session Proxy
//!
//! Single-binary sidecar that:
//! 1. Holds a user session (access + renewal token) on disk
//! 2. Listens for local requests
//! 3. Attaches the access token, renewing it before expiry or after a 401
//! 4. Proxies to the protected API, replaying rejected calls once

mod config;
mod metrics;
mod proxy;
mod session;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auth_pipeline::{AuthClient, RenewalPhase};
use metrics_exporter_prometheus::PrometheusHandle;
use session_auth::{CredentialStore, FileCredentialStore};
use transport::HttpTransport;

use crate::config::Config;
use crate::metrics::ServiceMetrics;
use crate::proxy::ProxyState;
use crate::session::{SessionState, SidecarNavigator, SignIn};

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    session: SessionState,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
}

impl AppState {
    fn new(client: AuthClient, navigator: Arc<SidecarNavigator>, prometheus: PrometheusHandle) -> Self {
        let metrics = ServiceMetrics::new();
        Self {
            proxy: ProxyState {
                client: client.clone(),
                metrics: metrics.clone(),
            },
            session: SessionState { client, navigator },
            metrics,
            prometheus,
        }
    }
}

/// Build the axum router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route(
            "/session",
            get(session_status_handler)
                .post(sign_in_handler)
                .delete(sign_out_handler),
        )
        .fallback(proxy_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from LOG_LEVEL, then RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting session-proxy");

    // Install before anything records
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

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

    info!(
        listen_addr = %config.proxy.listen_addr,
        base_url = %config.api.base_url,
        renewal_path = %config.api.renewal_path,
        "configuration loaded"
    );

    let store = FileCredentialStore::load(config.credentials.path.clone()).with_context(|| {
        format!(
            "failed to load credentials from {}",
            config.credentials.path.display()
        )
    })?;
    if store.renewal().is_none() {
        if let Some(seed) = &config.credentials.seed_refresh_token {
            store
                .set_renewal(seed.expose().clone())
                .context("failed to store seed renewal token")?;
            info!("seeded renewal token into empty credential store");
        }
    }

    let transport = HttpTransport::new(
        reqwest::Client::new(),
        Duration::from_secs(config.proxy.timeout_secs),
    );
    let navigator = SidecarNavigator::new();
    let client = AuthClient::new(
        config.endpoints(),
        Arc::new(store),
        Arc::new(transport),
        navigator.clone(),
    );

    let app_state = AppState::new(client, navigator, prometheus_handle);
    let in_flight = app_state.metrics.in_flight.clone();
    let app = build_router(app_state, config.proxy.max_connections);

    let listen_addr = config.proxy.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start.
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
            let remaining = in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: 200 while any credential is held, 503 once signed out.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);
    let errors = state.metrics.errors_total.load(Ordering::Relaxed);

    let store = state.session.client.store();
    let has_credentials = store.access().is_some() || store.renewal().is_some();
    let phase = state.session.client.coordinator().phase().await;
    let cooldown_remaining = match &phase {
        RenewalPhase::CoolingDown { remaining, .. } => remaining.as_secs_f64(),
        _ => 0.0,
    };

    let (status_code, status) = if has_credentials {
        (axum::http::StatusCode::OK, "healthy")
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "signed_out")
    };
    let body = serde_json::json!({
        "status": status,
        "renewal": phase.label(),
        "cooldown_remaining_seconds": cooldown_remaining,
        "uptime_seconds": uptime,
        "requests_served": requests,
        "errors_total": errors,
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

async fn session_status_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(session::status(&state.session))
}

async fn sign_in_handler(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<SignIn>,
) -> Response {
    session::sign_in(&state.session, body)
}

async fn sign_out_handler(State(state): State<AppState>) -> Response {
    session::sign_out(&state.session)
}

/// Catch-all handler that proxies everything else to the protected API.
async fn proxy_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    proxy::proxy_request(&state.proxy, request, request_id).await
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
