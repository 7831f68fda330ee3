use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use streaming::{PROXY_DETAIL_ZOOM, REMOTE_PROXY_PATH};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod dataset;
mod proxy;

const DEFAULT_ADDR: &str = "127.0.0.1:3001";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub http: reqwest::Client,
}

#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Full URL of the upstream incinerator list.
    pub upstream_url: String,
    pub timeout: Duration,
    /// Below this zoom site geometry is stripped from proxied records.
    pub detail_zoom: f64,
}

impl ProxyConfig {
    fn from_env(addr: SocketAddr) -> Self {
        Self {
            // Without an external upstream the proxy serves its own dataset.
            upstream_url: env::var("UPSTREAM_URL")
                .unwrap_or_else(|_| format!("http://{addr}/api/incinerators")),
            timeout: Duration::from_millis(env_var_u64("PROXY_TIMEOUT_MS", 10_000)),
            detail_zoom: env_var_f64("PROXY_DETAIL_ZOOM", PROXY_DETAIL_ZOOM),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::OPTIONS]);

    Router::new()
        .route("/healthz", get(healthz))
        .route(REMOTE_PROXY_PATH, get(proxy::remote_incinerators))
        .route("/api/incinerators", get(dataset::incinerators))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let addr: SocketAddr = env::var("PROXY_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()
        .context("invalid PROXY_ADDR")?;

    let config = ProxyConfig::from_env(addr);
    info!(
        upstream = %config.upstream_url,
        timeout_ms = config.timeout.as_millis() as u64,
        detail_zoom = config.detail_zoom,
        "proxy configured"
    );

    let state = AppState {
        config: Arc::new(config),
        http: reqwest::Client::new(),
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("incinerator proxy listening on http://{addr}");
    axum::serve(listener, router(state))
        .await
        .context("server error")?;
    Ok(())
}

async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}

fn env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v: &f64| v.is_finite())
        .unwrap_or(default)
}
