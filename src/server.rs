use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::config::Options;
use crate::metrics::Metrics;

const INDEX: &str = r#"
<html>
	<head>
		<title>PCAP Exporter</title>
	</head>
	<body>
		<h1>PCAP Exporter</h1>
		<p>
			<a href='/metrics'>Metrics</a>
		</p>
		<p>
			<a href='/options'>Options</a>
		</p>
	</body>
</html>"#;

/// Shared state for axum handlers.
struct AppState {
    metrics: Arc<Metrics>,
    options: Options,
}

pub fn router(metrics: Arc<Metrics>, options: Options) -> Router {
    let state = Arc::new(AppState { metrics, options });
    Router::new()
        .route("/", get(index_handler))
        .route("/metrics", get(metrics_handler))
        .route("/options", get(options_handler))
        .route("/options.json", get(options_json_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

/// Running exposition server; dropping or stopping it shuts it down.
pub struct MetricsServer {
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
    local_addr: SocketAddr,
}

impl MetricsServer {
    /// Binds `addr` and serves on the current tokio runtime. Binding happens
    /// before this returns, so an unusable address is reported immediately.
    pub fn start(addr: SocketAddr, metrics: Arc<Metrics>, options: Options) -> Result<Self> {
        let server = axum::Server::try_bind(&addr)
            .with_context(|| format!("listening on {addr}"))?
            .serve(router(metrics, options).into_make_service());
        let local_addr = server.local_addr();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let result = server
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "metrics server error");
            }
        });

        info!(addr = %local_addr, "metrics are available at /metrics");
        Ok(Self {
            shutdown: Some(shutdown_tx),
            task,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = self.task.await {
            error!(error = %e, "metrics server task failed");
        }
    }
}

/// GET / - Index page.
async fn index_handler() -> Html<&'static str> {
    Html(INDEX)
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.gather_text() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            error!(error = %e, "encoding metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /options - Active options as a page.
async fn options_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(state.options.to_html())
}

/// GET /options.json - Active options as JSON.
async fn options_json_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.options.to_dto())
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
