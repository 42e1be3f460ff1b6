//! HTTP server for the Prometheus metrics endpoint.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::metrics::SharedMetrics;

/// Content type of the OpenMetrics text exposition format.
pub const OPENMETRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    metrics: SharedMetrics,
}

/// Create the HTTP router.
fn create_router(metrics: SharedMetrics, metrics_path: &str) -> Router {
    let state = AppState { metrics };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.metrics.render();

    (
        StatusCode::OK,
        [("content-type", OPENMETRICS_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

/// HTTP server configuration.
pub struct HttpServer {
    metrics: SharedMetrics,
    listen_addr: SocketAddr,
    metrics_path: String,
}

/// An HTTP server with its listening socket bound.
pub struct BoundHttpServer {
    router: Router,
    listener: TcpListener,
    metrics_path: String,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(metrics: SharedMetrics, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            metrics,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the listening socket.
    ///
    /// Failing to bind is the one fatal startup error, so this is kept apart
    /// from [`BoundHttpServer::run`] for the caller to abort on.
    pub async fn bind(self) -> anyhow::Result<BoundHttpServer> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        Ok(BoundHttpServer {
            router: create_router(self.metrics, &self.metrics_path),
            listener,
            metrics_path: self.metrics_path,
        })
    }
}

impl BoundHttpServer {
    /// The address the server is listening on.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve requests until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let addr = self.local_addr()?;

        info!(
            addr = %addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        // Run server with graceful shutdown
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
