//! HTTP transport serving the route table under the configured prefix.

use crate::error::{DbError, DbResult};
use crate::routes::{self, AppState};
use crate::transport::Transport;
use axum::Router;
use axum::body::Body;
use axum::http::Request;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

/// Grace period for in-flight requests once a shutdown signal arrives.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the full application: routes mounted under `api_prefix`, CORS open
/// to every origin, one tracing span per request.
pub fn build_app(state: Arc<AppState>, api_prefix: &str) -> Router {
    let api = routes::router(state);

    // nest() rejects the root path
    let prefix = api_prefix.trim_end_matches('/');
    let app = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(prefix, api)
    };

    app.layer(
        TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            info_span!(
                "http_request",
                request_id = %Uuid::new_v4(),
                method = %request.method(),
                uri = %request.uri(),
            )
        }),
    )
    .layer(CorsLayer::permissive())
}

/// HTTP transport implementation.
pub struct HttpTransport {
    state: Arc<AppState>,
    bind_addr: String,
    api_prefix: String,
}

impl HttpTransport {
    pub fn new(
        state: Arc<AppState>,
        bind_addr: impl Into<String>,
        api_prefix: impl Into<String>,
    ) -> Self {
        Self {
            state,
            bind_addr: bind_addr.into(),
            api_prefix: api_prefix.into(),
        }
    }

    /// `host:port` the listener binds to.
    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }
}

impl Transport for HttpTransport {
    async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        info!("Starting geo API on {}", bind_addr);

        let app = build_app(Arc::clone(&self.state), &self.api_prefix);

        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            DbError::connection(
                format!("Failed to bind to {}: {}", bind_addr, e),
                "Check that the port is available",
            )
        })?;

        info!(prefix = %self.api_prefix, "Routes ready");

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();

        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        // Either the server finishes draining, or the grace period runs out
        // (or a second signal arrives) and the server future is dropped.
        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        self.state.gateway.drain().await;
                        return Err(DbError::internal(format!("HTTP server error: {}", e)));
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for in-flight requests (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => {}
        }

        info!("Draining database pools");
        self.state.gateway.drain().await;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
