//! HTTP listener construction and lifecycle.
//!
//! One listener is bound per configured endpoint prefix; all serve the same
//! router against the shared state. Each accepted request is dispatched to
//! its own task by axum/hyper, so the acceptor returns immediately.
//! Stopping sends a shutdown signal to every listener and drains the serve
//! tasks; in-flight handlers run to completion.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use url::Url;

use crate::error::{AppError, AppResult};
use crate::handlers;
use crate::state::AppState;

/// One parsed endpoint prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Leading path of the prefix without its trailing `/`; empty for root.
    pub prefix: String,
}

/// Parse a configured URL prefix into bind parameters.
pub fn parse_endpoint(raw: &str) -> AppResult<Endpoint> {
    let url = Url::parse(raw)
        .map_err(|err| AppError::Internal(format!("invalid endpoint {raw:?}: {err}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| AppError::Internal(format!("endpoint {raw:?} has no host")))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(80);
    let prefix = url.path().trim_end_matches('/').to_string();
    Ok(Endpoint { host, port, prefix })
}

/// Build the npm-protocol router over the shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/-/v1/search", get(handlers::search))
        .route("/{pkg}", get(handlers::package_metadata))
        .route("/{pkg}/{version}", get(handlers::version_metadata))
        .route("/{pkg}/-/{file}", get(handlers::download_tarball))
        .fallback(handlers::fallback)
        .method_not_allowed_fallback(handlers::fallback)
        .layer(axum::middleware::map_request(
            handlers::canonicalize_search_path,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handle to the running listeners.
pub struct ServerTask {
    shutdowns: Vec<oneshot::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerTask {
    /// Bind every configured endpoint and start serving.
    ///
    /// All listeners are bound before any serving starts, so a bind
    /// failure leaves nothing half-running and `start` can be retried.
    pub async fn start(state: Arc<AppState>, endpoints: &[String]) -> AppResult<ServerTask> {
        let mut bound = Vec::new();
        for raw in endpoints {
            let endpoint = parse_endpoint(raw)?;
            let listener = TcpListener::bind((endpoint.host.as_str(), endpoint.port))
                .await
                .map_err(|err| {
                    AppError::Internal(format!("failed to bind {raw}: {err}"))
                })?;
            bound.push((raw.clone(), endpoint, listener));
        }

        let mut shutdowns = Vec::new();
        let mut tasks = Vec::new();
        for (raw, endpoint, listener) in bound {
            let app = if endpoint.prefix.is_empty() {
                router(state.clone())
            } else {
                Router::new()
                    .nest(&endpoint.prefix, router(state.clone()))
                    .fallback(handlers::fallback)
            };
            let (tx, rx) = oneshot::channel::<()>();
            info!(endpoint = %raw, "listening");
            let task = tokio::spawn(async move {
                let shutdown = async {
                    rx.await.ok();
                };
                if let Err(err) = axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown)
                    .await
                {
                    error!(endpoint = %raw, error = %err, "server error");
                }
            });
            shutdowns.push(tx);
            tasks.push(task);
        }
        Ok(ServerTask { shutdowns, tasks })
    }

    /// Signal every listener and wait for the serve tasks to drain.
    pub async fn stop(self) {
        for tx in self.shutdowns {
            let _ = tx.send(());
        }
        for task in self.tasks {
            let _ = task.await;
        }
        info!("server stopped");
    }
}
