//! HTTP server setup

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::OpsError;
use crate::server::guard::security_guard;
use crate::server::handlers::{
    alerts_handler, create_deployment_handler, deployment_status_handler, health_handler,
    version_handler,
};
use crate::server::state::ServerState;

/// Build the router; `/api` routes sit behind the security guard
pub fn router(state: Arc<ServerState>) -> Router {
    let api = Router::new()
        // Deployments
        .route("/deployments", post(create_deployment_handler))
        .route("/deployments/{id}", get(deployment_status_handler))
        // Security
        .route("/security/alerts", get(alerts_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), security_guard));

    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .nest("/api", api)
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), OpsError>>, OpsError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| OpsError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| OpsError::ServerError(e.to_string()))
    });

    Ok(handle)
}
