//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::errors::AppError;
use crate::server::handlers::{
    delete_service_handler, deployment_details_handler, events_handler,
    finish_deployment_handler, health_handler, ingest_step_handler, list_deployments_handler, list_services_handler,
    login_handler, service_steps_handler, service_token_handler, start_deployment_handler,
};
use crate::server::state::ServerState;
use crate::storage::settings::ServerSettings;

/// All routes, with state and middleware
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Tokens
        .route("/token", post(login_handler))
        .route("/service-token", post(service_token_handler))
        // Services
        .route("/services", get(list_services_handler))
        .route("/services/{id}", delete(delete_service_handler))
        .route("/services/{id}/steps", get(service_steps_handler))
        // Deployments
        .route(
            "/deployments",
            get(list_deployments_handler).post(start_deployment_handler),
        )
        .route("/deployments/finish", put(finish_deployment_handler))
        .route("/deployments/{id}", get(deployment_details_handler))
        // Steps
        .route("/steps", post(ingest_step_handler))
        // Live events
        .route("/events", get(events_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerSettings,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), AppError>>, AppError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| AppError::ServerError(e.to_string()))
    });

    Ok(handle)
}
