//! Error types for the fastdeploy orchestrator

use axum::{extract::rejection::JsonRejection, response::IntoResponse, Json};
use deploy_api::ErrorResponse;
use http::StatusCode;
use thiserror::Error;

use crate::authn::tokens::TokenKind;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Request body that could not be read as the expected JSON
    #[error("{0}")]
    InvalidBody(String),

    // authentication
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Wrong token type: expected {expected}, got {found}")]
    WrongTokenType { expected: TokenKind, found: TokenKind },

    #[error("Principal not found: {0}")]
    PrincipalNotFound(String),

    #[error("Authentication failed")]
    AuthFailure,

    // deployment state machine
    #[error("Deployment {0} has not started yet")]
    DeploymentNotStarted(i64),

    #[error("Deployment {0} has already finished")]
    DeploymentAlreadyFinished(i64),

    #[error("Deployment {deployment} does not belong to service {service}")]
    WrongService { deployment: i64, service: String },

    // lookups and storage
    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    // pipeline
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Delivery rejected: {0}")]
    DeliveryRejected(String),

    #[error("Launch error: {0}")]
    LaunchError(String),

    #[error("Event handler error: {0}")]
    HandlerError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the error is a transient connection failure worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::ConnectionError(_) => true,
            AppError::HttpError(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Whether the error is one of the authentication failures
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            AppError::InvalidToken(_)
                | AppError::WrongTokenType { .. }
                | AppError::PrincipalNotFound(_)
                | AppError::AuthFailure
        )
    }

    fn status_and_detail(&self) -> (StatusCode, String) {
        match self {
            AppError::NotAuthenticated => (StatusCode::UNAUTHORIZED, "Not authenticated".to_string()),
            AppError::AuthFailure => (
                StatusCode::UNAUTHORIZED,
                "Incorrect username or password".to_string(),
            ),
            e if e.is_auth() => (
                StatusCode::UNAUTHORIZED,
                "Could not validate credentials".to_string(),
            ),
            AppError::WrongService { .. } => {
                (StatusCode::FORBIDDEN, "Wrong service token".to_string())
            }
            AppError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
            AppError::DeploymentNotStarted(_) | AppError::DeploymentAlreadyFinished(_) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::InvalidBody(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidBody(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, detail) = self.status_and_detail();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(ErrorResponse { detail })).into_response()
    }
}
