//! HTTP request handlers
//!
//! Handlers only extract the bearer token and the body; everything else is
//! done by the boundary operations.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequest, Path, Request, State},
    http::{header, HeaderMap},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use deploy_api::{LoginRequest, ServiceTokenRequest, StartDeploymentRequest, StepReport};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::NotAuthenticated)?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or(AppError::NotAuthenticated)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AppError::NotAuthenticated);
    }
    Ok(token)
}

const MISSING_CONTENT_TYPE: &str = "Expected request with `Content-Type: application/json`";

/// JSON request body; rejections become `422 {"detail": ...}`
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(JsonBody(value))
    }
}

/// Like [`JsonBody`], but a request without a body yields the default value
#[derive(Debug)]
pub struct JsonOrDefault<T>(pub T);

impl<S, T> FromRequest<S> for JsonOrDefault<T>
where
    JsonBody<T>: FromRequest<S, Rejection = AppError>,
    T: Default,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if req.headers().contains_key(header::CONTENT_TYPE) {
            let JsonBody(value) = JsonBody::<T>::from_request(req, state).await?;
            return Ok(JsonOrDefault(value));
        }

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::InvalidBody(e.body_text()))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            Ok(JsonOrDefault(T::default()))
        } else {
            Err(AppError::InvalidBody(MISSING_CONTENT_TYPE.to_string()))
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "fastdeploy".to_string(),
        version: version_info().version,
    })
}

pub async fn login_handler(
    State(state): State<Arc<ServerState>>,
    JsonBody(request): JsonBody<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let token = state
        .orchestrator
        .login(&request.username, &request.password)
        .await?;
    Ok(Json(token))
}

pub async fn service_token_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    JsonBody(request): JsonBody<ServiceTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_token(&headers)?;
    let response = state
        .orchestrator
        .issue_service_token(token, request)
        .await?;
    Ok(Json(response))
}

pub async fn list_services_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_token(&headers)?;
    Ok(Json(state.orchestrator.list_services(token).await?))
}

pub async fn service_steps_handler(
    State(state): State<Arc<ServerState>>,
    Path(service_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_token(&headers)?;
    Ok(Json(state.orchestrator.steps_to_do(token, service_id).await?))
}

pub async fn delete_service_handler(
    State(state): State<Arc<ServerState>>,
    Path(service_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_token(&headers)?;
    Ok(Json(
        state.orchestrator.delete_service(token, service_id).await?,
    ))
}

pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_token(&headers)?;
    Ok(Json(state.orchestrator.list_deployments(token).await?))
}

pub async fn start_deployment_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    JsonOrDefault(request): JsonOrDefault<StartDeploymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_token(&headers)?;
    Ok(Json(
        state.orchestrator.start_deployment(token, request).await?,
    ))
}

pub async fn finish_deployment_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_token(&headers)?;
    Ok(Json(state.orchestrator.finish_deployment(token).await?))
}

pub async fn deployment_details_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_token(&headers)?;
    Ok(Json(
        state
            .orchestrator
            .get_deployment_details(token, deployment_id)
            .await?,
    ))
}

pub async fn ingest_step_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    JsonBody(report): JsonBody<StepReport>,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_token(&headers)?;
    Ok(Json(state.orchestrator.ingest_step(token, report).await?))
}

/// Server-sent stream of committed domain events, for logged in users
pub async fn events_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let token = bearer_token(&headers)?;
    let user = state
        .orchestrator
        .tokens
        .resolve_user(token, &state.orchestrator.store)
        .await?;
    debug!("User {} subscribed to events", user.name);

    let stream = state.events.stream().filter_map(|event| async move {
        match Event::default().event(event.kind().as_str()).json_data(&event) {
            Ok(sse) => Some(Ok(sse)),
            Err(e) => {
                warn!("Dropping unencodable event {:?}: {}", event.kind(), e);
                None
            }
        }
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
