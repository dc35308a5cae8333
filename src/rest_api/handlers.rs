//! HTTP handlers for the REST API

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::{error, instrument, warn};

use crate::controller::{Driver, InstanceDetails, TeardownReport};
use crate::model::Instance;
use crate::Error;

use super::dto::{CommandRequest, CommandResponse, ErrorResponse, HealthResponse};

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(e: &Error) -> ApiError {
    let status = match e {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::UnknownInstance(_) => StatusCode::CONFLICT,
        Error::InvalidInstance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        Error::UpstreamUnavailable(_) | Error::UpstreamStatus { .. } => StatusCode::BAD_GATEWAY,
        Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {}", e);
    }
    (status, Json(ErrorResponse::new(e.kind(), &e.to_string())))
}

async fn load(driver: &Driver, id: &str) -> Result<Instance, ApiError> {
    driver
        .store
        .load_instance(id)
        .await
        .map_err(|e| api_error(&e))
}

/// Health check endpoint
#[instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Observed state of an instance
#[instrument(skip(driver), fields(id = %id))]
pub async fn get_instance(
    State(driver): State<Arc<Driver>>,
    Path(id): Path<String>,
) -> ApiResult<InstanceDetails> {
    let instance = load(&driver, &id).await?;
    Ok(Json(driver.details(&instance).await))
}

#[instrument(skip(driver), fields(id = %id))]
pub async fn start_instance(
    State(driver): State<Arc<Driver>>,
    Path(id): Path<String>,
) -> ApiResult<InstanceDetails> {
    let instance = load(&driver, &id).await?;
    driver.start(&instance).await.map_err(|e| api_error(&e))?;
    // Start records the workload kind; read it back
    let instance = load(&driver, &id).await?;
    Ok(Json(driver.details(&instance).await))
}

#[instrument(skip(driver), fields(id = %id))]
pub async fn stop_instance(
    State(driver): State<Arc<Driver>>,
    Path(id): Path<String>,
) -> ApiResult<TeardownReport> {
    let instance = load(&driver, &id).await?;
    let report = driver.stop(&instance).await;
    if !report.is_clean() {
        warn!("Instance {} stopped with {} failed steps", id, report.failures().count());
    }
    Ok(Json(report))
}

#[instrument(skip(driver), fields(id = %id))]
pub async fn delete_instance(
    State(driver): State<Arc<Driver>>,
    Path(id): Path<String>,
) -> ApiResult<TeardownReport> {
    let instance = load(&driver, &id).await?;
    Ok(Json(driver.remove(&instance).await))
}

/// Forward a flow command to the instance launcher
#[instrument(skip(driver, request), fields(id = %id, command = %request.command))]
pub async fn send_command(
    State(driver): State<Arc<Driver>>,
    Path(id): Path<String>,
    Json(request): Json<CommandRequest>,
) -> ApiResult<CommandResponse> {
    let instance = load(&driver, &id).await?;
    let result = match (request.command.as_str(), request.token.as_deref()) {
        ("start", _) => driver.start_flows(&instance).await,
        ("stop", _) => driver.stop_flows(&instance).await,
        ("restart", _) => driver.restart_flows(&instance).await,
        ("logout", Some(token)) => driver.revoke_user_token(&instance, token).await,
        ("logout", None) => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("missing_token", "logout requires a token")),
            ))
        }
        (other, _) => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(
                    "unknown_command",
                    &format!("Unknown command {:?}", other),
                )),
            ))
        }
    };
    result.map_err(|e| api_error(&e))?;
    Ok(Json(CommandResponse {
        id,
        command: request.command,
    }))
}
