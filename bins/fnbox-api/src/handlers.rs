// HTTP route handlers for the fnbox API

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use fnbox_common::types::{ExecutionStatus, FunctionCreate, FunctionRecord, FunctionUpdate};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info};

use crate::error::ApiError;
use crate::metrics;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: u64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /functions - Store a new function definition
pub async fn create_function(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<FunctionCreate>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    payload.validate().map_err(ApiError::BadRequest)?;

    let route = payload.route.clone();
    let id = state.store.create(payload).await?;
    info!(function_id = id, route = %route, "Function created");

    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

/// GET /functions - List stored functions ordered by id
pub async fn list_functions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<FunctionRecord>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

/// GET /functions/:id - Fetch one function
pub async fn get_function(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<FunctionRecord>, ApiError> {
    Ok(Json(state.store.get(id).await?))
}

/// PUT /functions/:id - Partial update of the non-null fields
pub async fn update_function(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(payload): Json<FunctionUpdate>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.store.update(id, payload).await?;
    info!(function_id = id, "Function updated");

    Ok(Json(MessageResponse {
        message: "Function updated successfully".to_string(),
    }))
}

/// DELETE /functions/:id - Remove a function and free its route
pub async fn delete_function(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.store.delete(id).await?;
    info!(function_id = id, "Function deleted");

    Ok(Json(MessageResponse {
        message: "Function deleted successfully".to_string(),
    }))
}

/// POST /functions/:id/execute - Run a stored function in the sandbox
pub async fn execute_function(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    // Unknown ids never reach the engine
    let function = state.store.get(id).await?;
    let spec = function.spec();

    let started = Instant::now();
    let result = state.executor.execute(&spec).await;
    metrics::record_execution(&spec.language, result.status, started.elapsed());

    let status = match result.status {
        ExecutionStatus::Success | ExecutionStatus::RuntimeFailure | ExecutionStatus::Timeout => {
            StatusCode::OK
        }
        ExecutionStatus::UnsupportedLanguage => StatusCode::BAD_REQUEST,
        ExecutionStatus::InfrastructureError => {
            error!(
                function_id = id,
                detail = result.error_detail.as_deref().unwrap_or(""),
                "Execution hit an infrastructure error"
            );
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    info!(function_id = id, status = %result.status, "Function executed");
    Ok((status, Json(result)))
}

/// GET /status - Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut healthy = true;

    let store = match state.store.ping().await {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            healthy = false;
            e.to_string()
        }
    };
    let docker = match state.executor.container_runner() {
        None => "disabled".to_string(),
        Some(runner) => match runner.ping().await {
            Ok(()) => "ok".to_string(),
            Err(e) => {
                healthy = false;
                e.to_string()
            }
        },
    };

    let (code, status) = if healthy {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(json!({
            "status": status,
            "store": store,
            "docker": docker,
        })),
    )
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics() -> Result<impl IntoResponse, ApiError> {
    let body = metrics::render().map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
