use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fnbox_common::store::StoreError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound(e.to_string()),
            StoreError::RouteExists | StoreError::NoFieldsToUpdate | StoreError::Invalid(_) => {
                ApiError::BadRequest(e.to_string())
            }
            StoreError::Redis(_) | StoreError::Serialization(_) => {
                error!(error = %e, "Metadata store failure");
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
