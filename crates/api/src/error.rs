//! Mapping of engine errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use engine::{EngineError, ErrorKind};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        let Self::Engine(err) = self;
        match err {
            EngineError::WorkflowNotFound(_) | EngineError::ExecutionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            _ => match err.kind() {
                ErrorKind::Configuration => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::Executor | ErrorKind::Infrastructure => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
