use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use engine::ExecutionDetails;
use nodes::Payload;

use super::AppState;
use crate::ApiError;

#[derive(Debug, Deserialize)]
pub struct StartExecutionDto {
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub triggered_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecutionStarted {
    pub execution_id: Uuid,
}

/// Trigger a run. The run itself proceeds on the workers.
pub async fn start(
    Path(workflow_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<StartExecutionDto>,
) -> Result<(StatusCode, Json<ExecutionStarted>), ApiError> {
    let execution_id = state
        .runner
        .start_workflow(workflow_id, body.payload, body.triggered_by)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ExecutionStarted { execution_id })))
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ExecutionDetails>, ApiError> {
    Ok(Json(state.runner.get_execution(id).await?))
}
