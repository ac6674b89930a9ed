use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use engine::{ExecutionRecord, ExecutionStats};

use super::AppState;
use crate::ApiError;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Executions of one workflow, newest first.
pub async fn history(
    Path(id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ExecutionRecord>>, ApiError> {
    Ok(Json(state.runner.list_executions(id, query.limit).await?))
}

pub async fn stats(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ExecutionStats>, ApiError> {
    Ok(Json(state.runner.execution_stats(id).await?))
}
