//! Read-only workflow inspection handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use relay_core::repository::WorkflowStore;
use relay_types::workflow::{Workflow, WorkflowRun};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Upper bound on `limit` for run listings.
const MAX_RUN_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct ListWorkflowsQuery {
    /// Restrict to one owner.
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    /// Maximum number of runs to return (default 20).
    #[serde(default = "default_run_limit")]
    pub limit: u32,
}

fn default_run_limit() -> u32 {
    20
}

/// GET /api/v1/workflows - List workflows, newest first.
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> Result<Json<ApiResponse<Vec<Workflow>>>, AppError> {
    let started = Instant::now();
    let workflows = state.workflows.list(query.user_id.as_ref()).await?;
    Ok(Json(ApiResponse::success(workflows, started)))
}

/// GET /api/v1/workflows/{id}/runs - Run log for one workflow, newest first.
pub async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<ApiResponse<Vec<WorkflowRun>>>, AppError> {
    let started = Instant::now();

    if state.workflows.get(&id).await?.is_none() {
        return Err(AppError::NotFound(format!("Workflow {id} not found")));
    }
    let limit = query.limit.clamp(1, MAX_RUN_LIMIT);
    let runs = state.workflows.list_runs(&id, limit).await?;

    Ok(Json(
        ApiResponse::success(runs, started).with_link("workflows", "/api/v1/workflows"),
    ))
}
