//! Provider event ingestion.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};

use relay_infra::normalize::normalize_event;
use relay_types::dispatch::DispatchReport;
use relay_types::workflow::SCHEDULER_PROVIDER;

use super::dispatch_until_disconnect;
use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// POST /api/v1/events/{provider}/{trigger} - Ingest a provider-native payload.
///
/// The payload is run through the provider's normalizer (Gmail message
/// resource, Discord message-create, or a flat object) before dispatch.
pub async fn ingest_event(
    State(state): State<AppState>,
    Path((provider, trigger)): Path<(String, String)>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<ApiResponse<DispatchReport>>, AppError> {
    let started = Instant::now();

    if provider == SCHEDULER_PROVIDER {
        return Err(AppError::Validation(
            "scheduler events are generated internally and cannot be posted".to_string(),
        ));
    }

    let event = normalize_event(&provider, &trigger, payload);
    let report = dispatch_until_disconnect(&state, event).await?;
    Ok(Json(ApiResponse::success(report, started)))
}
