//! Webhook receiver handler for the REST API.

use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use secrecy::ExposeSecret;

use relay_infra::crypto::signature::{SIGNATURE_HEADER, verify};
use relay_infra::normalize::webhook_event;
use relay_types::dispatch::DispatchReport;

use super::dispatch_until_disconnect;
use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// POST /api/v1/webhooks/{*path} - Receive an incoming webhook.
///
/// When `[webhook].signing_secret` is configured the raw body must carry a
/// valid `X-Relay-Signature-256` header. The body becomes the event fields
/// and is dispatched to every active `webhook/incoming-webhook` workflow
/// whose `path` filter matches.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<DispatchReport>>, AppError> {
    let started = Instant::now();

    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        verify(secret.expose_secret().as_bytes(), &body, signature).inspect_err(|e| {
            tracing::warn!(path = %path, error = %e, "rejected unsigned webhook");
        })?;
    }

    let event = webhook_event(&path, &body);
    tracing::info!(path = %path, bytes = body.len(), "webhook received");

    let report = dispatch_until_disconnect(&state, event).await?;
    Ok(Json(ApiResponse::success(report, started)))
}
