//! REST API request handlers.

pub mod event;
pub mod webhook;
pub mod workflow;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use relay_types::dispatch::DispatchReport;
use relay_types::event::InboundEvent;

use crate::http::error::AppError;
use crate::state::AppState;

/// Dispatch `event`, cancelling in-flight executions if the request is dropped.
///
/// The dispatch runs in its own task. Dropping the request fires the token;
/// the task still completes, reporting unfinished executions as cancelled.
pub(crate) async fn dispatch_until_disconnect(
    state: &AppState,
    event: InboundEvent,
) -> Result<DispatchReport, AppError> {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let engine = Arc::clone(&state.engine);

    let handle =
        tokio::spawn(async move { engine.dispatch_with_cancellation(&event, cancel).await });
    let report = handle
        .await
        .map_err(|e| AppError::Internal(format!("dispatch task failed: {e}")))?;

    guard.disarm();
    Ok(report)
}
