//! Workflow store trait definition.
//!
//! The dispatch engine only reads workflows; the scheduler additionally
//! records last-fired bookkeeping, and every dispatch appends to the run log.
//! The remaining operations back the CLI and HTTP management surface.

use chrono::{DateTime, Utc};
use relay_types::error::RepositoryError;
use relay_types::workflow::{Workflow, WorkflowRun};
use uuid::Uuid;

/// Store trait for workflow persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Dispatch path
    // -----------------------------------------------------------------------

    /// Active workflows whose trigger provider equals `provider`.
    fn list_active_by_provider(
        &self,
        provider: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Record that the scheduler fired `id` at `at`.
    fn mark_fired(
        &self,
        id: &Uuid,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Append one execution record. Records are never updated.
    fn record_run(
        &self,
        run: &WorkflowRun,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Management
    // -----------------------------------------------------------------------

    /// Upsert a workflow (insert or replace by ID).
    fn save(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// List workflows, optionally restricted to one owner, newest first.
    fn list(
        &self,
        user_id: Option<&Uuid>,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Flip the active flag. An inactive-to-active transition stamps
    /// `activated_at = at`; other transitions leave it untouched.
    ///
    /// Returns `RepositoryError::NotFound` for an unknown ID.
    fn set_active(
        &self,
        id: &Uuid,
        active: bool,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Workflow, RepositoryError>> + Send;

    /// Delete a workflow and its run log. Returns `true` if it existed.
    fn delete(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Run log for one workflow, newest first.
    fn list_runs(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowRun>, RepositoryError>> + Send;
}
