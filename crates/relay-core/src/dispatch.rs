//! Dispatch engine.
//!
//! One dispatch processes one inbound event end to end:
//!
//! 1. **Load** active workflows for the event's provider from the store.
//! 2. **Match** them against the event. `total_workflows` counts every
//!    candidate for the provider/trigger pair, matched or not.
//! 3. **Execute** each matched workflow independently on a bounded `JoinSet`:
//!    resolve credential -> render action config -> invoke action. Each
//!    execution has its own timeout and observes the caller's cancellation.
//! 4. **Aggregate** per-workflow outcomes (one result slot per matched
//!    workflow) into a [`DispatchReport`] and append them to the run log.
//!
//! Per-workflow failures never escape their own slot. Only a failure to load
//! the candidate set fails the dispatch itself.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use relay_types::config::DispatchSettings;
use relay_types::dispatch::{
    ActionResult, DispatchReport, ExecutionState, FailureKind, WorkflowOutcome,
};
use relay_types::event::InboundEvent;
use relay_types::value::ConfigMap;
use relay_types::workflow::{Workflow, WorkflowRun};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::credential::CredentialResolver;
use crate::invoker::ActionInvoker;
use crate::matcher;
use crate::repository::{CredentialStore, WorkflowStore};
use crate::template;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Fan-out limits applied to every dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    /// Executions in flight at once within one dispatch call.
    pub max_concurrency: usize,
    /// Budget for one workflow's resolve -> render -> invoke.
    pub workflow_timeout: Duration,
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self::from(&DispatchSettings::default())
    }
}

impl From<&DispatchSettings> for DispatchLimits {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            max_concurrency: settings.max_concurrency.max(1),
            workflow_timeout: Duration::from_secs(settings.workflow_timeout_secs.max(1)),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Routes inbound events to matching workflows and runs their actions.
///
/// Holds no mutable state of its own; safe to share behind an `Arc` and call
/// concurrently from the webhook handler and the scheduler.
pub struct DispatchEngine<W: WorkflowStore, C: CredentialStore> {
    workflows: Arc<W>,
    executor: Arc<Executor<C>>,
    limits: DispatchLimits,
}

impl<W, C> DispatchEngine<W, C>
where
    W: WorkflowStore + 'static,
    C: CredentialStore + 'static,
{
    pub fn new(
        workflows: Arc<W>,
        resolver: Arc<CredentialResolver<C>>,
        invoker: Arc<ActionInvoker>,
        limits: DispatchLimits,
    ) -> Self {
        Self {
            workflows,
            executor: Arc::new(Executor {
                resolver,
                invoker,
                timeout: limits.workflow_timeout,
            }),
            limits,
        }
    }

    pub fn workflows(&self) -> &Arc<W> {
        &self.workflows
    }

    pub fn limits(&self) -> DispatchLimits {
        self.limits
    }

    /// Dispatch one event to completion.
    pub async fn dispatch(&self, event: &InboundEvent) -> DispatchReport {
        self.dispatch_with_cancellation(event, CancellationToken::new())
            .await
    }

    /// Dispatch one event, aborting in-flight executions once `cancel` fires.
    ///
    /// Cancelled executions are reported as failed; the report still accounts
    /// for every matched workflow.
    pub async fn dispatch_with_cancellation(
        &self,
        event: &InboundEvent,
        cancel: CancellationToken,
    ) -> DispatchReport {
        let span = tracing::info_span!(
            "dispatch",
            provider = %event.provider,
            trigger_kind = %event.trigger_kind,
        );
        self.run_dispatch(event, cancel).instrument(span).await
    }

    async fn run_dispatch(&self, event: &InboundEvent, cancel: CancellationToken) -> DispatchReport {
        let loaded = match self.workflows.list_active_by_provider(&event.provider).await {
            Ok(workflows) => workflows,
            Err(e) => {
                tracing::error!(error = %e, "failed to load candidate workflows");
                return DispatchReport::fault();
            }
        };

        let candidates: Vec<Workflow> = loaded
            .into_iter()
            .filter(|w| matcher::is_candidate(event, w))
            .collect();
        let total = candidates.len() as u32;

        let set = matcher::match_candidates(event, &candidates);
        let mut outcomes: Vec<WorkflowOutcome> = set
            .rejected
            .iter()
            .map(|(workflow, error)| {
                tracing::warn!(
                    workflow_id = %workflow.id,
                    %error,
                    "trigger config rejected by matcher"
                );
                WorkflowOutcome::failed(
                    workflow.id,
                    &workflow.name,
                    FailureKind::MalformedTrigger,
                    error.to_string(),
                    0,
                )
            })
            .collect();

        let matched: Vec<Workflow> = set.matched.into_iter().cloned().collect();
        tracing::debug!(
            candidates = total,
            matched = matched.len(),
            rejected = outcomes.len(),
            "matched workflows"
        );

        outcomes.extend(self.fan_out(&matched, &event.fields, cancel).await);

        let report = DispatchReport::from_outcomes(total, outcomes);
        self.record_runs(event, &report).await;

        tracing::info!(
            triggered = report.triggered,
            failed = report.failed,
            total_workflows = report.total_workflows,
            "dispatch complete"
        );
        report
    }

    /// Run every matched workflow and return one outcome per workflow, in
    /// match order.
    async fn fan_out(
        &self,
        matched: &[Workflow],
        fields: &ConfigMap,
        cancel: CancellationToken,
    ) -> Vec<WorkflowOutcome> {
        if matched.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.limits.max_concurrency));
        let fields = Arc::new(fields.clone());
        let mut tasks = JoinSet::new();

        for (slot, workflow) in matched.iter().cloned().enumerate() {
            let executor = self.executor.clone();
            let semaphore = semaphore.clone();
            let fields = fields.clone();
            let cancel = cancel.clone();
            let span = tracing::info_span!(
                "workflow_execution",
                workflow_id = %workflow.id,
                action = %format!("{}/{}", workflow.action.provider, workflow.action.action_id),
            );
            tasks.spawn(
                async move {
                    let outcome = executor.run(workflow, fields, semaphore, cancel).await;
                    (slot, outcome)
                }
                .instrument(span),
            );
        }

        let mut slots: Vec<Option<WorkflowOutcome>> = vec![None; matched.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, outcome)) => slots[slot] = Some(outcome),
                Err(e) => tracing::error!(error = %e, "workflow execution task ended abnormally"),
            }
        }

        slots
            .into_iter()
            .zip(matched)
            .map(|(slot, workflow)| {
                slot.unwrap_or_else(|| {
                    WorkflowOutcome::failed(
                        workflow.id,
                        &workflow.name,
                        FailureKind::Aborted,
                        "execution ended without reporting an outcome",
                        0,
                    )
                })
            })
            .collect()
    }

    async fn record_runs(&self, event: &InboundEvent, report: &DispatchReport) {
        let now = Utc::now();
        for outcome in &report.outcomes {
            let run = WorkflowRun::from_outcome(outcome, &event.provider, &event.trigger_kind, now);
            if let Err(e) = self.workflows.record_run(&run).await {
                tracing::warn!(
                    workflow_id = %outcome.workflow_id,
                    error = %e,
                    "failed to append run record"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-workflow execution
// ---------------------------------------------------------------------------

/// Shared, read-only collaborators for per-workflow executions.
struct Executor<C: CredentialStore> {
    resolver: Arc<CredentialResolver<C>>,
    invoker: Arc<ActionInvoker>,
    timeout: Duration,
}

/// A classified failure from one execution stage.
struct StageFailure {
    kind: FailureKind,
    message: String,
}

impl<C: CredentialStore + 'static> Executor<C> {
    async fn run(
        &self,
        workflow: Workflow,
        fields: Arc<ConfigMap>,
        semaphore: Arc<Semaphore>,
        cancel: CancellationToken,
    ) -> WorkflowOutcome {
        let started = Instant::now();

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = semaphore.acquire_owned() => permit.ok(),
        };

        let result = match permit {
            None if cancel.is_cancelled() => Err(StageFailure {
                kind: FailureKind::Cancelled,
                message: "dispatch cancelled before execution started".to_string(),
            }),
            None => Err(StageFailure {
                kind: FailureKind::Aborted,
                message: "concurrency limiter closed".to_string(),
            }),
            Some(_permit) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(StageFailure {
                        kind: FailureKind::Cancelled,
                        message: "dispatch cancelled during execution".to_string(),
                    }),
                    timed = tokio::time::timeout(self.timeout, self.run_stages(&workflow, &fields)) => {
                        match timed {
                            Ok(result) => result,
                            Err(_) => Err(StageFailure {
                                kind: FailureKind::ProviderUnavailable,
                                message: format!(
                                    "execution timed out after {}s",
                                    self.timeout.as_secs()
                                ),
                            }),
                        }
                    }
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(action_result) => {
                tracing::debug!(state = %ExecutionState::Succeeded, duration_ms, "workflow succeeded");
                WorkflowOutcome::succeeded(workflow.id, workflow.name, action_result, duration_ms)
            }
            Err(failure) => {
                tracing::warn!(
                    state = %ExecutionState::Failed,
                    kind = %failure.kind,
                    error = %failure.message,
                    duration_ms,
                    "workflow failed"
                );
                WorkflowOutcome::failed(
                    workflow.id,
                    workflow.name,
                    failure.kind,
                    failure.message,
                    duration_ms,
                )
            }
        }
    }

    /// Resolving -> Rendering -> Invoking. Each stage either advances or
    /// returns its classified failure.
    async fn run_stages(
        &self,
        workflow: &Workflow,
        fields: &ConfigMap,
    ) -> Result<ActionResult, StageFailure> {
        let mut state = StateTracker::new();
        let action = &workflow.action;

        state.advance(ExecutionState::Resolving);
        let credential = self
            .resolver
            .resolve(&workflow.user_id, &action.provider)
            .await
            .map_err(|e| StageFailure {
                kind: e.kind(),
                message: e.to_string(),
            })?;

        state.advance(ExecutionState::Rendering);
        let rendered = template::render(&action.config, fields);

        state.advance(ExecutionState::Invoking);
        self.invoker
            .invoke_with_retry(&action.provider, &action.action_id, &rendered, &credential.handle())
            .await
            .map_err(|e| StageFailure {
                kind: e.kind(),
                message: e.to_string(),
            })
    }
}

/// Forward-only execution state with transition logging.
struct StateTracker {
    state: ExecutionState,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            state: ExecutionState::Pending,
        }
    }

    fn advance(&mut self, next: ExecutionState) {
        debug_assert!(!self.state.is_terminal(), "execution already finished");
        tracing::debug!(from = %self.state, to = %next, "execution state");
        self.state = next;
    }
}
