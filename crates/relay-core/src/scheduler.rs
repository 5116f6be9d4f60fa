//! Time-driven event source for `scheduler` workflows.
//!
//! Provides:
//! - Human-readable schedule normalization ("every 5 minutes" -> cron)
//! - Due detection for `cron` and `on-activation` workflows
//! - A tick that synthesizes one targeted event per due workflow and runs it
//!   through the dispatch engine like any pushed event
//! - A `tokio-cron-scheduler` job that drives the tick
//!
//! Last-fired bookkeeping lives in the workflow store, so a restarted
//! process picks up exactly where the previous one stopped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures_util::future::join_all;
use relay_types::dispatch::DispatchReport;
use relay_types::event::InboundEvent;
use relay_types::value::{ConfigMap, ConfigValue};
use relay_types::workflow::{CRON_TRIGGER, ON_ACTIVATION_TRIGGER, SCHEDULER_PROVIDER, Workflow};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::dispatch::DispatchEngine;
use crate::repository::{CredentialStore, WorkflowStore};

/// Upper bound on missed occurrences counted for one coalesced firing.
const MAX_COUNTED_OCCURRENCES: usize = 10_000;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Failed to create or manipulate the tick job.
    #[error("scheduler error: {0}")]
    JobError(String),

    /// Invalid cron expression or schedule string.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("workflow store error: {0}")]
    Store(String),
}

// ---------------------------------------------------------------------------
// Human-readable schedule normalization
// ---------------------------------------------------------------------------

/// Normalize a schedule string to a 6-field (seconds-first) cron expression.
///
/// Supported patterns (case-insensitive):
/// - "every N seconds"     -> "*/N * * * * *"
/// - "every N minutes"     -> "0 */N * * * *"
/// - "every N hours"       -> "0 0 */N * * *"
/// - "every second"        -> "* * * * * *"
/// - "every minute"        -> "0 * * * * *"
/// - "every hour"/"hourly" -> "0 0 * * * *"
/// - "every day"/"daily"   -> "0 0 0 * * *"
/// - "every day at HH:MM"  -> "0 MM HH * * *"
///
/// 5-field cron gains a leading `0` seconds field; 6-field cron passes through.
pub fn normalize_schedule(input: &str) -> Result<String, SchedulerError> {
    let trimmed = input.trim();
    let invalid = || SchedulerError::InvalidSchedule(input.to_string());

    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    let looks_like_cron = parts
        .first()
        .is_some_and(|p| !p.chars().all(|c| c.is_ascii_alphabetic()));
    if looks_like_cron && parts.len() == 5 {
        return Ok(format!("0 {trimmed}"));
    }
    if looks_like_cron && parts.len() == 6 {
        return Ok(trimmed.to_string());
    }

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "every second" => return Ok("* * * * * *".to_string()),
        "every minute" | "minutely" => return Ok("0 * * * * *".to_string()),
        "every hour" | "hourly" => return Ok("0 0 * * * *".to_string()),
        "every day" | "daily" => return Ok("0 0 0 * * *".to_string()),
        _ => {}
    }

    let Some(rest) = lower.strip_prefix("every ") else {
        return Err(SchedulerError::InvalidSchedule(format!(
            "unrecognized schedule format: '{trimmed}'"
        )));
    };

    if let Some(at) = rest.strip_prefix("day at ") {
        let (hour, minute) = at.split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
        let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;
        if hour >= 24 || minute >= 60 {
            return Err(invalid());
        }
        return Ok(format!("0 {minute} {hour} * * *"));
    }

    let words: Vec<&str> = rest.split_whitespace().collect();
    let [count, unit] = words.as_slice() else {
        return Err(invalid());
    };
    let n: u32 = count.parse().map_err(|_| invalid())?;
    if n == 0 {
        return Err(SchedulerError::InvalidSchedule(
            "interval must be > 0".to_string(),
        ));
    }
    match unit.trim_end_matches('s') {
        "second" => Ok(format!("*/{n} * * * * *")),
        "minute" => Ok(format!("0 */{n} * * * *")),
        "hour" => Ok(format!("0 0 */{n} * * *")),
        _ => Err(invalid()),
    }
}

/// Normalize and parse a schedule string.
pub fn parse_schedule(input: &str) -> Result<croner::Cron, SchedulerError> {
    let expr = normalize_schedule(input)?;
    expr.parse::<croner::Cron>()
        .map_err(|e| SchedulerError::InvalidSchedule(format!("{input}: {e}")))
}

/// The IANA timezone a cron trigger is evaluated in (`timezone`, default UTC).
pub fn schedule_timezone(config: &ConfigMap) -> Result<Tz, SchedulerError> {
    match config.get("timezone") {
        None | Some(ConfigValue::Null) => Ok(Tz::UTC),
        Some(ConfigValue::String(name)) if name.trim().is_empty() => Ok(Tz::UTC),
        Some(ConfigValue::String(name)) => name
            .trim()
            .parse::<Tz>()
            .map_err(|_| SchedulerError::InvalidSchedule(format!("unknown timezone '{name}'"))),
        Some(other) => Err(SchedulerError::InvalidSchedule(format!(
            "timezone must be a string, got {}",
            other.kind()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Due detection
// ---------------------------------------------------------------------------

/// Why a scheduled workflow fires on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueReason {
    /// One or more cron occurrences elapsed since the last firing; they are
    /// coalesced into a single firing.
    Cron { occurrences: usize },
    /// The workflow became active and has not fired since.
    Activation,
}

/// Decide whether a `scheduler` workflow is due at `now`.
pub fn due_reason(workflow: &Workflow, now: DateTime<Utc>) -> Result<Option<DueReason>, SchedulerError> {
    if !workflow.is_active || !workflow.is_scheduled() {
        return Ok(None);
    }

    match workflow.trigger.trigger_id.as_str() {
        CRON_TRIGGER => {
            let expression = match workflow.trigger.config.get("expression") {
                Some(ConfigValue::String(s)) if !s.trim().is_empty() => s,
                _ => {
                    return Err(SchedulerError::InvalidSchedule(
                        "cron trigger has no 'expression'".to_string(),
                    ));
                }
            };
            let cron = parse_schedule(expression)?;
            let tz = schedule_timezone(&workflow.trigger.config)?;
            let occurrences = cron
                .iter_after(workflow.schedule_anchor().with_timezone(&tz))
                .take_while(|at| at.with_timezone(&Utc) <= now)
                .take(MAX_COUNTED_OCCURRENCES)
                .count();
            Ok((occurrences > 0).then_some(DueReason::Cron { occurrences }))
        }
        ON_ACTIVATION_TRIGGER => {
            let pending = match (workflow.last_fired_at, workflow.activated_at) {
                (None, _) => true,
                (Some(fired), Some(activated)) => fired < activated,
                (Some(_), None) => false,
            };
            Ok(pending.then_some(DueReason::Activation))
        }
        _ => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Result of one scheduler tick.
#[derive(Debug)]
pub struct TickReport {
    /// Workflows fired on this tick.
    pub fired: Vec<Uuid>,
    /// Scheduled workflows whose trigger config could not be evaluated.
    pub skipped: Vec<(Uuid, String)>,
    /// Merged dispatch report across every fired workflow.
    pub report: DispatchReport,
}

/// Synthesizes `scheduler` events and feeds them to the dispatch engine.
pub struct Scheduler<W: WorkflowStore, C: CredentialStore> {
    workflows: Arc<W>,
    engine: Arc<DispatchEngine<W, C>>,
    runner: RwLock<Option<JobScheduler>>,
}

impl<W, C> Scheduler<W, C>
where
    W: WorkflowStore + 'static,
    C: CredentialStore + 'static,
{
    pub fn new(workflows: Arc<W>, engine: Arc<DispatchEngine<W, C>>) -> Self {
        Self {
            workflows,
            engine,
            runner: RwLock::new(None),
        }
    }

    /// Fire every due scheduled workflow once.
    ///
    /// Each workflow's last-fired time is recorded before its event is
    /// dispatched, so a firing is never repeated even if dispatch fails.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, SchedulerError> {
        let scheduled = self
            .workflows
            .list_active_by_provider(SCHEDULER_PROVIDER)
            .await
            .map_err(|e| SchedulerError::Store(e.to_string()))?;

        let mut due = Vec::new();
        let mut skipped = Vec::new();
        for workflow in &scheduled {
            match due_reason(workflow, now) {
                Ok(Some(reason)) => due.push((workflow, reason)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(workflow_id = %workflow.id, error = %e, "scheduled workflow skipped");
                    skipped.push((workflow.id, e.to_string()));
                }
            }
        }

        let mut events = Vec::new();
        for (workflow, reason) in due {
            if let Err(e) = self.workflows.mark_fired(&workflow.id, now).await {
                tracing::error!(workflow_id = %workflow.id, error = %e, "failed to record firing, not dispatching");
                continue;
            }
            match reason {
                DueReason::Cron { occurrences } if occurrences > 1 => tracing::info!(
                    workflow_id = %workflow.id,
                    coalesced = occurrences,
                    "cron workflow due, coalescing missed occurrences"
                ),
                DueReason::Cron { .. } => tracing::debug!(workflow_id = %workflow.id, "cron workflow due"),
                DueReason::Activation => {
                    tracing::info!(workflow_id = %workflow.id, "activation trigger due")
                }
            }
            events.push((
                workflow.id,
                InboundEvent::scheduled(&workflow.trigger.trigger_id, workflow.id, now),
            ));
        }

        let reports = join_all(events.iter().map(|(_, event)| self.engine.dispatch(event))).await;

        let mut report = DispatchReport::empty();
        for r in reports {
            report.merge(r);
        }

        Ok(TickReport {
            fired: events.into_iter().map(|(id, _)| id).collect(),
            skipped,
            report,
        })
    }

    /// Start ticking on `schedule` (cron or human-readable).
    pub async fn start(self: &Arc<Self>, schedule: &str) -> Result<(), SchedulerError> {
        let cron_expr = normalize_schedule(schedule)?;

        let runner = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        let this = Arc::clone(self);
        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let this = this.clone();
            Box::pin(async move {
                match this.tick(Utc::now()).await {
                    Ok(tick) if !tick.fired.is_empty() => tracing::info!(
                        fired = tick.fired.len(),
                        triggered = tick.report.triggered,
                        failed = tick.report.failed,
                        "scheduler tick"
                    ),
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "scheduler tick failed"),
                }
            })
        })
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

        runner
            .add(job)
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;
        runner
            .start()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        *self.runner.write().await = Some(runner);
        tracing::info!(schedule = %cron_expr, "scheduler started");
        Ok(())
    }

    /// Stop ticking. A no-op if the scheduler was never started.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        if let Some(mut runner) = self.runner.write().await.take() {
            runner
                .shutdown()
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
            tracing::info!("scheduler stopped");
        }
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.runner.read().await.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
