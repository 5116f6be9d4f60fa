//! Dispatch outcome types.
//!
//! A `DispatchReport` is built fresh for each dispatch call and handed back
//! to the caller; it is never persisted. Individual outcomes are additionally
//! appended to the run log as `WorkflowRun` records.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-workflow execution state.
///
/// Executions move strictly forward:
/// `Pending -> Resolving -> Rendering -> Invoking -> {Succeeded | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Resolving,
    Rendering,
    Invoking,
    Succeeded,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionState::Succeeded | ExecutionState::Failed)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Resolving => "resolving",
            ExecutionState::Rendering => "rendering",
            ExecutionState::Invoking => "invoking",
            ExecutionState::Succeeded => "succeeded",
            ExecutionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Terminal status of one workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Succeeded => f.write_str("succeeded"),
            OutcomeStatus::Failed => f.write_str("failed"),
        }
    }
}

impl std::str::FromStr for OutcomeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(OutcomeStatus::Succeeded),
            "failed" => Ok(OutcomeStatus::Failed),
            other => Err(format!("unknown outcome status: '{other}'")),
        }
    }
}

/// Classification of a failed workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Trigger config could not be evaluated against the event.
    MalformedTrigger,
    CredentialNotFound,
    CredentialInvalid,
    CredentialRefreshFailed,
    Template,
    AuthRejected,
    ProviderUnavailable,
    InvalidConfig,
    /// A store read or write failed mid-execution.
    Storage,
    /// The dispatch call was cancelled while this execution was in flight.
    Cancelled,
    /// The execution task ended without reporting (e.g. it panicked).
    Aborted,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::MalformedTrigger => "malformed_trigger",
            FailureKind::CredentialNotFound => "credential_not_found",
            FailureKind::CredentialInvalid => "credential_invalid",
            FailureKind::CredentialRefreshFailed => "credential_refresh_failed",
            FailureKind::Template => "template",
            FailureKind::AuthRejected => "auth_rejected",
            FailureKind::ProviderUnavailable => "provider_unavailable",
            FailureKind::InvalidConfig => "invalid_config",
            FailureKind::Storage => "storage",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Aborted => "aborted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "malformed_trigger" => FailureKind::MalformedTrigger,
            "credential_not_found" => FailureKind::CredentialNotFound,
            "credential_invalid" => FailureKind::CredentialInvalid,
            "credential_refresh_failed" => FailureKind::CredentialRefreshFailed,
            "template" => FailureKind::Template,
            "auth_rejected" => FailureKind::AuthRejected,
            "provider_unavailable" => FailureKind::ProviderUnavailable,
            "invalid_config" => FailureKind::InvalidConfig,
            "storage" => FailureKind::Storage,
            "cancelled" => FailureKind::Cancelled,
            "aborted" => FailureKind::Aborted,
            other => return Err(format!("unknown failure kind: '{other}'")),
        };
        Ok(kind)
    }
}

/// Normalized output of a successful action invocation.
///
/// Opaque to the dispatch engine; carried through for observability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub output: serde_json::Value,
}

impl ActionResult {
    pub fn new(output: serde_json::Value) -> Self {
        Self { output }
    }
}

/// The result of running one matched workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOutcome {
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    pub duration_ms: u64,
}

impl WorkflowOutcome {
    pub fn succeeded(
        workflow_id: Uuid,
        workflow_name: impl Into<String>,
        result: ActionResult,
        duration_ms: u64,
    ) -> Self {
        Self {
            workflow_id,
            workflow_name: workflow_name.into(),
            status: OutcomeStatus::Succeeded,
            error: None,
            error_kind: None,
            output: Some(result.output),
            duration_ms,
        }
    }

    pub fn failed(
        workflow_id: Uuid,
        workflow_name: impl Into<String>,
        kind: FailureKind,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            workflow_id,
            workflow_name: workflow_name.into(),
            status: OutcomeStatus::Failed,
            error: Some(error.into()),
            error_kind: Some(kind),
            output: None,
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }
}

/// Aggregate result of one dispatch call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    /// False only when the dispatch call itself hit an engine-level fault.
    pub success: bool,
    pub triggered: u32,
    pub failed: u32,
    /// Candidates considered for the provider/trigger pair.
    pub total_workflows: u32,
    #[serde(default)]
    pub outcomes: Vec<WorkflowOutcome>,
}

impl DispatchReport {
    /// Aggregate outcomes into a report. Counts are derived from `outcomes`.
    pub fn from_outcomes(total_workflows: u32, outcomes: Vec<WorkflowOutcome>) -> Self {
        let triggered = outcomes.iter().filter(|o| o.is_success()).count() as u32;
        let failed = outcomes.len() as u32 - triggered;
        Self {
            success: true,
            triggered,
            failed,
            total_workflows,
            outcomes,
        }
    }

    /// Report for a dispatch that could not load its candidate set.
    pub fn fault() -> Self {
        Self {
            success: false,
            triggered: 0,
            failed: 0,
            total_workflows: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::from_outcomes(0, Vec::new())
    }

    /// Fold another report into this one (used when one tick dispatches
    /// several synthesized events).
    pub fn merge(&mut self, other: DispatchReport) {
        self.success &= other.success;
        self.triggered += other.triggered;
        self.failed += other.failed;
        self.total_workflows += other.total_workflows;
        self.outcomes.extend(other.outcomes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts_from_outcomes() {
        let outcomes = vec![
            WorkflowOutcome::succeeded(Uuid::now_v7(), "a", ActionResult::default(), 3),
            WorkflowOutcome::failed(
                Uuid::now_v7(),
                "b",
                FailureKind::CredentialInvalid,
                "credential revoked",
                1,
            ),
        ];
        let report = DispatchReport::from_outcomes(4, outcomes);
        assert!(report.success);
        assert_eq!(report.triggered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.total_workflows, 4);
    }

    #[test]
    fn test_report_json_shape() {
        let report = DispatchReport::from_outcomes(1, Vec::new());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["triggered"], 0);
        assert_eq!(json["failed"], 0);
        assert_eq!(json["totalWorkflows"], 1);
        assert!(json["outcomes"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_fault_report_is_zeroed() {
        let report = DispatchReport::fault();
        assert!(!report.success);
        assert_eq!(report.triggered + report.failed + report.total_workflows, 0);
    }

    #[test]
    fn test_merge_reports() {
        let mut report = DispatchReport::empty();
        report.merge(DispatchReport::from_outcomes(
            2,
            vec![WorkflowOutcome::succeeded(
                Uuid::now_v7(),
                "a",
                ActionResult::default(),
                0,
            )],
        ));
        report.merge(DispatchReport::fault());
        assert!(!report.success);
        assert_eq!(report.triggered, 1);
        assert_eq!(report.total_workflows, 2);
    }

    #[test]
    fn test_failure_kind_string_roundtrip() {
        for kind in [
            FailureKind::MalformedTrigger,
            FailureKind::CredentialRefreshFailed,
            FailureKind::ProviderUnavailable,
            FailureKind::Aborted,
        ] {
            let parsed: FailureKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_execution_state_terminal() {
        assert!(!ExecutionState::Invoking.is_terminal());
        assert!(ExecutionState::Failed.is_terminal());
        assert_eq!(ExecutionState::Resolving.to_string(), "resolving");
    }
}
