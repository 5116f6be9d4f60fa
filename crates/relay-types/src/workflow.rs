//! Workflow domain types for Relay.
//!
//! A workflow pairs exactly one trigger (an external event source) with
//! exactly one action (an external effect). This module also holds the
//! append-only run record written after each dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::{FailureKind, OutcomeStatus, WorkflowOutcome};
use crate::value::ConfigMap;

/// Provider name of the built-in time-driven event source.
pub const SCHEDULER_PROVIDER: &str = "scheduler";
/// Scheduler trigger fired on cron schedule occurrences.
pub const CRON_TRIGGER: &str = "cron";
/// Scheduler trigger fired once per inactive-to-active transition.
pub const ON_ACTIVATION_TRIGGER: &str = "on-activation";

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A stored trigger-to-action workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// UUIDv7 assigned on creation.
    pub id: Uuid,
    /// Owning user; credentials are resolved in this user's scope.
    pub user_id: Uuid,
    pub name: String,
    pub trigger: TriggerConfig,
    pub action: ActionConfig,
    pub is_active: bool,
    /// Last inactive-to-active transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    /// Last time the scheduler fired this workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Whether this workflow is driven by the scheduler rather than pushed events.
    pub fn is_scheduled(&self) -> bool {
        self.trigger.provider == SCHEDULER_PROVIDER
    }

    /// The instant cron occurrences are counted from: the later of the last
    /// firing and the last activation, else creation. Occurrences that fell
    /// while the workflow was inactive are never due.
    pub fn schedule_anchor(&self) -> DateTime<Utc> {
        match (self.last_fired_at, self.activated_at) {
            (Some(fired), Some(activated)) => fired.max(activated),
            (fired, activated) => fired.or(activated).unwrap_or(self.created_at),
        }
    }
}

/// The event-source half of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    /// External system, e.g. `gmail`, `webhook`, `scheduler`.
    pub provider: String,
    /// Trigger kind within the provider, e.g. `receive-email`, `cron`.
    pub trigger_id: String,
    /// Kind-specific filters and parameters.
    #[serde(default)]
    pub config: ConfigMap,
}

impl TriggerConfig {
    pub fn new(provider: impl Into<String>, trigger_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            trigger_id: trigger_id.into(),
            config: ConfigMap::new(),
        }
    }

    pub fn with_config(mut self, config: ConfigMap) -> Self {
        self.config = config;
        self
    }
}

/// The effect half of a workflow.
///
/// String leaves of `config` may contain `{{field}}` placeholders resolved
/// against the triggering event at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionConfig {
    pub provider: String,
    pub action_id: String,
    #[serde(default)]
    pub config: ConfigMap,
}

impl ActionConfig {
    pub fn new(provider: impl Into<String>, action_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            action_id: action_id.into(),
            config: ConfigMap::new(),
        }
    }

    pub fn with_config(mut self, config: ConfigMap) -> Self {
        self.config = config;
        self
    }
}

/// A workflow as authored in a YAML/JSON file, before it is assigned an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDraft {
    pub name: String,
    pub trigger: TriggerConfig,
    pub action: ActionConfig,
    /// Activate immediately on creation.
    #[serde(default)]
    pub active: bool,
}

impl WorkflowDraft {
    /// Parse a draft from YAML (JSON documents are valid YAML).
    pub fn from_yaml(source: &str) -> Result<Self, serde_yaml_ng::Error> {
        serde_yaml_ng::from_str(source)
    }

    pub fn into_workflow(self, user_id: Uuid, now: DateTime<Utc>) -> Workflow {
        Workflow {
            id: Uuid::now_v7(),
            user_id,
            name: self.name,
            trigger: self.trigger,
            action: self.action,
            is_active: self.active,
            activated_at: self.active.then_some(now),
            last_fired_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Run log
// ---------------------------------------------------------------------------

/// One executed workflow within one dispatch, as appended to the run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    /// UUIDv7 run ID.
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Denormalized for display.
    pub workflow_name: String,
    pub status: OutcomeStatus,
    /// Provider of the event that caused this run.
    pub event_provider: String,
    /// Trigger kind of the event that caused this run.
    pub event_kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn from_outcome(
        outcome: &WorkflowOutcome,
        event_provider: &str,
        event_kind: &str,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id: outcome.workflow_id,
            workflow_name: outcome.workflow_name.clone(),
            status: outcome.status,
            event_provider: event_provider.to_string(),
            event_kind: event_kind.to_string(),
            error: outcome.error.clone(),
            error_kind: outcome.error_kind,
            output: outcome.output.clone(),
            duration_ms: outcome.duration_ms,
            recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ConfigValue;

    fn sample_workflow() -> Workflow {
        let now = Utc::now();
        Workflow {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            name: "auto-reply".to_string(),
            trigger: TriggerConfig::new("gmail", "receive-email"),
            action: ActionConfig::new("gmail", "send-email"),
            is_active: true,
            activated_at: None,
            last_fired_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_workflow_json_uses_camel_case() {
        let workflow = sample_workflow();
        let json = serde_json::to_value(&workflow).unwrap();
        assert_eq!(json["trigger"]["triggerId"], "receive-email");
        assert_eq!(json["action"]["actionId"], "send-email");
        assert_eq!(json["isActive"], true);
        assert!(json.get("lastFiredAt").is_none());

        let parsed: Workflow = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, workflow);
    }

    #[test]
    fn test_parse_yaml_draft() {
        let yaml = r#"
name: auto-reply
active: true
trigger:
  provider: gmail
  triggerId: receive-email
  config:
    from: ""
action:
  provider: gmail
  actionId: send-email
  config:
    to: "{{from}}"
    subject: "Re: {{subject}}"
    body: Thanks!
"#;
        let draft = WorkflowDraft::from_yaml(yaml).unwrap();
        assert_eq!(draft.trigger.trigger_id, "receive-email");
        assert_eq!(
            draft.action.config.get("to"),
            Some(&ConfigValue::from("{{from}}"))
        );

        let now = Utc::now();
        let workflow = draft.into_workflow(Uuid::now_v7(), now);
        assert!(workflow.is_active);
        assert_eq!(workflow.activated_at, Some(now));
    }

    #[test]
    fn test_inactive_draft_has_no_activation_stamp() {
        let json = r#"{"name":"w","trigger":{"provider":"webhook","triggerId":"incoming-webhook"},"action":{"provider":"discord","actionId":"send-message"}}"#;
        let draft = WorkflowDraft::from_yaml(json).unwrap();
        let workflow = draft.into_workflow(Uuid::now_v7(), Utc::now());
        assert!(!workflow.is_active);
        assert!(workflow.activated_at.is_none());
        assert!(workflow.trigger.config.is_empty());
    }

    #[test]
    fn test_schedule_anchor_precedence() {
        let mut workflow = sample_workflow();
        assert_eq!(workflow.schedule_anchor(), workflow.created_at);

        let activated = workflow.created_at + chrono::Duration::minutes(5);
        workflow.activated_at = Some(activated);
        assert_eq!(workflow.schedule_anchor(), activated);

        let fired = activated + chrono::Duration::minutes(5);
        workflow.last_fired_at = Some(fired);
        assert_eq!(workflow.schedule_anchor(), fired);

        // Reactivated after the last firing.
        let reactivated = fired + chrono::Duration::days(3);
        workflow.activated_at = Some(reactivated);
        assert_eq!(workflow.schedule_anchor(), reactivated);
    }

    #[test]
    fn test_is_scheduled() {
        let mut workflow = sample_workflow();
        assert!(!workflow.is_scheduled());
        workflow.trigger = TriggerConfig::new(SCHEDULER_PROVIDER, CRON_TRIGGER);
        assert!(workflow.is_scheduled());
    }
}
