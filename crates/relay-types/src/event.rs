//! Inbound events: the normalized shape every event source produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::ConfigMap;
use crate::workflow::SCHEDULER_PROVIDER;

/// A normalized external event handed to the dispatch engine.
///
/// `fields` is the substitution source for action templates (e.g. `from`,
/// `subject`, `body` for an email event).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub provider: String,
    pub trigger_kind: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub fields: ConfigMap,
    /// Restricts matching to a single workflow. Set by the scheduler so a
    /// due workflow's event never fires its siblings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_workflow: Option<Uuid>,
}

impl InboundEvent {
    pub fn new(
        provider: impl Into<String>,
        trigger_kind: impl Into<String>,
        fields: ConfigMap,
    ) -> Self {
        Self {
            provider: provider.into(),
            trigger_kind: trigger_kind.into(),
            occurred_at: Utc::now(),
            fields,
            target_workflow: None,
        }
    }

    /// A scheduler-synthesized event aimed at one workflow, with empty fields.
    pub fn scheduled(trigger_kind: &str, workflow_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            provider: SCHEDULER_PROVIDER.to_string(),
            trigger_kind: trigger_kind.to_string(),
            occurred_at: at,
            fields: ConfigMap::new(),
            target_workflow: Some(workflow_id),
        }
    }

    pub fn with_target(mut self, workflow_id: Uuid) -> Self {
        self.target_workflow = Some(workflow_id);
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::config_map_from_json;

    #[test]
    fn test_scheduled_event_has_empty_fields() {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let event = InboundEvent::scheduled("cron", id, now);
        assert_eq!(event.provider, "scheduler");
        assert_eq!(event.trigger_kind, "cron");
        assert!(event.fields.is_empty());
        assert_eq!(event.target_workflow, Some(id));
        assert_eq!(event.occurred_at, now);
    }

    #[test]
    fn test_event_deserializes_without_optional_parts() {
        let json = r#"{"provider":"gmail","triggerKind":"receive-email","occurredAt":"2026-01-01T00:00:00Z"}"#;
        let event: InboundEvent = serde_json::from_str(json).unwrap();
        assert!(event.fields.is_empty());
        assert!(event.target_workflow.is_none());
    }

    #[test]
    fn test_event_json_shape() {
        let fields = config_map_from_json(serde_json::json!({"from": "a@b.com"}));
        let event = InboundEvent::new("gmail", "receive-email", fields);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["triggerKind"], "receive-email");
        assert_eq!(json["fields"]["from"], "a@b.com");
        assert!(json.get("targetWorkflow").is_none());
    }
}
