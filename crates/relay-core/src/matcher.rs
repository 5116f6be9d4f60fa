//! Workflow matcher.
//!
//! Decides which stored workflows an inbound event fires. Matching is pure:
//! it never touches credentials, providers, or storage.
//!
//! A workflow matches when it is active, its trigger provider and trigger
//! kind equal the event's, and every non-blank filter in its trigger config
//! is satisfied by the event's fields. Which config keys are filters (and how
//! they compare) depends on the trigger kind; see [`filter_rules`].

use relay_types::error::MatchError;
use relay_types::event::InboundEvent;
use relay_types::value::{ConfigMap, ConfigValue, lookup_path};
use relay_types::workflow::{CRON_TRIGGER, SCHEDULER_PROVIDER, Workflow};

use crate::scheduler::{parse_schedule, schedule_timezone};

// ---------------------------------------------------------------------------
// Filter catalog
// ---------------------------------------------------------------------------

/// How a trigger-config filter compares against the event field of the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterRule {
    /// Email address list; case-insensitive; `Name <addr>` forms accepted.
    Address,
    /// Case-insensitive substring.
    Contains,
    /// URL path, compared after [`normalize_path`].
    Path,
    /// Exact equality of the stringified scalar.
    Exact,
}

/// Filter keys declared for a known `(provider, trigger_id)` pair.
///
/// Returns `None` for trigger kinds outside the catalog; those treat every
/// non-blank scalar config value as an [`FilterRule::Exact`] filter.
pub fn filter_rules(provider: &str, trigger_id: &str) -> Option<&'static [(&'static str, FilterRule)]> {
    const GMAIL_RECEIVE: &[(&str, FilterRule)] = &[
        ("from", FilterRule::Address),
        ("to", FilterRule::Address),
        ("subject", FilterRule::Contains),
    ];
    const WEBHOOK_INCOMING: &[(&str, FilterRule)] = &[("path", FilterRule::Path)];
    const DISCORD_MESSAGE: &[(&str, FilterRule)] = &[
        ("channelId", FilterRule::Exact),
        ("guildId", FilterRule::Exact),
    ];
    const NONE: &[(&str, FilterRule)] = &[];

    match (provider, trigger_id) {
        ("gmail", "receive-email") => Some(GMAIL_RECEIVE),
        ("webhook", "incoming-webhook") => Some(WEBHOOK_INCOMING),
        ("discord", "new-message") => Some(DISCORD_MESSAGE),
        (SCHEDULER_PROVIDER, _) => Some(NONE),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Result of running the matcher over a candidate set.
#[derive(Debug, Default)]
pub struct MatchSet<'a> {
    pub matched: Vec<&'a Workflow>,
    /// Candidates whose trigger config could not be evaluated.
    pub rejected: Vec<(&'a Workflow, MatchError)>,
}

/// Whether `workflow` is considered for `event` at all: active, same
/// provider, same trigger kind, and (when the event is targeted) the target.
pub fn is_candidate(event: &InboundEvent, workflow: &Workflow) -> bool {
    workflow.is_active
        && workflow.trigger.provider == event.provider
        && workflow.trigger.trigger_id == event.trigger_kind
        && event.target_workflow.is_none_or(|target| target == workflow.id)
}

/// Evaluate one workflow against an event.
pub fn matches(event: &InboundEvent, workflow: &Workflow) -> Result<bool, MatchError> {
    if !is_candidate(event, workflow) {
        return Ok(false);
    }

    let trigger = &workflow.trigger;
    if trigger.provider == SCHEDULER_PROVIDER && trigger.trigger_id == CRON_TRIGGER {
        validate_cron_config(&trigger.config)?;
    }

    match filter_rules(&trigger.provider, &trigger.trigger_id) {
        Some(rules) => {
            for (key, rule) in rules {
                let Some(filter) = trigger.config.get(*key) else {
                    continue;
                };
                if !filter_satisfied(key, *rule, filter, &event.fields)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        None => {
            for (key, filter) in &trigger.config {
                if !filter.is_scalar() {
                    continue;
                }
                if !filter_satisfied(key, FilterRule::Exact, filter, &event.fields)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

/// Partition `candidates` into matched and malformed workflows.
///
/// Non-matching workflows appear in neither list.
pub fn match_candidates<'a>(event: &InboundEvent, candidates: &'a [Workflow]) -> MatchSet<'a> {
    let mut set = MatchSet::default();
    for workflow in candidates {
        match matches(event, workflow) {
            Ok(true) => set.matched.push(workflow),
            Ok(false) => {}
            Err(e) => set.rejected.push((workflow, e)),
        }
    }
    set
}

/// The matched subset of `candidates`.
///
/// Malformed trigger configs are logged and excluded; use
/// [`match_candidates`] to observe them.
pub fn match_workflows<'a>(event: &InboundEvent, candidates: &'a [Workflow]) -> Vec<&'a Workflow> {
    let set = match_candidates(event, candidates);
    for (workflow, error) in &set.rejected {
        tracing::warn!(workflow_id = %workflow.id, %error, "malformed trigger config");
    }
    set.matched
}

fn validate_cron_config(config: &ConfigMap) -> Result<(), MatchError> {
    let expression = match config.get("expression") {
        Some(ConfigValue::String(s)) if !s.trim().is_empty() => s,
        Some(ConfigValue::String(_)) | Some(ConfigValue::Null) | None => {
            return Err(MatchError::MissingParameter("expression".to_string()));
        }
        Some(other) => {
            return Err(MatchError::FilterType {
                key: "expression".to_string(),
                expected: "string",
                actual: other.kind(),
            });
        }
    };
    parse_schedule(expression).map_err(|e| MatchError::InvalidSchedule {
        expression: expression.clone(),
        reason: e.to_string(),
    })?;
    schedule_timezone(config).map_err(|e| MatchError::InvalidTimezone(e.to_string()))?;
    Ok(())
}

fn filter_satisfied(
    key: &str,
    rule: FilterRule,
    filter: &ConfigValue,
    fields: &ConfigMap,
) -> Result<bool, MatchError> {
    if filter.is_blank() {
        return Ok(true);
    }

    let expected = match (rule, filter) {
        (FilterRule::Exact, value) if value.is_scalar() => value.to_template_string(),
        (_, ConfigValue::String(s)) => s.clone(),
        (_, other) => {
            return Err(MatchError::FilterType {
                key: key.to_string(),
                expected: "string",
                actual: other.kind(),
            });
        }
    };

    let Some(actual) = lookup_path(fields, key) else {
        return Ok(false);
    };

    let satisfied = match rule {
        FilterRule::Address => {
            let wanted = extract_addresses(&expected);
            let present = field_addresses(actual);
            wanted.iter().any(|w| present.contains(w))
        }
        FilterRule::Contains => actual
            .to_template_string()
            .to_lowercase()
            .contains(&expected.trim().to_lowercase()),
        FilterRule::Path => normalize_path(&actual.to_template_string()) == normalize_path(&expected),
        FilterRule::Exact => actual.to_template_string() == expected,
    };
    Ok(satisfied)
}

fn field_addresses(value: &ConfigValue) -> Vec<String> {
    match value {
        ConfigValue::List(items) => items.iter().flat_map(field_addresses).collect(),
        other => extract_addresses(&other.to_template_string()),
    }
}

/// Split a header-style address list into lowercase bare addresses.
///
/// `"Ada <ADA@example.com>, bob@example.com"` yields
/// `["ada@example.com", "bob@example.com"]`.
pub fn extract_addresses(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|part| {
            let part = part.trim();
            let addr = match (part.rfind('<'), part.rfind('>')) {
                (Some(open), Some(close)) if open < close => &part[open + 1..close],
                _ => part,
            };
            let addr = addr.trim().trim_matches('"');
            (!addr.is_empty()).then(|| addr.to_lowercase())
        })
        .collect()
}

/// Normalize a webhook path: leading slash, no trailing slash, no empty
/// segments. The root path normalizes to `/`.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path
        .trim()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{event, workflow};
    use relay_types::value::config_map_from_json;
    use serde_json::json;

    fn email_event() -> InboundEvent {
        event(
            "gmail",
            "receive-email",
            json!({"from": "a@b.com", "subject": "Hi", "body": "Hello"}),
        )
    }

    #[test]
    fn test_blank_filter_matches_any() {
        let wf = workflow("gmail", "receive-email", json!({"from": ""}));
        assert!(matches(&email_event(), &wf).unwrap());
    }

    #[test]
    fn test_absent_config_matches_any() {
        let wf = workflow("gmail", "receive-email", json!({}));
        assert!(matches(&email_event(), &wf).unwrap());
    }

    #[test]
    fn test_sender_filter_rejects_other_address() {
        let wf = workflow("gmail", "receive-email", json!({"from": "other@x.com"}));
        assert!(!matches(&email_event(), &wf).unwrap());
    }

    #[test]
    fn test_sender_filter_case_insensitive_and_display_name() {
        let wf = workflow("gmail", "receive-email", json!({"from": "A@B.COM"}));
        let ev = event(
            "gmail",
            "receive-email",
            json!({"from": "Alice <a@b.com>", "subject": "Hi"}),
        );
        assert!(matches(&ev, &wf).unwrap());
    }

    #[test]
    fn test_recipient_filter_matches_any_listed_address() {
        let wf = workflow("gmail", "receive-email", json!({"to": "team@x.com"}));
        let ev = event(
            "gmail",
            "receive-email",
            json!({"to": "me@x.com, Team <team@x.com>"}),
        );
        assert!(matches(&ev, &wf).unwrap());
    }

    #[test]
    fn test_subject_filter_is_substring() {
        let wf = workflow("gmail", "receive-email", json!({"subject": "invoice"}));
        let ev = event(
            "gmail",
            "receive-email",
            json!({"from": "a@b.com", "subject": "Your INVOICE #42"}),
        );
        assert!(matches(&ev, &wf).unwrap());
        assert!(!matches(&email_event(), &wf).unwrap());
    }

    #[test]
    fn test_filter_with_missing_event_field_does_not_match() {
        let wf = workflow("gmail", "receive-email", json!({"to": "me@x.com"}));
        assert!(!matches(&email_event(), &wf).unwrap());
    }

    #[test]
    fn test_inactive_workflow_never_matches() {
        let mut wf = workflow("gmail", "receive-email", json!({"from": ""}));
        wf.is_active = false;
        assert!(!matches(&email_event(), &wf).unwrap());
        assert!(!is_candidate(&email_event(), &wf));
    }

    #[test]
    fn test_provider_and_kind_must_match() {
        let wf = workflow("gmail", "send-digest", json!({}));
        assert!(!matches(&email_event(), &wf).unwrap());
        let wf = workflow("outlook", "receive-email", json!({}));
        assert!(!matches(&email_event(), &wf).unwrap());
    }

    #[test]
    fn test_webhook_path_normalized() {
        let wf = workflow("webhook", "incoming-webhook", json!({"path": "orders/new/"}));
        let ev = event("webhook", "incoming-webhook", json!({"path": "/orders/new"}));
        assert!(matches(&ev, &wf).unwrap());
        let ev = event("webhook", "incoming-webhook", json!({"path": "/orders"}));
        assert!(!matches(&ev, &wf).unwrap());
    }

    #[test]
    fn test_discord_channel_exact_with_numeric_filter() {
        let wf = workflow("discord", "new-message", json!({"channelId": 1234}));
        let ev = event(
            "discord",
            "new-message",
            json!({"channelId": "1234", "content": "hi"}),
        );
        assert!(matches(&ev, &wf).unwrap());
        let ev = event("discord", "new-message", json!({"channelId": "12345"}));
        assert!(!matches(&ev, &wf).unwrap());
    }

    #[test]
    fn test_non_string_filter_is_malformed() {
        let wf = workflow("gmail", "receive-email", json!({"from": ["a@b.com"]}));
        let err = matches(&email_event(), &wf).unwrap_err();
        assert!(matches!(err, MatchError::FilterType { ref key, .. } if key == "from"));
    }

    #[test]
    fn test_unknown_kind_uses_exact_scalar_filters() {
        let wf = workflow("github", "push", json!({"branch": "main", "labels": ["x"]}));
        let ev = event("github", "push", json!({"branch": "main", "repo": "relay"}));
        assert!(matches(&ev, &wf).unwrap());
        let ev = event("github", "push", json!({"branch": "dev"}));
        assert!(!matches(&ev, &wf).unwrap());
    }

    #[test]
    fn test_unknown_kind_dotted_filter_key() {
        let wf = workflow("github", "push", json!({"repository.name": "relay"}));
        let ev = event("github", "push", json!({"repository": {"name": "relay"}}));
        assert!(matches(&ev, &wf).unwrap());
    }

    #[test]
    fn test_cron_requires_valid_expression() {
        let ev = event("scheduler", "cron", json!({}));

        let wf = workflow("scheduler", "cron", json!({"expression": "every 5 minutes"}));
        assert!(matches(&ev, &wf).unwrap());

        let wf = workflow("scheduler", "cron", json!({}));
        assert_eq!(
            matches(&ev, &wf).unwrap_err(),
            MatchError::MissingParameter("expression".to_string())
        );

        let wf = workflow("scheduler", "cron", json!({"expression": "whenever"}));
        assert!(matches!(
            matches(&ev, &wf).unwrap_err(),
            MatchError::InvalidSchedule { .. }
        ));
    }

    #[test]
    fn test_cron_timezone_must_be_known() {
        let ev = event("scheduler", "cron", json!({}));

        let wf = workflow(
            "scheduler",
            "cron",
            json!({"expression": "every day at 09:00", "timezone": "America/New_York"}),
        );
        assert!(matches(&ev, &wf).unwrap());

        let wf = workflow(
            "scheduler",
            "cron",
            json!({"expression": "every day at 09:00", "timezone": "Not/AZone"}),
        );
        assert!(matches!(
            matches(&ev, &wf).unwrap_err(),
            MatchError::InvalidTimezone(_)
        ));

        let wf = workflow(
            "scheduler",
            "cron",
            json!({"expression": "every day at 09:00", "timezone": 3}),
        );
        assert!(matches!(
            matches(&ev, &wf).unwrap_err(),
            MatchError::InvalidTimezone(_)
        ));
    }

    #[test]
    fn test_targeted_event_only_matches_target() {
        let a = workflow("scheduler", "on-activation", json!({}));
        let b = workflow("scheduler", "on-activation", json!({}));
        let ev = event("scheduler", "on-activation", json!({})).with_target(a.id);
        assert!(matches(&ev, &a).unwrap());
        assert!(!matches(&ev, &b).unwrap());
    }

    #[test]
    fn test_match_candidates_partitions() {
        let good = workflow("gmail", "receive-email", json!({"from": ""}));
        let miss = workflow("gmail", "receive-email", json!({"from": "z@z.com"}));
        let bad = workflow("gmail", "receive-email", json!({"subject": 5}));
        let candidates = vec![good.clone(), miss, bad.clone()];

        let set = match_candidates(&email_event(), &candidates);
        assert_eq!(set.matched.len(), 1);
        assert_eq!(set.matched[0].id, good.id);
        assert_eq!(set.rejected.len(), 1);
        assert_eq!(set.rejected[0].0.id, bad.id);

        assert_eq!(match_workflows(&email_event(), &candidates).len(), 1);
    }

    #[test]
    fn test_zero_candidates() {
        assert!(match_workflows(&email_event(), &[]).is_empty());
    }

    #[test]
    fn test_extract_addresses() {
        assert_eq!(
            extract_addresses("Ada <ADA@example.com>, bob@example.com"),
            vec!["ada@example.com", "bob@example.com"]
        );
        assert!(extract_addresses(" , ").is_empty());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("hooks//github/"), "/hooks/github");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn test_list_field_addresses() {
        let fields = config_map_from_json(json!({"to": ["x@y.com", "Team <t@y.com>"]}));
        let wf = workflow("gmail", "receive-email", json!({"to": "t@y.com"}));
        let ev = InboundEvent::new("gmail", "receive-email", fields);
        assert!(matches(&ev, &wf).unwrap());
    }
}
