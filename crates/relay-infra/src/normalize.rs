//! Inbound payload normalizers.
//!
//! Turn provider-native payloads into [`InboundEvent`]s whose `fields` are
//! the substitution source for action templates. Normalization never fails:
//! anything unrecognized is passed through as a generic field map.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use relay_core::matcher::normalize_path;
use relay_types::event::InboundEvent;
use relay_types::value::{ConfigMap, ConfigValue, config_map_from_json};
use serde_json::Value;

/// Provider name for generic inbound webhooks.
pub const WEBHOOK_PROVIDER: &str = "webhook";
/// Trigger kind for generic inbound webhooks.
pub const INCOMING_WEBHOOK_TRIGGER: &str = "incoming-webhook";

/// Normalize a provider-native JSON payload.
pub fn normalize_event(provider: &str, trigger_kind: &str, payload: Value) -> InboundEvent {
    let fields = match provider {
        "gmail" => gmail_fields(payload),
        "discord" => discord_fields(payload),
        _ => generic_fields(payload),
    };
    InboundEvent::new(provider, trigger_kind, fields)
}

/// Build the event for a raw webhook request received at `path`.
///
/// JSON objects become fields; any other body (JSON or not) is placed under
/// `body`. The normalized `path` is always set and wins over a body key.
pub fn webhook_event(path: &str, body: &[u8]) -> InboundEvent {
    let mut fields = if body.iter().all(u8::is_ascii_whitespace) {
        ConfigMap::new()
    } else {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => generic_fields(value),
            Err(_) => ConfigMap::from([(
                "body".to_string(),
                ConfigValue::String(String::from_utf8_lossy(body).into_owned()),
            )]),
        }
    };
    fields.insert("path".to_string(), ConfigValue::String(normalize_path(path)));
    InboundEvent::new(WEBHOOK_PROVIDER, INCOMING_WEBHOOK_TRIGGER, fields)
}

/// Objects map key by key; anything else lands under `body`.
fn generic_fields(payload: Value) -> ConfigMap {
    match payload {
        Value::Object(_) => config_map_from_json(payload),
        Value::Null => ConfigMap::new(),
        other => ConfigMap::from([("body".to_string(), ConfigValue::from(other))]),
    }
}

// ---------------------------------------------------------------------------
// Gmail
// ---------------------------------------------------------------------------

/// Gmail `users.messages` resource, or a flat `{from, subject, body}` object.
fn gmail_fields(payload: Value) -> ConfigMap {
    let Some(message) = payload.get("payload").filter(|p| p.get("headers").is_some()) else {
        return generic_fields(payload);
    };

    let mut fields = ConfigMap::new();
    for (header, key) in [("From", "from"), ("To", "to"), ("Cc", "cc"), ("Subject", "subject"), ("Date", "date")] {
        if let Some(value) = find_header(message, header) {
            fields.insert(key.to_string(), ConfigValue::String(value.to_string()));
        }
    }

    let snippet = payload.get("snippet").and_then(Value::as_str).unwrap_or_default();
    let body = find_plain_text(message).unwrap_or_else(|| snippet.to_string());
    fields.insert("body".to_string(), ConfigValue::String(body));
    fields.insert("snippet".to_string(), ConfigValue::String(snippet.to_string()));

    for (source, key) in [("id", "messageId"), ("threadId", "threadId")] {
        if let Some(value) = payload.get(source).and_then(Value::as_str) {
            fields.insert(key.to_string(), ConfigValue::String(value.to_string()));
        }
    }
    if let Some(labels) = payload.get("labelIds") {
        fields.insert("labelIds".to_string(), ConfigValue::from(labels.clone()));
    }
    fields
}

fn find_header<'a>(part: &'a Value, name: &str) -> Option<&'a str> {
    part.get("headers")?.as_array()?.iter().find_map(|h| {
        let header_name = h.get("name")?.as_str()?;
        header_name
            .eq_ignore_ascii_case(name)
            .then(|| h.get("value")?.as_str())
            .flatten()
    })
}

/// Depth-first search for the first `text/plain` body.
fn find_plain_text(part: &Value) -> Option<String> {
    let mime = part.get("mimeType").and_then(Value::as_str).unwrap_or("text/plain");
    if mime.eq_ignore_ascii_case("text/plain") {
        if let Some(data) = part.pointer("/body/data").and_then(Value::as_str) {
            return decode_body(data);
        }
    }
    part.get("parts")?
        .as_array()?
        .iter()
        .find_map(find_plain_text)
}

fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

// ---------------------------------------------------------------------------
// Discord
// ---------------------------------------------------------------------------

/// Discord `MESSAGE_CREATE` payload, bare or inside a gateway envelope.
fn discord_fields(payload: Value) -> ConfigMap {
    let message = match payload.get("t").and_then(Value::as_str) {
        Some(_) => payload.get("d").cloned().unwrap_or(Value::Null),
        None => payload,
    };
    if message.get("channel_id").is_none() {
        return generic_fields(message);
    }

    let text = |pointer: &str| message.pointer(pointer).and_then(Value::as_str);
    let mut fields = ConfigMap::new();
    for (pointer, key) in [
        ("/id", "messageId"),
        ("/channel_id", "channelId"),
        ("/guild_id", "guildId"),
        ("/content", "content"),
        ("/author/id", "authorId"),
        ("/author/username", "author"),
    ] {
        if let Some(value) = text(pointer) {
            fields.insert(key.to_string(), ConfigValue::String(value.to_string()));
        }
    }
    fields
}
