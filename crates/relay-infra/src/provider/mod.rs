//! Built-in action providers.
//!
//! Each provider implements `ActionProvider` from `relay-core` against a real
//! HTTP API. Providers validate their rendered parameters before any network
//! call and classify every failure; retries belong to the engine.

pub mod discord;
pub mod gmail;
pub mod webhook;

use std::time::Duration;

use relay_core::invoker::{ActionRegistry, BoxActionProvider};
use relay_types::error::ActionError;
use relay_types::value::{ConfigMap, ConfigValue};

pub use discord::DiscordProvider;
pub use gmail::GmailProvider;
pub use webhook::WebhookProvider;

/// Registry with every built-in provider, sharing one HTTP client.
pub fn default_registry() -> ActionRegistry {
    let http = http_client();
    ActionRegistry::new()
        .with(BoxActionProvider::new(GmailProvider::new(http.clone())))
        .with(BoxActionProvider::new(DiscordProvider::new(http.clone())))
        .with(BoxActionProvider::new(WebhookProvider::new(http)))
}

/// Outbound client used by all providers.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .user_agent(concat!("relay/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

/// Classify a non-2xx provider response.
///
/// 401/403 reject the credential, 408/429/5xx are transient, and every other
/// 4xx means the request itself was wrong.
pub(crate) fn classify_status(status: u16, body: &str) -> ActionError {
    let detail = if body.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", truncate(body.trim(), 300))
    };
    match status {
        401 | 403 => ActionError::AuthRejected(detail),
        408 | 429 | 500..=599 => ActionError::ProviderUnavailable(detail),
        _ => ActionError::InvalidConfig(detail),
    }
}

/// Classify a failure to get any response at all.
pub(crate) fn classify_transport(err: &reqwest::Error) -> ActionError {
    if err.is_builder() {
        ActionError::InvalidConfig(err.to_string())
    } else {
        ActionError::ProviderUnavailable(err.to_string())
    }
}

/// Send a request and return the body of a 2xx response.
pub(crate) async fn send(request: reqwest::RequestBuilder) -> Result<(u16, String), ActionError> {
    let response = request.send().await.map_err(|e| classify_transport(&e))?;
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| ActionError::ProviderUnavailable(e.to_string()))?;
    if !(200..300).contains(&status) {
        return Err(classify_status(status, &body));
    }
    Ok((status, body))
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ---------------------------------------------------------------------------
// Parameter extraction
// ---------------------------------------------------------------------------

/// A required, non-blank scalar parameter as a string.
pub(crate) fn required(config: &ConfigMap, key: &str) -> Result<String, ActionError> {
    optional(config, key)?
        .ok_or_else(|| ActionError::InvalidConfig(format!("missing required parameter '{key}'")))
}

/// An optional scalar parameter. Blank values count as absent.
pub(crate) fn optional(config: &ConfigMap, key: &str) -> Result<Option<String>, ActionError> {
    match config.get(key) {
        None => Ok(None),
        Some(value) if value.is_blank() => Ok(None),
        Some(value) if value.is_scalar() => Ok(Some(value.to_template_string())),
        Some(value) => Err(ActionError::InvalidConfig(format!(
            "parameter '{key}' must be a scalar, got {}",
            value.kind()
        ))),
    }
}

/// A string-or-list parameter joined with `", "` (recipient lists).
pub(crate) fn joined_list(config: &ConfigMap, key: &str) -> Result<Option<String>, ActionError> {
    match config.get(key) {
        Some(ConfigValue::List(items)) => {
            let parts: Vec<String> = items
                .iter()
                .filter(|v| !v.is_blank())
                .map(|v| match v {
                    ConfigValue::String(s) => Ok(s.trim().to_string()),
                    other => Err(ActionError::InvalidConfig(format!(
                        "parameter '{key}' must contain strings, got {}",
                        other.kind()
                    ))),
                })
                .collect::<Result<_, _>>()?;
            Ok((!parts.is_empty()).then(|| parts.join(", ")))
        }
        _ => optional(config, key),
    }
}

/// Reject CR/LF in values that end up in protocol headers.
pub(crate) fn single_line(key: &str, value: &str) -> Result<(), ActionError> {
    if value.contains(['\r', '\n']) {
        return Err(ActionError::InvalidConfig(format!(
            "parameter '{key}' must not contain line breaks"
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_server {
    use axum::Router;

    /// Serve `router` on an ephemeral port and return its base URL.
    pub async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }
}
