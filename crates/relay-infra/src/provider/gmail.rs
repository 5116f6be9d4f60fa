//! Gmail `send-email` action.
//!
//! Builds a plain-text RFC 822 message and posts it base64url-encoded to
//! `users/me/messages/send` with the user's OAuth2 access token.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use relay_core::invoker::ActionProvider;
use relay_types::credential::CredentialHandle;
use relay_types::dispatch::ActionResult;
use relay_types::error::ActionError;
use relay_types::value::ConfigMap;
use serde::Deserialize;
use serde_json::json;

use super::{joined_list, optional, required, send, single_line};

const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com";

pub struct GmailProvider {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
}

impl GmailProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn send_email(
        &self,
        config: &ConfigMap,
        credential: &CredentialHandle,
    ) -> Result<ActionResult, ActionError> {
        let message = build_message(config)?;
        let raw = URL_SAFE_NO_PAD.encode(message.as_bytes());

        let request = self
            .http
            .post(format!("{}/gmail/v1/users/me/messages/send", self.base_url))
            .bearer_auth(credential.token())
            .json(&json!({ "raw": raw }));
        let (_, body) = send(request).await?;

        let sent: SendResponse = serde_json::from_str(&body).map_err(|e| {
            ActionError::ProviderUnavailable(format!("unexpected Gmail response: {e}"))
        })?;
        tracing::debug!(message_id = %sent.id, "gmail message sent");

        Ok(ActionResult::new(json!({
            "messageId": sent.id,
            "threadId": sent.thread_id,
        })))
    }
}

impl ActionProvider for GmailProvider {
    fn name(&self) -> &str {
        "gmail"
    }

    fn actions(&self) -> &[&'static str] {
        &["send-email"]
    }

    async fn call(
        &self,
        action_id: &str,
        config: &ConfigMap,
        credential: &CredentialHandle,
    ) -> Result<ActionResult, ActionError> {
        match action_id {
            "send-email" => self.send_email(config, credential).await,
            other => Err(ActionError::InvalidConfig(format!(
                "unknown gmail action '{other}'"
            ))),
        }
    }
}

/// Render the RFC 822 message for `to`, `cc`, `bcc`, `subject`, and `body`.
fn build_message(config: &ConfigMap) -> Result<String, ActionError> {
    let to = joined_list(config, "to")?
        .ok_or_else(|| ActionError::InvalidConfig("missing required parameter 'to'".into()))?;
    let subject = required(config, "subject")?;
    let body = optional(config, "body")?.unwrap_or_default();
    let cc = joined_list(config, "cc")?;
    let bcc = joined_list(config, "bcc")?;

    single_line("to", &to)?;
    single_line("subject", &subject)?;

    let mut message = format!("To: {to}\r\n");
    if let Some(cc) = cc {
        single_line("cc", &cc)?;
        message.push_str(&format!("Cc: {cc}\r\n"));
    }
    if let Some(bcc) = bcc {
        single_line("bcc", &bcc)?;
        message.push_str(&format!("Bcc: {bcc}\r\n"));
    }
    message.push_str(&format!("Subject: {subject}\r\n"));
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n\r\n");
    message.push_str(&body);
    Ok(message)
}
