//! Discord `send-message` action, authenticated with a bot token.

use relay_core::invoker::ActionProvider;
use relay_types::credential::CredentialHandle;
use relay_types::dispatch::ActionResult;
use relay_types::error::ActionError;
use relay_types::value::ConfigMap;
use serde::Deserialize;
use serde_json::json;

use super::{required, send};

const DEFAULT_BASE_URL: &str = "https://discord.com/api/v10";

/// Discord rejects message content longer than this.
const MAX_CONTENT_CHARS: usize = 2000;

pub struct DiscordProvider {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    id: String,
}

impl DiscordProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn send_message(
        &self,
        config: &ConfigMap,
        credential: &CredentialHandle,
    ) -> Result<ActionResult, ActionError> {
        let channel_id = required(config, "channelId")?;
        if !channel_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ActionError::InvalidConfig(format!(
                "channelId must be a numeric snowflake, got '{channel_id}'"
            )));
        }
        let content = required(config, "content")?;
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(ActionError::InvalidConfig(format!(
                "content exceeds {MAX_CONTENT_CHARS} characters"
            )));
        }

        let request = self
            .http
            .post(format!("{}/channels/{channel_id}/messages", self.base_url))
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", credential.token()))
            .json(&json!({ "content": content }));
        let (_, body) = send(request).await?;

        let message: MessageResponse = serde_json::from_str(&body).map_err(|e| {
            ActionError::ProviderUnavailable(format!("unexpected Discord response: {e}"))
        })?;
        tracing::debug!(message_id = %message.id, channel_id = %channel_id, "discord message sent");

        Ok(ActionResult::new(json!({ "messageId": message.id })))
    }
}

impl ActionProvider for DiscordProvider {
    fn name(&self) -> &str {
        "discord"
    }

    fn actions(&self) -> &[&'static str] {
        &["send-message"]
    }

    async fn call(
        &self,
        action_id: &str,
        config: &ConfigMap,
        credential: &CredentialHandle,
    ) -> Result<ActionResult, ActionError> {
        match action_id {
            "send-message" => self.send_message(config, credential).await,
            other => Err(ActionError::InvalidConfig(format!(
                "unknown discord action '{other}'"
            ))),
        }
    }
}
