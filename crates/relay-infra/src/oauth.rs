//! OAuth2 refresh-token client.
//!
//! Posts a `refresh_token` grant to the token endpoint registered for a
//! provider under `[oauth.<provider>]` and classifies the failure modes the
//! credential resolver cares about: a dead grant (invalidate the credential)
//! versus a transient endpoint failure (keep it, fail this execution).

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_types::config::OAuthClientSettings;
use relay_types::error::RefreshError;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// The grant was rejected (`invalid_grant`, 401). Not recoverable.
    #[error("refresh grant rejected: {0}")]
    Revoked(String),

    /// Transport failure, 5xx, rate limit, or a client misconfiguration on
    /// the endpoint side.
    #[error("token endpoint unavailable: {0}")]
    Unavailable(String),

    #[error("no OAuth client configured for provider '{0}'")]
    NotConfigured(String),

    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

impl From<OAuthError> for RefreshError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::Revoked(msg) => RefreshError::Revoked(msg),
            OAuthError::NotConfigured(_) => RefreshError::NotRefreshable(err.to_string()),
            OAuthError::Unavailable(_) | OAuthError::InvalidResponse(_) => {
                RefreshError::Unavailable(err.to_string())
            }
        }
    }
}

/// Fresh token material returned by the token endpoint.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    /// Present when the endpoint rotates refresh tokens.
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// One registered OAuth2 client.
struct OAuthClient {
    client_id: String,
    client_secret: SecretString,
    token_url: String,
}

/// Refreshes OAuth2 access tokens for every configured provider.
pub struct OAuthRefresher {
    http: reqwest::Client,
    clients: HashMap<String, OAuthClient>,
}

impl OAuthRefresher {
    pub fn new(settings: &BTreeMap<String, OAuthClientSettings>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let clients = settings
            .iter()
            .map(|(provider, s)| {
                (
                    provider.clone(),
                    OAuthClient {
                        client_id: s.client_id.clone(),
                        client_secret: SecretString::from(s.client_secret.clone()),
                        token_url: s.token_url.clone(),
                    },
                )
            })
            .collect();

        Self { http, clients }
    }

    pub fn is_configured(&self, provider: &str) -> bool {
        self.clients.contains_key(provider)
    }

    /// Exchange `refresh_token` for a new access token.
    pub async fn refresh(&self, provider: &str, refresh_token: &str) -> Result<TokenGrant, OAuthError> {
        let client = self
            .clients
            .get(provider)
            .ok_or_else(|| OAuthError::NotConfigured(provider.to_string()))?;

        let response = self
            .http
            .post(&client.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| OAuthError::Unavailable(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(classify_failure(status, &body));
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| OAuthError::InvalidResponse(e.to_string()))?;
        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        })
    }
}

/// Map a non-2xx token endpoint response onto the refresh taxonomy.
fn classify_failure(status: u16, body: &str) -> OAuthError {
    let parsed: TokenErrorResponse = serde_json::from_str(body).unwrap_or_default();
    let detail = match (&parsed.error_description, parsed.error.is_empty()) {
        (Some(desc), false) => format!("{}: {desc}", parsed.error),
        (_, false) => parsed.error.clone(),
        _ => format!("HTTP {status}"),
    };

    match status {
        401 => OAuthError::Revoked(detail),
        400 if parsed.error == "invalid_grant" => OAuthError::Revoked(detail),
        _ => OAuthError::Unavailable(detail),
    }
}
