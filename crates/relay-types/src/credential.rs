//! Credential types.
//!
//! A `Credential` is stored authorization material (an OAuth2 token or a
//! manually entered secret) scoped to one user and one service provider.
//! Token material is wrapped in [`Redacted`] so it never reaches logs, and
//! actions only ever see a [`CredentialHandle`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a credential was obtained and whether it can be refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialType {
    /// OAuth2 access token, refreshable when a refresh token is present.
    #[serde(rename = "oauth2")]
    OAuth2,
    /// Static secret (API key, bot token, signing key).
    Secret,
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialType::OAuth2 => write!(f, "oauth2"),
            CredentialType::Secret => write!(f, "secret"),
        }
    }
}

impl FromStr for CredentialType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oauth2" => Ok(CredentialType::OAuth2),
            "secret" => Ok(CredentialType::Secret),
            other => Err(format!("invalid credential type: '{other}'")),
        }
    }
}

/// A string that redacts itself in Debug and Display output.
///
/// The wrapped value is reachable only through `.expose()`.
#[derive(Clone, PartialEq, Eq)]
pub struct Redacted(String);

impl Redacted {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Masked form for listings: only the last 4 characters survive.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 4 {
            return "****".to_string();
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("****{tail}")
    }
}

impl fmt::Debug for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Redacted(\"***\")")
    }
}

impl fmt::Display for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Stored authorization material for one user and provider.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: Uuid,
    pub user_id: Uuid,
    pub service_provider: String,
    pub credential_type: CredentialType,
    /// Access token or secret value.
    pub token: Redacted,
    /// OAuth2 refresh token, when the provider issued one.
    pub refresh_token: Option<Redacted>,
    /// Access token expiry; `None` means it does not expire.
    pub expires_at: Option<DateTime<Utc>>,
    /// Cleared on revoke or on a revocation-type refresh failure.
    pub is_valid: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// A fresh, valid static secret.
    pub fn secret(user_id: Uuid, provider: impl Into<String>, value: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            service_provider: provider.into(),
            credential_type: CredentialType::Secret,
            token: Redacted::new(value),
            refresh_token: None,
            expires_at: None,
            is_valid: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// A fresh, valid OAuth2 token pair.
    pub fn oauth2(
        user_id: Uuid,
        provider: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            service_provider: provider.into(),
            credential_type: CredentialType::OAuth2,
            token: Redacted::new(access_token),
            refresh_token: refresh_token.map(Redacted::new),
            expires_at,
            is_valid: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether an OAuth2 access token expires within `skew` of `now`.
    ///
    /// Secrets and tokens without an expiry never need a refresh.
    pub fn needs_refresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        match (self.credential_type, self.expires_at) {
            (CredentialType::OAuth2, Some(expires_at)) => expires_at <= now + skew,
            _ => false,
        }
    }

    /// Whether the access token's expiry has already passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// The opaque handle passed to action providers.
    pub fn handle(&self) -> CredentialHandle {
        CredentialHandle {
            credential_id: self.id,
            provider: self.service_provider.clone(),
            credential_type: self.credential_type,
            token: self.token.clone(),
        }
    }
}

/// What an action provider receives: enough to authorize one call, nothing
/// about refresh tokens or validity bookkeeping.
#[derive(Debug, Clone)]
pub struct CredentialHandle {
    pub credential_id: Uuid,
    pub provider: String,
    pub credential_type: CredentialType,
    token: Redacted,
}

impl CredentialHandle {
    pub fn token(&self) -> &str {
        self.token.expose()
    }
}
