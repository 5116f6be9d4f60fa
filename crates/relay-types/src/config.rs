//! Global configuration types for Relay.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls
//! dispatch concurrency, the scheduler tick, credential refresh, the HTTP
//! server, webhook signing, and OAuth2 client registrations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Relay platform.
///
/// Loaded from `~/.relay/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub dispatch: DispatchSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub credentials: CredentialSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub webhook: WebhookSettings,

    /// OAuth2 client registrations keyed by service provider (e.g. "gmail").
    #[serde(default)]
    pub oauth: BTreeMap<String, OAuthClientSettings>,
}

/// Fan-out limits for a single dispatch call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Maximum workflow executions in flight per dispatch call.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-workflow execution timeout.
    #[serde(default = "default_workflow_timeout_secs")]
    pub workflow_timeout_secs: u64,

    /// Total invocation attempts for retryable action failures (1 = no retry).
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Linear backoff step between attempts.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_max_concurrency() -> usize {
    8
}

fn default_workflow_timeout_secs() -> u64 {
    30
}

fn default_retry_max_attempts() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    250
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            workflow_timeout_secs: default_workflow_timeout_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How often due scheduled workflows are checked. Accepts cron
    /// expressions and human-readable forms such as `every 5 seconds`.
    #[serde(default = "default_tick")]
    pub tick: String,
}

fn default_true() -> bool {
    true
}

fn default_tick() -> String {
    "every 5 seconds".to_string()
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tick: default_tick(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSettings {
    /// OAuth2 tokens expiring within this window are refreshed before use.
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: i64,
}

fn default_refresh_skew_secs() -> i64 {
    60
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            refresh_skew_secs: default_refresh_skew_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// When set, inbound webhooks must carry a valid HMAC-SHA256 signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,
}

/// OAuth2 client used to refresh access tokens for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClientSettings {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
}
