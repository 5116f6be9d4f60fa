//! Action invocation.
//!
//! Providers implement [`ActionProvider`] with native async fns. Because that
//! trait uses RPITIT it cannot be a trait object, so dynamic dispatch goes
//! through a blanket impl:
//! 1. An object-safe [`ActionProviderDyn`] with boxed futures
//! 2. A blanket impl of `ActionProviderDyn` for every `T: ActionProvider`
//! 3. [`BoxActionProvider`] wrapping `Box<dyn ActionProviderDyn>`
//!
//! The [`ActionRegistry`] maps `(provider, action_id)` to a provider and is
//! built once at startup. The [`ActionInvoker`] looks actions up, calls them,
//! and applies the retry policy to retryable failures.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use relay_types::config::DispatchSettings;
use relay_types::credential::CredentialHandle;
use relay_types::dispatch::ActionResult;
use relay_types::error::ActionError;
use relay_types::value::ConfigMap;

// ---------------------------------------------------------------------------
// Provider traits
// ---------------------------------------------------------------------------

/// An external system that can perform actions on a user's behalf.
pub trait ActionProvider: Send + Sync {
    /// Provider name as used in `ActionConfig.provider` (e.g. "gmail").
    fn name(&self) -> &str;

    /// Action ids this provider handles (e.g. `["send-email"]`).
    fn actions(&self) -> &[&'static str];

    /// Perform `action_id` with already-rendered parameters.
    ///
    /// Implementations classify failures; they never retry.
    fn call(
        &self,
        action_id: &str,
        config: &ConfigMap,
        credential: &CredentialHandle,
    ) -> impl Future<Output = Result<ActionResult, ActionError>> + Send;
}

/// Object-safe version of [`ActionProvider`] with boxed futures.
pub trait ActionProviderDyn: Send + Sync {
    fn name(&self) -> &str;

    fn actions(&self) -> &[&'static str];

    fn call_boxed<'a>(
        &'a self,
        action_id: &'a str,
        config: &'a ConfigMap,
        credential: &'a CredentialHandle,
    ) -> Pin<Box<dyn Future<Output = Result<ActionResult, ActionError>> + Send + 'a>>;
}

impl<T: ActionProvider> ActionProviderDyn for T {
    fn name(&self) -> &str {
        ActionProvider::name(self)
    }

    fn actions(&self) -> &[&'static str] {
        ActionProvider::actions(self)
    }

    fn call_boxed<'a>(
        &'a self,
        action_id: &'a str,
        config: &'a ConfigMap,
        credential: &'a CredentialHandle,
    ) -> Pin<Box<dyn Future<Output = Result<ActionResult, ActionError>> + Send + 'a>> {
        Box::pin(self.call(action_id, config, credential))
    }
}

/// Type-erased action provider for the registry.
pub struct BoxActionProvider {
    inner: Box<dyn ActionProviderDyn>,
}

impl BoxActionProvider {
    pub fn new<T: ActionProvider + 'static>(provider: T) -> Self {
        Self {
            inner: Box::new(provider),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn actions(&self) -> &[&'static str] {
        self.inner.actions()
    }

    pub async fn call(
        &self,
        action_id: &str,
        config: &ConfigMap,
        credential: &CredentialHandle,
    ) -> Result<ActionResult, ActionError> {
        self.inner.call_boxed(action_id, config, credential).await
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// `(provider, action_id)` -> provider lookup table.
#[derive(Default)]
pub struct ActionRegistry {
    providers: HashMap<(String, String), Arc<BoxActionProvider>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every action a provider declares. Later registrations for
    /// the same `(provider, action_id)` replace earlier ones.
    pub fn register(&mut self, provider: BoxActionProvider) {
        let provider = Arc::new(provider);
        for action in provider.actions() {
            self.providers.insert(
                (provider.name().to_string(), (*action).to_string()),
                provider.clone(),
            );
        }
    }

    pub fn with(mut self, provider: BoxActionProvider) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, provider: &str, action_id: &str) -> Option<&Arc<BoxActionProvider>> {
        self.providers
            .get(&(provider.to_string(), action_id.to_string()))
    }

    /// All registered `(provider, action_id)` pairs, sorted.
    pub fn list(&self) -> Vec<(String, String)> {
        let mut keys: Vec<_> = self.providers.keys().cloned().collect();
        keys.sort();
        keys
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Retry policy for retryable action failures (`ProviderUnavailable`).
///
/// Stateless: `attempt` is 1-based and supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (1 = never retry).
    pub max_attempts: u32,
    /// Linear backoff step: attempt N waits `backoff * N` before attempt N+1.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub fn should_retry(&self, attempt: u32, error: &ActionError) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl From<&DispatchSettings> for RetryPolicy {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            max_attempts: settings.retry_max_attempts.max(1),
            backoff: Duration::from_millis(settings.retry_backoff_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Invoker
// ---------------------------------------------------------------------------

/// Executes rendered actions against registered providers.
pub struct ActionInvoker {
    registry: ActionRegistry,
    retry: RetryPolicy,
}

impl ActionInvoker {
    pub fn new(registry: ActionRegistry) -> Self {
        Self {
            registry,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Invoke `provider/action_id` once, classifying any failure.
    pub async fn invoke(
        &self,
        provider: &str,
        action_id: &str,
        config: &ConfigMap,
        credential: &CredentialHandle,
    ) -> Result<ActionResult, ActionError> {
        let Some(target) = self.registry.get(provider, action_id) else {
            return Err(ActionError::InvalidConfig(format!(
                "unknown action '{provider}/{action_id}'"
            )));
        };
        target.call(action_id, config, credential).await
    }

    /// Invoke with the configured retry policy applied.
    pub async fn invoke_with_retry(
        &self,
        provider: &str,
        action_id: &str,
        config: &ConfigMap,
        credential: &CredentialHandle,
    ) -> Result<ActionResult, ActionError> {
        let mut attempt = 1;
        loop {
            match self.invoke(provider, action_id, config, credential).await {
                Ok(result) => return Ok(result),
                Err(e) if self.retry.should_retry(attempt, &e) => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::debug!(
                        provider,
                        action_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying action"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedProvider, secret_handle};
    use relay_types::value::config_map_from_json;
    use serde_json::json;

    #[test]
    fn test_registry_lookup() {
        let registry = ActionRegistry::new()
            .with(BoxActionProvider::new(ScriptedProvider::ok("gmail", &["send-email"])));
        assert!(registry.get("gmail", "send-email").is_some());
        assert!(registry.get("gmail", "delete-email").is_none());
        assert_eq!(
            registry.list(),
            vec![("gmail".to_string(), "send-email".to_string())]
        );
    }

    #[test]
    fn test_retry_policy_from_settings() {
        let settings = DispatchSettings {
            retry_max_attempts: 0,
            retry_backoff_ms: 100,
            ..DispatchSettings::default()
        };
        let policy = RetryPolicy::from(&settings);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_invoke_passes_rendered_config() {
        let provider = ScriptedProvider::ok("gmail", &["send-email"]);
        let calls = provider.calls();
        let invoker = ActionInvoker::new(ActionRegistry::new().with(BoxActionProvider::new(provider)));

        let config = config_map_from_json(json!({"to": "a@b.com"}));
        let result = invoker
            .invoke("gmail", "send-email", &config, &secret_handle("gmail"))
            .await
            .unwrap();
        assert_eq!(result.output["echo"]["to"], "a@b.com");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_action_is_invalid_config() {
        let invoker = ActionInvoker::new(ActionRegistry::new());
        let err = invoker
            .invoke("gmail", "send-email", &ConfigMap::new(), &secret_handle("gmail"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_retry_only_unavailable() {
        let provider = ScriptedProvider::failing(
            "discord",
            &["send-message"],
            ActionError::ProviderUnavailable("503".into()),
        );
        let calls = provider.calls();
        let invoker = ActionInvoker::new(ActionRegistry::new().with(BoxActionProvider::new(provider)))
            .with_retry(RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
            });
        let err = invoker
            .invoke_with_retry("discord", "send-message", &ConfigMap::new(), &secret_handle("discord"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::ProviderUnavailable(_)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);

        let provider = ScriptedProvider::failing(
            "discord",
            &["send-message"],
            ActionError::AuthRejected("401".into()),
        );
        let calls = provider.calls();
        let invoker = ActionInvoker::new(ActionRegistry::new().with(BoxActionProvider::new(provider)))
            .with_retry(RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
            });
        let _ = invoker
            .invoke_with_retry("discord", "send-message", &ConfigMap::new(), &secret_handle("discord"))
            .await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_policy_never_retries() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(1, &ActionError::ProviderUnavailable("x".into())));
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(3), Duration::from_millis(300));
    }
}
