//! Credential resolver.
//!
//! Turns a workflow's `(user, provider)` pair into a usable credential,
//! refreshing OAuth2 tokens that are about to expire. Refresh is serialized
//! per credential: concurrent resolutions of the same stale credential wait
//! on one lock, and whoever runs second re-reads the store and finds the
//! token already fresh. A token that cannot be refreshed stays usable until
//! it actually expires.

use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use relay_types::credential::Credential;
use relay_types::error::{CredentialError, RefreshError};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::repository::CredentialStore;

/// Resolves credentials for workflow actions.
pub struct CredentialResolver<C: CredentialStore> {
    store: Arc<C>,
    refresh_skew: Duration,
    /// One refresh lock per credential id.
    refresh_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl<C: CredentialStore> CredentialResolver<C> {
    pub fn new(store: Arc<C>, refresh_skew: Duration) -> Self {
        Self {
            store,
            refresh_skew,
            refresh_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<C> {
        &self.store
    }

    /// Fetch a valid, non-expiring credential for `provider` owned by `user_id`.
    pub async fn resolve(&self, user_id: &Uuid, provider: &str) -> Result<Credential, CredentialError> {
        let credential = self.load_usable(user_id, provider).await?;
        if !credential.needs_refresh(Utc::now(), self.refresh_skew) {
            return Ok(credential);
        }
        self.refresh_serialized(credential).await
    }

    async fn load_usable(&self, user_id: &Uuid, provider: &str) -> Result<Credential, CredentialError> {
        let credential = self
            .store
            .get_credential(user_id, provider)
            .await?
            .ok_or_else(|| CredentialError::NotFound {
                user_id: *user_id,
                provider: provider.to_string(),
            })?;

        if !credential.is_valid {
            return Err(CredentialError::Invalid(credential.id));
        }
        Ok(credential)
    }

    async fn refresh_serialized(&self, stale: Credential) -> Result<Credential, CredentialError> {
        let lock = self
            .refresh_locks
            .entry(stale.id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock().await;
            self.refresh_locked(&stale).await
        };

        // Only the map and this clone remain: nobody else is waiting.
        self.refresh_locks
            .remove_if(&stale.id, |_, entry| Arc::strong_count(entry) == 2);
        result
    }

    async fn refresh_locked(&self, stale: &Credential) -> Result<Credential, CredentialError> {
        // Another resolution may have refreshed (or invalidated) it while we waited.
        let current = self
            .load_usable(&stale.user_id, &stale.service_provider)
            .await?;
        if !current.needs_refresh(Utc::now(), self.refresh_skew) {
            tracing::debug!(credential_id = %current.id, "credential already refreshed");
            return Ok(current);
        }

        tracing::debug!(
            credential_id = %current.id,
            provider = %current.service_provider,
            "refreshing credential"
        );

        match self.store.refresh(&current.id).await {
            Ok(refreshed) => {
                tracing::info!(credential_id = %refreshed.id, "credential refreshed");
                Ok(refreshed)
            }
            Err(RefreshError::Revoked(reason)) => {
                tracing::warn!(
                    credential_id = %current.id,
                    %reason,
                    "refresh grant revoked, invalidating credential"
                );
                if let Err(e) = self.store.mark_invalid(&current.id).await {
                    tracing::error!(credential_id = %current.id, error = %e, "failed to invalidate credential");
                }
                Err(CredentialError::RefreshFailed(format!("revoked: {reason}")))
            }
            Err(RefreshError::NotRefreshable(reason)) => {
                if current.is_expired(Utc::now()) {
                    tracing::warn!(credential_id = %current.id, %reason, "access token expired and cannot be refreshed");
                    return Err(CredentialError::RefreshFailed(format!(
                        "access token expired and cannot be refreshed: {reason}"
                    )));
                }
                tracing::debug!(
                    credential_id = %current.id,
                    %reason,
                    "credential cannot be refreshed, using it until expiry"
                );
                Ok(current)
            }
            Err(e) => {
                tracing::warn!(credential_id = %current.id, error = %e, "credential refresh failed");
                Err(CredentialError::RefreshFailed(e.to_string()))
            }
        }
    }
}
