//! Credential store trait definition.

use relay_types::credential::Credential;
use relay_types::error::{RefreshError, RepositoryError};
use uuid::Uuid;

/// Store trait for credential persistence and refresh.
///
/// `refresh` is the only operation that mutates token material on the
/// dispatch path; callers serialize it per credential.
pub trait CredentialStore: Send + Sync {
    /// The credential for `provider` owned by `user_id`, if any.
    fn get_credential(
        &self,
        user_id: &Uuid,
        provider: &str,
    ) -> impl std::future::Future<Output = Result<Option<Credential>, RepositoryError>> + Send;

    /// Clear the validity flag (revocation or dead refresh grant).
    fn mark_invalid(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Exchange the stored refresh token for fresh token material, persist
    /// it, and return the updated credential.
    fn refresh(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Credential, RefreshError>> + Send;

    /// Insert or replace the credential for `(user_id, service_provider)`.
    fn save(
        &self,
        credential: &Credential,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn list(
        &self,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Credential>, RepositoryError>> + Send;
}
