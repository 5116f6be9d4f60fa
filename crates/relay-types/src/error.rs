use thiserror::Error;
use uuid::Uuid;

use crate::dispatch::FailureKind;

/// Errors from repository operations (used by store traits in relay-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// A trigger config that cannot be evaluated against an event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error("filter '{key}' must be a {expected}, got {actual}")]
    FilterType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("missing required trigger parameter '{0}'")]
    MissingParameter(String),

    #[error("invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// Failure to obtain a usable credential for a workflow's action.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no '{provider}' credential for user {user_id}")]
    NotFound { user_id: Uuid, provider: String },

    #[error("credential {0} is no longer valid")]
    Invalid(Uuid),

    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),

    #[error("credential store error: {0}")]
    Store(#[from] RepositoryError),
}

impl CredentialError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CredentialError::NotFound { .. } => FailureKind::CredentialNotFound,
            CredentialError::Invalid(_) => FailureKind::CredentialInvalid,
            CredentialError::RefreshFailed(_) => FailureKind::CredentialRefreshFailed,
            CredentialError::Store(_) => FailureKind::Storage,
        }
    }
}

/// Failure reported by a credential store's refresh capability.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The provider says the grant is gone; the credential must be invalidated.
    #[error("refresh grant revoked: {0}")]
    Revoked(String),

    /// Transient failure; the credential stays valid.
    #[error("token endpoint unavailable: {0}")]
    Unavailable(String),

    #[error("credential cannot be refreshed: {0}")]
    NotRefreshable(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Strict-mode rendering failure. Lenient rendering never produces it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template references missing field '{0}'")]
    MissingField(String),
}

/// Classified failure of one action invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// The provider rejected the credential at call time.
    #[error("provider rejected credential: {0}")]
    AuthRejected(String),

    /// Network failure, 5xx, rate limit, or timeout. Retryable.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Malformed rendered parameters or unknown action. Not retryable.
    #[error("invalid action config: {0}")]
    InvalidConfig(String),
}

impl ActionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::ProviderUnavailable(_))
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ActionError::AuthRejected(_) => FailureKind::AuthRejected,
            ActionError::ProviderUnavailable(_) => FailureKind::ProviderUnavailable,
            ActionError::InvalidConfig(_) => FailureKind::InvalidConfig,
        }
    }
}
