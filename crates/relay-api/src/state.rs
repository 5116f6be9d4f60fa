//! Application state wiring all services together.
//!
//! AppState holds the concrete store, engine, and scheduler instances used by
//! both the CLI and the REST API. The core types are generic over store
//! traits; AppState pins them to the SQLite implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use relay_core::credential::CredentialResolver;
use relay_core::dispatch::{DispatchEngine, DispatchLimits};
use relay_core::invoker::{ActionInvoker, ActionRegistry, RetryPolicy};
use relay_core::scheduler::Scheduler;
use relay_infra::config::{load_global_config, resolve_data_dir};
use relay_infra::crypto::vault::VaultCrypto;
use relay_infra::oauth::OAuthRefresher;
use relay_infra::provider::default_registry;
use relay_infra::sqlite::credential::SqliteCredentialStore;
use relay_infra::sqlite::pool::DatabasePool;
use relay_infra::sqlite::workflow::SqliteWorkflowStore;
use relay_types::config::GlobalConfig;
use secrecy::SecretString;

/// Concrete type aliases for the core generics pinned to infra implementations.
pub type ConcreteEngine = DispatchEngine<SqliteWorkflowStore, SqliteCredentialStore>;
pub type ConcreteScheduler = Scheduler<SqliteWorkflowStore, SqliteCredentialStore>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GlobalConfig>,
    pub data_dir: PathBuf,
    pub workflows: Arc<SqliteWorkflowStore>,
    pub credentials: Arc<SqliteCredentialStore>,
    pub engine: Arc<ConcreteEngine>,
    pub scheduler: Arc<ConcreteScheduler>,
    /// Inbound webhook signing key, when `[webhook].signing_secret` is set.
    pub webhook_secret: Option<Arc<SecretString>>,
    /// Registered `(provider, action_id)` pairs.
    pub actions: Arc<Vec<(String, String)>>,
}

impl AppState {
    /// Initialize from the resolved data directory and its `config.toml`.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;
        let config = load_global_config(&data_dir).await;
        Self::build(&data_dir, config, default_registry()).await
    }

    /// Wire every component against `data_dir` with an explicit config and
    /// provider registry.
    pub async fn build(
        data_dir: &Path,
        config: GlobalConfig,
        registry: ActionRegistry,
    ) -> anyhow::Result<Self> {
        let db_pool = DatabasePool::open_in(data_dir).await?;
        let vault = Arc::new(VaultCrypto::load_or_create(data_dir)?);
        let refresher = Arc::new(OAuthRefresher::new(&config.oauth));

        let workflows = Arc::new(SqliteWorkflowStore::new(db_pool.clone()));
        let credentials = Arc::new(SqliteCredentialStore::new(db_pool, vault, refresher));

        let resolver = Arc::new(CredentialResolver::new(
            Arc::clone(&credentials),
            chrono::Duration::seconds(config.credentials.refresh_skew_secs),
        ));
        let actions = Arc::new(registry.list());
        let invoker =
            Arc::new(ActionInvoker::new(registry).with_retry(RetryPolicy::from(&config.dispatch)));
        let engine = Arc::new(DispatchEngine::new(
            Arc::clone(&workflows),
            resolver,
            invoker,
            DispatchLimits::from(&config.dispatch),
        ));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&workflows), Arc::clone(&engine)));

        let webhook_secret = config
            .webhook
            .signing_secret
            .as_ref()
            .map(|s| Arc::new(SecretString::from(s.clone())));

        Ok(Self {
            config: Arc::new(config),
            data_dir: data_dir.to_path_buf(),
            workflows,
            credentials,
            engine,
            scheduler,
            webhook_secret,
            actions,
        })
    }
}
