//! Global configuration loader for Relay.
//!
//! Reads `config.toml` from the data directory (`~/.relay/` in production)
//! and deserializes it into [`GlobalConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use relay_types::config::GlobalConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "RELAY_DATA_DIR";

/// Resolve the data directory.
///
/// Priority:
/// 1. `RELAY_DATA_DIR` environment variable
/// 2. `~/.relay`
/// 3. `.relay` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".relay");
    }

    PathBuf::from(".relay")
}

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`GlobalConfig::default()`].
/// - Unreadable or unparsable file: a warning is logged and the default is used.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => sanitize(config),
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GlobalConfig::default()
        }
    }
}

/// Clamp values that would stall dispatch.
fn sanitize(mut config: GlobalConfig) -> GlobalConfig {
    if config.dispatch.max_concurrency == 0 {
        tracing::warn!("dispatch.max_concurrency = 0 is not allowed, using 1");
        config.dispatch.max_concurrency = 1;
    }
    if config.dispatch.retry_max_attempts == 0 {
        config.dispatch.retry_max_attempts = 1;
    }
    if config.dispatch.workflow_timeout_secs == 0 {
        tracing::warn!("dispatch.workflow_timeout_secs = 0 is not allowed, using 1");
        config.dispatch.workflow_timeout_secs = 1;
    }
    if config.credentials.refresh_skew_secs < 0 {
        config.credentials.refresh_skew_secs = 0;
    }
    config
}
