//! Configuration loader.
//!
//! Reads `{data_dir}/config.toml` into [`OrchestratorConfig`], then applies
//! environment overrides. A missing or malformed file yields the defaults.

use std::path::{Path, PathBuf};

use leadflow_types::config::OrchestratorConfig;

pub const DATA_DIR_ENV: &str = "LEADFLOW_DATA_DIR";
pub const ENGINE_URL_ENV: &str = "LEADFLOW_ENGINE_URL";
pub const ENGINE_API_KEY_ENV: &str = "LEADFLOW_ENGINE_API_KEY";
pub const WEBHOOK_SECRET_ENV: &str = "LEADFLOW_WEBHOOK_SECRET";

/// `LEADFLOW_DATA_DIR`, else `~/.leadflow`, else `./.leadflow`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    match dirs::home_dir() {
        Some(home) => home.join(".leadflow"),
        None => PathBuf::from(".leadflow"),
    }
}

/// Load `{data_dir}/config.toml` and apply process environment overrides.
pub async fn load_config(data_dir: &Path) -> OrchestratorConfig {
    let config = read_config_file(data_dir).await;
    apply_env_overrides(config, |key| std::env::var(key).ok())
}

async fn read_config_file(data_dir: &Path) -> OrchestratorConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %config_path.display(), "no config.toml, using defaults");
            return OrchestratorConfig::default();
        }
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to read config, using defaults");
            return OrchestratorConfig::default();
        }
    };

    match toml::from_str::<OrchestratorConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to parse config, using defaults");
            OrchestratorConfig::default()
        }
    }
}

/// Apply `LEADFLOW_*` overrides. Empty values are ignored.
pub fn apply_env_overrides<F>(mut config: OrchestratorConfig, lookup: F) -> OrchestratorConfig
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = get(ENGINE_URL_ENV) {
        config.engine.base_url = url;
    }
    if let Some(key) = get(ENGINE_API_KEY_ENV) {
        config.engine.api_key = Some(key);
    }
    if let Some(secret) = get(WEBHOOK_SECRET_ENV) {
        config.webhook.default_secret = Some(secret);
    }
    config
}
