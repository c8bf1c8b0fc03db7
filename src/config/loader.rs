//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{InstanceRole, SyncConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable enabling debug/inspection mode.
pub const ENV_DEBUG: &str = "PROXY_SYNC_DEBUG";
/// Environment variable selecting the instance role.
pub const ENV_ROLE: &str = "PROXY_SYNC_ROLE";
/// Environment variable overriding the poll interval.
pub const ENV_POLL_INTERVAL: &str = "PROXY_SYNC_POLL_INTERVAL_SECS";
/// Environment variable overriding the engine memory limit.
pub const ENV_MEMORY_LIMIT: &str = "PROXY_SYNC_MEMORY_LIMIT";
/// Environment variable carrying the store ACL token.
pub const ENV_STORE_TOKEN: &str = "PROXY_SYNC_STORE_TOKEN";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid environment override {name}: {reason}")]
    Env { name: &'static str, reason: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from a TOML file, apply environment overrides and validate.
pub fn load_config(path: &Path) -> Result<SyncConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: SyncConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Defaults plus environment overrides, for hosts without a config file.
pub fn load_from_env() -> Result<SyncConfig, ConfigError> {
    let mut config = SyncConfig::default();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply environment overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut SyncConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_DEBUG) {
        config.controller.retain_artifacts = parse_flag(&value).ok_or_else(|| ConfigError::Env {
            name: ENV_DEBUG,
            reason: format!("expected a boolean, got '{}'", value),
        })?;
    }

    if let Some(value) = lookup(ENV_ROLE) {
        config.controller.role = value
            .parse::<InstanceRole>()
            .map_err(|reason| ConfigError::Env { name: ENV_ROLE, reason })?;
    }

    if let Some(value) = lookup(ENV_POLL_INTERVAL) {
        config.controller.poll_interval_secs =
            value.trim().parse().map_err(|e| ConfigError::Env {
                name: ENV_POLL_INTERVAL,
                reason: format!("{}", e),
            })?;
    }

    if let Some(value) = lookup(ENV_MEMORY_LIMIT) {
        config.engine.memory_limit = value.trim().to_string();
    }

    if let Some(value) = lookup(ENV_STORE_TOKEN) {
        config.store.token = Some(value);
    }

    Ok(())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
