//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the sync
//! controller. All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Root configuration for the sync controller.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SyncConfig {
    /// Reconciliation policy (role, cadence, debug mode).
    pub controller: ControllerConfig,

    /// Distributed store holding the configuration hash and archive.
    pub store: StoreConfig,

    /// Notification bus settings.
    pub bus: BusConfig,

    /// Managed proxy engine binaries and addresses.
    pub engine: EngineConfig,

    /// Active/staging directory layout.
    pub staging: StagingConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Which proxy flavour this controller instance manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceRole {
    #[default]
    Public,
    Private,
}

impl fmt::Display for InstanceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceRole::Public => write!(f, "public"),
            InstanceRole::Private => write!(f, "private"),
        }
    }
}

impl FromStr for InstanceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(InstanceRole::Public),
            "private" => Ok(InstanceRole::Private),
            other => Err(format!("unknown instance role '{}'", other)),
        }
    }
}

/// Reconciliation policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Public or private proxy instance.
    pub role: InstanceRole,

    /// Periodic reconciliation interval in seconds.
    pub poll_interval_secs: u64,

    /// How often an unresolved error is re-reported, in seconds.
    pub error_report_interval_secs: u64,

    /// Leave staging/active directories on disk at shutdown for inspection.
    pub retain_artifacts: bool,

    /// Redeploy when the engine disappears after a successful deploy.
    pub restart_on_crash: bool,
}

impl ControllerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_report_interval(&self) -> Duration {
        Duration::from_secs(self.error_report_interval_secs)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            role: InstanceRole::Public,
            poll_interval_secs: 300,
            error_report_interval_secs: 60,
            retain_artifacts: false,
            restart_on_crash: true,
        }
    }
}

/// Distributed key-value store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the KV HTTP API (e.g., "http://127.0.0.1:8500").
    pub address: Url,

    /// Optional ACL token sent with every request.
    pub token: Option<String>,

    /// Key holding the configuration hash.
    pub hash_key: String,

    /// Key holding the configuration archive.
    pub blob_key: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: default_store_address(),
            token: None,
            hash_key: "config/hash".to_string(),
            blob_key: "config/blob".to_string(),
            timeout_secs: 10,
        }
    }
}

fn default_store_address() -> Url {
    Url::parse("http://127.0.0.1:8500").expect("static URL is valid")
}

/// Notification bus settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    /// Broadcast endpoint (WebSocket).
    pub url: Url,

    /// Channel carrying proxy update announcements.
    pub channel: String,

    /// Optional bootstrap file that overrides `url`/`channel` and is watched
    /// for changes.
    pub bootstrap_path: Option<PathBuf>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: default_bus_url(),
            channel: "proxy-notify".to_string(),
            bootstrap_path: None,
        }
    }
}

fn default_bus_url() -> Url {
    Url::parse("ws://127.0.0.1:5680/").expect("static URL is valid")
}

/// Managed proxy engine settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine daemon binary, also used for check mode.
    pub daemon: String,

    /// Binary speaking to the engine's admin interface.
    pub admin_binary: String,

    /// Process name used to find running instances.
    pub process_name: String,

    /// Loopback admin interface (e.g., "127.0.0.1:2000").
    pub admin_address: String,

    /// Public listen address for the engine.
    pub listen_address: String,

    /// Cache storage size handed to the engine (e.g., "100M").
    pub memory_limit: String,

    /// Engine working directory.
    pub work_dir: PathBuf,

    /// Prefix for loaded program names.
    pub program_prefix: String,

    /// Deadline for every engine command, in seconds.
    pub command_timeout_secs: u64,
}

impl EngineConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            daemon: "varnishd".to_string(),
            admin_binary: "varnishadm".to_string(),
            process_name: "varnishd".to_string(),
            admin_address: "127.0.0.1:2000".to_string(),
            listen_address: "0.0.0.0:80".to_string(),
            memory_limit: "100M".to_string(),
            work_dir: PathBuf::from("/var/lib/varnish"),
            program_prefix: "main".to_string(),
            command_timeout_secs: 60,
        }
    }
}

/// Filesystem layout for configuration artifacts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Directory holding the applied configuration.
    pub active_dir: PathBuf,

    /// Scratch directory for fetched archives.
    pub staging_dir: PathBuf,

    /// Top-level configuration program inside the archive.
    pub program_file: String,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            active_dir: PathBuf::from("/etc/proxy-cache/active"),
            staging_dir: PathBuf::from("/etc/proxy-cache/staging"),
            program_file: "varnish.vcl".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
