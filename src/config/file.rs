//! TOML configuration file loading
//!
//! The file is a partial overlay on top of defaults: every scalar is optional.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::registry::CapabilityDefinition;
use crate::{Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "BEACON_RUNTIME_CONFIG";

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfigFile {
    #[serde(default)]
    pub ports: PortsFileConfig,

    #[serde(default)]
    pub health: HealthFileConfig,

    #[serde(default)]
    pub rpc: RpcFileConfig,

    #[serde(default)]
    pub api: ApiFileConfig,

    /// Statically registered providers
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Remote plugins reachable at a fixed address
    #[serde(default)]
    pub plugins: Vec<RemotePluginConfig>,
}

/// Port range managed by the allocator
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortsFileConfig {
    pub start: Option<u16>,
    pub end: Option<u16>,
    /// Interface self-hosted servers bind to (e.g. "127.0.0.1")
    pub host: Option<String>,
    /// How long released records are kept before purging
    pub retention_secs: Option<u64>,
}

/// Health driver policy
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthFileConfig {
    pub interval_secs: Option<u64>,
    pub failure_threshold: Option<u32>,
    pub auto_recover: Option<bool>,
}

/// Plugin RPC timeouts and start retries
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcFileConfig {
    pub dial_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub start_attempts: Option<u32>,
    pub start_backoff_ms: Option<u64>,
}

/// Operator API server
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiFileConfig {
    pub enabled: Option<bool>,
    pub port: Option<u16>,
}

/// One `[[providers]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    /// Serve the provider from a runtime-owned RPC server
    #[serde(default)]
    pub self_hosted: bool,
    #[serde(default)]
    pub capabilities: Vec<CapabilityDefinition>,
    /// Raw config table, decoded against the capabilities' config schemas
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// One `[[plugins]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemotePluginConfig {
    pub id: String,
    /// `host:port` of the plugin's RPC server
    pub address: String,
}

/// Parse a config file from TOML text
///
/// # Errors
///
/// Returns error if the text is not valid TOML or has unknown keys
pub fn parse_config_file(content: &str) -> Result<RuntimeConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load a config file
///
/// An explicitly named file must exist. The default path is optional and
/// yields defaults when absent.
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_config_file(explicit: Option<&Path>) -> Result<RuntimeConfigFile> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => (PathBuf::from(path), true),
            _ => match config_file_path() {
                Some(path) => (path, false),
                None => return Ok(RuntimeConfigFile::default()),
            },
        },
    };

    if !path.exists() {
        if required {
            return Err(Error::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(RuntimeConfigFile::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config = parse_config_file(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the default config file path: `<config dir>/beacon/runtime.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("beacon").join("runtime.toml"))
}
