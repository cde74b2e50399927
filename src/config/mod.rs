//! Configuration management for the plugin runtime
//!
//! Precedence is env > toml > default.

pub mod file;

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

pub use file::{ProviderConfig, RemotePluginConfig, RuntimeConfigFile};

use crate::{Error, Result};

const DEFAULT_PORT_START: u16 = 50100;
const DEFAULT_PORT_END: u16 = 50199;
const DEFAULT_API_PORT: u16 = 18791;

/// Resolved runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub ports: PortsConfig,
    pub health: HealthConfig,
    pub rpc: RpcConfig,
    pub api: ApiConfig,
    pub providers: Vec<ProviderConfig>,
    pub plugins: Vec<RemotePluginConfig>,
}

/// Port range managed by the allocator
#[derive(Debug, Clone)]
pub struct PortsConfig {
    pub start: u16,
    pub end: u16,
    pub host: IpAddr,
    pub retention: Duration,
}

/// Health driver policy
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub interval: Duration,
    /// Consecutive failed sweeps before a plugin counts as down
    pub failure_threshold: u32,
    /// Reallocate automatically once the threshold is reached
    pub auto_recover: bool,
}

/// Plugin RPC settings
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub dial_timeout: Duration,
    pub request_timeout: Duration,
    /// Port allocation attempts when starting a self-hosted server
    pub start_attempts: u32,
    pub start_backoff: Duration,
}

/// Operator API server
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self::resolve(RuntimeConfigFile::default(), IpAddr::from([127, 0, 0, 1]))
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, an override is
    /// malformed, or the result fails validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        let mut config = Self::from_file(fc)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve a parsed file against defaults
    ///
    /// # Errors
    ///
    /// Returns error if the bind host is not an IP address
    pub fn from_file(fc: RuntimeConfigFile) -> Result<Self> {
        let host = match fc.ports.host.as_deref() {
            Some(host) => parse_host(host)?,
            None => IpAddr::from([127, 0, 0, 1]),
        };
        Ok(Self::resolve(fc, host))
    }

    fn resolve(fc: RuntimeConfigFile, host: IpAddr) -> Self {
        Self {
            ports: PortsConfig {
                start: fc.ports.start.unwrap_or(DEFAULT_PORT_START),
                end: fc.ports.end.unwrap_or(DEFAULT_PORT_END),
                host,
                retention: Duration::from_secs(fc.ports.retention_secs.unwrap_or(3600)),
            },
            health: HealthConfig {
                interval: Duration::from_secs(fc.health.interval_secs.unwrap_or(30)),
                failure_threshold: fc.health.failure_threshold.unwrap_or(3),
                auto_recover: fc.health.auto_recover.unwrap_or(false),
            },
            rpc: RpcConfig {
                dial_timeout: Duration::from_millis(fc.rpc.dial_timeout_ms.unwrap_or(5000)),
                request_timeout: Duration::from_millis(fc.rpc.request_timeout_ms.unwrap_or(5000)),
                start_attempts: fc.rpc.start_attempts.unwrap_or(3),
                start_backoff: Duration::from_millis(fc.rpc.start_backoff_ms.unwrap_or(100)),
            },
            api: ApiConfig {
                enabled: fc.api.enabled.unwrap_or(true),
                port: fc.api.port.unwrap_or(DEFAULT_API_PORT),
            },
            providers: fc.providers,
            plugins: fc.plugins,
        }
    }

    /// Apply `BEACON_RUNTIME_*` overrides from a variable lookup
    ///
    /// # Errors
    ///
    /// Returns error naming the variable if a value fails to parse
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env_parse(&lookup, "BEACON_RUNTIME_PORT_START")? {
            self.ports.start = v;
        }
        if let Some(v) = env_parse(&lookup, "BEACON_RUNTIME_PORT_END")? {
            self.ports.end = v;
        }
        if let Some(v) = lookup("BEACON_RUNTIME_BIND_HOST") {
            self.ports.host = parse_host(&v)?;
        }
        if let Some(v) = env_parse(&lookup, "BEACON_RUNTIME_HEALTH_INTERVAL_SECS")? {
            self.health.interval = Duration::from_secs(v);
        }
        if let Some(v) = env_parse(&lookup, "BEACON_RUNTIME_DIAL_TIMEOUT_MS")? {
            self.rpc.dial_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse(&lookup, "BEACON_RUNTIME_REQUEST_TIMEOUT_MS")? {
            self.rpc.request_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse(&lookup, "BEACON_RUNTIME_FAILURE_THRESHOLD")? {
            self.health.failure_threshold = v;
        }
        if let Some(v) = lookup("BEACON_RUNTIME_AUTO_RECOVER") {
            self.health.auto_recover = parse_bool("BEACON_RUNTIME_AUTO_RECOVER", &v)?;
        }
        if let Some(v) = env_parse(&lookup, "BEACON_RUNTIME_API_PORT")? {
            self.api.port = v;
        }
        Ok(())
    }

    /// Check ranges, intervals and identity uniqueness
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.ports.start == 0 || self.ports.start > self.ports.end {
            return Err(Error::Config(format!(
                "invalid port range {}-{}",
                self.ports.start, self.ports.end
            )));
        }
        if self.health.interval.is_zero() {
            return Err(Error::Config("health interval must be non-zero".to_string()));
        }
        if self.health.failure_threshold == 0 {
            return Err(Error::Config(
                "failure threshold must be at least 1".to_string(),
            ));
        }
        if self.rpc.dial_timeout.is_zero() || self.rpc.request_timeout.is_zero() {
            return Err(Error::Config("rpc timeouts must be non-zero".to_string()));
        }
        if self.rpc.start_attempts == 0 {
            return Err(Error::Config("start attempts must be at least 1".to_string()));
        }

        let mut providers = HashSet::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                return Err(Error::Config("provider with empty id".to_string()));
            }
            if !providers.insert(provider.id.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate provider id '{}'",
                    provider.id
                )));
            }
        }

        // a remote plugin may give the address of a catalog-only provider
        let mut plugins = HashSet::new();
        for plugin in &self.plugins {
            if plugin.id.trim().is_empty() {
                return Err(Error::Config("remote plugin with empty id".to_string()));
            }
            if !plugins.insert(plugin.id.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate plugin id '{}'",
                    plugin.id
                )));
            }
            if self
                .providers
                .iter()
                .any(|p| p.id == plugin.id && p.self_hosted)
            {
                return Err(Error::Config(format!(
                    "plugin id '{}' is already a self-hosted provider",
                    plugin.id
                )));
            }
        }

        for plugin in &self.plugins {
            if plugin.address.trim().is_empty() {
                return Err(Error::Config(format!(
                    "remote plugin '{}' has no address",
                    plugin.id
                )));
            }
        }

        Ok(())
    }
}

fn parse_host(host: &str) -> Result<IpAddr> {
    host.parse()
        .map_err(|_| Error::Config(format!("invalid bind host '{host}'")))
}

fn env_parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| Error::Config(format!("{key}: invalid value '{v}'")))
        })
        .transpose()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{key}: invalid value '{value}'"))),
    }
}
