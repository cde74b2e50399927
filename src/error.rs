//! Error types for the Beacon plugin runtime

use thiserror::Error;

use crate::registry::DecodeError;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// RPC step that failed while talking to a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcStep {
    /// Establishing the transport connection
    Dial,
    /// Fetching plugin metadata
    Metadata,
    /// Calling the health endpoint
    Health,
}

impl std::fmt::Display for RpcStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dial => write!(f, "dial"),
            Self::Metadata => write!(f, "metadata"),
            Self::Health => write!(f, "health"),
        }
    }
}

/// Errors that can occur in the plugin runtime
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Capability schema is malformed
    #[error("schema error: {0}")]
    Schema(String),

    /// Provider configuration did not match its declared schema
    #[error("provider '{provider}' config invalid: {source}")]
    Decode {
        provider: String,
        #[source]
        source: DecodeError,
    },

    /// No bindable port left in the configured range
    #[error("no available port for '{plugin_id}' in range {start}-{end}")]
    PortExhausted {
        plugin_id: String,
        start: u16,
        end: u16,
    },

    /// Requested port lies outside the managed range
    #[error("port {port} outside managed range {start}-{end}")]
    PortOutOfRange { port: u16, start: u16, end: u16 },

    /// Port is claimed by another plugin or cannot be bound
    #[error("port {port} unavailable: {reason}")]
    PortUnavailable { port: u16, reason: String },

    /// Identity already holds a registration or connection
    #[error("already registered: {0}")]
    Duplicate(String),

    /// Unknown plugin or provider identity
    #[error("not found: {0}")]
    NotFound(String),

    /// Plugin could not be reached over RPC
    #[error("plugin '{plugin_id}' unreachable during {step}: {message}")]
    Unreachable {
        plugin_id: String,
        step: RpcStep,
        message: String,
    },

    /// Plugin answered the health call with a non-healthy state
    #[error("plugin '{plugin_id}' unhealthy ({state}): {message}")]
    Unhealthy {
        plugin_id: String,
        state: String,
        message: String,
    },

    /// Self-hosted server failed to bind or start
    #[error("failed to start plugin '{plugin_id}': {reason}")]
    StartFailed { plugin_id: String, reason: String },

    /// Plugin server is already running
    #[error("plugin '{0}' is already running")]
    AlreadyRunning(String),

    /// Plugin server is not running
    #[error("plugin '{0}' is not running")]
    NotRunning(String),

    /// Provider has no self-hosted entry point
    #[error("plugin '{0}' is not self-hosted")]
    NotSelfHosted(String),

    /// Background task was already started
    #[error("{0} already started")]
    AlreadyStarted(&'static str),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Stable snake_case tag for the error category
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Toml(_) => "config",
            Self::Schema(_) | Self::Decode { .. } => "schema",
            Self::PortExhausted { .. } => "exhaustion",
            Self::PortOutOfRange { .. } | Self::PortUnavailable { .. } => "port_unavailable",
            Self::Duplicate(_) => "duplicate",
            Self::NotFound(_) => "not_found",
            Self::Unreachable { .. } | Self::Unhealthy { .. } => "unreachable",
            Self::StartFailed { .. } => "start_failed",
            Self::AlreadyRunning(_) | Self::AlreadyStarted(_) => "already_running",
            Self::NotRunning(_) => "not_running",
            Self::NotSelfHosted(_) => "not_self_hosted",
            Self::Io(_) | Self::Http(_) | Self::Serialization(_) => "internal",
        }
    }

    pub(crate) fn unreachable(plugin_id: &str, step: RpcStep, message: impl Into<String>) -> Self {
        Self::Unreachable {
            plugin_id: plugin_id.to_string(),
            step,
            message: message.into(),
        }
    }
}
