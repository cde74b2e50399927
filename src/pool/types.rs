//! Connection pool types

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::rpc::{PluginClient, PluginMetadata};

/// State of a pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    /// Last call failed; the record is kept for reconnection
    Error,
    Closed,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// One open client channel to a plugin
#[derive(Clone)]
pub struct Connection {
    pub plugin_id: String,
    pub address: String,
    pub client: Arc<dyn PluginClient>,
    /// Metadata advertised when the connection was registered
    pub info: Option<PluginMetadata>,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Connection {
    pub(crate) fn new(
        plugin_id: impl Into<String>,
        client: Arc<dyn PluginClient>,
        info: Option<PluginMetadata>,
    ) -> Self {
        let now = Utc::now();
        Self {
            plugin_id: plugin_id.into(),
            address: client.address().to_string(),
            client,
            info,
            status: ConnectionStatus::Connected,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    pub(crate) fn mark(&mut self, status: ConnectionStatus, error: Option<String>) {
        self.status = status;
        self.last_error = error;
        self.updated_at = Utc::now();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("plugin_id", &self.plugin_id)
            .field("address", &self.address)
            .field("status", &self.status)
            .field("updated_at", &self.updated_at)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}
