//! Discovery records

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::rpc::{HealthStatus, PluginMetadata};

/// What the runtime knows about one registered plugin endpoint
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub description: String,
    pub version: String,
    /// Last known health
    pub health: HealthStatus,
    pub address: String,
    pub capabilities: Vec<String>,
    pub registered_at: DateTime<Utc>,
    /// Last successful health check
    pub last_seen: DateTime<Utc>,
}

impl PluginInfo {
    pub(crate) fn new(
        plugin_id: &str,
        address: &str,
        metadata: PluginMetadata,
        health: HealthStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: plugin_id.to_string(),
            name: metadata.name,
            plugin_type: metadata.plugin_type,
            description: metadata.description,
            version: metadata.version,
            health,
            address: address.to_string(),
            capabilities: metadata.capabilities,
            registered_at: now,
            last_seen: now,
        }
    }

    #[must_use]
    pub fn has_capability(&self, capability_id: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability_id)
    }
}
