//! Typed messages of the plugin RPC contract

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response of the metadata call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub id: String,
    pub name: String,
    /// Primary plugin type (e.g. "speech_to_text")
    #[serde(rename = "type")]
    pub plugin_type: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    /// Identifiers of the capabilities this plugin implements
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Liveness reported by a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    #[serde(alias = "SERVING", alias = "serving")]
    Healthy,
    #[serde(alias = "NOT_SERVING", alias = "not_serving")]
    Unhealthy,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Response of the health call, stamped locally with the time it was seen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    /// Healthy status with a message
    pub fn healthy(message: impl Into<String>) -> Self {
        Self::with_state(HealthState::Healthy, message)
    }

    /// Unhealthy status with a message
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_state(HealthState::Unhealthy, message)
    }

    /// Status recorded locally when the plugin could not be reached
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::with_state(HealthState::Unknown, message)
    }

    fn with_state(status: HealthState, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: BTreeMap::new(),
            checked_at: Utc::now(),
        }
    }

    /// Add a diagnostic detail
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_uses_type_key() {
        let json = r#"{
            "id": "whisper",
            "name": "Whisper",
            "type": "speech_to_text",
            "version": "1.2.0",
            "capabilities": ["whisper.transcribe"]
        }"#;
        let meta: PluginMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.plugin_type, "speech_to_text");
        assert!(meta.description.is_empty());

        let out = serde_json::to_value(&meta).unwrap();
        assert_eq!(out["type"], "speech_to_text");
    }

    #[test]
    fn health_state_accepts_grpc_style_names() {
        let serving: HealthStatus = serde_json::from_str(r#"{"status":"SERVING"}"#).unwrap();
        assert!(serving.is_healthy());

        let down: HealthStatus =
            serde_json::from_str(r#"{"status":"NOT_SERVING","message":"model unloaded"}"#)
                .unwrap();
        assert_eq!(down.status, HealthState::Unhealthy);
        assert_eq!(down.message, "model unloaded");

        let odd: HealthStatus = serde_json::from_str(r#"{"status":"warming"}"#).unwrap();
        assert_eq!(odd.status, HealthState::Unknown);
    }

    #[test]
    fn details_are_kept() {
        let status = HealthStatus::healthy("ok").with_detail("gpu", "0");
        assert_eq!(status.details.get("gpu").map(String::as_str), Some("0"));
    }
}
