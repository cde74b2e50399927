//! Status views and control actions

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::registry::Category;
use crate::rpc::HealthStatus;

/// Operator-facing state of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Registered and healthy
    Running,
    Stopped,
    /// Answering, but reporting a non-healthy state
    Unhealthy,
    /// Last health call failed
    Unreachable,
    /// Last explicit action failed
    Error,
}

/// Merged view of one plugin across registry, ports, discovery and health
#[derive(Debug, Clone, Serialize)]
pub struct PluginStatus {
    pub id: String,
    pub name: String,
    pub categories: Vec<Category>,
    pub capabilities: Vec<String>,
    pub state: PluginState,
    pub self_hosted: bool,
    pub port: Option<u16>,
    pub address: Option<String>,
    pub health: Option<HealthStatus>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Last sweep that reported on this plugin
    pub last_checked: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_action_at: Option<DateTime<Utc>>,
}

/// Operator command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
    ReallocatePort,
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::Restart => write!(f, "restart"),
            Self::ReallocatePort => write!(f, "reallocate_port"),
        }
    }
}

impl FromStr for ControlAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            "reallocate_port" | "reallocate" => Ok(Self::ReallocatePort),
            other => Err(format!("unknown action '{other}'")),
        }
    }
}

/// Structured failure reason of an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionError {
    /// Stable error category, see [`Error::kind`]
    pub kind: String,
    pub message: String,
}

impl From<&Error> for ActionError {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

/// Outcome of a control action
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub plugin_id: String,
    pub action: ControlAction,
    pub success: bool,
    pub error: Option<ActionError>,
    /// Status after the action, if the plugin is known
    pub status: Option<PluginStatus>,
}

/// When the health driver gives up on a plugin and what it does then
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Consecutive failed sweeps before recovery is due
    pub failure_threshold: u32,
    /// Run `reallocate_port` automatically at the threshold
    pub auto_recover: bool,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            auto_recover: false,
        }
    }
}
