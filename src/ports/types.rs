//! Port allocation records and statistics

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a port allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    /// Claimed explicitly for a specific plugin
    Reserved,
    /// Granted by a scan of the range
    Allocated,
    /// Freed by its owner
    Released,
    /// Freed after the owning server failed to start
    Error,
}

impl AllocationStatus {
    /// Whether the port is currently held
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Reserved | Self::Allocated)
    }
}

/// A single port allocation record
#[derive(Debug, Clone, Serialize)]
pub struct PortAllocation {
    pub port: u16,
    pub plugin_id: String,
    pub address: SocketAddr,
    pub allocated_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: AllocationStatus,
}

/// Usage summary for the managed range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortStats {
    pub total: usize,
    pub allocated: usize,
    pub reserved: usize,
    pub available: usize,
    /// Percentage of the range currently held (0-100)
    pub utilization: f64,
}
