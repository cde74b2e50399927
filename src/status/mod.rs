//! Plugin status and control
//!
//! Merges registry, port, discovery and health bookkeeping into one view per
//! plugin, executes operator actions and drives periodic health sweeps.

pub mod manager;
pub mod types;

pub use manager::StatusManager;
pub use types::{ActionError, ActionResult, ControlAction, HealthPolicy, PluginState, PluginStatus};
