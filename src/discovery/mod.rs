//! Plugin discovery
//!
//! Registers plugin endpoints after verifying they answer metadata and health
//! calls, and keeps their health current with periodic sweeps.

pub mod service;
pub mod types;

pub use service::DiscoveryService;
pub use types::PluginInfo;
