//! Beacon Runtime - plugin runtime orchestration for the Beacon voice gateway
//!
//! Capability providers (speech-to-text, text-to-speech, wake word, LLM,
//! vision, tools) run as plugins behind a small RPC contract. The runtime
//! hosts the self-hostable ones on allocated local ports, connects to remote
//! ones, tracks their health and exposes status and control to operators.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Operator API                        │
//! │   /api/plugins  │  /api/capabilities  │  /api/ports  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Status Manager                       │
//! │   status  │  control actions  │  health policy       │
//! └──────┬─────────────┬──────────────────┬─────────────┘
//!        │             │                  │
//! ┌──────▼─────┐ ┌─────▼──────┐ ┌─────────▼───────────┐
//! │ Lifecycle  │ │ Discovery  │ │ Capability Registry │
//! │ + Ports    │ │ + Pool     │ │ + Schemas           │
//! └──────┬─────┘ └─────┬──────┘ └─────────────────────┘
//!        │             │
//! ┌──────▼─────────────▼────────────────────────────────┐
//! │            Plugin RPC (HTTP/JSON)                    │
//! │        GetMetadata  │  Check                         │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod discovery;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod ports;
pub mod registry;
pub mod rpc;
pub mod runtime;
pub mod status;

pub use config::Config;
pub use discovery::{DiscoveryService, PluginInfo};
pub use error::{Error, Result};
pub use lifecycle::LifecycleManager;
pub use pool::ConnectionPool;
pub use ports::{PortAllocator, PortRange};
pub use registry::{CapabilityDefinition, CapabilityRegistry, Category, Provider};
pub use rpc::{HealthState, HealthStatus, PluginMetadata, PluginService};
pub use runtime::Runtime;
pub use status::{ActionResult, ControlAction, PluginState, PluginStatus, StatusManager};
