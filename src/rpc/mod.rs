//! Plugin RPC contract
//!
//! Plugins speak HTTP/1.1 with JSON bodies. Every plugin answers two calls:
//!
//! - `POST /plugin.v1.Plugin/GetMetadata` returns [`PluginMetadata`]
//! - `POST /plugin.v1.Plugin/Check` returns [`HealthStatus`]
//!
//! Self-hostable providers implement [`PluginService`] and are served by the
//! runtime on an allocated port; remote plugins implement the same routes
//! themselves.

pub mod client;
pub mod server;
pub mod types;

pub use client::{Dialer, HttpDialer, HttpPluginClient, PluginClient, with_timeout};
pub use server::{PluginService, ServerHandle, StaticPluginService, router, serve};
pub use types::{HealthState, HealthStatus, PluginMetadata};

/// Route of the metadata call
pub const METADATA_PATH: &str = "/plugin.v1.Plugin/GetMetadata";

/// Route of the health call
pub const HEALTH_PATH: &str = "/plugin.v1.Plugin/Check";

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory dialer for exercising pool and discovery logic

    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::{Dialer, HealthStatus, PluginClient, PluginMetadata};
    use crate::{Error, Result};

    /// How a fake plugin answers the health call
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum HealthMode {
        Healthy,
        Unhealthy,
        Fail,
        Hang,
    }

    #[derive(Debug, Clone)]
    pub struct Behavior {
        pub metadata_ok: bool,
        pub health: HealthMode,
        pub capabilities: Vec<String>,
    }

    impl Default for Behavior {
        fn default() -> Self {
            Self {
                metadata_ok: true,
                health: HealthMode::Healthy,
                capabilities: vec!["stt.transcribe".to_string()],
            }
        }
    }

    /// Dialer whose endpoints are configured per address
    #[derive(Default)]
    pub struct FakeDialer {
        endpoints: Mutex<HashMap<String, Arc<Mutex<Behavior>>>>,
        pub dials: AtomicUsize,
        pub closes: Arc<AtomicUsize>,
    }

    impl FakeDialer {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn add(&self, address: &str, behavior: Behavior) {
            self.endpoints
                .lock()
                .insert(address.to_string(), Arc::new(Mutex::new(behavior)));
        }

        pub fn set_health(&self, address: &str, mode: HealthMode) {
            if let Some(b) = self.endpoints.lock().get(address) {
                b.lock().health = mode;
            }
        }

        pub fn remove(&self, address: &str) {
            self.endpoints.lock().remove(address);
        }

        pub fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Dialer for FakeDialer {
        async fn dial(&self, address: &str) -> Result<Arc<dyn PluginClient>> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            let behavior = self.endpoints.lock().get(address).cloned().ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    format!("nothing listening on {address}"),
                ))
            })?;
            Ok(Arc::new(FakeClient {
                address: address.to_string(),
                behavior,
                closed: AtomicBool::new(false),
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    pub struct FakeClient {
        address: String,
        behavior: Arc<Mutex<Behavior>>,
        closed: AtomicBool,
        /// Shared count of distinct clients closed
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PluginClient for FakeClient {
        fn address(&self) -> &str {
            &self.address
        }

        async fn metadata(&self) -> Result<PluginMetadata> {
            let behavior = self.behavior.lock().clone();
            if !behavior.metadata_ok {
                return Err(Error::Io(std::io::Error::other("metadata unavailable")));
            }
            Ok(PluginMetadata {
                id: self.address.clone(),
                name: format!("fake at {}", self.address),
                plugin_type: "speech_to_text".to_string(),
                description: String::new(),
                version: "0.0.1".to_string(),
                capabilities: behavior.capabilities,
            })
        }

        async fn health(&self) -> Result<HealthStatus> {
            let mode = self.behavior.lock().health;
            match mode {
                HealthMode::Healthy => Ok(HealthStatus::healthy("ok")),
                HealthMode::Unhealthy => Ok(HealthStatus::unhealthy("degraded")),
                HealthMode::Fail => Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                ))),
                HealthMode::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(HealthStatus::healthy("late"))
                }
            }
        }

        async fn close(&self) {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}
