//! Shared test utilities

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use beacon_runtime::config::{ProviderConfig, RemotePluginConfig};
use beacon_runtime::rpc::{self, ServerHandle};
use beacon_runtime::{CapabilityDefinition, Category, Config, HealthStatus, PluginMetadata, PluginService};
use tokio_util::sync::CancellationToken;

/// Plugin whose health answer can be changed while it is serving
pub struct TestService {
    id: String,
    healthy: AtomicBool,
    delay_ms: AtomicU64,
}

impl TestService {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            healthy: AtomicBool::new(true),
            delay_ms: AtomicU64::new(0),
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Delay every health answer
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap(), Ordering::SeqCst);
    }
}

#[async_trait]
impl PluginService for TestService {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            id: self.id.clone(),
            name: format!("Test {}", self.id),
            plugin_type: "speech_to_text".to_string(),
            description: "Test plugin".to_string(),
            version: "0.0.1".to_string(),
            capabilities: vec!["transcribe".to_string()],
        }
    }

    async fn health(&self) -> HealthStatus {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.healthy.load(Ordering::SeqCst) {
            HealthStatus::healthy("ok")
        } else {
            HealthStatus::unhealthy("model not loaded")
        }
    }
}

/// Serve a plugin on an ephemeral loopback port
pub async fn spawn_plugin(service: Arc<TestService>) -> ServerHandle {
    spawn_plugin_at(service, "127.0.0.1:0".parse().unwrap()).await
}

/// Serve a plugin on a fixed address
pub async fn spawn_plugin_at(service: Arc<TestService>, addr: SocketAddr) -> ServerHandle {
    rpc::serve(service, addr, CancellationToken::new())
        .await
        .expect("failed to start test plugin")
}

/// Config with short timeouts, the API disabled and the given port range
pub fn test_config(start: u16, end: u16) -> Config {
    let mut config = Config::default();
    config.ports.start = start;
    config.ports.end = end;
    config.health.interval = Duration::from_millis(50);
    config.rpc.dial_timeout = Duration::from_millis(300);
    config.rpc.request_timeout = Duration::from_millis(300);
    config.rpc.start_backoff = Duration::from_millis(10);
    config.api.enabled = false;
    config
}

/// Self-hosted provider entry with one capability
pub fn self_hosted_provider(id: &str, category: Category) -> ProviderConfig {
    ProviderConfig {
        id: id.to_string(),
        name: format!("Provider {id}"),
        description: None,
        version: None,
        self_hosted: true,
        capabilities: vec![CapabilityDefinition::new(
            format!("{id}.run"),
            category,
            "Run",
        )],
        config: serde_json::Map::new(),
    }
}

pub fn remote_plugin(id: &str, address: &str) -> RemotePluginConfig {
    RemotePluginConfig {
        id: id.to_string(),
        address: address.to_string(),
    }
}
