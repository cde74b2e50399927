//! Lifecycle management for self-hosted plugin servers
//!
//! Start, stop, restart and move the RPC servers of providers that carry
//! their own entry point. Each running server owns one allocated port and
//! one discovery registration.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::discovery::{DiscoveryService, PluginInfo};
use crate::ports::PortAllocator;
use crate::registry::CapabilityRegistry;
use crate::rpc::{PluginService, ServerHandle, serve};
use crate::{Error, Result};

/// Outcome of starting every self-hosted provider at boot
#[derive(Debug, Default)]
pub struct AutoDiscoveryReport {
    pub started: Vec<String>,
    /// Providers without a self-hosted entry point
    pub skipped: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

struct RunningServer {
    port: u16,
    handle: ServerHandle,
}

/// Owns the self-hosted servers and their ports
pub struct LifecycleManager {
    registry: Arc<CapabilityRegistry>,
    allocator: Arc<PortAllocator>,
    discovery: Arc<DiscoveryService>,
    servers: Mutex<HashMap<String, RunningServer>>,
    /// Serializes start/stop/restart/reallocate
    ops: Mutex<()>,
    start_attempts: u32,
    start_backoff: Duration,
    token: CancellationToken,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("start_attempts", &self.start_attempts)
            .field("start_backoff", &self.start_backoff)
            .finish_non_exhaustive()
    }
}

impl LifecycleManager {
    /// Servers shut down when `token` is cancelled
    #[must_use]
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        allocator: Arc<PortAllocator>,
        discovery: Arc<DiscoveryService>,
        token: CancellationToken,
    ) -> Self {
        Self {
            registry,
            allocator,
            discovery,
            servers: Mutex::new(HashMap::new()),
            ops: Mutex::new(()),
            start_attempts: 3,
            start_backoff: Duration::from_millis(100),
            token,
        }
    }

    /// Bound port allocation and bind retries on start
    #[must_use]
    pub fn with_start_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.start_attempts = attempts.max(1);
        self.start_backoff = backoff;
        self
    }

    /// Start every provider that has a self-hosted entry point
    ///
    /// A failing provider does not stop the others.
    pub async fn auto_discover_plugins(&self) -> AutoDiscoveryReport {
        let mut report = AutoDiscoveryReport::default();

        for (id, provider) in self.registry.get_all_providers() {
            if !provider.is_self_hosted() {
                report.skipped.push(id);
                continue;
            }
            match self.start_plugin(&id).await {
                Ok(_) | Err(Error::AlreadyRunning(_)) => report.started.push(id),
                Err(e) => {
                    tracing::warn!(plugin_id = %id, error = %e, "failed to start plugin");
                    report.failed.push((id, e));
                }
            }
        }

        tracing::info!(
            started = report.started.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "auto-discovery complete"
        );
        report
    }

    /// Allocate a port, start the provider's server and register it
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `NotSelfHosted` or `AlreadyRunning` up front;
    /// `PortExhausted` or `StartFailed` if no server could be bound; or the
    /// discovery error. Ports are released on every failure path.
    pub async fn start_plugin(&self, plugin_id: &str) -> Result<PluginInfo> {
        let _op = self.ops.lock().await;
        self.start_locked(plugin_id).await
    }

    /// Unregister, stop the server and release its ports
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown provider or `NotRunning` if no
    /// server is running
    pub async fn stop_plugin(&self, plugin_id: &str) -> Result<()> {
        let _op = self.ops.lock().await;
        self.registry.get(plugin_id)?;
        self.stop_locked(plugin_id).await
    }

    /// Stop the server if running, then start it again
    ///
    /// # Errors
    ///
    /// Returns the start error
    pub async fn restart_plugin(&self, plugin_id: &str) -> Result<PluginInfo> {
        let _op = self.ops.lock().await;
        match self.stop_locked(plugin_id).await {
            Ok(()) | Err(Error::NotRunning(_)) => {}
            Err(e) => return Err(e),
        }
        self.start_locked(plugin_id).await
    }

    /// Move a provider's server to a different port
    ///
    /// The new port is allocated before the old server is stopped, so
    /// exhaustion leaves the running server untouched.
    ///
    /// # Errors
    ///
    /// Returns `PortExhausted` if no other port is free, or the start or
    /// discovery error for the new server
    pub async fn reallocate_port(&self, plugin_id: &str) -> Result<PluginInfo> {
        let _op = self.ops.lock().await;
        let service = self.service_for(plugin_id)?;

        let port = self.allocator.reallocate(plugin_id)?;

        self.discovery.unregister_plugin(plugin_id).await;
        let previous = self.servers.lock().await.remove(plugin_id);
        if let Some(previous) = previous {
            tracing::debug!(plugin_id, old_port = previous.port, port, "moving plugin server");
            previous.handle.shutdown().await;
        }

        let handle = match self.bind(plugin_id, &service, port).await {
            Ok(handle) => handle,
            Err(e) => {
                self.allocator.release_failed(port);
                return Err(start_failed(plugin_id, &e));
            }
        };
        self.register(plugin_id, port, handle).await
    }

    /// Stop every running server
    ///
    /// Returns the number of servers stopped.
    pub async fn stop_all(&self) -> usize {
        let _op = self.ops.lock().await;
        let ids: Vec<String> = self.servers.lock().await.keys().cloned().collect();

        let mut stopped = 0;
        for id in ids {
            match self.stop_locked(&id).await {
                Ok(()) => stopped += 1,
                Err(e) => tracing::warn!(plugin_id = %id, error = %e, "failed to stop plugin"),
            }
        }
        stopped
    }

    pub async fn is_running(&self, plugin_id: &str) -> bool {
        self.servers.lock().await.contains_key(plugin_id)
    }

    /// Bound address of a running server
    pub async fn running_address(&self, plugin_id: &str) -> Option<SocketAddr> {
        self.servers
            .lock()
            .await
            .get(plugin_id)
            .map(|s| s.handle.address())
    }

    /// Identities with a running server, sorted
    pub async fn running_plugins(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.servers.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn service_for(&self, plugin_id: &str) -> Result<Arc<dyn PluginService>> {
        self.registry
            .get(plugin_id)?
            .service()
            .ok_or_else(|| Error::NotSelfHosted(plugin_id.to_string()))
    }

    async fn start_locked(&self, plugin_id: &str) -> Result<PluginInfo> {
        let service = self.service_for(plugin_id)?;
        if self.is_running(plugin_id).await {
            return Err(Error::AlreadyRunning(plugin_id.to_string()));
        }

        let mut attempt = 0;
        let (port, handle) = loop {
            attempt += 1;
            let last = attempt >= self.start_attempts;

            let port = match self.allocator.find_available_port(plugin_id) {
                Ok(port) => port,
                Err(e) if last => return Err(e),
                Err(e) => {
                    tracing::debug!(plugin_id, attempt, error = %e, "port allocation failed, retrying");
                    tokio::time::sleep(self.start_backoff).await;
                    continue;
                }
            };

            match self.bind(plugin_id, &service, port).await {
                Ok(handle) => break (port, handle),
                Err(e) => {
                    self.allocator.release_failed(port);
                    if last {
                        return Err(start_failed(plugin_id, &e));
                    }
                    tracing::debug!(plugin_id, port, attempt, error = %e, "server bind failed, retrying");
                    tokio::time::sleep(self.start_backoff).await;
                }
            }
        };

        self.register(plugin_id, port, handle).await
    }

    async fn bind(
        &self,
        plugin_id: &str,
        service: &Arc<dyn PluginService>,
        port: u16,
    ) -> Result<ServerHandle> {
        let addr = SocketAddr::new(self.allocator.host(), port);
        let handle = serve(Arc::clone(service), addr, self.token.child_token()).await?;
        tracing::info!(plugin_id, %addr, instance = %handle.instance_id(), "plugin server started");
        Ok(handle)
    }

    /// Register a freshly bound server, tearing it down on failure
    async fn register(
        &self,
        plugin_id: &str,
        port: u16,
        handle: ServerHandle,
    ) -> Result<PluginInfo> {
        let address = handle.address().to_string();
        match self.discovery.register_plugin(plugin_id, &address).await {
            Ok(info) => {
                self.servers
                    .lock()
                    .await
                    .insert(plugin_id.to_string(), RunningServer { port, handle });
                Ok(info)
            }
            Err(e) => {
                tracing::warn!(plugin_id, error = %e, "registration failed, stopping server");
                handle.shutdown().await;
                self.allocator.release_plugin_ports(plugin_id);
                Err(e)
            }
        }
    }

    async fn stop_locked(&self, plugin_id: &str) -> Result<()> {
        self.discovery.unregister_plugin(plugin_id).await;

        let server = self.servers.lock().await.remove(plugin_id);
        let Some(server) = server else {
            return Err(Error::NotRunning(plugin_id.to_string()));
        };

        server.handle.shutdown().await;
        self.allocator.release_plugin_ports(plugin_id);
        tracing::info!(plugin_id, port = server.port, "plugin server stopped");
        Ok(())
    }
}

fn start_failed(plugin_id: &str, cause: &Error) -> Error {
    Error::StartFailed {
        plugin_id: plugin_id.to_string(),
        reason: cause.to_string(),
    }
}
