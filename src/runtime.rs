//! Runtime - composition root for the plugin runtime
//!
//! Builds every component once from a [`Config`] and owns the background
//! tasks: the status health driver, the operator API server and the
//! self-hosted plugin servers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::ApiServer;
use crate::discovery::DiscoveryService;
use crate::lifecycle::LifecycleManager;
use crate::pool::ConnectionPool;
use crate::ports::{PortAllocator, PortRange};
use crate::registry::{CapabilityRegistry, Provider};
use crate::rpc::{Dialer, HttpDialer};
use crate::status::{HealthPolicy, StatusManager};
use crate::{Config, Result};

/// The plugin runtime
pub struct Runtime {
    config: Config,
    registry: Arc<CapabilityRegistry>,
    allocator: Arc<PortAllocator>,
    pool: Arc<ConnectionPool>,
    discovery: Arc<DiscoveryService>,
    lifecycle: Arc<LifecycleManager>,
    status: Arc<StatusManager>,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    api_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("providers", &self.registry.len())
            .field("api_addr", &self.api_addr)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Build the runtime, dialing plugins over HTTP
    ///
    /// # Errors
    ///
    /// Returns error if the config fails validation or a provider fails
    /// decoding
    pub fn new(config: Config) -> Result<Self> {
        let dialer = Arc::new(HttpDialer::new(
            config.rpc.dial_timeout,
            config.rpc.request_timeout,
        ));
        Self::with_dialer(config, dialer)
    }

    /// Build the runtime with a custom dialer
    ///
    /// # Errors
    ///
    /// Same as [`Self::new`]
    pub fn with_dialer(config: Config, dialer: Arc<dyn Dialer>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(CapabilityRegistry::new());
        for provider in &config.providers {
            registry.register(Provider::from_config(provider)?)?;
        }

        let range = PortRange::new(config.ports.start, config.ports.end)?;
        let allocator = Arc::new(
            PortAllocator::new(range)
                .with_host(config.ports.host)
                .with_retention(config.ports.retention),
        );

        let pool = Arc::new(ConnectionPool::new(
            dialer,
            config.rpc.dial_timeout,
            config.rpc.request_timeout,
        ));
        let discovery = Arc::new(DiscoveryService::new(Arc::clone(&pool)));

        let token = CancellationToken::new();
        let lifecycle = Arc::new(
            LifecycleManager::new(
                Arc::clone(&registry),
                Arc::clone(&allocator),
                Arc::clone(&discovery),
                token.child_token(),
            )
            .with_start_retries(config.rpc.start_attempts, config.rpc.start_backoff),
        );

        let policy = HealthPolicy {
            failure_threshold: config.health.failure_threshold,
            auto_recover: config.health.auto_recover,
        };
        let status = Arc::new(StatusManager::new(
            Arc::clone(&registry),
            Arc::clone(&allocator),
            Arc::clone(&discovery),
            Arc::clone(&lifecycle),
            policy,
        ));

        tracing::debug!(
            providers = registry.len(),
            remotes = config.plugins.len(),
            start = config.ports.start,
            end = config.ports.end,
            "runtime built"
        );

        Ok(Self {
            config,
            registry,
            allocator,
            pool,
            discovery,
            lifecycle,
            status,
            token,
            tasks: Vec::new(),
            api_addr: None,
        })
    }

    /// Start self-hosted plugins, register remote plugins, then spawn the
    /// health driver and the operator API
    ///
    /// Individual plugin failures are logged and do not abort startup.
    ///
    /// # Errors
    ///
    /// Returns error if the health driver was already started or the API
    /// server cannot bind
    pub async fn start(&mut self) -> Result<()> {
        let report = self.lifecycle.auto_discover_plugins().await;
        for plugin_id in &report.started {
            self.status.record_outcome(plugin_id, None).await;
        }
        // failed plugins stay listed in the error state
        for (plugin_id, e) in &report.failed {
            tracing::warn!(plugin_id = %plugin_id, error = %e, "self-hosted plugin failed to start");
            self.status.record_outcome(plugin_id, Some(e)).await;
        }
        tracing::info!(
            started = report.started.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "self-hosted plugins started"
        );

        for remote in &self.config.plugins {
            match self.status.register_remote(&remote.id, &remote.address).await {
                Ok(info) => {
                    tracing::info!(plugin_id = %info.id, address = %info.address, "remote plugin registered");
                }
                Err(e) => {
                    tracing::warn!(plugin_id = %remote.id, address = %remote.address, error = %e, "remote plugin registration failed");
                }
            }
        }

        let driver = self
            .status
            .start_health_check(self.token.child_token(), self.config.health.interval)?;
        self.tasks.push(driver);

        if self.config.api.enabled {
            let addr = SocketAddr::new(self.config.ports.host, self.config.api.port);
            let (bound, task) = ApiServer::new(Arc::clone(&self.status), addr)
                .spawn(self.token.child_token())
                .await?;
            self.api_addr = Some(bound);
            self.tasks.push(task);
        }

        tracing::info!("runtime started");
        Ok(())
    }

    /// Stop background tasks and every self-hosted server, then close the pool
    pub async fn shutdown(&mut self) {
        tracing::info!("shutting down runtime");
        self.token.cancel();

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task panicked");
            }
        }

        let stopped = self.lifecycle.stop_all().await;
        self.pool.close().await;
        self.api_addr = None;

        tracing::info!(stopped, "runtime stopped");
    }

    /// Start, wait for `signal`, then shut down
    ///
    /// # Errors
    ///
    /// Returns error if startup fails; the runtime is shut down either way
    pub async fn run_until<F>(mut self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        if let Err(e) = self.start().await {
            self.shutdown().await;
            return Err(e);
        }

        signal.await;
        self.shutdown().await;
        Ok(())
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn allocator(&self) -> &Arc<PortAllocator> {
        &self.allocator
    }

    #[must_use]
    pub const fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    #[must_use]
    pub const fn discovery(&self) -> &Arc<DiscoveryService> {
        &self.discovery
    }

    #[must_use]
    pub const fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    #[must_use]
    pub const fn status(&self) -> &Arc<StatusManager> {
        &self.status
    }

    /// Address the operator API is listening on, once started
    #[must_use]
    pub const fn api_addr(&self) -> Option<SocketAddr> {
        self.api_addr
    }
}
