//! Discovery service: directory of verified plugin endpoints

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::types::PluginInfo;
use crate::error::RpcStep;
use crate::pool::{ConnectionPool, check_health};
use crate::rpc::{HealthStatus, with_timeout};
use crate::{Error, Result};

/// Directory of registered plugins backed by the connection pool
#[derive(Debug)]
pub struct DiscoveryService {
    pool: Arc<ConnectionPool>,
    plugins: RwLock<HashMap<String, PluginInfo>>,
    loop_started: AtomicBool,
}

impl DiscoveryService {
    #[must_use]
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            plugins: RwLock::new(HashMap::new()),
            loop_started: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Dial a plugin, fetch its metadata and verify it is healthy
    ///
    /// Nothing is kept unless every step succeeds. On success any previous
    /// connection for the identity is replaced.
    ///
    /// # Errors
    ///
    /// Returns an unreachable error naming the failing step, or
    /// `Error::Unhealthy` if the plugin reports a non-healthy state
    pub async fn register_plugin(&self, plugin_id: &str, address: &str) -> Result<PluginInfo> {
        let timeout = self.pool.request_timeout();

        let client = self
            .pool
            .dial(address)
            .await
            .map_err(|e| Error::unreachable(plugin_id, RpcStep::Dial, e.to_string()))?;

        let metadata = match with_timeout(timeout, client.metadata()).await {
            Ok(metadata) => metadata,
            Err(e) => {
                client.close().await;
                return Err(Error::unreachable(
                    plugin_id,
                    RpcStep::Metadata,
                    e.to_string(),
                ));
            }
        };

        let health = match check_health(plugin_id, client.as_ref(), timeout).await {
            Ok(health) => health,
            Err(e) => {
                client.close().await;
                return Err(e);
            }
        };

        if metadata.id != plugin_id {
            tracing::debug!(plugin_id, advertised = %metadata.id, "plugin advertises a different id");
        }

        let info = PluginInfo::new(plugin_id, address, metadata.clone(), health);
        {
            let mut plugins = self.plugins.write().await;
            self.pool
                .replace_connection(plugin_id, client, Some(metadata))
                .await;
            plugins.insert(plugin_id.to_string(), info.clone());
        }

        tracing::info!(
            plugin_id,
            address,
            capabilities = info.capabilities.len(),
            "plugin registered"
        );
        Ok(info)
    }

    /// Remove a plugin and close its connection; no-op if unknown
    ///
    /// Returns whether a record existed.
    pub async fn unregister_plugin(&self, plugin_id: &str) -> bool {
        let removed = {
            let mut plugins = self.plugins.write().await;
            let removed = plugins.remove(plugin_id);
            // a connection without a record is still torn down
            let _ = self.pool.remove_connection(plugin_id).await;
            removed
        };

        if removed.is_some() {
            tracing::info!(plugin_id, "plugin unregistered");
        }
        removed.is_some()
    }

    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown identity
    pub async fn get_plugin(&self, plugin_id: &str) -> Result<PluginInfo> {
        self.plugins
            .read()
            .await
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(plugin_id.to_string()))
    }

    /// All records sorted by identity
    pub async fn get_all_plugins(&self) -> Vec<PluginInfo> {
        let mut plugins: Vec<PluginInfo> = self.plugins.read().await.values().cloned().collect();
        plugins.sort_by(|a, b| a.id.cmp(&b.id));
        plugins
    }

    /// Records advertising a capability, sorted by identity
    pub async fn get_plugins_by_capability(&self, capability_id: &str) -> Vec<PluginInfo> {
        let mut plugins: Vec<PluginInfo> = self
            .plugins
            .read()
            .await
            .values()
            .filter(|p| p.has_capability(capability_id))
            .cloned()
            .collect();
        plugins.sort_by(|a, b| a.id.cmp(&b.id));
        plugins
    }

    /// Health-check every registered plugin once
    ///
    /// Failures are recorded on the plugin's health but keep the record and
    /// its previous `last_seen`. Results for plugins registered after the
    /// sweep began are dropped.
    pub async fn health_check(&self) -> HashMap<String, Result<HealthStatus>> {
        let sweep_started = Utc::now();
        let mut results = self.pool.health_check().await;

        let mut plugins = self.plugins.write().await;
        results.retain(|plugin_id, result| {
            let Some(info) = plugins.get_mut(plugin_id) else {
                return false;
            };
            if info.registered_at > sweep_started {
                tracing::debug!(plugin_id = %plugin_id, "discarding health result older than registration");
                return false;
            }

            match result {
                Ok(health) => {
                    info.health = health.clone();
                    info.last_seen = health.checked_at;
                }
                Err(Error::Unhealthy { message, .. }) => {
                    info.health = HealthStatus::unhealthy(message.clone());
                }
                Err(e) => {
                    info.health = HealthStatus::unreachable(e.to_string());
                }
            }
            true
        });

        results
    }

    /// Spawn the periodic health sweep
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyStarted` if the loop is already running for
    /// this service
    pub fn start_health_check_loop(
        self: &Arc<Self>,
        token: CancellationToken,
        interval: Duration,
    ) -> Result<JoinHandle<()>> {
        if self.loop_started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted("discovery health loop"));
        }

        let service = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the first immediate tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                tokio::select! {
                    () = token.cancelled() => break,
                    results = service.health_check() => log_failures(&results),
                }
            }

            tracing::debug!("discovery health loop stopped");
        }))
    }

    /// Count of registered plugins
    pub async fn len(&self) -> usize {
        self.plugins.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.plugins.read().await.is_empty()
    }
}

pub(crate) fn log_failures(results: &HashMap<String, Result<HealthStatus>>) {
    for (plugin_id, result) in results {
        if let Err(e) = result {
            tracing::warn!(plugin_id = %plugin_id, error = %e, "plugin health check failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::HealthState;
    use crate::rpc::testing::{Behavior, FakeDialer, HealthMode};

    fn discovery(dialer: &Arc<FakeDialer>) -> Arc<DiscoveryService> {
        let pool = ConnectionPool::new(
            Arc::clone(dialer) as Arc<dyn crate::rpc::client::Dialer>,
            Duration::from_millis(200),
            Duration::from_millis(100),
        );
        Arc::new(DiscoveryService::new(Arc::new(pool)))
    }

    #[tokio::test]
    async fn register_stores_record_and_connection() {
        let dialer = FakeDialer::new();
        dialer.add("stt:1", Behavior::default());
        let discovery = discovery(&dialer);

        let info = discovery.register_plugin("stt", "stt:1").await.unwrap();
        assert_eq!(info.address, "stt:1");
        assert_eq!(info.registered_at, info.last_seen);
        assert!(info.health.is_healthy());

        let connection = discovery.pool().get_connection("stt").await.unwrap();
        assert_eq!(connection.address, info.address);
        assert_eq!(
            discovery.get_plugins_by_capability("stt.transcribe").await.len(),
            1
        );
    }

    #[tokio::test]
    async fn metadata_failure_leaves_nothing() {
        let dialer = FakeDialer::new();
        dialer.add(
            "bad:1",
            Behavior {
                metadata_ok: false,
                ..Behavior::default()
            },
        );
        let discovery = discovery(&dialer);

        let err = discovery.register_plugin("bad", "bad:1").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Unreachable {
                step: RpcStep::Metadata,
                ref plugin_id,
                ..
            } if plugin_id == "bad"
        ));
        assert!(matches!(
            discovery.get_plugin("bad").await,
            Err(Error::NotFound(_))
        ));
        assert!(discovery.pool().is_empty().await);
        assert_eq!(dialer.closes(), 1);
    }

    #[tokio::test]
    async fn health_timeout_during_registration() {
        let dialer = FakeDialer::new();
        dialer.add(
            "p1:1",
            Behavior {
                health: HealthMode::Hang,
                ..Behavior::default()
            },
        );
        let discovery = discovery(&dialer);

        let err = discovery.register_plugin("p1", "p1:1").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Unreachable {
                step: RpcStep::Health,
                ..
            }
        ));
        assert!(discovery.get_plugin("p1").await.is_err());
    }

    #[tokio::test]
    async fn unhealthy_plugin_not_registered() {
        let dialer = FakeDialer::new();
        dialer.add(
            "sick:1",
            Behavior {
                health: HealthMode::Unhealthy,
                ..Behavior::default()
            },
        );
        let discovery = discovery(&dialer);

        let err = discovery.register_plugin("sick", "sick:1").await.unwrap_err();
        assert!(matches!(err, Error::Unhealthy { .. }));
        assert!(discovery.is_empty().await);
    }

    #[tokio::test]
    async fn failed_check_keeps_stale_last_seen() {
        let dialer = FakeDialer::new();
        dialer.add("p2:1", Behavior::default());
        let discovery = discovery(&dialer);
        let registered = discovery.register_plugin("p2", "p2:1").await.unwrap();

        dialer.set_health("p2:1", HealthMode::Fail);
        let results = discovery.health_check().await;
        assert!(results["p2"].is_err());

        let info = discovery.get_plugin("p2").await.unwrap();
        assert_eq!(info.last_seen, registered.last_seen);
        assert_eq!(info.health.status, HealthState::Unknown);
        assert_eq!(discovery.get_all_plugins().await.len(), 1);
    }

    #[tokio::test]
    async fn successful_check_advances_last_seen() {
        let dialer = FakeDialer::new();
        dialer.add("p:1", Behavior::default());
        let discovery = discovery(&dialer);
        let registered = discovery.register_plugin("p", "p:1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let results = discovery.health_check().await;
        assert!(results["p"].is_ok());
        let info = discovery.get_plugin("p").await.unwrap();
        assert!(info.last_seen > registered.last_seen);
    }

    #[tokio::test]
    async fn reregistration_beats_in_flight_sweep() {
        let dialer = FakeDialer::new();
        dialer.add("p:1", Behavior::default());
        let discovery = discovery(&dialer);
        discovery.register_plugin("p", "p:1").await.unwrap();
        dialer.set_health("p:1", HealthMode::Hang);

        let sweep = {
            let discovery = Arc::clone(&discovery);
            tokio::spawn(async move { discovery.health_check().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        dialer.set_health("p:1", HealthMode::Healthy);
        discovery.register_plugin("p", "p:1").await.unwrap();

        let results = sweep.await.unwrap();
        assert!(!results.contains_key("p"));
        assert!(discovery.get_plugin("p").await.unwrap().health.is_healthy());
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let dialer = FakeDialer::new();
        dialer.add("p:1", Behavior::default());
        let discovery = discovery(&dialer);
        discovery.register_plugin("p", "p:1").await.unwrap();

        assert!(discovery.unregister_plugin("p").await);
        assert!(!discovery.unregister_plugin("p").await);
        assert!(discovery.pool().is_empty().await);
    }

    #[tokio::test]
    async fn loop_starts_once_and_stops_on_cancel() {
        let dialer = FakeDialer::new();
        let discovery = discovery(&dialer);
        let token = CancellationToken::new();

        let handle = discovery
            .start_health_check_loop(token.clone(), Duration::from_millis(10))
            .unwrap();
        assert!(matches!(
            discovery.start_health_check_loop(token.clone(), Duration::from_millis(10)),
            Err(Error::AlreadyStarted(_))
        ));

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
