//! Status manager: operator view and control over every plugin

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::types::{
    ActionError, ActionResult, ControlAction, HealthPolicy, PluginState, PluginStatus,
};
use crate::discovery::{DiscoveryService, PluginInfo};
use crate::lifecycle::LifecycleManager;
use crate::ports::PortAllocator;
use crate::registry::{CapabilityRegistry, Category, Provider};
use crate::rpc::{HealthState, HealthStatus};
use crate::{Error, Result};

/// Health bookkeeping per plugin
#[derive(Debug, Clone, Default)]
struct HealthRecord {
    consecutive_failures: u32,
    last_error: Option<String>,
    last_checked: Option<DateTime<Utc>>,
    /// Sweep results older than this are ignored
    last_action_at: Option<DateTime<Utc>>,
}

/// Answers status queries and executes control actions
pub struct StatusManager {
    registry: Arc<CapabilityRegistry>,
    allocator: Arc<PortAllocator>,
    discovery: Arc<DiscoveryService>,
    lifecycle: Arc<LifecycleManager>,
    policy: HealthPolicy,
    records: RwLock<HashMap<String, HealthRecord>>,
    /// Remote plugin identity to configured address
    remotes: RwLock<HashMap<String, String>>,
    started: AtomicBool,
}

impl std::fmt::Debug for StatusManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusManager")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl StatusManager {
    #[must_use]
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        allocator: Arc<PortAllocator>,
        discovery: Arc<DiscoveryService>,
        lifecycle: Arc<LifecycleManager>,
        policy: HealthPolicy,
    ) -> Self {
        Self {
            registry,
            allocator,
            discovery,
            lifecycle,
            policy,
            records: RwLock::new(HashMap::new()),
            remotes: RwLock::new(HashMap::new()),
            started: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn policy(&self) -> HealthPolicy {
        self.policy
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn allocator(&self) -> &Arc<PortAllocator> {
        &self.allocator
    }

    /// Record a remote endpoint and register it with discovery
    ///
    /// The endpoint is remembered even if registration fails, so a later
    /// `start` can retry it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Duplicate` if a self-hosted provider owns the
    /// identity, or the registration error
    pub async fn register_remote(&self, plugin_id: &str, address: &str) -> Result<PluginInfo> {
        if self
            .registry
            .get(plugin_id)
            .is_ok_and(|p| p.is_self_hosted())
        {
            return Err(Error::Duplicate(plugin_id.to_string()));
        }

        self.remotes
            .write()
            .await
            .insert(plugin_id.to_string(), address.to_string());

        let result = self.discovery.register_plugin(plugin_id, address).await;
        self.record_outcome(plugin_id, result.as_ref().err()).await;
        result
    }

    /// Status of every known plugin, sorted by identity
    ///
    /// Plugins failing health are included with their state flagged.
    pub async fn list_plugins(&self, category: Option<&Category>) -> Vec<PluginStatus> {
        let mut ids: BTreeSet<String> = self.registry.get_all_providers().into_keys().collect();
        ids.extend(self.remotes.read().await.keys().cloned());
        ids.extend(self.discovery.get_all_plugins().await.into_iter().map(|p| p.id));

        let mut statuses = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(status) = self.get_plugin_status(&id).await {
                if category.is_none_or(|c| status.categories.contains(c)) {
                    statuses.push(status);
                }
            }
        }
        statuses
    }

    /// # Errors
    ///
    /// Returns `Error::NotFound` if no component knows the identity
    pub async fn get_plugin_status(&self, plugin_id: &str) -> Result<PluginStatus> {
        let provider = self.registry.get(plugin_id).ok();
        let remote = self.remotes.read().await.get(plugin_id).cloned();
        let info = self.discovery.get_plugin(plugin_id).await.ok();

        if provider.is_none() && remote.is_none() && info.is_none() {
            return Err(Error::NotFound(plugin_id.to_string()));
        }

        let record = self
            .records
            .read()
            .await
            .get(plugin_id)
            .cloned()
            .unwrap_or_default();
        let running = self.lifecycle.running_address(plugin_id).await;

        let state = match &info {
            Some(info) => match info.health.status {
                HealthState::Healthy => PluginState::Running,
                HealthState::Unhealthy => PluginState::Unhealthy,
                HealthState::Unknown => PluginState::Unreachable,
            },
            None if running.is_some() => PluginState::Running,
            None if record.last_error.is_some() => PluginState::Error,
            None => PluginState::Stopped,
        };

        let address = info
            .as_ref()
            .map(|i| i.address.clone())
            .or_else(|| running.map(|a| a.to_string()))
            .or(remote);

        Ok(PluginStatus {
            id: plugin_id.to_string(),
            name: provider
                .as_ref()
                .map(|p| p.name.clone())
                .or_else(|| info.as_ref().map(|i| i.name.clone()))
                .unwrap_or_else(|| plugin_id.to_string()),
            categories: categories(provider.as_deref(), info.as_ref()),
            capabilities: provider.as_ref().map_or_else(
                || info.as_ref().map(|i| i.capabilities.clone()).unwrap_or_default(),
                |p| p.capability_ids(),
            ),
            state,
            self_hosted: provider.as_ref().is_some_and(|p| p.is_self_hosted()),
            port: self.allocator.plugin_port(plugin_id),
            address,
            health: info.as_ref().map(|i| i.health.clone()),
            last_seen: info.as_ref().map(|i| i.last_seen),
            last_checked: record.last_checked,
            consecutive_failures: record.consecutive_failures,
            last_error: record.last_error,
            last_action_at: record.last_action_at,
        })
    }

    /// Run a control action and report the outcome
    pub async fn execute(&self, plugin_id: &str, action: ControlAction) -> ActionResult {
        self.records
            .write()
            .await
            .entry(plugin_id.to_string())
            .or_default()
            .last_action_at = Some(Utc::now());

        tracing::info!(plugin_id, %action, "executing plugin action");
        let outcome = self.dispatch(plugin_id, action).await;

        match &outcome {
            Err(Error::NotFound(_)) => {
                self.records.write().await.remove(plugin_id);
            }
            other => self.record_outcome(plugin_id, other.as_ref().err()).await,
        }
        if let Err(e) = &outcome {
            tracing::warn!(plugin_id, %action, error = %e, "plugin action failed");
        }

        ActionResult {
            plugin_id: plugin_id.to_string(),
            action,
            success: outcome.is_ok(),
            error: outcome.as_ref().err().map(ActionError::from),
            status: self.get_plugin_status(plugin_id).await.ok(),
        }
    }

    async fn dispatch(&self, plugin_id: &str, action: ControlAction) -> Result<()> {
        let provider = self.registry.get(plugin_id).ok();
        if provider.as_ref().is_some_and(|p| p.is_self_hosted()) {
            return match action {
                ControlAction::Start => self.lifecycle.start_plugin(plugin_id).await.map(drop),
                ControlAction::Stop => self.lifecycle.stop_plugin(plugin_id).await,
                ControlAction::Restart => self.lifecycle.restart_plugin(plugin_id).await.map(drop),
                ControlAction::ReallocatePort => {
                    self.lifecycle.reallocate_port(plugin_id).await.map(drop)
                }
            };
        }

        let remote = self.remotes.read().await.get(plugin_id).cloned();
        let Some(address) = remote else {
            return Err(if provider.is_some() {
                Error::NotSelfHosted(plugin_id.to_string())
            } else {
                Error::NotFound(plugin_id.to_string())
            });
        };

        match action {
            ControlAction::Start => self
                .discovery
                .register_plugin(plugin_id, &address)
                .await
                .map(drop),
            ControlAction::Stop => {
                if self.discovery.unregister_plugin(plugin_id).await {
                    Ok(())
                } else {
                    Err(Error::NotRunning(plugin_id.to_string()))
                }
            }
            ControlAction::Restart => {
                self.discovery.unregister_plugin(plugin_id).await;
                self.discovery
                    .register_plugin(plugin_id, &address)
                    .await
                    .map(drop)
            }
            // the old record stays until a new connection is verified
            ControlAction::ReallocatePort => self
                .discovery
                .register_plugin(plugin_id, &address)
                .await
                .map(drop),
        }
    }

    /// Remember the result of an action taken outside [`Self::execute`]
    pub(crate) async fn record_outcome(&self, plugin_id: &str, error: Option<&Error>) {
        let mut records = self.records.write().await;
        let record = records.entry(plugin_id.to_string()).or_default();
        match error {
            None => {
                record.consecutive_failures = 0;
                record.last_error = None;
            }
            Some(e) => record.last_error = Some(e.to_string()),
        }
    }

    /// One health pass over every registered plugin
    ///
    /// Updates failure counts, ignoring results for plugins acted on since
    /// the sweep began. When the policy enables recovery, plugins at the
    /// failure threshold are moved with `reallocate_port`.
    pub async fn sweep(&self) -> HashMap<String, Result<HealthStatus>> {
        let sweep_started = Utc::now();
        let results = self.discovery.health_check().await;
        let checked = Utc::now();

        let mut due = Vec::new();
        {
            let mut records = self.records.write().await;
            for (plugin_id, result) in &results {
                let record = records.entry(plugin_id.clone()).or_default();
                if record.last_action_at.is_some_and(|t| t > sweep_started) {
                    tracing::debug!(plugin_id = %plugin_id, "ignoring health result older than last action");
                    continue;
                }

                record.last_checked = Some(checked);
                match result {
                    Ok(_) => {
                        record.consecutive_failures = 0;
                        record.last_error = None;
                    }
                    Err(e) => {
                        record.consecutive_failures += 1;
                        record.last_error = Some(e.to_string());
                        tracing::warn!(
                            plugin_id = %plugin_id,
                            failures = record.consecutive_failures,
                            error = %e,
                            "plugin health check failed"
                        );
                        if self.policy.auto_recover
                            && record.consecutive_failures >= self.policy.failure_threshold
                        {
                            due.push(plugin_id.clone());
                        }
                    }
                }
            }
        }

        for plugin_id in due {
            tracing::info!(plugin_id = %plugin_id, "failure threshold reached, reallocating");
            let result = self.execute(&plugin_id, ControlAction::ReallocatePort).await;
            if result.success {
                tracing::info!(plugin_id = %plugin_id, "plugin recovered");
            }
        }

        results
    }

    /// Spawn the periodic health driver
    ///
    /// Each tick runs [`Self::sweep`] and purges expired port records.
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyStarted` on a second call
    pub fn start_health_check(
        self: &Arc<Self>,
        token: CancellationToken,
        interval: Duration,
    ) -> Result<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted("status health driver"));
        }

        let manager = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                tokio::select! {
                    () = token.cancelled() => break,
                    _ = manager.sweep() => {}
                }

                manager.allocator.cleanup_expired_records();
            }

            tracing::debug!("status health driver stopped");
        }))
    }
}

fn categories(provider: Option<&Provider>, info: Option<&PluginInfo>) -> Vec<Category> {
    if let Some(provider) = provider.filter(|p| !p.capabilities.is_empty()) {
        return provider.categories();
    }
    info.and_then(|i| i.plugin_type.parse().ok())
        .into_iter()
        .collect()
}
