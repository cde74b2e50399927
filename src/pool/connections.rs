//! Connection pool: one client channel per plugin identity

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;

use super::types::{Connection, ConnectionStatus};
use crate::error::RpcStep;
use crate::rpc::{Dialer, HealthStatus, PluginClient, PluginMetadata, with_timeout};
use crate::{Error, Result};

/// Pool of plugin client connections keyed by plugin identity
pub struct ConnectionPool {
    dialer: Arc<dyn Dialer>,
    dial_timeout: Duration,
    request_timeout: Duration,
    connections: RwLock<HashMap<String, Connection>>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("dial_timeout", &self.dial_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    #[must_use]
    pub fn new(dialer: Arc<dyn Dialer>, dial_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            dialer,
            dial_timeout,
            request_timeout,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Deadline applied to each metadata or health call
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Dial an address under the dial timeout
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint cannot be reached in time
    pub async fn dial(&self, address: &str) -> Result<Arc<dyn PluginClient>> {
        with_timeout(self.dial_timeout, self.dialer.dial(address)).await
    }

    async fn dial_for(&self, plugin_id: &str, address: &str) -> Result<Arc<dyn PluginClient>> {
        self.dial(address)
            .await
            .map_err(|e| Error::unreachable(plugin_id, RpcStep::Dial, e.to_string()))
    }

    /// Dial and store a new connection
    ///
    /// # Errors
    ///
    /// Returns `Error::Duplicate` if the identity already has a connection,
    /// or an unreachable error if the dial fails
    pub async fn add_connection(
        &self,
        plugin_id: &str,
        address: &str,
        info: Option<PluginMetadata>,
    ) -> Result<()> {
        if self.connections.read().await.contains_key(plugin_id) {
            return Err(Error::Duplicate(plugin_id.to_string()));
        }

        let client = self.dial_for(plugin_id, address).await?;
        self.insert_connection(plugin_id, client, info).await
    }

    /// Store an already dialed client
    ///
    /// # Errors
    ///
    /// Returns `Error::Duplicate` if the identity already has a connection;
    /// the client is closed in that case
    pub async fn insert_connection(
        &self,
        plugin_id: &str,
        client: Arc<dyn PluginClient>,
        info: Option<PluginMetadata>,
    ) -> Result<()> {
        {
            let mut connections = self.connections.write().await;
            if !connections.contains_key(plugin_id) {
                let connection = Connection::new(plugin_id, client, info);
                tracing::debug!(plugin_id, address = %connection.address, "connection added");
                connections.insert(plugin_id.to_string(), connection);
                return Ok(());
            }
        }

        // lost a race with a concurrent add
        client.close().await;
        Err(Error::Duplicate(plugin_id.to_string()))
    }

    /// Store a client, closing any previous connection for the identity
    pub async fn replace_connection(
        &self,
        plugin_id: &str,
        client: Arc<dyn PluginClient>,
        info: Option<PluginMetadata>,
    ) {
        let connection = Connection::new(plugin_id, client, info);
        let previous = self
            .connections
            .write()
            .await
            .insert(plugin_id.to_string(), connection);

        if let Some(previous) = previous {
            tracing::debug!(plugin_id, address = %previous.address, "replacing connection");
            previous.client.close().await;
        }
    }

    /// Close and remove a connection
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the identity has no connection
    pub async fn remove_connection(&self, plugin_id: &str) -> Result<()> {
        let removed = self.connections.write().await.remove(plugin_id);
        match removed {
            Some(connection) => {
                connection.client.close().await;
                tracing::debug!(plugin_id, "connection removed");
                Ok(())
            }
            None => Err(Error::NotFound(plugin_id.to_string())),
        }
    }

    /// Client for a plugin
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the identity has no connection
    pub async fn get_client(&self, plugin_id: &str) -> Result<Arc<dyn PluginClient>> {
        self.connections
            .read()
            .await
            .get(plugin_id)
            .map(|c| Arc::clone(&c.client))
            .ok_or_else(|| Error::NotFound(plugin_id.to_string()))
    }

    /// Snapshot of a connection record
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the identity has no connection
    pub async fn get_connection(&self, plugin_id: &str) -> Result<Connection> {
        self.connections
            .read()
            .await
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(plugin_id.to_string()))
    }

    /// Health-check every connection concurrently
    ///
    /// A non-healthy status counts as a failure. Connection status is updated
    /// from the outcome; entries are never removed here.
    pub async fn health_check(&self) -> HashMap<String, Result<HealthStatus>> {
        let targets: Vec<(String, Arc<dyn PluginClient>)> = self
            .connections
            .read()
            .await
            .values()
            .map(|c| (c.plugin_id.clone(), Arc::clone(&c.client)))
            .collect();

        let timeout = self.request_timeout;
        let checks = targets.into_iter().map(|(plugin_id, client)| async move {
            let result = check_health(&plugin_id, client.as_ref(), timeout).await;
            (plugin_id, client, result)
        });
        let outcomes = join_all(checks).await;

        let mut results = HashMap::with_capacity(outcomes.len());
        let mut connections = self.connections.write().await;
        for (plugin_id, client, result) in outcomes {
            // skip entries replaced while the check was in flight
            if let Some(connection) = connections
                .get_mut(&plugin_id)
                .filter(|c| Arc::ptr_eq(&c.client, &client))
            {
                match &result {
                    Ok(_) => connection.mark(ConnectionStatus::Connected, None),
                    Err(e) => connection.mark(ConnectionStatus::Error, Some(e.to_string())),
                }
            }
            results.insert(plugin_id, result);
        }
        results
    }

    /// Close and re-dial a connection at its known address
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown identity, or the dial error;
    /// on dial failure the record is kept with status `error`
    pub async fn reconnect_connection(&self, plugin_id: &str) -> Result<()> {
        let (address, old) = {
            let connections = self.connections.read().await;
            let connection = connections
                .get(plugin_id)
                .ok_or_else(|| Error::NotFound(plugin_id.to_string()))?;
            (connection.address.clone(), Arc::clone(&connection.client))
        };

        old.close().await;
        let dialed = self.dial_for(plugin_id, &address).await;

        let (stale, result) = {
            let mut connections = self.connections.write().await;
            let entry = connections
                .get_mut(plugin_id)
                .filter(|c| c.address == address);

            match (dialed, entry) {
                (Ok(client), Some(connection)) => {
                    let displaced = std::mem::replace(&mut connection.client, client);
                    connection.mark(ConnectionStatus::Connected, None);
                    tracing::info!(plugin_id, %address, "connection re-established");
                    (displaced, Ok(()))
                }
                (Err(e), Some(connection)) => {
                    connection.mark(ConnectionStatus::Error, Some(e.to_string()));
                    return Err(e);
                }
                (Err(e), None) => return Err(e),
                // entry removed or moved while dialing
                (Ok(client), None) => (client, Err(Error::NotFound(plugin_id.to_string()))),
            }
        };

        // a concurrent reconnect may already have swapped in its own client
        if !Arc::ptr_eq(&stale, &old) {
            stale.close().await;
        }
        result
    }

    /// Close every connection
    pub async fn close(&self) {
        let drained: Vec<Connection> = self
            .connections
            .write()
            .await
            .drain()
            .map(|(_, c)| c)
            .collect();

        for connection in drained {
            connection.client.close().await;
            tracing::debug!(plugin_id = %connection.plugin_id, "connection closed");
        }
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Identities with a connection, sorted
    pub async fn plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// One bounded health call; a non-healthy answer is an error
pub(crate) async fn check_health(
    plugin_id: &str,
    client: &dyn PluginClient,
    timeout: Duration,
) -> Result<HealthStatus> {
    let status = with_timeout(timeout, client.health())
        .await
        .map_err(|e| Error::unreachable(plugin_id, RpcStep::Health, e.to_string()))?;

    if status.is_healthy() {
        Ok(status)
    } else {
        Err(Error::Unhealthy {
            plugin_id: plugin_id.to_string(),
            state: status.status.to_string(),
            message: status.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::rpc::testing::{Behavior, FakeDialer, HealthMode};

    fn pool(dialer: Arc<FakeDialer>) -> ConnectionPool {
        ConnectionPool::new(dialer, Duration::from_millis(200), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn add_and_get() {
        let dialer = FakeDialer::new();
        dialer.add("a:1", Behavior::default());
        let pool = pool(Arc::clone(&dialer));

        pool.add_connection("a", "a:1", None).await.unwrap();
        let connection = pool.get_connection("a").await.unwrap();
        assert_eq!(connection.address, "a:1");
        assert_eq!(connection.status, ConnectionStatus::Connected);
        assert!(pool.get_client("b").await.is_err());
    }

    #[tokio::test]
    async fn duplicate_identity_rejected() {
        let dialer = FakeDialer::new();
        dialer.add("a:1", Behavior::default());
        dialer.add("a:2", Behavior::default());
        let pool = pool(Arc::clone(&dialer));

        pool.add_connection("a", "a:1", None).await.unwrap();
        let err = pool.add_connection("a", "a:2", None).await.unwrap_err();
        assert!(matches!(err, Error::Duplicate(_)));
        assert_eq!(pool.get_connection("a").await.unwrap().address, "a:1");
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn dial_failure_names_step() {
        let pool = pool(FakeDialer::new());
        let err = pool.add_connection("a", "nowhere:1", None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Unreachable {
                step: RpcStep::Dial,
                ..
            }
        ));
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn replace_closes_previous() {
        let dialer = FakeDialer::new();
        dialer.add("a:1", Behavior::default());
        dialer.add("a:2", Behavior::default());
        let pool = pool(Arc::clone(&dialer));

        pool.add_connection("a", "a:1", None).await.unwrap();
        let client = pool.dial("a:2").await.unwrap();
        pool.replace_connection("a", client, None).await;

        assert_eq!(dialer.closes(), 1);
        assert_eq!(pool.get_connection("a").await.unwrap().address, "a:2");
    }

    #[tokio::test]
    async fn remove_unknown_is_not_found() {
        let pool = pool(FakeDialer::new());
        assert!(matches!(
            pool.remove_connection("ghost").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn health_check_isolates_failures() {
        let dialer = FakeDialer::new();
        dialer.add("ok:1", Behavior::default());
        dialer.add("sick:1", Behavior::default());
        dialer.add("slow:1", Behavior::default());
        let pool = pool(Arc::clone(&dialer));
        for (id, address) in [("ok", "ok:1"), ("sick", "sick:1"), ("slow", "slow:1")] {
            pool.add_connection(id, address, None).await.unwrap();
        }
        dialer.set_health("sick:1", HealthMode::Unhealthy);
        dialer.set_health("slow:1", HealthMode::Hang);

        let results = pool.health_check().await;
        assert_eq!(results.len(), 3);
        assert!(results["ok"].is_ok());
        assert!(matches!(results["sick"], Err(Error::Unhealthy { .. })));
        assert!(matches!(
            results["slow"],
            Err(Error::Unreachable {
                step: RpcStep::Health,
                ..
            })
        ));

        assert_eq!(pool.len().await, 3);
        let slow = pool.get_connection("slow").await.unwrap();
        assert_eq!(slow.status, ConnectionStatus::Error);
        assert!(slow.last_error.is_some());
        assert_eq!(
            pool.get_connection("ok").await.unwrap().status,
            ConnectionStatus::Connected
        );
    }

    #[tokio::test]
    async fn reconnect_failure_keeps_record() {
        let dialer = FakeDialer::new();
        dialer.add("a:1", Behavior::default());
        let pool = pool(Arc::clone(&dialer));
        pool.add_connection("a", "a:1", None).await.unwrap();

        dialer.remove("a:1");
        assert!(pool.reconnect_connection("a").await.is_err());
        let connection = pool.get_connection("a").await.unwrap();
        assert_eq!(connection.status, ConnectionStatus::Error);

        dialer.add("a:1", Behavior::default());
        pool.reconnect_connection("a").await.unwrap();
        let connection = pool.get_connection("a").await.unwrap();
        assert_eq!(connection.status, ConnectionStatus::Connected);
        assert!(connection.last_error.is_none());
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn overlapping_reconnects_close_displaced_clients() {
        let dialer = FakeDialer::new();
        dialer.add("a:1", Behavior::default());
        let pool = pool(Arc::clone(&dialer));
        pool.add_connection("a", "a:1", None).await.unwrap();

        let (first, second) = tokio::join!(
            pool.reconnect_connection("a"),
            pool.reconnect_connection("a")
        );
        first.unwrap();
        second.unwrap();

        // every dialed client except the live one has been closed
        let dials = dialer.dials.load(Ordering::SeqCst);
        assert_eq!(dials, 3);
        assert_eq!(dialer.closes(), dials - 1);
        assert_eq!(
            pool.get_connection("a").await.unwrap().status,
            ConnectionStatus::Connected
        );
    }

    #[tokio::test]
    async fn close_drains_pool() {
        let dialer = FakeDialer::new();
        dialer.add("a:1", Behavior::default());
        dialer.add("b:1", Behavior::default());
        let pool = pool(Arc::clone(&dialer));
        pool.add_connection("a", "a:1", None).await.unwrap();
        pool.add_connection("b", "b:1", None).await.unwrap();
        assert_eq!(pool.plugin_ids().await, vec!["a", "b"]);

        pool.close().await;
        assert!(pool.is_empty().await);
        assert_eq!(dialer.closes(), 2);
    }
}
