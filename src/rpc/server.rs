//! Server side of the plugin RPC contract for self-hosted providers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{Json, Router, extract::State, routing::post};
use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::{HealthStatus, PluginMetadata};
use super::{HEALTH_PATH, METADATA_PATH};
use crate::Result;

/// How long a stopping server may take to drain connections
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Entry point a self-hostable provider exposes over RPC
#[async_trait]
pub trait PluginService: Send + Sync {
    /// Metadata advertised to the discovery service
    fn metadata(&self) -> PluginMetadata;

    /// Current health of the provider
    async fn health(&self) -> HealthStatus;
}

/// Service that advertises a fixed definition and reports healthy while up
#[derive(Debug)]
pub struct StaticPluginService {
    metadata: PluginMetadata,
    started: Instant,
}

impl StaticPluginService {
    #[must_use]
    pub fn new(metadata: PluginMetadata) -> Self {
        Self {
            metadata,
            started: Instant::now(),
        }
    }
}

#[async_trait]
impl PluginService for StaticPluginService {
    fn metadata(&self) -> PluginMetadata {
        self.metadata.clone()
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::healthy("serving")
            .with_detail("uptime_secs", self.started.elapsed().as_secs().to_string())
    }
}

type SharedService = Arc<dyn PluginService>;

/// Build the RPC routes for a service
pub fn router(service: SharedService) -> Router {
    Router::new()
        .route(METADATA_PATH, post(get_metadata))
        .route(HEALTH_PATH, post(check_health))
        .with_state(service)
}

async fn get_metadata(State(service): State<SharedService>) -> Json<PluginMetadata> {
    Json(service.metadata())
}

async fn check_health(State(service): State<SharedService>) -> Json<HealthStatus> {
    Json(service.health().await)
}

/// A running plugin server
#[derive(Debug)]
pub struct ServerHandle {
    address: SocketAddr,
    instance_id: Uuid,
    started_at: DateTime<Utc>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the server is bound to
    #[must_use]
    pub const fn address(&self) -> SocketAddr {
        self.address
    }

    /// Unique ID of this server instance
    #[must_use]
    pub const fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whether the serve task has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop accepting requests and wait for the serve task to exit
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let abort = self.task.abort_handle();
        match tokio::time::timeout(SHUTDOWN_GRACE, self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(address = %self.address, error = %e, "plugin server task failed"),
            Err(_) => {
                tracing::warn!(address = %self.address, "plugin server did not drain in time, aborting");
                abort.abort();
            }
        }
    }
}

/// Bind `addr` and serve the plugin RPC routes until `shutdown` is cancelled
///
/// # Errors
///
/// Returns error if the address cannot be bound
pub async fn serve(
    service: SharedService,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<ServerHandle> {
    let listener = TcpListener::bind(addr).await?;
    let address = listener.local_addr()?;
    let app = router(service);

    let token = shutdown.clone();
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        {
            tracing::error!(%address, error = %e, "plugin server error");
        }
        tracing::debug!(%address, "plugin server stopped");
    });

    tracing::debug!(%address, "plugin server listening");

    Ok(ServerHandle {
        address,
        instance_id: Uuid::new_v4(),
        started_at: Utc::now(),
        shutdown,
        task,
    })
}
