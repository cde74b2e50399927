//! Operator HTTP API

pub mod health;
pub mod plugins;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::status::StatusManager;

/// Shared state for API handlers
pub type SharedStatus = Arc<StatusManager>;

/// Build the router with all routes
pub fn router(status: SharedStatus) -> Router {
    Router::new()
        .nest("/api", plugins::router(Arc::clone(&status)))
        .merge(health::router())
        .merge(health::ready_router(status))
        .layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    status: SharedStatus,
    addr: SocketAddr,
}

impl ApiServer {
    #[must_use]
    pub const fn new(status: SharedStatus, addr: SocketAddr) -> Self {
        Self { status, addr }
    }

    /// Bind and serve in a background task until `shutdown` is cancelled
    ///
    /// Returns the bound address and the serve task.
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn spawn(self, shutdown: CancellationToken) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;
        let addr = listener.local_addr()?;
        let app = router(self.status);

        tracing::info!(%addr, "API server listening");

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                tracing::error!(error = %e, "API server error");
            }
            tracing::debug!("API server stopped");
        });

        Ok((addr, task))
    }
}
