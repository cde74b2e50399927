//! Client side of the plugin RPC contract

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;

use super::types::{HealthStatus, PluginMetadata};
use super::{HEALTH_PATH, METADATA_PATH};
use crate::{Error, Result};

/// Stub for calling one plugin endpoint
#[async_trait]
pub trait PluginClient: Send + Sync {
    /// Address this client was dialed with
    fn address(&self) -> &str;

    /// Fetch the plugin's advertised metadata
    async fn metadata(&self) -> Result<PluginMetadata>;

    /// Call the plugin's health endpoint
    async fn health(&self) -> Result<HealthStatus>;

    /// Close the channel; later calls fail
    async fn close(&self);
}

/// Opens client channels to plugin addresses
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, address: &str) -> Result<Arc<dyn PluginClient>>;
}

/// Dialer for plugins speaking HTTP/JSON
#[derive(Debug, Clone)]
pub struct HttpDialer {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl HttpDialer {
    #[must_use]
    pub const fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }
}

/// Split an address into `(base_url, host:port)`
fn normalize(address: &str) -> (String, String) {
    let authority = address
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string();
    (format!("http://{authority}"), authority)
}

#[async_trait]
impl Dialer for HttpDialer {
    async fn dial(&self, address: &str) -> Result<Arc<dyn PluginClient>> {
        let (base_url, authority) = normalize(address);

        // Verify the endpoint accepts connections before handing out a stub
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&authority)).await {
            Ok(Ok(_stream)) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {authority} timed out after {:?}", self.connect_timeout),
                )
                .into());
            }
        }

        let http = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .pool_max_idle_per_host(1)
            .build()?;

        tracing::trace!(address, "dialed plugin");

        Ok(Arc::new(HttpPluginClient {
            address: address.to_string(),
            base_url,
            http,
            closed: AtomicBool::new(false),
        }))
    }
}

/// HTTP/JSON plugin stub
#[derive(Debug)]
pub struct HttpPluginClient {
    address: String,
    base_url: String,
    http: reqwest::Client,
    closed: AtomicBool,
}

impl HttpPluginClient {
    async fn call<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                format!("connection to {} closed", self.address),
            )
            .into());
        }

        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(&serde_json::json!({}))
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl PluginClient for HttpPluginClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn metadata(&self) -> Result<PluginMetadata> {
        self.call(METADATA_PATH).await
    }

    async fn health(&self) -> Result<HealthStatus> {
        self.call(HEALTH_PATH).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Run a plugin call under a deadline
///
/// # Errors
///
/// Returns the call's error, or an IO timeout error if the deadline passes
pub async fn with_timeout<T>(
    timeout: Duration,
    call: impl std::future::Future<Output = Result<T>> + Send,
) -> Result<T> {
    tokio::time::timeout(timeout, call).await.map_err(|_| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("call timed out after {timeout:?}"),
        ))
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_scheme() {
        let (url, authority) = normalize("127.0.0.1:50051");
        assert_eq!(url, "http://127.0.0.1:50051");
        assert_eq!(authority, "127.0.0.1:50051");

        let (url, authority) = normalize("http://localhost:9000/");
        assert_eq!(url, "http://localhost:9000");
        assert_eq!(authority, "localhost:9000");
    }

    #[tokio::test]
    async fn dial_refused_port_fails() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let dialer = HttpDialer::new(Duration::from_millis(500), Duration::from_secs(1));
        assert!(dialer.dial(&format!("127.0.0.1:{port}")).await.is_err());
    }

    #[tokio::test]
    async fn with_timeout_expires() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
