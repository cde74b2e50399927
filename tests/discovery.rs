//! Discovery and recovery against real plugin servers

use std::sync::Arc;
use std::time::Duration;

use beacon_runtime::error::RpcStep;
use beacon_runtime::rpc::HttpDialer;
use beacon_runtime::{
    ConnectionPool, ControlAction, DiscoveryService, Error, PluginState, Runtime,
};

mod common;
use common::{TestService, remote_plugin, spawn_plugin, spawn_plugin_at, test_config};

fn discovery(timeout: Duration) -> DiscoveryService {
    let dialer = Arc::new(HttpDialer::new(timeout, timeout));
    DiscoveryService::new(Arc::new(ConnectionPool::new(dialer, timeout, timeout)))
}

#[tokio::test]
async fn test_register_real_plugin() {
    let server = spawn_plugin(TestService::new("whisper")).await;
    let discovery = discovery(Duration::from_secs(1));

    let info = discovery
        .register_plugin("whisper", &server.address().to_string())
        .await
        .unwrap();

    assert_eq!(info.id, "whisper");
    assert_eq!(info.plugin_type, "speech_to_text");
    assert!(info.health.is_healthy());
    assert!(info.has_capability("transcribe"));
    assert_eq!(discovery.pool().len().await, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_health_timeout_rejects_registration() {
    let service = TestService::new("p1");
    service.set_delay(Duration::from_secs(2));
    let server = spawn_plugin(service).await;
    let discovery = discovery(Duration::from_millis(200));

    let err = discovery
        .register_plugin("p1", &server.address().to_string())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Unreachable {
            step: RpcStep::Health,
            ..
        }
    ));
    assert!(matches!(
        discovery.get_plugin("p1").await,
        Err(Error::NotFound(_))
    ));
    assert!(discovery.pool().is_empty().await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_unhealthy_plugin_not_registered() {
    let service = TestService::new("sick");
    service.set_healthy(false);
    let server = spawn_plugin(service).await;
    let discovery = discovery(Duration::from_secs(1));

    let err = discovery
        .register_plugin("sick", &server.address().to_string())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Unhealthy { .. }));
    assert!(discovery.is_empty().await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_nothing_listening_is_unreachable_dial() {
    let discovery = discovery(Duration::from_millis(200));

    // bind then drop to get a port that refuses connections
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = discovery
        .register_plugin("ghost", &addr.to_string())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Unreachable {
            step: RpcStep::Dial,
            ..
        }
    ));
}

#[tokio::test]
async fn test_killed_plugin_stays_listed_until_reallocated() {
    let service = TestService::new("p2");
    let server = spawn_plugin(Arc::clone(&service)).await;
    let addr = server.address();

    let mut config = test_config(44100, 44199);
    config.health.failure_threshold = 2;
    config.plugins = vec![remote_plugin("p2", &addr.to_string())];

    let mut runtime = Runtime::new(config).unwrap();
    runtime.start().await.unwrap();

    let status = Arc::clone(runtime.status());
    let registered = runtime.discovery().get_plugin("p2").await.unwrap();

    server.shutdown().await;

    for expected in 1..=2 {
        let results = status.sweep().await;
        assert!(results["p2"].is_err());

        let plugin = status.get_plugin_status("p2").await.unwrap();
        assert_eq!(plugin.state, PluginState::Unreachable);
        assert_eq!(plugin.consecutive_failures, expected);
        assert_eq!(plugin.last_seen, Some(registered.last_seen));
    }

    // still listed while failing
    let listed = status.list_plugins(None).await;
    assert!(listed.iter().any(|p| p.id == "p2"));

    let server = spawn_plugin_at(service, addr).await;

    let result = status.execute("p2", ControlAction::ReallocatePort).await;
    assert!(result.success, "{:?}", result.error);

    let plugin = result.status.unwrap();
    assert_eq!(plugin.state, PluginState::Running);
    assert_eq!(plugin.consecutive_failures, 0);
    assert!(plugin.last_seen.unwrap() > registered.last_seen);

    runtime.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_auto_recovery_after_threshold() {
    let service = TestService::new("p3");
    let server = spawn_plugin(Arc::clone(&service)).await;
    let addr = server.address();

    let mut config = test_config(44200, 44299);
    config.health.failure_threshold = 1;
    config.health.auto_recover = true;
    config.plugins = vec![remote_plugin("p3", &addr.to_string())];

    let mut runtime = Runtime::new(config).unwrap();
    runtime.start().await.unwrap();
    let status = Arc::clone(runtime.status());

    // unhealthy answers fail the sweep but the endpoint stays reachable
    service.set_healthy(false);
    let results = status.sweep().await;
    assert!(matches!(results["p3"], Err(Error::Unhealthy { .. })));

    // recovery re-registers, which verifies health again and fails
    let plugin = status.get_plugin_status("p3").await.unwrap();
    assert_eq!(plugin.state, PluginState::Unhealthy);
    assert!(plugin.last_error.is_some());

    service.set_healthy(true);
    status.sweep().await;
    let plugin = status.get_plugin_status("p3").await.unwrap();
    assert_eq!(plugin.state, PluginState::Running);
    assert_eq!(plugin.consecutive_failures, 0);

    runtime.shutdown().await;
    server.shutdown().await;
}
