//! Self-hosted plugin lifecycle through the runtime

use std::collections::HashSet;

use beacon_runtime::{Category, ControlAction, Error, PluginState, Runtime};

mod common;
use common::{self_hosted_provider, test_config};

#[tokio::test]
async fn test_start_serves_every_self_hosted_provider() {
    let mut config = test_config(44300, 44399);
    config.providers = vec![
        self_hosted_provider("whisper", Category::SpeechToText),
        self_hosted_provider("piper", Category::TextToSpeech),
    ];

    let mut runtime = Runtime::new(config).unwrap();
    runtime.start().await.unwrap();

    assert_eq!(
        runtime.lifecycle().running_plugins().await,
        vec!["piper".to_string(), "whisper".to_string()]
    );

    let statuses = runtime.status().list_plugins(None).await;
    assert_eq!(statuses.len(), 2);

    let mut ports = HashSet::new();
    for status in &statuses {
        assert_eq!(status.state, PluginState::Running);
        assert!(status.self_hosted);
        let port = status.port.unwrap();
        assert!((44300..=44399).contains(&port));
        assert!(ports.insert(port), "port {port} handed out twice");
    }

    let stt = runtime
        .status()
        .list_plugins(Some(&Category::SpeechToText))
        .await;
    assert_eq!(stt.len(), 1);
    assert_eq!(stt[0].id, "whisper");

    runtime.shutdown().await;
    assert!(runtime.lifecycle().running_plugins().await.is_empty());
    assert_eq!(runtime.allocator().get_stats().allocated, 0);
    assert!(runtime.pool().is_empty().await);
}

#[tokio::test]
async fn test_stop_and_start_actions() {
    let mut config = test_config(44400, 44499);
    config.providers = vec![self_hosted_provider("whisper", Category::SpeechToText)];

    let mut runtime = Runtime::new(config).unwrap();
    runtime.start().await.unwrap();
    let status = runtime.status();

    let result = status.execute("whisper", ControlAction::Stop).await;
    assert!(result.success);
    let stopped = result.status.unwrap();
    assert_eq!(stopped.state, PluginState::Stopped);
    assert_eq!(stopped.port, None);
    assert!(runtime.discovery().get_plugin("whisper").await.is_err());

    let result = status.execute("whisper", ControlAction::Stop).await;
    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, "not_running");

    let result = status.execute("whisper", ControlAction::Start).await;
    assert!(result.success);
    assert_eq!(result.status.unwrap().state, PluginState::Running);

    let result = status.execute("whisper", ControlAction::Start).await;
    assert_eq!(result.error.unwrap().kind, "already_running");

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_reallocate_moves_to_new_port() {
    let mut config = test_config(44500, 44599);
    config.providers = vec![self_hosted_provider("whisper", Category::SpeechToText)];

    let mut runtime = Runtime::new(config).unwrap();
    runtime.start().await.unwrap();

    let before = runtime.allocator().plugin_port("whisper").unwrap();
    let result = runtime
        .status()
        .execute("whisper", ControlAction::ReallocatePort)
        .await;
    assert!(result.success, "{:?}", result.error);

    let after = runtime.allocator().plugin_port("whisper").unwrap();
    assert_ne!(before, after);

    let info = runtime.discovery().get_plugin("whisper").await.unwrap();
    assert!(info.address.ends_with(&format!(":{after}")));
    assert_eq!(
        runtime.lifecycle().running_address("whisper").await.unwrap().port(),
        after
    );

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_range_reports_failure() {
    let mut config = test_config(44600, 44600);
    config.providers = vec![
        self_hosted_provider("a", Category::Tool),
        self_hosted_provider("b", Category::Tool),
    ];

    let mut runtime = Runtime::new(config).unwrap();
    runtime.start().await.unwrap();

    // providers start in identity order, so "a" wins the only port
    assert!(runtime.lifecycle().is_running("a").await);
    assert!(!runtime.lifecycle().is_running("b").await);

    let err = runtime.lifecycle().start_plugin("b").await.unwrap_err();
    assert!(matches!(err, Error::PortExhausted { .. }));

    // a boot failure is flagged, not reported as an intentional stop
    let status = runtime.status().get_plugin_status("b").await.unwrap();
    assert_eq!(status.state, PluginState::Error);
    assert!(status.last_error.unwrap().contains("no available port"));

    let listed = runtime.status().list_plugins(None).await;
    assert!(listed.iter().any(|p| p.id == "b" && p.state == PluginState::Error));
    let a = runtime.status().get_plugin_status("a").await.unwrap();
    assert_eq!(a.state, PluginState::Running);
    assert!(a.last_error.is_none());

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_unknown_provider_rejected() {
    let mut runtime = Runtime::new(test_config(44700, 44709)).unwrap();
    runtime.start().await.unwrap();

    let result = runtime.status().execute("nope", ControlAction::Start).await;
    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, "not_found");
    assert!(result.status.is_none());

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_invalid_config_rejected_before_build() {
    let mut config = test_config(44720, 44729);
    config.health.interval = std::time::Duration::ZERO;
    assert!(matches!(Runtime::new(config), Err(Error::Config(_))));

    let mut config = test_config(44720, 44729);
    config.ports.start = 44729;
    config.ports.end = 44720;
    assert!(matches!(Runtime::new(config), Err(Error::Config(_))));
}

#[tokio::test]
async fn test_run_until_shuts_down() {
    let mut config = test_config(44710, 44719);
    config.providers = vec![self_hosted_provider("whisper", Category::SpeechToText)];

    let runtime = Runtime::new(config).unwrap();
    runtime
        .run_until(tokio::time::sleep(std::time::Duration::from_millis(100)))
        .await
        .unwrap();

    // nothing left bound on the range
    std::net::TcpListener::bind("127.0.0.1:44710").unwrap();
}
