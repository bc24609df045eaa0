//! Integration tests for logging and runtime configuration

use core_runtime::config::BridgeConfig;
use core_runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
use core_runtime::Error;

#[test]
fn test_logging_initializes_once() {
    // Only one global subscriber per process, so both checks share a test.
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug);

    init_logging(config.clone()).unwrap();
    tracing::info!(target: "core_runtime", "logging ready");

    match init_logging(config) {
        Err(Error::Config(msg)) => assert!(msg.contains("Failed to initialize logging")),
        other => panic!("expected second init to fail, got {:?}", other),
    }
}

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Json)
        .with_level(LogLevel::Warn)
        .with_spans(false)
        .with_target(false)
        .with_thread_info(false);

    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(!config.display_thread_info);
}

#[test]
fn test_runtime_drives_offloads_through_configured_limit() {
    let config = BridgeConfig::builder()
        .max_blocking_threads(2)
        .max_concurrent_offloads(1)
        .build()
        .unwrap();
    let runtime = config.build_runtime().unwrap();
    let offloader = config.offloader();

    let total = runtime.block_on(async move {
        let mut total = 0;
        for n in 1..=4 {
            total += offloader.run(move || n * 10).await.unwrap();
        }
        total
    });

    assert_eq!(total, 100);
}

#[test]
fn test_portal_from_config_is_closed_until_opened() {
    let config = BridgeConfig::builder().portal_capacity(2).build().unwrap();
    let portal = config.portal();
    assert!(!portal.is_open());

    let runtime = config.build_runtime().unwrap();
    runtime.block_on(async {
        portal.open().unwrap();
        assert!(portal.is_open());
        portal.close().await.unwrap();
    });
    assert!(!portal.is_open());
}
