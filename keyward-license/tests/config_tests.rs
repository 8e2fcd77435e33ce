mod common;

use common::test_config;
use keyward_license::{HeartbeatConfig, LicenseConfig, LicenseError, DEFAULT_API_URL};
use std::time::Duration;

#[test]
fn defaults() {
    let config = LicenseConfig::default();
    assert_eq!(config.api_url, DEFAULT_API_URL);
    assert!(config.user_agent.starts_with("keyward/"));
    assert_eq!(config.freshness.max_age, Duration::from_secs(300));
    assert_eq!(config.freshness.skew_tolerance, Duration::from_secs(60));
    assert_eq!(config.heartbeat.miss_threshold, 3);
    assert!(!config.heartbeat.required);
    assert!(!config.scope.require_fingerprint);
}

#[test]
fn default_config_has_no_public_key() {
    assert!(matches!(
        LicenseConfig::default().validate().unwrap_err(),
        LicenseError::PublicKeyMissing
    ));
}

#[test]
fn test_config_is_valid() {
    test_config().validate().unwrap();
}

#[test]
fn heartbeat_settings_are_checked() {
    let invalid = [
        HeartbeatConfig {
            interval: Duration::ZERO,
            ..HeartbeatConfig::default()
        },
        HeartbeatConfig {
            miss_threshold: 0,
            ..HeartbeatConfig::default()
        },
        HeartbeatConfig {
            ping_timeout: Duration::ZERO,
            ..HeartbeatConfig::default()
        },
        HeartbeatConfig {
            backoff_base: Duration::from_secs(10),
            backoff_max: Duration::from_secs(1),
            ..HeartbeatConfig::default()
        },
    ];
    for heartbeat in invalid {
        let config = LicenseConfig {
            heartbeat,
            ..test_config()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            LicenseError::Config(_)
        ));
    }
}

#[test]
fn zero_max_age_is_rejected() {
    let mut config = test_config();
    config.freshness.max_age = Duration::ZERO;
    assert!(matches!(
        config.validate().unwrap_err(),
        LicenseError::Config(_)
    ));
}

#[test]
fn debug_redacts_secrets() {
    let config = LicenseConfig {
        token: Some("admin-secret-token".into()),
        ..test_config()
    };
    let debug = format!("{config:?}");
    assert!(!debug.contains("admin-secret-token"));
    assert!(!debug.contains(&config.license_key));
    assert!(debug.contains("[REDACTED]"));
}

#[test]
fn freshness_context_uses_configured_window() {
    let ctx = test_config().freshness.context();
    assert!(ctx.check(chrono::Utc::now()).is_ok());
}
