use std::time::Duration;

use super::*;

#[test]
fn empty_file_uses_defaults() {
    let config = EphemeraConfig::from_toml("").unwrap();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.store.backend, "memory");
    assert_eq!(config.blob.backend, "memory");
    assert!(config.sweeper.enabled);
    assert_eq!(config.sweeper.interval_seconds, 60);
    assert!(!config.lifecycle.eager_cleanup);
    assert!(!config.sweeper.hard_delete);
}

#[test]
fn sections_map_to_runtime_configs() {
    let config = EphemeraConfig::from_toml(
        r#"
        [lifecycle]
        storage_timeout_ms = 2500
        eager_cleanup = true

        [sweeper]
        interval_seconds = 15
        batch_size = 50
        claim_grace_seconds = 5
        hard_delete = true

        [limits]
        max_file_size_bytes = 1024
        max_ttl_seconds = 3600
        max_downloads = 10
        "#,
    )
    .unwrap();

    let lifecycle = config.lifecycle_config();
    assert_eq!(lifecycle.storage_timeout, Duration::from_millis(2500));
    assert!(lifecycle.eager_cleanup);
    assert!(lifecycle.hard_delete);
    assert_eq!(lifecycle.claim_grace, Duration::from_secs(5));
    assert_eq!(lifecycle.limits.max_size_bytes, 1024);
    assert_eq!(lifecycle.limits.max_ttl, Duration::from_secs(3600));
    assert_eq!(lifecycle.limits.max_downloads, 10);

    let sweeper = config.sweeper_config();
    assert_eq!(sweeper.interval, Duration::from_secs(15));
    assert_eq!(sweeper.batch_size, 50);
    assert_eq!(sweeper.claim_grace, Duration::from_secs(5));
}

#[test]
fn base_url_prefers_external_url() {
    let mut server = ServerConfig::default();
    assert_eq!(server.base_url(), "http://127.0.0.1:8080");
    server.external_url = Some("https://drop.example.com/".into());
    assert_eq!(server.base_url(), "https://drop.example.com");
}

#[test]
fn invalid_toml_is_a_config_error() {
    let err = EphemeraConfig::from_toml("[server]\nport = \"eighty\"").unwrap_err();
    assert!(matches!(err, ServerError::Config(_)));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let config = EphemeraConfig::load("/nonexistent/ephemera.toml").unwrap();
    assert_eq!(config.limits.default_max_downloads, 1);
}
