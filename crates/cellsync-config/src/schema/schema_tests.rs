use super::*;

use cellsync_protocols::KernelKind;

#[test]
fn test_config_default() {
    let config = Config::default();
    assert!(!config.read_only);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.store.backend, "sqlite");
}

#[test]
fn test_replica_config_default() {
    let replica = ReplicaConfig::default();
    assert_eq!(replica.eviction_grace(), Duration::from_secs(30));
}

#[test]
fn test_persistence_config_default() {
    let persistence = PersistenceConfig::default();
    assert_eq!(persistence.debounce(), Duration::from_secs(10));
    assert_eq!(persistence.max_wait(), Duration::from_secs(20));
    assert_eq!(persistence.max_retries, 3);
}

#[test]
fn test_kernels_config_default() {
    let kernels = KernelsConfig::default();
    assert_eq!(kernels.max_lifetime(), Duration::from_secs(3600));
    assert_eq!(kernels.sweep_interval(), Duration::from_secs(300));
    assert_eq!(kernels.namespace, "notebooks");
    assert_eq!(kernels.port_base, 9000);
    assert!(kernels.signing_key.is_empty());
    assert!(kernels.images.is_empty());
}

#[test]
fn test_image_for_kind() {
    let mut kernels = KernelsConfig::default();
    kernels
        .images
        .insert("python".to_string(), "registry.local/python:3.12".to_string());
    assert_eq!(
        kernels.image_for(KernelKind::Python),
        Some("registry.local/python:3.12")
    );
    assert_eq!(kernels.image_for(KernelKind::Julia), None);
}

#[test]
fn test_platform_config_default() {
    let platform = PlatformConfig::default();
    assert_eq!(platform.api_url, "https://kubernetes.default.svc");
    assert!(platform.token.is_empty());
}

#[test]
fn test_config_serialization_roundtrip() {
    let mut config = Config::default();
    config.read_only = true;
    config.kernels.port_base = 9100;

    let text = toml::to_string(&config).unwrap();
    let parsed: Config = toml::from_str(&text).unwrap();
    assert!(parsed.read_only);
    assert_eq!(parsed.kernels.port_base, 9100);
}

#[test]
fn test_read_only_alias() {
    let config: Config = toml::from_str("readOnly = true").unwrap();
    assert!(config.read_only);
}
