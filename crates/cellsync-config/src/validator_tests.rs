use super::*;

fn with_image(mut config: Config) -> Config {
    config
        .kernels
        .images
        .insert("python".to_string(), "registry.local/python".to_string());
    config.kernels.signing_key = "secret".to_string();
    config
}

#[test]
fn test_validate_default_config() {
    let config = Config::default();
    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.is_valid());
    assert!(result.warnings.iter().any(|w| w.path == "kernels.images"));
    assert!(result.warnings.iter().any(|w| w.path == "kernels.signing_key"));
}

#[test]
fn test_validate_configured_kernels_has_no_warnings() {
    let config = with_image(Config::default());
    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.is_valid());
    assert!(result.warnings.is_empty());
}

#[test]
fn test_validate_invalid_port() {
    let mut config = Config::default();
    config.server.port = 0;

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(!result.is_valid());
    assert!(result.errors.iter().any(|e| e.path == "server.port"));
}

#[test]
fn test_validate_debounce_exceeds_max_wait() {
    let mut config = Config::default();
    config.persistence.debounce_ms = 30_000;
    config.persistence.max_wait_ms = 20_000;

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(!result.is_valid());
    assert!(result.errors.iter().any(|e| e.path == "persistence.debounce_ms"));
}

#[test]
fn test_validate_zero_intervals() {
    let mut config = Config::default();
    config.kernels.max_lifetime_ms = 0;
    config.kernels.sweep_interval_ms = 0;

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "kernels.max_lifetime_ms"));
    assert!(result.errors.iter().any(|e| e.path == "kernels.sweep_interval_ms"));
}

#[test]
fn test_validate_invalid_namespace() {
    let mut config = Config::default();
    config.kernels.namespace = "Not_Valid".to_string();

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "kernels.namespace"));
}

#[test]
fn test_validate_port_base_overflow() {
    let mut config = Config::default();
    config.kernels.port_base = 65_533;

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "kernels.port_base"));

    config.kernels.port_base = 65_531;
    let result = ConfigValidator::validate(&config).unwrap();
    assert!(!result.errors.iter().any(|e| e.path == "kernels.port_base"));
}

#[test]
fn test_validate_unknown_kernel_kind() {
    let mut config = with_image(Config::default());
    config
        .kernels
        .images
        .insert("cobol".to_string(), "registry.local/cobol".to_string());

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "kernels.images.cobol"));
}

#[test]
fn test_validate_unknown_store_backend() {
    let mut config = Config::default();
    config.store.backend = "postgres".to_string();

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "store.backend"));
}

#[test]
fn test_validate_platform_url() {
    let mut config = Config::default();
    config.platform.api_url = "kubernetes.default.svc".to_string();

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "platform.api_url"));
}
