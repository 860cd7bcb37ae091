//! Configuration validation.

use cellsync_protocols::KernelKind;

use crate::error::ConfigError;
use crate::schema::{Config, KERNEL_PORT_COUNT};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_server(config, &mut result);
        Self::validate_replica(config, &mut result);
        Self::validate_persistence(config, &mut result);
        Self::validate_store(config, &mut result);
        Self::validate_kernels(config, &mut result);
        Self::validate_platform(config, &mut result);

        Ok(result)
    }

    fn validate_server(config: &Config, result: &mut ValidationResult) {
        if config.server.port == 0 {
            result.add_error(ValidationError::new("server.port", "Port cannot be 0"));
        }

        if config.server.host.is_empty() {
            result.add_error(ValidationError::new("server.host", "Host cannot be empty"));
        }
    }

    fn validate_replica(config: &Config, result: &mut ValidationResult) {
        if config.replica.eviction_grace_ms == 0 {
            result.add_warning(ValidationWarning::new(
                "replica.eviction_grace_ms",
                "eviction grace is 0, replicas are destroyed as soon as the last connection closes",
            ));
        }
    }

    fn validate_persistence(config: &Config, result: &mut ValidationResult) {
        let persistence = &config.persistence;
        if persistence.debounce_ms == 0 {
            result.add_error(ValidationError::new(
                "persistence.debounce_ms",
                "debounce_ms must be greater than 0",
            ));
        }

        if persistence.max_wait_ms == 0 {
            result.add_error(ValidationError::new(
                "persistence.max_wait_ms",
                "max_wait_ms must be greater than 0",
            ));
        }

        if persistence.debounce_ms > persistence.max_wait_ms {
            result.add_error(ValidationError::new(
                "persistence.debounce_ms",
                format!(
                    "debounce_ms ({}) cannot exceed max_wait_ms ({})",
                    persistence.debounce_ms, persistence.max_wait_ms
                ),
            ));
        }

        if persistence.retry_base_delay_ms > persistence.retry_max_delay_ms {
            result.add_warning(ValidationWarning::new(
                "persistence.retry_base_delay_ms",
                "retry_base_delay_ms exceeds retry_max_delay_ms, every retry uses the maximum delay",
            ));
        }
    }

    fn validate_store(config: &Config, result: &mut ValidationResult) {
        let valid_backends = ["sqlite", "memory"];
        if !valid_backends.contains(&config.store.backend.as_str()) {
            result.add_error(ValidationError::new(
                "store.backend",
                format!(
                    "Unknown store backend '{}', valid values: {:?}",
                    config.store.backend, valid_backends
                ),
            ));
        }

        if config.store.backend == "memory" {
            result.add_warning(ValidationWarning::new(
                "store.backend",
                "memory backend keeps snapshots only for the lifetime of the process",
            ));
        }
    }

    fn validate_kernels(config: &Config, result: &mut ValidationResult) {
        let kernels = &config.kernels;
        if kernels.max_lifetime_ms == 0 {
            result.add_error(ValidationError::new(
                "kernels.max_lifetime_ms",
                "max_lifetime_ms must be greater than 0",
            ));
        }

        if kernels.sweep_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "kernels.sweep_interval_ms",
                "sweep_interval_ms must be greater than 0",
            ));
        }

        if kernels.readiness_attempts == 0 {
            result.add_error(ValidationError::new(
                "kernels.readiness_attempts",
                "readiness_attempts must be greater than 0",
            ));
        }

        if !is_dns_label(&kernels.namespace) {
            result.add_error(ValidationError::new(
                "kernels.namespace",
                format!(
                    "'{}' is not a valid namespace (lowercase letters, digits and '-', at most 63 characters)",
                    kernels.namespace
                ),
            ));
        }

        if kernels.port_base == 0 || kernels.port_base.checked_add(KERNEL_PORT_COUNT - 1).is_none() {
            result.add_error(ValidationError::new(
                "kernels.port_base",
                format!(
                    "port_base {} leaves no room for {} consecutive ports",
                    kernels.port_base, KERNEL_PORT_COUNT
                ),
            ));
        }

        if kernels.images.is_empty() {
            result.add_warning(ValidationWarning::new(
                "kernels.images",
                "No kernel images configured, kernels cannot be started",
            ));
        }

        for name in kernels.images.keys() {
            if name.parse::<KernelKind>().is_err() {
                result.add_error(ValidationError::new(
                    format!("kernels.images.{}", name),
                    format!("Unknown kernel kind '{}'", name),
                ));
            }
        }

        if kernels.signing_key.is_empty() {
            result.add_warning(ValidationWarning::new(
                "kernels.signing_key",
                "signing_key is empty, kernel messages are neither signed nor verified",
            ));
        }
    }

    fn validate_platform(config: &Config, result: &mut ValidationResult) {
        let url = &config.platform.api_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            result.add_error(ValidationError::new(
                "platform.api_url",
                "api_url must start with http:// or https://",
            ));
        }
    }
}

fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-')
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
