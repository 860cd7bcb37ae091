//! Configuration loader.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ConfigError;
use crate::schema::Config;

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("static env var pattern"));

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a file, falling back to defaults when it is absent.
    pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::NotFound(_)) => {
                let mut config = Config::default();
                Self::expand_paths(&mut config);
                Ok(config)
            }
            other => other,
        }
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let mut config: Config = toml::from_str(&expanded)?;
        Self::expand_paths(&mut config);
        Ok(config)
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let mut result = content.to_string();

        for cap in ENV_VAR.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    fn expand_paths(config: &mut Config) {
        config.store.path = Self::expand_path_buf(&config.store.path);
        config.logging.directory = Self::expand_path_buf(&config.logging.directory);
    }

    fn expand_path_buf(path: &Path) -> PathBuf {
        PathBuf::from(Self::expand_path(&path.to_string_lossy()))
    }

    /// Expand shell-style paths (e.g., `~/.cellsync`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.kernels.max_lifetime_ms, 3_600_000);
    }

    #[test]
    fn test_load_basic_config() {
        let content = r#"
            read_only = true

            [server]
            host = "0.0.0.0"
            port = 3000

            [kernels]
            namespace = "labs"
            [kernels.images]
            python = "registry.local/python:3.12"
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert!(config.read_only);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.kernels.namespace, "labs");
        assert_eq!(config.kernels.images["python"], "registry.local/python:3.12");
    }

    #[test]
    fn test_load_camel_case_aliases() {
        let content = r#"
            [kernels]
            kernelMaxLifetime = 60000
            recycleSweepInterval = 1000

            [replica]
            evictionGrace = 500

            [persistence]
            persistDebounce = 100
            persistMaxWait = 200
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.kernels.max_lifetime_ms, 60_000);
        assert_eq!(config.kernels.sweep_interval_ms, 1_000);
        assert_eq!(config.replica.eviction_grace_ms, 500);
        assert_eq!(config.persistence.debounce_ms, 100);
        assert_eq!(config.persistence.max_wait_ms, 200);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server]").unwrap();
        writeln!(file, "port = 5000").unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::load(Path::new("/nonexistent/path/cellsync.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_or_default_nonexistent_file() {
        let config =
            ConfigLoader::load_or_default(Path::new("/nonexistent/path/cellsync.toml")).unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(!config.store.path.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = ConfigLoader::load_str("invalid = [unclosed");
        assert!(result.is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: This test runs in isolation and sets a unique test-only env var
        unsafe {
            std::env::set_var("CELLSYNC_TEST_SIGNING_KEY", "s3cret");
        }
        let content = "[kernels]\nsigning_key = \"${CELLSYNC_TEST_SIGNING_KEY}\"";
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.kernels.signing_key, "s3cret");
        unsafe {
            std::env::remove_var("CELLSYNC_TEST_SIGNING_KEY");
        }
    }

    #[test]
    fn test_expand_env_vars_not_set() {
        let content = "value = \"${NONEXISTENT_CELLSYNC_VAR_12345}\"";
        let result = ConfigLoader::expand_env_vars(content);
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(_))));
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = ConfigLoader::expand_path("~/test");
        assert!(!expanded.starts_with('~'));
        assert!(expanded.ends_with("/test"));
    }
}
