//! Configuration Loader
//!
//! Environment-aware settings loading. Sources are layered in order:
//! built-in defaults, the base settings file, an optional
//! `<stem>.<environment>.<ext>` override file next to it, then
//! `SYNAPSE__SECTION__FIELD` environment variables.

use super::error::{ConfigResult, ConfigurationError};
use super::SynapseConfig;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Prefix of environment variable overrides
const ENV_PREFIX: &str = "SYNAPSE";
const ENV_SEPARATOR: &str = "__";

/// File names tried when no explicit settings file is given
const DEFAULT_CONFIG_FILES: [&str; 3] = [
    "config/synapse.yaml",
    "config/synapse.toml",
    "config/synapse.json",
];

/// Loaded, validated settings together with their origin
#[derive(Debug)]
pub struct ConfigManager {
    config: SynapseConfig,
    environment: String,
    config_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load settings with environment auto-detection and default file discovery
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        let config_file = DEFAULT_CONFIG_FILES
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists());
        Self::load_with_env(config_file.as_deref(), &environment)
    }

    /// Load settings from an explicit file (which must exist)
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_file_with_env(path, &environment)
    }

    /// Load settings from an explicit file with an explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_file_with_env(
        path: impl AsRef<Path>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigurationError::ConfigFileNotFound {
                path: path.to_path_buf(),
            });
        }
        Self::load_with_env(Some(path), environment)
    }

    /// Build settings from defaults and environment variables only
    pub fn from_environment() -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_with_env(None, &environment)
    }

    /// Wrap already-built settings after validating them
    pub fn from_config(config: SynapseConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_file: None,
        }))
    }

    fn load_with_env(
        config_file: Option<&Path>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        debug!(
            environment = %environment,
            config_file = ?config_file,
            "Loading Synapse settings"
        );

        let mut builder = ::config::Config::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(::config::File::from(path).required(true));

            if let Some(override_path) = Self::environment_override_path(path, environment) {
                if override_path.exists() {
                    debug!(
                        override_file = %override_path.display(),
                        "Applying environment override file"
                    );
                    builder = builder.add_source(::config::File::from(override_path).required(false));
                }
            }
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let source_name = config_file
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "environment".to_string());

        let config: SynapseConfig = builder
            .build()
            .map_err(|e| ConfigurationError::load_error(&source_name, e))?
            .try_deserialize()
            .map_err(|e| ConfigurationError::load_error(&source_name, e))?;

        config.validate()?;

        info!(
            environment = %environment,
            source = %source_name,
            worker_pool_size = config.mediation.worker_pool_size,
            max_retries = config.reliable_messaging.max_retries,
            "⚙️ Settings loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_file: config_file.map(Path::to_path_buf),
        }))
    }

    /// Get the loaded settings
    pub fn config(&self) -> &SynapseConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the settings file the configuration came from, if any
    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// `config/synapse.yaml` + `test` -> `config/synapse.test.yaml`
    fn environment_override_path(path: &Path, environment: &str) -> Option<PathBuf> {
        let stem = path.file_stem()?.to_str()?;
        let extension = path.extension()?.to_str()?;
        Some(path.with_file_name(format!("{stem}.{environment}.{extension}")))
    }

    /// Detect current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("SYNAPSE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_is_reported() {
        let result = ConfigManager::load_from_file_with_env("/nonexistent/synapse.yaml", "test");
        assert!(matches!(
            result,
            Err(ConfigurationError::ConfigFileNotFound { .. })
        ));
    }

    #[test]
    fn test_override_path_naming() {
        let path = Path::new("config/synapse.yaml");
        assert_eq!(
            ConfigManager::environment_override_path(path, "test"),
            Some(PathBuf::from("config/synapse.test.yaml"))
        );
    }

    #[test]
    fn test_yaml_file_with_environment_override() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("synapse.yaml");
        let mut file = std::fs::File::create(&base).unwrap();
        writeln!(
            file,
            "mediation:\n  worker_pool_size: 4\nreliable_messaging:\n  max_retries: 3\n"
        )
        .unwrap();

        let override_file = dir.path().join("synapse.test.yaml");
        let mut file = std::fs::File::create(&override_file).unwrap();
        writeln!(file, "reliable_messaging:\n  max_retries: 5\n").unwrap();

        let manager = ConfigManager::load_from_file_with_env(&base, "test").unwrap();
        assert_eq!(manager.config().mediation.worker_pool_size, 4);
        assert_eq!(manager.config().reliable_messaging.max_retries, 5);
        // untouched sections keep their defaults
        assert_eq!(manager.config().mediation.main_sequence, "main");
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn test_invalid_file_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("synapse.yaml");
        std::fs::write(&base, "mediation:\n  worker_pool_size: 0\n").unwrap();

        let result = ConfigManager::load_from_file_with_env(&base, "production");
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }
}
