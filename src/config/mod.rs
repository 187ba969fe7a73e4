mod defaults;
mod types;

pub use types::*;

use crate::error::ConfigError;
use defaults::*;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment override for the engine binary location
pub const ENGINE_PATH_ENV: &str = "AGRR_BIN_PATH";

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            environment: Environment::default(),
            engine: EngineConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            store: StoreConfig::default(),
            catalog: CatalogConfig::default(),
            optimization: OptimizationConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the config
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.timeout_sec == 0 || self.engine.predict_timeout_sec == 0 {
            return Err(ConfigError::Invalid(
                "engine timeouts must be greater than zero".to_string(),
            ));
        }

        if self.engine.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "engine.retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.optimization.continuous_cultivation_impact < 0.0 {
            return Err(ConfigError::Invalid(
                "optimization.continuous_cultivation_impact must not be negative".to_string(),
            ));
        }

        if self.optimization.objective.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "optimization.objective must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve the engine binary: explicit override, then the environment, then config.
    pub fn resolve_engine_binary(&mut self, override_path: Option<PathBuf>) {
        if let Some(path) = override_path {
            self.engine.binary = path;
        } else if let Some(path) = std::env::var_os(ENGINE_PATH_ENV) {
            if !path.is_empty() {
                self.engine.binary = PathBuf::from(path);
            }
        }
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.timeout_sec)
    }

    pub fn predict_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.predict_timeout_sec)
    }

    /// Diagnostics directory, or `None` when mirroring is off
    pub fn diagnostics_dir(&self) -> Option<PathBuf> {
        if self.diagnostics.enabled && !self.environment.is_production() {
            Some(self.diagnostics.dir.clone())
        } else {
            None
        }
    }
}
