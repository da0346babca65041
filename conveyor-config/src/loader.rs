//! Configuration loading and environment variable handling

use crate::domains::ConveyorConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "CONVEYOR".to_string(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<ConveyorConfig> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: ConveyorConfig = serde_yaml::from_str(&content)?;

        // Environment wins over the file
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<ConveyorConfig> {
        let mut config = ConveyorConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<ConveyorConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut ConveyorConfig) -> ConfigResult<()> {
        self.apply_broker_overrides(&mut config.broker)?;
        self.apply_orchestrator_overrides(&mut config.orchestrator)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply broker config overrides
    fn apply_broker_overrides(
        &self,
        config: &mut crate::domains::broker::BrokerConfig,
    ) -> ConfigResult<()> {
        if let Ok(url) = self.get_env_var("BROKER_URL") {
            *config = crate::domains::broker::BrokerConfig::from_url(&url)?;
        }

        if let Ok(host) = self.get_env_var("BROKER_HOST") {
            config.host = host;
        }

        if let Ok(port) = self.get_env_var("BROKER_PORT") {
            config.port = port
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid BROKER_PORT: {}", e)))?;
        }

        if let Ok(username) = self.get_env_var("BROKER_USERNAME") {
            config.username = username;
        }

        if let Ok(password) = self.get_env_var("BROKER_PASSWORD") {
            config.password = password;
        }

        if let Ok(vhost) = self.get_env_var("BROKER_VHOST") {
            config.vhost = vhost;
        }

        Ok(())
    }

    /// Apply orchestrator config overrides
    fn apply_orchestrator_overrides(
        &self,
        config: &mut crate::domains::orchestrator::OrchestratorConfig,
    ) -> ConfigResult<()> {
        if let Ok(tick) = self.get_env_var("TICK_INTERVAL_MS") {
            let millis: u64 = tick
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid TICK_INTERVAL_MS: {}", e)))?;
            config.tick_interval = std::time::Duration::from_millis(millis);
        }

        if let Ok(status_line) = self.get_env_var("STATUS_LINE") {
            config.status_line = status_line
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid STATUS_LINE: {}", e)))?;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
