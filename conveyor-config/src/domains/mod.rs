//! Domain-specific configuration modules

pub mod broker;
pub mod engine;
pub mod logging;
pub mod orchestrator;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Conveyor configuration combining all domains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConveyorConfig {
    /// Broker connection for networked runs
    pub broker: broker::BrokerConfig,

    /// Health monitor and shared resource names
    pub orchestrator: orchestrator::OrchestratorConfig,

    /// Base configuration every pipeline role derives from
    pub engine: engine::EngineConfig,

    /// Logging configuration
    pub logging: logging::LoggingConfig,
}

impl ConveyorConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.broker.validate()?;
        self.orchestrator.validate()?;
        self.engine.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = ConveyorConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
