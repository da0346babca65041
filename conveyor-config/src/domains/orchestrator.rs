//! Run orchestration configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_resource_name, Validatable};

/// Settings for the health monitor and the shared broker resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Period of the health monitor loop
    #[serde(with = "crate::domains::utils::serde_duration_ms", rename = "tick_interval_ms")]
    pub tick_interval: Duration,

    /// Durable queue remote nodes pull worker configurations from
    pub startup_queue: String,

    /// Fan-out exchange crash notifications are broadcast on
    pub crash_fanout: String,

    /// Prefix for generated run ids and per-run queue names
    pub queue_prefix: String,

    /// Refresh a one-line status summary on stderr every tick
    #[serde(default = "crate::domains::utils::default_true")]
    pub status_line: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            startup_queue: "conveyor_startup".to_string(),
            crash_fanout: "conveyor_crashes".to_string(),
            queue_prefix: "conveyor".to_string(),
            status_line: true,
        }
    }
}

impl OrchestratorConfig {
    /// Name of the per-run queue feeding workers
    pub fn processing_queue_name(&self, run_id: &str) -> String {
        format!("{}_{}_processing", self.queue_prefix, run_id)
    }

    /// Name of the per-run queue feeding the output endpoint
    pub fn output_queue_name(&self, run_id: &str) -> String {
        format!("{}_{}_output", self.queue_prefix, run_id)
    }
}

impl Validatable for OrchestratorConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.tick_interval.as_millis(),
            "tick_interval_ms",
            self.domain_name(),
        )?;
        validate_resource_name(&self.startup_queue, "startup_queue", self.domain_name())?;
        validate_resource_name(&self.crash_fanout, "crash_fanout", self.domain_name())?;
        validate_resource_name(&self.queue_prefix, "queue_prefix", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "orchestrator"
    }
}
