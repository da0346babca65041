//! Base pipeline engine configuration
//!
//! This is the configuration every role of a run starts from; the topology
//! generator layers role-specific overrides on top of it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_enum_choice, validate_positive, validate_required_string, Validatable};

/// Payload codecs the built-in engine knows
pub const CODECS: [&str; 1] = ["json"];

/// Base configuration for one pipeline engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where events come from when the input stage is external
    pub source: SourceConfig,

    /// Where events go when the output stage is external
    pub sink: SinkConfig,

    /// Codec applied to raw payloads before transformation
    pub decoder: Option<String>,

    /// Codec applied to payloads after transformation
    pub encoder: Option<String>,

    /// Stop the source after this many events
    pub events_to_process: Option<u64>,

    /// Only process the event numbers listed (one per line) in this file
    pub event_numbers_file: Option<PathBuf>,

    /// Interval between polls when a blocking pull runs against a
    /// non-blocking queue backend
    #[serde(with = "crate::domains::utils::serde_duration_ms", rename = "queue_poll_interval_ms")]
    pub queue_poll_interval: Duration,

    /// Free-form settings for transform plugins
    pub settings: Map<String, JsonValue>,

    /// Fail deliberately when a given event is transformed
    pub fault: Option<FaultInjection>,
}

/// Deliberate failure raised by the transform stage, for drills and tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultInjection {
    /// Event number that triggers the fault
    pub event_number: u64,

    /// Fault kind name reported to the supervisor
    #[serde(default = "default_fault_kind")]
    pub kind: String,

    #[serde(default)]
    pub message: String,
}

fn default_fault_kind() -> String {
    "RuntimeError".to_string()
}

/// Event source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Synthesize `count` numbered events
    Generate { count: u64 },

    /// One event per line of a text file
    File { path: PathBuf },
}

/// Event sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// One JSON line per event on stdout
    Stdout,

    /// One JSON line per event in a file
    File { path: PathBuf },

    /// Drop events
    Discard,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::Generate { count: 100 },
            sink: SinkConfig::Stdout,
            decoder: None,
            encoder: None,
            events_to_process: None,
            event_numbers_file: None,
            queue_poll_interval: Duration::from_millis(100),
            settings: Map::new(),
            fault: None,
        }
    }
}

impl Validatable for EngineConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let SourceConfig::File { path } = &self.source {
            validate_required_string(&path.to_string_lossy(), "source.path", self.domain_name())?;
        }

        if let SinkConfig::File { path } = &self.sink {
            validate_required_string(&path.to_string_lossy(), "sink.path", self.domain_name())?;
        }

        if let Some(decoder) = &self.decoder {
            validate_enum_choice(decoder, &CODECS, "decoder", self.domain_name())?;
        }

        if let Some(encoder) = &self.encoder {
            validate_enum_choice(encoder, &CODECS, "encoder", self.domain_name())?;
        }

        if let Some(fault) = &self.fault {
            validate_required_string(&fault.kind, "fault.kind", self.domain_name())?;
        }

        validate_positive(
            self.queue_poll_interval.as_millis(),
            "queue_poll_interval_ms",
            self.domain_name(),
        )?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "engine"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.source, SourceConfig::Generate { count: 100 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_codec_is_rejected() {
        let config = EngineConfig {
            decoder: Some("pickle".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tagged_source_yaml() {
        let yaml = r#"
source:
  type: file
  path: /tmp/events.txt
sink:
  type: discard
decoder: json
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.source,
            SourceConfig::File {
                path: PathBuf::from("/tmp/events.txt")
            }
        );
        assert_eq!(config.sink, SinkConfig::Discard);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fault_injection_defaults_kind() {
        let yaml = "fault:\n  event_number: 3\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        let fault = config.fault.unwrap();
        assert_eq!(fault.event_number, 3);
        assert_eq!(fault.kind, "RuntimeError");
    }
}
