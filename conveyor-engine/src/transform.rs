//! Decode, transform, encode

use anyhow::Context;
use conveyor_config::{EngineConfig, FaultInjection};
use conveyor_execution::{Fault, FaultKind};
use serde_json::{Map, Value as JsonValue};

use crate::event::Event;

/// Payload codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Json,
}

impl Codec {
    pub fn from_name(name: &str) -> anyhow::Result<Self> {
        match name {
            "json" => Ok(Codec::Json),
            other => Err(Fault::of(FaultKind::ConfigError, format!("unknown codec: {}", other)).into()),
        }
    }

    /// Parse string payloads; anything else is already decoded
    pub fn decode(&self, data: JsonValue) -> Result<JsonValue, Fault> {
        match (self, data) {
            (Codec::Json, JsonValue::String(text)) => serde_json::from_str(&text).map_err(|e| {
                Fault::of(FaultKind::ValueError, format!("payload is not valid JSON: {}", e))
            }),
            (_, data) => Ok(data),
        }
    }

    pub fn encode(&self, data: JsonValue) -> anyhow::Result<JsonValue> {
        match (self, data) {
            (Codec::Json, JsonValue::String(text)) => Ok(JsonValue::String(text)),
            (Codec::Json, data) => Ok(JsonValue::String(serde_json::to_string(&data)?)),
        }
    }
}

/// The built-in transform stage
///
/// Besides the codecs it merges the `annotate` object from the engine
/// settings into object payloads, and raises the configured injected
/// fault when its event comes by.
#[derive(Debug, Clone)]
pub struct Transform {
    decoder: Option<Codec>,
    encoder: Option<Codec>,
    annotate: Option<Map<String, JsonValue>>,
    fault: Option<FaultInjection>,
}

impl Transform {
    pub fn new(engine: &EngineConfig) -> anyhow::Result<Self> {
        let decoder = engine.decoder.as_deref().map(Codec::from_name).transpose()?;
        let encoder = engine.encoder.as_deref().map(Codec::from_name).transpose()?;
        let annotate = match engine.settings.get("annotate") {
            None => None,
            Some(JsonValue::Object(fields)) => Some(fields.clone()),
            Some(_) => {
                return Err(Fault::of(FaultKind::ConfigError, "settings.annotate must be a mapping").into())
            }
        };

        Ok(Self {
            decoder,
            encoder,
            annotate,
            fault: engine.fault.clone(),
        })
    }

    pub fn apply(&self, event: Event) -> anyhow::Result<Event> {
        let Event { number, mut data } = event;

        if let Some(decoder) = self.decoder {
            data = decoder
                .decode(data)
                .with_context(|| format!("decoding event {}", number))?;
        }

        if let Some(fault) = &self.fault {
            if fault.event_number == number {
                let message = if fault.message.is_empty() {
                    format!("injected fault at event {}", number)
                } else {
                    fault.message.clone()
                };
                return Err(anyhow::Error::new(Fault::new(fault.kind.as_str(), message))
                    .context(format!("transforming event {}", number)));
            }
        }

        if let (Some(annotate), JsonValue::Object(fields)) = (&self.annotate, &mut data) {
            for (key, value) in annotate {
                fields.insert(key.clone(), value.clone());
            }
        }

        if let Some(encoder) = self.encoder {
            data = encoder.encode(data)?;
        }

        Ok(Event::new(number, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_execution::fault_kind_of;
    use serde_json::json;

    #[test]
    fn test_decode_annotate_encode() {
        let mut engine = EngineConfig {
            decoder: Some("json".to_string()),
            encoder: Some("json".to_string()),
            ..Default::default()
        };
        engine
            .settings
            .insert("annotate".to_string(), json!({"stage": "worker"}));

        let transform = Transform::new(&engine).unwrap();
        let out = transform
            .apply(Event::new(2, json!(r#"{"energy": 4}"#)))
            .unwrap();
        assert_eq!(out.number, 2);

        let decoded: JsonValue = serde_json::from_str(out.data.as_str().unwrap()).unwrap();
        assert_eq!(decoded, json!({"energy": 4, "stage": "worker"}));
    }

    #[test]
    fn test_invalid_json_is_a_value_error() {
        let engine = EngineConfig {
            decoder: Some("json".to_string()),
            ..Default::default()
        };
        let err = Transform::new(&engine)
            .unwrap()
            .apply(Event::new(0, json!("{broken")))
            .unwrap_err();
        assert_eq!(fault_kind_of(&err), "ValueError");
    }

    #[test]
    fn test_injected_fault_fires_on_its_event_only() {
        let engine = EngineConfig {
            fault: Some(FaultInjection {
                event_number: 5,
                kind: "KeyError".to_string(),
                message: String::new(),
            }),
            ..Default::default()
        };
        let transform = Transform::new(&engine).unwrap();

        assert!(transform.apply(Event::new(4, json!({}))).is_ok());
        let err = transform.apply(Event::new(5, json!({}))).unwrap_err();
        assert_eq!(fault_kind_of(&err), "KeyError");
        assert!(format!("{:?}", err).contains("injected fault at event 5"));
    }

    #[test]
    fn test_non_mapping_annotate_is_rejected() {
        let mut engine = EngineConfig::default();
        engine.settings.insert("annotate".to_string(), json!(3));
        let err = Transform::new(&engine).unwrap_err();
        assert_eq!(fault_kind_of(&err), "ConfigError");
    }
}
