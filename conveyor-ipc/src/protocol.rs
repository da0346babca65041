//! IPC protocol definitions and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use uuid::Uuid;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Queue operation requested by a role process against a host-owned queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueRequest {
    /// Append an item
    Put { queue: String, item: JsonValue },

    /// Take one item, waiting at most `timeout_ms` (`None` waits forever)
    Get {
        queue: String,
        timeout_ms: Option<u64>,
    },

    /// Current depth
    Size { queue: String },
}

impl QueueRequest {
    /// Name of the queue the request targets
    pub fn queue(&self) -> &str {
        match self {
            QueueRequest::Put { queue, .. }
            | QueueRequest::Get { queue, .. }
            | QueueRequest::Size { queue } => queue,
        }
    }

    /// Build a get request from an optional wait bound
    pub fn get(queue: impl Into<String>, timeout: Option<Duration>) -> Self {
        QueueRequest::Get {
            queue: queue.into(),
            timeout_ms: timeout.map(|t| t.as_millis() as u64),
        }
    }
}

/// Host answer to a [`QueueRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueResponse {
    /// Put accepted
    Ack,

    /// Result of a get; `None` means the queue stayed empty for the whole wait
    Item { item: Option<JsonValue> },

    /// Result of a size request
    Size { size: usize },

    /// The host could not serve the request
    Error { message: String },
}

/// A request tagged with the id its reply must echo
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueCall {
    pub correlation_id: Uuid,
    pub request: QueueRequest,
}

impl QueueCall {
    pub fn new(request: QueueRequest) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            request,
        }
    }
}

/// A response for the call with the same correlation id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueReply {
    pub correlation_id: Uuid,
    pub response: QueueResponse,
}

impl QueueReply {
    pub fn to(call: &QueueCall, response: QueueResponse) -> Self {
        Self {
            correlation_id: call.correlation_id,
            response,
        }
    }
}

/// Message envelope for all IPC communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = QueueRequest::Put {
            queue: "processing".to_string(),
            item: json!({"number": 3}),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "put");
        assert_eq!(value["queue"], "processing");
        assert_eq!(request.queue(), "processing");
    }

    #[test]
    fn test_get_without_bound_waits_forever() {
        let request = QueueRequest::get("output", None);
        assert_eq!(
            request,
            QueueRequest::Get {
                queue: "output".to_string(),
                timeout_ms: None
            }
        );

        let bounded = QueueRequest::get("output", Some(Duration::from_millis(250)));
        assert!(matches!(bounded, QueueRequest::Get { timeout_ms: Some(250), .. }));
    }

    #[test]
    fn test_reply_echoes_correlation_id() {
        let call = QueueCall::new(QueueRequest::Size {
            queue: "output".to_string(),
        });
        let reply = QueueReply::to(&call, QueueResponse::Size { size: 4 });
        assert_eq!(reply.correlation_id, call.correlation_id);
    }

    #[test]
    fn test_message_envelope() {
        let envelope = MessageEnvelope::new(QueueResponse::Ack);
        assert_eq!(envelope.protocol_version, IPC_PROTOCOL_VERSION);
        assert!(envelope.is_compatible());

        let json = serde_json::to_string(&envelope).unwrap();
        let deserialized: MessageEnvelope<QueueResponse> = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.message, QueueResponse::Ack);
    }
}
