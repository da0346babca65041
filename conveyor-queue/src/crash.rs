//! Crash notification wire message

use serde::{Deserialize, Serialize};

/// Broadcast on the crash fan-out when a supervised process dies with a fault
///
/// Travels as the 3-tuple `(run_id, exception_kind, traceback)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String, String)", into = "(String, String, String)")]
pub struct CrashMessage {
    pub run_id: String,
    pub exception_kind: String,
    pub traceback: String,
}

impl CrashMessage {
    pub fn new(
        run_id: impl Into<String>,
        exception_kind: impl Into<String>,
        traceback: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            exception_kind: exception_kind.into(),
            traceback: traceback.into(),
        }
    }
}

impl From<(String, String, String)> for CrashMessage {
    fn from((run_id, exception_kind, traceback): (String, String, String)) -> Self {
        Self {
            run_id,
            exception_kind,
            traceback,
        }
    }
}

impl From<CrashMessage> for (String, String, String) {
    fn from(message: CrashMessage) -> Self {
        (message.run_id, message.exception_kind, message.traceback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape_is_a_triple() {
        let message = CrashMessage::new("run_abc123", "ValueError", "line 1\nline 2");
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(json, r#"["run_abc123","ValueError","line 1\nline 2"]"#);

        let back: CrashMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_rejects_wrong_arity() {
        assert!(serde_json::from_str::<CrashMessage>(r#"["run", "ValueError"]"#).is_err());
    }
}
