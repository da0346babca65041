//! Work items and the sentinel values exchanged between pipeline stages

use serde::{Deserialize, Serialize};

/// What travels on a processing or output queue
///
/// Consumers count sentinels to decide when to stop pulling: every producer
/// announces itself with `RegisterPusher` and signs off with `PusherDone`,
/// and the input stage ends the processing stream with `NoMoreEvents`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload<T> {
    RegisterPusher,
    PusherDone,
    NoMoreEvents,
    Item(T),
}

impl<T> Payload<T> {
    /// Reserved wire code of a sentinel, `None` for items
    pub fn code(&self) -> Option<i64> {
        match self {
            Payload::RegisterPusher => Some(-11),
            Payload::PusherDone => Some(-12),
            Payload::NoMoreEvents => Some(-42),
            Payload::Item(_) => None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.code().is_some()
    }

    pub fn into_item(self) -> Option<T> {
        match self {
            Payload::Item(item) => Some(item),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_codes() {
        assert_eq!(Payload::<()>::RegisterPusher.code(), Some(-11));
        assert_eq!(Payload::<()>::PusherDone.code(), Some(-12));
        assert_eq!(Payload::<()>::NoMoreEvents.code(), Some(-42));
        assert!(!Payload::Item(3).is_sentinel());
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(Payload::Item(7)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "item", "value": 7}));

        let sentinel: Payload<i32> =
            serde_json::from_value(serde_json::json!({"kind": "no_more_events"})).unwrap();
        assert_eq!(sentinel, Payload::NoMoreEvents);
    }
}
