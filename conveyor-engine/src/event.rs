use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One unit of work flowing through a pipeline
///
/// `number` is the event's position in the run. It is assigned when the
/// event leaves the input stage and kept by workers, so the output stage
/// can restore the original order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub number: u64,
    pub data: JsonValue,
}

impl Event {
    pub fn new(number: u64, data: JsonValue) -> Self {
        Self { number, data }
    }
}
