//! Built-in pipeline engine for Conveyor role processes
//!
//! Runs one role of a pipeline inside one process: events come from the
//! configured source or a pipeline queue, go through the transform stage
//! if the role runs it, and leave through the configured sink or a
//! pipeline queue.

pub mod engine;
pub mod event;
pub mod sink;
pub mod source;
pub mod stage;
pub mod transform;

pub use engine::BuiltinEngine;
pub use event::Event;
pub use sink::Sink;
pub use source::{read_event_numbers, Source};
pub use stage::{EventQueue, Puller, Pusher, Reorder};
pub use transform::{Codec, Transform};
