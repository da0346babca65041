//! Queue adapters for Conveyor
//!
//! Every pipeline stage exchanges work through the [`WorkQueue`] contract,
//! whichever backend carries it:
//!
//! - [`LocalQueue`]: in-memory queue owned by the orchestrating host
//! - [`ManagedQueue`]: a role process's proxy to a host-owned [`LocalQueue`],
//!   served by a [`QueueManager`] on a loopback port
//! - [`BrokerQueue`]: durable, named, point-to-point queue on an AMQP broker
//! - [`BrokerFanout`] / [`MemoryFanout`]: broadcast channels where every
//!   subscriber receives every message; used for [`CrashMessage`]s only
//!
//! An empty queue is `Ok(None)`, never an error.

pub mod broker;
pub mod crash;
pub mod error;
pub mod fanout;
pub mod local;
pub mod managed;
pub mod payload;
pub mod queue;
pub mod reference;

pub use broker::{BrokerConnection, BrokerFanout, BrokerQueue};
pub use crash::CrashMessage;
pub use error::{QueueError, QueueResult};
pub use fanout::MemoryFanout;
pub use local::LocalQueue;
pub use managed::{ManagedQueue, ManagerClient, ManagerServer, QueueManager};
pub use payload::Payload;
pub use queue::{recv_polling, Wait, WorkQueue};
pub use reference::QueueRef;
