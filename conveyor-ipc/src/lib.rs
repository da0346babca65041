//! Inter-process communication for Conveyor
//!
//! This crate provides the protocol and transport used between an
//! orchestrating host and the role processes it launches. In local mode the
//! host owns the pipeline queues and serves queue operations to each child
//! over a loopback TCP connection.

pub mod error;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use protocol::{MessageEnvelope, QueueCall, QueueReply, QueueRequest, QueueResponse, IPC_PROTOCOL_VERSION};
pub use transport::{read_frame, write_frame, IpcTransport, StreamTransport, TcpTransport};
