//! Queue error types

use conveyor_ipc::IpcError;
use thiserror::Error;

/// Queue result type
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue errors
///
/// "No item available" is not an error; see [`crate::WorkQueue::get`].
#[derive(Debug, Error)]
pub enum QueueError {
    /// Broker connection or channel failure
    #[error("Broker error: {0}")]
    Broker(String),

    /// Item could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure talking to the host's queue manager
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    /// Operation on a queue after `close()`
    #[error("Queue closed: {0}")]
    Closed(String),

    /// The queue manager does not serve this queue
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// A managed queue reference was opened without a manager connection
    #[error("Managed queue '{0}' needs a queue manager connection")]
    NoManager(String),
}

impl QueueError {
    /// Errors raised by the transport underneath the queue rather than by
    /// the caller's use of it
    ///
    /// Only IPC errors that a reconnect could cure count; a rejected call or
    /// a garbled frame does not.
    pub fn is_transport(&self) -> bool {
        match self {
            QueueError::Broker(_) => true,
            QueueError::Ipc(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<lapin::Error> for QueueError {
    fn from(err: lapin::Error) -> Self {
        QueueError::Broker(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(QueueError::Broker("connection reset".to_string()).is_transport());
        assert!(QueueError::Ipc(IpcError::ConnectionClosed).is_transport());
        assert!(!QueueError::Ipc(IpcError::InvalidMessage("garbled".to_string())).is_transport());
        assert!(!QueueError::Ipc(IpcError::DeserializationError("eof".to_string())).is_transport());
        assert!(!QueueError::Ipc(IpcError::Remote("unknown queue".to_string())).is_transport());
        assert!(!QueueError::Closed("q".to_string()).is_transport());
        assert!(!QueueError::UnknownQueue("q".to_string()).is_transport());
    }
}
