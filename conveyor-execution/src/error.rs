//! Error types for run orchestration

use conveyor_config::ConfigError;
use conveyor_queue::QueueError;
use thiserror::Error;

use crate::fault::{format_exception_dump, FaultKind};

/// Orchestration result type
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Orchestration errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Rejected before any process was launched
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// A process of the run died with a fault; siblings have been terminated
    #[error("Run {run_id} crashed with {kind}! Traceback:\n {}", format_exception_dump(.traceback))]
    RunCrashed {
        run_id: String,
        kind: FaultKind,
        traceback: String,
    },

    /// The engine inside a role process failed; the fault slot holds details
    #[error("Role process failed with {kind}: {message}")]
    RoleFailed { kind: String, message: String },

    #[error("Failed to spawn role process: {0}")]
    SpawnError(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExecutionError {
    /// Fault kind a crashed run reports, if this is one
    pub fn crash_kind(&self) -> Option<FaultKind> {
        match self {
            ExecutionError::RunCrashed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
