//! Conveyor run orchestration
//!
//! This crate turns a worker count and a base engine configuration into a
//! running pipeline of OS processes (`input`, `n` × `worker`, `output`),
//! supervises them, and makes sure a crash in any of them tears down the
//! whole run, on this host and on every remote node taking part.

pub mod boundary;
pub mod engine;
pub mod error;
pub mod fault;
pub mod monitor;
pub mod node;
pub mod orchestrate;
pub mod propagator;
pub mod run;
pub mod supervisor;
pub mod topology;

// Re-export main types
pub use boundary::{fault_kind_of, run_role_process};
pub use engine::Engine;
pub use error::{ExecutionError, ExecutionResult};
pub use fault::{
    format_exception_dump, Fault, FaultKind, FaultRecord, FaultSlot, FAULT_REGISTRY_VERSION,
    NO_TRACEBACK,
};
pub use monitor::{DepthProbe, Monitor, StatusSnapshot};
pub use node::{RemoteNode, WorkerAssignment};
pub use orchestrate::{dispatch_run, run_locally, run_remotely, RemoteChannels};
pub use propagator::{CrashPropagator, TickOutcome};
pub use run::{Role, RunId};
pub use supervisor::{classify, terminate_matching, Classified, Launcher, WorkerHandle, WorkerStatus};
pub use topology::{generate, InputStage, OutputStage, PipelineConfig, PluginGroup};
