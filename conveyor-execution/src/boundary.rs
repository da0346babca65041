//! Top-level failure boundary of a role process
//!
//! Whatever goes wrong inside the engine, the fault is recorded in the
//! process's [`FaultSlot`] before the error is handed back, so the caller
//! can exit nonzero knowing the supervisor will find the record.

use conveyor_config::ConfigError;
use conveyor_queue::QueueError;
use std::any::Any;
use std::sync::Arc;
use tracing::{error, info};

use crate::engine::Engine;
use crate::error::{ExecutionError, ExecutionResult};
use crate::fault::{Fault, FaultKind, FaultRecord, FaultSlot};
use crate::topology::PipelineConfig;

/// Run `engine` for `config`, recording any failure in `slot`
pub async fn run_role_process<E>(
    engine: Arc<E>,
    config: PipelineConfig,
    slot: &FaultSlot,
) -> ExecutionResult<()>
where
    E: Engine + ?Sized,
{
    let role = config.role;
    let run_id = config.run_id.clone();
    info!(%role, %run_id, "role process starting");

    let task = tokio::spawn(async move { engine.run(config).await });

    let record = match task.await {
        Ok(Ok(())) => {
            info!(%role, %run_id, "role process finished");
            return Ok(());
        }
        Ok(Err(err)) => FaultRecord::new(fault_kind_of(&err), format!("{:?}", err)),
        Err(join_err) if join_err.is_panic() => FaultRecord::new(
            FaultKind::Panic.name(),
            format!("panicked: {}", panic_message(join_err.into_panic())),
        ),
        Err(_) => FaultRecord::new(FaultKind::Interrupted.name(), "engine task was cancelled"),
    };

    if let Err(e) = slot.record(&record) {
        error!(slot = %slot.path().display(), error = %e, "could not record fault");
    }

    let message = record
        .traceback
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();
    Err(ExecutionError::RoleFailed {
        kind: record.exception_kind,
        message,
    })
}

/// Kind name to report for an engine failure
///
/// An explicit [`Fault`] anywhere in the chain wins; otherwise the first
/// error type the registry knows decides.
pub fn fault_kind_of(err: &anyhow::Error) -> String {
    if let Some(fault) = err.chain().find_map(|cause| cause.downcast_ref::<Fault>()) {
        return fault.kind.clone();
    }

    for cause in err.chain() {
        let kind = if cause.is::<QueueError>() {
            FaultKind::QueueError
        } else if cause.is::<std::io::Error>() {
            FaultKind::IoError
        } else if cause.is::<ConfigError>() {
            FaultKind::ConfigError
        } else if cause.is::<serde_json::Error>() {
            FaultKind::ValueError
        } else if let Some(exec) = cause.downcast_ref::<ExecutionError>() {
            match exec {
                ExecutionError::Queue(_) => FaultKind::QueueError,
                ExecutionError::Io(_) => FaultKind::IoError,
                ExecutionError::Config(_) => FaultKind::ConfigError,
                ExecutionError::Serialization(_) => FaultKind::ValueError,
                _ => continue,
            }
        } else {
            continue;
        };
        return kind.name().to_string();
    }

    FaultKind::RuntimeError.name().to_string()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
