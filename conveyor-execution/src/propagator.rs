//! Crash propagation across every participant of a run
//!
//! Each monitor tick:
//! 1. classify the local handles;
//! 2. broadcast a [`CrashMessage`] for every local crash and terminate that
//!    run's remaining local processes;
//! 3. poll the fan-out once and terminate local processes of any run a
//!    notification names.
//!
//! A participant hears its own notifications too; by then it holds no
//! handles for that run, so the second pass terminates nothing.

use conveyor_queue::{CrashMessage, Wait, WorkQueue};
use tracing::{debug, error, warn};

use crate::error::{ExecutionError, ExecutionResult};
use crate::fault::{format_exception_dump, FaultKind};
use crate::run::RunId;
use crate::supervisor::{classify, terminate_matching, WorkerHandle};

/// What one tick observed
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Handles still running after the tick
    pub running: Vec<WorkerHandle>,
    pub completed: usize,
    pub crashed: usize,
    /// Processes this tick killed because their run crashed
    pub terminated: usize,
    /// Runs this tick learned have crashed, locally or by notification
    pub crashed_runs: Vec<RunId>,
}

pub struct CrashPropagator {
    fanout: Box<dyn WorkQueue<CrashMessage>>,
    terminate_host_on_crash: bool,
}

impl CrashPropagator {
    /// `terminate_host_on_crash` turns a crash of any run this host takes
    /// part in into an [`ExecutionError::RunCrashed`] from [`tick`](Self::tick).
    /// Only a host orchestrating a single run may set it.
    pub fn new(fanout: Box<dyn WorkQueue<CrashMessage>>, terminate_host_on_crash: bool) -> Self {
        Self {
            fanout,
            terminate_host_on_crash,
        }
    }

    pub fn terminates_host(&self) -> bool {
        self.terminate_host_on_crash
    }

    /// Run the crash protocol once over `handles`
    ///
    /// Fan-out transport failures are returned as is; the caller decides
    /// whether the run survives them.
    pub async fn tick(&self, handles: Vec<WorkerHandle>) -> ExecutionResult<TickOutcome> {
        let classified = classify(handles);
        let mut outcome = TickOutcome {
            running: classified.running,
            completed: classified.completed.len(),
            crashed: classified.crashed.len(),
            terminated: 0,
            crashed_runs: Vec::new(),
        };

        for crashed in &classified.crashed {
            let (kind, traceback) = crashed.fault();
            error!(
                run_id = %crashed.run_id,
                worker = %crashed.id,
                %kind,
                "Run {} crashed!\nDumping exception traceback:\n\n{}\n\nNotifying crash fanout.",
                crashed.run_id,
                format_exception_dump(&traceback)
            );

            self.fanout
                .put(CrashMessage::new(crashed.run_id.as_str(), kind.name(), traceback.clone()))
                .await?;

            let (running, terminated) = terminate_matching(outcome.running, &crashed.run_id);
            outcome.running = running;
            outcome.terminated += terminated;
            outcome.crashed_runs.push(crashed.run_id.clone());

            if self.terminate_host_on_crash {
                return Err(ExecutionError::RunCrashed {
                    run_id: crashed.run_id.to_string(),
                    kind,
                    traceback,
                });
            }
        }

        if let Some(message) = self.fanout.get(Wait::Immediate).await? {
            let run_id = RunId::new(message.run_id.as_str());
            let (running, terminated) = terminate_matching(outcome.running, &run_id);
            outcome.running = running;
            outcome.terminated += terminated;
            if !outcome.crashed_runs.contains(&run_id) {
                outcome.crashed_runs.push(run_id.clone());
            }

            if terminated == 0 {
                debug!(run_id = %run_id, "crash notification for a run with no local processes");
            } else {
                let kind = FaultKind::resolve(&message.exception_kind);
                warn!(
                    run_id = %run_id,
                    %kind,
                    terminated,
                    "Remote crash notification for run {}.\nRemote exception traceback dump:\n\n{}\nTerminated local processes of the run.",
                    run_id,
                    format_exception_dump(&message.traceback)
                );

                if self.terminate_host_on_crash {
                    return Err(ExecutionError::RunCrashed {
                        run_id: message.run_id,
                        kind,
                        traceback: message.traceback,
                    });
                }
            }
        }

        Ok(outcome)
    }

    pub async fn close(&self) -> ExecutionResult<()> {
        self.fanout.close().await?;
        Ok(())
    }
}
