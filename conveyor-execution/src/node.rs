//! Remote node: runs workers handed out on the startup queue
//!
//! A node may host workers of many runs at once, so it never turns a crash
//! into its own failure. It broadcasts crashes of its workers and kills
//! its workers of runs that crashed elsewhere.

use conveyor_config::ConveyorConfig;
use conveyor_queue::{BrokerFanout, BrokerQueue, CrashMessage, Wait, WorkQueue};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use tracing::{info, warn};

use crate::error::ExecutionResult;
use crate::monitor::Monitor;
use crate::propagator::CrashPropagator;
use crate::run::{Role, RunId};
use crate::supervisor::{Launcher, WorkerHandle};
use crate::topology::PipelineConfig;

/// Startup-queue message: one worker of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerAssignment {
    pub run_id: RunId,
    pub config: PipelineConfig,
}

impl WorkerAssignment {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            run_id: config.run_id.clone(),
            config,
        }
    }
}

/// Crashed runs a node remembers, oldest forgotten first
const REMEMBERED_CRASHES: usize = 1024;

pub struct RemoteNode {
    startup: Box<dyn WorkQueue<WorkerAssignment>>,
    monitor: Monitor,
    launcher: Launcher,
    max_workers: usize,
    crashed_runs: CrashedRuns,
}

/// Bounded set of run ids known to have crashed
#[derive(Debug, Default)]
struct CrashedRuns {
    ids: HashSet<RunId>,
    order: VecDeque<RunId>,
}

impl CrashedRuns {
    fn insert(&mut self, run_id: RunId) {
        if !self.ids.insert(run_id.clone()) {
            return;
        }
        self.order.push_back(run_id);
        if self.order.len() > REMEMBERED_CRASHES {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn contains(&self, run_id: &RunId) -> bool {
        self.ids.contains(run_id)
    }
}

impl RemoteNode {
    pub fn new(
        startup: Box<dyn WorkQueue<WorkerAssignment>>,
        monitor: Monitor,
        launcher: Launcher,
        max_workers: usize,
    ) -> Self {
        Self {
            startup,
            monitor,
            launcher,
            max_workers: max_workers.max(1),
            crashed_runs: CrashedRuns::default(),
        }
    }

    /// Node wired to the configured broker's startup queue and crash fan-out
    pub async fn connect(
        config: &ConveyorConfig,
        launcher: Launcher,
        max_workers: usize,
    ) -> ExecutionResult<Self> {
        let orchestrator = &config.orchestrator;
        let fanout =
            BrokerFanout::<CrashMessage>::open(&config.broker, orchestrator.crash_fanout.as_str()).await?;
        let startup =
            BrokerQueue::<WorkerAssignment>::open(&config.broker, orchestrator.startup_queue.as_str())
                .await?;

        info!(
            broker = %config.broker.redacted_url(),
            startup_queue = %orchestrator.startup_queue,
            max_workers,
            "remote node connected"
        );

        let monitor = Monitor::new(CrashPropagator::new(Box::new(fanout), false), orchestrator.tick_interval)
            .with_status_line(orchestrator.status_line);
        Ok(Self::new(Box::new(startup), monitor, launcher, max_workers))
    }

    /// Serve until `shutdown` resolves; running workers are killed on return
    ///
    /// Returns the number of workers launched.
    pub async fn serve(mut self, shutdown: impl Future<Output = ()>) -> ExecutionResult<usize> {
        tokio::pin!(shutdown);
        let mut handles: Vec<WorkerHandle> = Vec::new();
        let mut launched = 0;

        loop {
            while handles.len() < self.max_workers {
                let assignment = match self.startup.get(Wait::Immediate).await {
                    Ok(Some(assignment)) => assignment,
                    Ok(None) => break,
                    // Transport failures are retried on the next tick
                    Err(e) if e.is_transport() => {
                        warn!(error = %e, "startup queue unavailable; retrying next tick");
                        break;
                    }
                    Err(e) => return Err(e.into()),
                };
                if let Some(handle) = self.accept(assignment)? {
                    handles.push(handle);
                    launched += 1;
                }
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.monitor.tick_interval()) => {}
            }

            let outcome = self.monitor.tick(handles).await?;
            for run_id in outcome.crashed_runs {
                self.crashed_runs.insert(run_id);
            }
            handles = outcome.running;
        }

        info!(running = handles.len(), launched, "remote node shutting down");
        drop(handles);
        self.monitor.close().await?;
        self.startup.close().await?;
        Ok(launched)
    }

    fn accept(&mut self, assignment: WorkerAssignment) -> ExecutionResult<Option<WorkerHandle>> {
        let WorkerAssignment { run_id, config } = assignment;
        if config.run_id != run_id || config.role != Role::Worker {
            warn!(
                %run_id,
                role = %config.role,
                "ignoring startup message that is not a worker of its run"
            );
            return Ok(None);
        }
        if self.crashed_runs.contains(&run_id) {
            info!(%run_id, "dropping worker assignment of a crashed run");
            return Ok(None);
        }
        self.launcher.launch(&config).map(Some)
    }
}
