//! Role process launching, classification and termination

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{ExecutionError, ExecutionResult};
use crate::fault::{FaultKind, FaultSlot};
use crate::run::{Role, RunId};
use crate::topology::PipelineConfig;

/// Observed state of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Running,
    /// Exited with status 0
    Completed,
    /// Exited nonzero or was killed
    Crashed,
}

/// One supervised role process
///
/// Dropping a handle kills the process if it is still running and removes
/// its config file and fault slot.
#[derive(Debug)]
pub struct WorkerHandle {
    pub id: String,
    pub role: Role,
    pub run_id: RunId,
    pub pid: Option<u32>,
    child: Child,
    config_path: PathBuf,
    fault_slot: FaultSlot,
    status: WorkerStatus,
}

impl WorkerHandle {
    /// Refresh and return the status without blocking
    ///
    /// Once completed or crashed, a handle never goes back to running.
    pub fn poll(&mut self) -> WorkerStatus {
        if self.status != WorkerStatus::Running {
            return self.status;
        }

        self.status = match self.child.try_wait() {
            Ok(None) => WorkerStatus::Running,
            Ok(Some(exit)) if exit.success() => WorkerStatus::Completed,
            Ok(Some(exit)) => {
                debug!(worker = %self.id, %exit, "role process exited with failure");
                WorkerStatus::Crashed
            }
            Err(e) => {
                warn!(worker = %self.id, error = %e, "cannot query role process; treating it as crashed");
                WorkerStatus::Crashed
            }
        };
        self.status
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    pub fn fault_slot(&self) -> &FaultSlot {
        &self.fault_slot
    }

    /// Resolved fault of a crashed process
    pub fn fault(&self) -> (FaultKind, String) {
        self.fault_slot.resolve()
    }

    /// Ask the OS to kill the process; exit is observed on a later poll
    pub fn terminate(&mut self) {
        if self.status != WorkerStatus::Running {
            return;
        }
        if let Err(e) = self.child.start_kill() {
            debug!(worker = %self.id, error = %e, "kill failed; process already gone");
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        remove_scratch_file(&self.config_path);
        remove_scratch_file(self.fault_slot.path());
    }
}

fn remove_scratch_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "could not remove scratch file"),
    }
}

/// Handles partitioned by status
#[derive(Debug, Default)]
pub struct Classified {
    pub running: Vec<WorkerHandle>,
    pub completed: Vec<WorkerHandle>,
    pub crashed: Vec<WorkerHandle>,
}

/// Partition handles by their current status; never blocks
pub fn classify(handles: Vec<WorkerHandle>) -> Classified {
    let mut classified = Classified::default();
    for mut handle in handles {
        match handle.poll() {
            WorkerStatus::Running => classified.running.push(handle),
            WorkerStatus::Completed => classified.completed.push(handle),
            WorkerStatus::Crashed => classified.crashed.push(handle),
        }
    }
    classified
}

/// Kill every handle of `run_id`; returns the survivors and how many were stopped
///
/// The stopped processes are reaped in the background.
pub fn terminate_matching(handles: Vec<WorkerHandle>, run_id: &RunId) -> (Vec<WorkerHandle>, usize) {
    let mut remaining = Vec::with_capacity(handles.len());
    let mut terminated = 0;

    for mut handle in handles {
        if handle.run_id == *run_id {
            info!(worker = %handle.id, pid = ?handle.pid, "terminating role process");
            handle.terminate();
            terminated += 1;
        } else {
            remaining.push(handle);
        }
    }

    (remaining, terminated)
}

/// Starts role processes
///
/// Each launch writes the role's [`PipelineConfig`] to a scratch directory
/// and runs `program base_args.. --pipeline-config <file> --fault-slot <file>`,
/// plus `--queue-manager <addr>` when the run's queues live on this host.
/// A launch's files are removed when its [`WorkerHandle`] is dropped; the
/// scratch directory itself lives as long as the launcher.
pub struct Launcher {
    program: PathBuf,
    base_args: Vec<String>,
    queue_manager: Option<SocketAddr>,
    scratch: TempDir,
    launched: usize,
}

impl Launcher {
    pub fn new(program: impl Into<PathBuf>, base_args: Vec<String>) -> ExecutionResult<Self> {
        let scratch = tempfile::Builder::new().prefix("conveyor-").tempdir()?;
        Ok(Self {
            program: program.into(),
            base_args,
            queue_manager: None,
            scratch,
            launched: 0,
        })
    }

    /// Relaunch the running executable; `base_args` select role-process mode
    pub fn current_exe(base_args: Vec<String>) -> ExecutionResult<Self> {
        let program = std::env::current_exe()
            .map_err(|e| ExecutionError::SpawnError(format!("Failed to get current exe: {}", e)))?;
        Self::new(program, base_args)
    }

    /// Point launched processes at this host's queue manager
    pub fn with_queue_manager(mut self, addr: SocketAddr) -> Self {
        self.queue_manager = Some(addr);
        self
    }

    /// Start a process for `config` and return immediately
    pub fn launch(&mut self, config: &PipelineConfig) -> ExecutionResult<WorkerHandle> {
        self.launched += 1;
        let id = format!("{}-{}-{}", config.run_id, config.role, self.launched);
        let stem: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();

        let config_path = self.scratch.path().join(format!("{}.json", stem));
        std::fs::write(&config_path, serde_json::to_vec(config)?)?;
        let fault_slot = FaultSlot::new(self.scratch.path().join(format!("{}.fault", stem)));

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg("--pipeline-config")
            .arg(&config_path)
            .arg("--fault-slot")
            .arg(fault_slot.path());
        if let Some(addr) = self.queue_manager {
            cmd.arg("--queue-manager").arg(addr.to_string());
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            remove_scratch_file(&config_path);
            ExecutionError::SpawnError(format!("{}: {}", self.program.display(), e))
        })?;
        let pid = child.id();
        info!(worker = %id, role = %config.role, run_id = %config.run_id, ?pid, "launched role process");

        Ok(WorkerHandle {
            id,
            role: config.role,
            run_id: config.run_id.clone(),
            pid,
            child,
            config_path,
            fault_slot,
            status: WorkerStatus::Running,
        })
    }

    /// Launch every config, stopping at the first failure
    pub fn launch_all<'a>(
        &mut self,
        configs: impl IntoIterator<Item = &'a PipelineConfig>,
    ) -> ExecutionResult<Vec<WorkerHandle>> {
        configs.into_iter().map(|config| self.launch(config)).collect()
    }
}
