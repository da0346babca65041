//! Fixed-interval health monitor

use chrono::{DateTime, Local};
use conveyor_queue::WorkQueue;
use serde_json::Value as JsonValue;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, info};

use crate::error::ExecutionResult;
use crate::propagator::{CrashPropagator, TickOutcome};
use crate::supervisor::WorkerHandle;

/// Queue whose depth the status line reports
pub type DepthProbe = Arc<dyn WorkQueue<JsonValue>>;

/// Status of the local side of a run at one tick
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Local>,
    pub running: usize,
    pub completed: usize,
    pub crashed: usize,
    pub processing_depth: Option<usize>,
    pub output_depth: Option<usize>,
    /// Resident memory of the running local processes
    pub rss_mb: f64,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Conveyor] {}: {} local processes",
            self.timestamp.format("%m/%d %H:%M:%S"),
            self.running
        )?;
        if let Some(depth) = self.processing_depth {
            write!(f, ", {} messages in processing queue", depth)?;
        }
        if let Some(depth) = self.output_depth {
            write!(f, ", {} in output queue", depth)?;
        }
        write!(f, ", {:.1} MB RAM used", self.rss_mb)
    }
}

/// Ties supervision, crash propagation and status reporting together
pub struct Monitor {
    propagator: CrashPropagator,
    tick_interval: Duration,
    status_line: bool,
    processing: Option<DepthProbe>,
    output: Option<DepthProbe>,
    system: System,
    completed: usize,
    crashed: usize,
}

impl Monitor {
    pub fn new(propagator: CrashPropagator, tick_interval: Duration) -> Self {
        Self {
            propagator,
            tick_interval,
            status_line: false,
            processing: None,
            output: None,
            system: System::new(),
            completed: 0,
            crashed: 0,
        }
    }

    /// Render the status on one refreshing stderr line instead of as debug events
    pub fn with_status_line(mut self, enabled: bool) -> Self {
        self.status_line = enabled;
        self
    }

    pub fn with_queues(mut self, processing: Option<DepthProbe>, output: Option<DepthProbe>) -> Self {
        self.processing = processing;
        self.output = output;
        self
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// One iteration: propagate crashes, then report
    pub async fn tick(&mut self, handles: Vec<WorkerHandle>) -> ExecutionResult<TickOutcome> {
        let outcome = self.propagator.tick(handles).await?;
        self.completed += outcome.completed;
        self.crashed += outcome.crashed;

        let snapshot = self.snapshot(&outcome.running).await?;
        self.render(&snapshot);
        Ok(outcome)
    }

    /// Tick until no handle is left
    ///
    /// Returns the first error a tick raises; handles still held at that
    /// point are dropped, which kills them.
    pub async fn run(&mut self, mut handles: Vec<WorkerHandle>) -> ExecutionResult<()> {
        let result = async {
            while !handles.is_empty() {
                tokio::time::sleep(self.tick_interval).await;
                handles = self.tick(std::mem::take(&mut handles)).await?.running;
            }
            Ok(())
        }
        .await;

        self.finish_status_line();
        if result.is_ok() {
            info!(completed = self.completed, "all local processes finished");
        }
        result
    }

    pub async fn snapshot(&mut self, running: &[WorkerHandle]) -> ExecutionResult<StatusSnapshot> {
        let processing_depth = match &self.processing {
            Some(queue) => Some(queue.size().await?),
            None => None,
        };
        let output_depth = match &self.output {
            Some(queue) => Some(queue.size().await?),
            None => None,
        };

        Ok(StatusSnapshot {
            timestamp: Local::now(),
            running: running.len(),
            completed: self.completed,
            crashed: self.crashed,
            processing_depth,
            output_depth,
            rss_mb: self.resident_mb(running),
        })
    }

    /// Processes that vanished count as zero
    fn resident_mb(&mut self, running: &[WorkerHandle]) -> f64 {
        let pids: Vec<Pid> = running
            .iter()
            .filter_map(|h| h.pid)
            .map(Pid::from_u32)
            .collect();
        if pids.is_empty() {
            return 0.0;
        }

        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        let bytes: u64 = pids
            .iter()
            .filter_map(|pid| self.system.process(*pid))
            .map(|process| process.memory())
            .sum();
        bytes as f64 / 1e6
    }

    fn render(&self, snapshot: &StatusSnapshot) {
        if self.status_line {
            let mut stderr = std::io::stderr().lock();
            let _ = write!(stderr, "\r{}", snapshot);
            let _ = stderr.flush();
        } else {
            debug!(status = %snapshot, "tick");
        }
    }

    fn finish_status_line(&self) {
        if self.status_line {
            eprintln!();
        }
    }

    pub async fn close(&self) -> ExecutionResult<()> {
        self.propagator.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use conveyor_queue::{LocalQueue, MemoryFanout};

    fn monitor() -> Monitor {
        Monitor::new(
            CrashPropagator::new(Box::new(MemoryFanout::new(4)), true),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn test_status_line_format() {
        let snapshot = StatusSnapshot {
            timestamp: Local.with_ymd_and_hms(2026, 3, 7, 9, 5, 1).unwrap(),
            running: 4,
            completed: 0,
            crashed: 0,
            processing_depth: Some(12),
            output_depth: Some(3),
            rss_mb: 153.26,
        };
        assert_eq!(
            snapshot.to_string(),
            "[Conveyor] 03/07 09:05:01: 4 local processes, 12 messages in processing queue, 3 in output queue, 153.3 MB RAM used"
        );
    }

    #[tokio::test]
    async fn test_snapshot_reads_queue_depths() {
        let processing = Arc::new(LocalQueue::new("processing"));
        processing.put(serde_json::json!(1)).await.unwrap();
        processing.put(serde_json::json!(2)).await.unwrap();
        let output = Arc::new(LocalQueue::new("output"));

        let mut monitor = monitor().with_queues(Some(processing), Some(output));
        let snapshot = monitor.snapshot(&[]).await.unwrap();
        assert_eq!(snapshot.processing_depth, Some(2));
        assert_eq!(snapshot.output_depth, Some(0));
        assert_eq!(snapshot.rss_mb, 0.0);
    }

    #[tokio::test]
    async fn test_run_without_handles_returns_immediately() {
        let mut monitor = monitor();
        monitor.run(Vec::new()).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_exits_when_processes_complete() {
        use crate::run::Role;
        use crate::supervisor::tests::{config, sh_launcher};

        let mut launcher = sh_launcher("sleep 0.2");
        let handles = vec![
            launcher.launch(&config("local", Role::Input)).unwrap(),
            launcher.launch(&config("local", Role::Output)).unwrap(),
        ];

        let mut monitor = monitor();
        tokio::time::timeout(Duration::from_secs(10), monitor.run(handles))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(monitor.completed, 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_running_processes_report_memory() {
        use crate::run::Role;
        use crate::supervisor::tests::{config, sh_launcher};

        let mut launcher = sh_launcher("sleep 5");
        let handles = vec![launcher.launch(&config("local", Role::Worker)).unwrap()];

        let mut monitor = monitor();
        let snapshot = monitor.snapshot(&handles).await.unwrap();
        assert_eq!(snapshot.running, 1);
        assert!(snapshot.rss_mb >= 0.0);
        assert!(snapshot.rss_mb.is_finite());
    }
}
