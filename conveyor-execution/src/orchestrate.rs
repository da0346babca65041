//! Host-side entry points for a multi-process run
//!
//! - [`run_locally`]: every role on this host, queues in this host's memory.
//! - [`run_remotely`]: the endpoints on this host, workers dispatched to
//!   remote nodes through the broker's startup queue.
//!
//! Both act as the run's only orchestrating host: a crash anywhere in the
//! run comes back as [`ExecutionError::RunCrashed`].

use conveyor_config::{ConveyorConfig, OrchestratorConfig};
use conveyor_queue::{
    BrokerFanout, BrokerQueue, CrashMessage, MemoryFanout, QueueManager, QueueRef, WorkQueue,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::ExecutionResult;
use crate::monitor::{DepthProbe, Monitor};
use crate::node::WorkerAssignment;
use crate::propagator::CrashPropagator;
use crate::run::{Role, RunId};
use crate::supervisor::Launcher;
use crate::topology::{generate, PipelineConfig};

/// Crash notifications buffered per listener of the in-memory fan-out
const LOCAL_FANOUT_CAPACITY: usize = 64;

/// Run `n` workers plus both endpoints on this host
pub async fn run_locally(n: usize, config: &ConveyorConfig, launcher: Launcher) -> ExecutionResult<()> {
    let run_id = RunId::local();
    let orchestrator = &config.orchestrator;
    let processing_name = orchestrator.processing_queue_name(run_id.as_str());
    let output_name = orchestrator.output_queue_name(run_id.as_str());

    let configs: Vec<PipelineConfig> = generate(
        n,
        &run_id,
        &config.engine,
        &QueueRef::managed(processing_name.as_str()),
        &QueueRef::managed(output_name.as_str()),
    )?
    .map(|(_, config)| config)
    .collect();

    let manager = QueueManager::new();
    let processing = manager.register(&processing_name);
    let output = manager.register(&output_name);
    let server = manager.listen().await?;
    info!(%run_id, workers = n, queue_manager = %server.addr(), "starting local run");

    let mut launcher = launcher.with_queue_manager(server.addr());
    let handles = launcher.launch_all(&configs)?;

    let propagator = CrashPropagator::new(Box::new(MemoryFanout::new(LOCAL_FANOUT_CAPACITY)), true);
    let mut monitor = Monitor::new(propagator, orchestrator.tick_interval)
        .with_status_line(orchestrator.status_line)
        .with_queues(Some(processing as DepthProbe), Some(output as DepthProbe));

    let result = monitor.run(handles).await;
    if let Err(e) = monitor.close().await {
        warn!(error = %e, "failed to close crash fan-out");
    }
    drop(server);
    result
}

/// Broker-side channels of a networked run
pub struct RemoteChannels {
    /// Where worker assignments are published for remote nodes
    pub startup: Box<dyn WorkQueue<WorkerAssignment>>,
    /// Crash notifications shared with every node
    pub fanout: Box<dyn WorkQueue<CrashMessage>>,
    pub processing: Option<DepthProbe>,
    pub output: Option<DepthProbe>,
}

impl RemoteChannels {
    /// Open the configured broker's channels for `run_id`
    ///
    /// The fan-out subscription is made first so no crash of the run can be
    /// missed.
    pub async fn open(config: &ConveyorConfig, run_id: &RunId) -> ExecutionResult<Self> {
        let orchestrator = &config.orchestrator;
        let broker = &config.broker;

        let fanout = BrokerFanout::<CrashMessage>::open(broker, orchestrator.crash_fanout.as_str()).await?;
        let startup =
            BrokerQueue::<WorkerAssignment>::open(broker, orchestrator.startup_queue.as_str()).await?;
        let processing = BrokerQueue::<JsonValue>::open(
            broker,
            orchestrator.processing_queue_name(run_id.as_str()),
        )
        .await?;
        let output =
            BrokerQueue::<JsonValue>::open(broker, orchestrator.output_queue_name(run_id.as_str())).await?;

        Ok(Self {
            startup: Box::new(startup),
            fanout: Box::new(fanout),
            processing: Some(Arc::new(processing) as DepthProbe),
            output: Some(Arc::new(output) as DepthProbe),
        })
    }
}

/// Run the endpoints on this host and hand `n` workers to remote nodes
///
/// Without a `run_id` a fresh one is generated from the queue prefix.
pub async fn run_remotely(
    n: usize,
    run_id: Option<RunId>,
    config: &ConveyorConfig,
    launcher: Launcher,
) -> ExecutionResult<()> {
    let orchestrator = &config.orchestrator;
    let broker = &config.broker;
    let run_id = run_id.unwrap_or_else(|| RunId::generate(&orchestrator.queue_prefix));

    let configs: Vec<(Role, PipelineConfig)> = generate(
        n,
        &run_id,
        &config.engine,
        &QueueRef::broker(orchestrator.processing_queue_name(run_id.as_str()), broker.clone()),
        &QueueRef::broker(orchestrator.output_queue_name(run_id.as_str()), broker.clone()),
    )?
    .collect();

    info!(%run_id, workers = n, broker = %broker.redacted_url(), "starting networked run");
    let channels = RemoteChannels::open(config, &run_id).await?;
    dispatch_run(configs, channels, orchestrator, launcher).await
}

/// Launch the endpoints of `configs`, publish its workers and monitor the run
pub async fn dispatch_run(
    configs: Vec<(Role, PipelineConfig)>,
    channels: RemoteChannels,
    orchestrator: &OrchestratorConfig,
    mut launcher: Launcher,
) -> ExecutionResult<()> {
    let RemoteChannels {
        startup,
        fanout,
        processing,
        output,
    } = channels;

    let mut handles = Vec::new();
    let mut dispatched = 0;
    for (role, config) in configs {
        if role.is_endpoint() {
            handles.push(launcher.launch(&config)?);
        } else {
            startup.put(WorkerAssignment::new(config)).await?;
            dispatched += 1;
        }
    }
    info!(dispatched, startup_queue = %orchestrator.startup_queue, "workers dispatched");

    let propagator = CrashPropagator::new(fanout, true);
    let mut monitor = Monitor::new(propagator, orchestrator.tick_interval)
        .with_status_line(orchestrator.status_line)
        .with_queues(processing, output);

    let result = monitor.run(handles).await;
    if let Err(e) = monitor.close().await {
        warn!(error = %e, "failed to close crash fan-out");
    }
    if let Err(e) = startup.close().await {
        warn!(error = %e, "failed to close startup queue");
    }
    result
}
