use anyhow::{bail, Context};
use async_trait::async_trait;
use conveyor_execution::{Engine, InputStage, OutputStage, PipelineConfig, PluginGroup};
use conveyor_ipc::TcpTransport;
use conveyor_queue::{ManagerClient, Payload, QueueRef};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::event::Event;
use crate::sink::Sink;
use crate::source::Source;
use crate::stage::{EventQueue, Puller, Pusher};
use crate::transform::Transform;

enum Intake {
    Source(Source),
    Queue(Puller),
}

impl Intake {
    async fn next(&mut self) -> anyhow::Result<Option<Event>> {
        match self {
            Intake::Source(source) => source.next().await,
            Intake::Queue(puller) => puller.next().await,
        }
    }
}

enum Outlet {
    Sink(Sink),
    Queue(Pusher),
}

impl Outlet {
    async fn start(&mut self) -> anyhow::Result<()> {
        match self {
            Outlet::Sink(_) => Ok(()),
            Outlet::Queue(pusher) => pusher.start().await,
        }
    }

    async fn emit(&mut self, event: Event) -> anyhow::Result<()> {
        match self {
            Outlet::Sink(sink) => sink.write(&event).await,
            Outlet::Queue(pusher) => pusher.push(event).await,
        }
    }

    async fn finish(&mut self) -> anyhow::Result<()> {
        match self {
            Outlet::Sink(sink) => sink.finish().await,
            Outlet::Queue(pusher) => pusher.finish().await,
        }
    }
}

/// Built-in pipeline engine: source or queue, transform, sink or queue
pub struct BuiltinEngine {
    manager: Option<ManagerClient<TcpTransport>>,
    stopping: AtomicBool,
}

impl BuiltinEngine {
    /// `manager` is the host connection managed queues go through
    pub fn new(manager: Option<ManagerClient<TcpTransport>>) -> Self {
        Self {
            manager,
            stopping: AtomicBool::new(false),
        }
    }

    async fn open_queue(&self, queue: &QueueRef) -> anyhow::Result<EventQueue> {
        queue
            .connect::<Payload<Event>, TcpTransport>(self.manager.as_ref())
            .await
            .with_context(|| format!("opening queue {}", queue.name()))
    }

    async fn open_intake(&self, config: &PipelineConfig) -> anyhow::Result<Intake> {
        Ok(match &config.input {
            InputStage::External => Intake::Source(Source::open(&config.engine).await?),
            InputStage::PullFromQueue {
                queue,
                timeout_after_sec,
                ordered_pull,
            } => Intake::Queue(Puller::new(
                self.open_queue(queue).await?,
                *timeout_after_sec,
                *ordered_pull,
                config.producers,
                config.engine.queue_poll_interval,
            )),
        })
    }

    async fn open_outlet(&self, config: &PipelineConfig) -> anyhow::Result<Outlet> {
        Ok(match &config.output {
            OutputStage::External => Outlet::Sink(Sink::open(&config.engine.sink).await?),
            OutputStage::PushToQueue {
                queue,
                preserve_ids,
                many_to_one,
            } => Outlet::Queue(Pusher::new(
                self.open_queue(queue).await?,
                *preserve_ids,
                *many_to_one,
            )),
        })
    }
}

#[async_trait]
impl Engine for BuiltinEngine {
    async fn run(&self, config: PipelineConfig) -> anyhow::Result<()> {
        if !config.runs(PluginGroup::Input) || !config.runs(PluginGroup::Output) {
            bail!("{} pipeline needs both an input and an output stage", config.role);
        }
        let transform = if config.runs(PluginGroup::Transform) {
            Some(Transform::new(&config.engine)?)
        } else {
            None
        };

        let mut outlet = self.open_outlet(&config).await?;
        outlet.start().await?;
        let mut intake = self.open_intake(&config).await?;

        let mut processed: u64 = 0;
        while let Some(event) = intake.next().await? {
            let event = match &transform {
                Some(transform) => transform.apply(event)?,
                None => event,
            };
            outlet.emit(event).await?;
            processed += 1;

            if self.stopping.load(Ordering::Acquire) {
                info!(processed, "shutdown requested; ending the stream early");
                break;
            }
        }

        outlet.finish().await?;
        info!(role = %config.role, run_id = %config.run_id, processed, "pipeline finished");
        Ok(())
    }

    async fn shutdown(&self) {
        debug!("engine shutdown requested");
        self.stopping.store(true, Ordering::Release);
    }
}
