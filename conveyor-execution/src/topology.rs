//! Per-role pipeline configuration
//!
//! [`generate`] turns a worker count and a base engine configuration into
//! the configurations of one run: one `input`, `n` × `worker`, one `output`,
//! in that order, all stamped with the same run id.

use conveyor_config::EngineConfig;
use conveyor_queue::QueueRef;
use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, ExecutionResult};
use crate::run::{Role, RunId};

/// Engine plugin groups a role runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginGroup {
    /// Source, or pull from a queue
    Input,
    /// Decode, transform, encode
    Transform,
    /// Sink, or push to a queue
    Output,
}

/// Where a role gets its events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputStage {
    /// The engine's configured source
    External,
    PullFromQueue {
        queue: QueueRef,
        /// Give up after this many seconds without an item; `None` waits forever
        timeout_after_sec: Option<f64>,
        /// Release events in event-number order
        ordered_pull: bool,
    },
}

/// Where a role sends its events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputStage {
    /// The engine's configured sink
    External,
    PushToQueue {
        queue: QueueRef,
        /// Keep the event numbers assigned upstream so the output can reorder
        preserve_ids: bool,
        /// One of several producers on the queue: register and sign off
        /// instead of ending the stream
        many_to_one: bool,
    },
}

/// Everything one role process needs; produced once, consumed once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub run_id: RunId,
    pub role: Role,

    /// Base engine configuration with the role's overrides applied
    pub engine: EngineConfig,

    pub input: InputStage,
    pub output: OutputStage,
    pub plugin_groups: Vec<PluginGroup>,

    /// Producers the output role waits to hear `PusherDone` from
    pub producers: usize,

    /// Always false in generated configs: a role never spawns its own pipeline
    pub allow_multiprocessing: bool,
    pub show_progress: bool,
}

impl PipelineConfig {
    /// Single-process pipeline: source, transform and sink in one engine
    pub fn standalone(run_id: RunId, engine: EngineConfig) -> Self {
        Self {
            run_id,
            role: Role::Worker,
            engine,
            input: InputStage::External,
            output: OutputStage::External,
            plugin_groups: vec![PluginGroup::Input, PluginGroup::Transform, PluginGroup::Output],
            producers: 0,
            allow_multiprocessing: false,
            show_progress: true,
        }
    }

    pub fn runs(&self, group: PluginGroup) -> bool {
        self.plugin_groups.contains(&group)
    }

    fn common(run_id: &RunId, role: Role, engine: EngineConfig) -> Self {
        Self {
            run_id: run_id.clone(),
            role,
            engine,
            input: InputStage::External,
            output: OutputStage::External,
            plugin_groups: vec![PluginGroup::Input, PluginGroup::Transform, PluginGroup::Output],
            producers: 0,
            allow_multiprocessing: false,
            show_progress: false,
        }
    }
}

fn input_config(run_id: &RunId, base: &EngineConfig, processing: &QueueRef) -> PipelineConfig {
    let mut engine = base.clone();
    engine.decoder = None;
    engine.encoder = None;

    PipelineConfig {
        output: OutputStage::PushToQueue {
            queue: processing.clone(),
            preserve_ids: false,
            many_to_one: false,
        },
        plugin_groups: vec![PluginGroup::Input, PluginGroup::Output],
        ..PipelineConfig::common(run_id, Role::Input, engine)
    }
}

fn worker_config(
    run_id: &RunId,
    base: &EngineConfig,
    processing: &QueueRef,
    output: &QueueRef,
) -> PipelineConfig {
    let mut engine = base.clone();
    engine.events_to_process = None;
    engine.event_numbers_file = None;

    PipelineConfig {
        // Workers never time out waiting for work
        input: InputStage::PullFromQueue {
            queue: processing.clone(),
            timeout_after_sec: None,
            ordered_pull: false,
        },
        output: OutputStage::PushToQueue {
            queue: output.clone(),
            preserve_ids: true,
            many_to_one: true,
        },
        ..PipelineConfig::common(run_id, Role::Worker, engine)
    }
}

fn output_config(run_id: &RunId, base: &EngineConfig, output: &QueueRef, n: usize) -> PipelineConfig {
    let mut engine = base.clone();
    engine.decoder = None;
    engine.encoder = None;
    engine.events_to_process = None;
    engine.event_numbers_file = None;

    PipelineConfig {
        input: InputStage::PullFromQueue {
            queue: output.clone(),
            timeout_after_sec: None,
            ordered_pull: true,
        },
        plugin_groups: vec![PluginGroup::Input, PluginGroup::Output],
        producers: n,
        ..PipelineConfig::common(run_id, Role::Output, engine)
    }
}

/// Role configurations of one run, produced lazily in launch order
///
/// Fails before yielding anything when `n` is zero or a queue has no name.
pub fn generate(
    n: usize,
    run_id: &RunId,
    base: &EngineConfig,
    processing: &QueueRef,
    output: &QueueRef,
) -> ExecutionResult<impl Iterator<Item = (Role, PipelineConfig)>> {
    if n == 0 {
        return Err(ExecutionError::InvalidTopology(
            "a run needs at least one worker".to_string(),
        ));
    }
    if run_id.as_str().is_empty() {
        return Err(ExecutionError::InvalidTopology("run id is empty".to_string()));
    }
    for (label, queue) in [("processing", processing), ("output", output)] {
        if queue.name().is_empty() {
            return Err(ExecutionError::InvalidTopology(format!(
                "{} queue has no name",
                label
            )));
        }
    }

    let (run_id, base, processing, output) =
        (run_id.clone(), base.clone(), processing.clone(), output.clone());

    let input = {
        let (run_id, base, processing) = (run_id.clone(), base.clone(), processing.clone());
        std::iter::once_with(move || (Role::Input, input_config(&run_id, &base, &processing)))
    };

    let workers = {
        let (run_id, base, processing, output) =
            (run_id.clone(), base.clone(), processing.clone(), output.clone());
        (0..n).map(move |_| (Role::Worker, worker_config(&run_id, &base, &processing, &output)))
    };

    let sink = std::iter::once_with(move || (Role::Output, output_config(&run_id, &base, &output, n)));

    Ok(input.chain(workers).chain(sink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_config::BrokerConfig;

    fn queues() -> (QueueRef, QueueRef) {
        (
            QueueRef::managed("conveyor_local_processing"),
            QueueRef::managed("conveyor_local_output"),
        )
    }

    #[test]
    fn test_role_order_and_count() {
        let (processing, output) = queues();
        for n in 1..=5 {
            let roles: Vec<Role> = generate(n, &RunId::local(), &EngineConfig::default(), &processing, &output)
                .unwrap()
                .map(|(role, config)| {
                    assert_eq!(role, config.role);
                    assert_eq!(config.run_id, RunId::local());
                    assert!(!config.allow_multiprocessing);
                    role
                })
                .collect();

            assert_eq!(roles.len(), n + 2);
            assert_eq!(roles[0], Role::Input);
            assert!(roles[1..=n].iter().all(|r| *r == Role::Worker));
            assert_eq!(roles[n + 1], Role::Output);
        }
    }

    #[test]
    fn test_zero_workers_rejected() {
        let (processing, output) = queues();
        let result = generate(0, &RunId::local(), &EngineConfig::default(), &processing, &output);
        assert!(matches!(result, Err(ExecutionError::InvalidTopology(_))));
    }

    #[test]
    fn test_unnamed_queue_rejected() {
        let (processing, _) = queues();
        let result = generate(
            2,
            &RunId::local(),
            &EngineConfig::default(),
            &processing,
            &QueueRef::managed(""),
        );
        assert!(matches!(result, Err(ExecutionError::InvalidTopology(_))));
    }

    #[test]
    fn test_role_overrides() {
        let base = EngineConfig {
            decoder: Some("json".to_string()),
            encoder: Some("json".to_string()),
            events_to_process: Some(10),
            ..Default::default()
        };
        let processing = QueueRef::broker("conveyor_r_processing", BrokerConfig::default());
        let output = QueueRef::broker("conveyor_r_output", BrokerConfig::default());
        let configs: Vec<_> = generate(2, &RunId::new("r"), &base, &processing, &output)
            .unwrap()
            .map(|(_, c)| c)
            .collect();

        let input = &configs[0];
        assert_eq!(input.engine.decoder, None);
        assert_eq!(input.engine.encoder, None);
        assert_eq!(input.engine.events_to_process, Some(10));
        assert_eq!(input.input, InputStage::External);
        assert_eq!(input.plugin_groups, vec![PluginGroup::Input, PluginGroup::Output]);
        assert!(matches!(
            &input.output,
            OutputStage::PushToQueue { queue, many_to_one: false, .. } if *queue == processing
        ));

        let worker = &configs[1];
        assert_eq!(worker.engine.decoder.as_deref(), Some("json"));
        assert_eq!(worker.engine.events_to_process, None);
        assert!(worker.runs(PluginGroup::Transform));
        assert!(matches!(
            &worker.input,
            InputStage::PullFromQueue { queue, timeout_after_sec: None, ordered_pull: false } if *queue == processing
        ));
        assert!(matches!(
            &worker.output,
            OutputStage::PushToQueue { queue, preserve_ids: true, many_to_one: true } if *queue == output
        ));

        let sink = &configs[3];
        assert_eq!(sink.engine.encoder, None);
        assert_eq!(sink.producers, 2);
        assert_eq!(sink.output, OutputStage::External);
        assert!(matches!(
            &sink.input,
            InputStage::PullFromQueue { ordered_pull: true, .. }
        ));
    }

    #[test]
    fn test_config_survives_serialization() {
        let (processing, output) = queues();
        let config = generate(1, &RunId::local(), &EngineConfig::default(), &processing, &output)
            .unwrap()
            .nth(1)
            .unwrap()
            .1;
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
