//! The pipeline engine a role process runs

use async_trait::async_trait;

use crate::topology::PipelineConfig;

/// Single-process pipeline engine
///
/// `run` blocks until the role's work is done or fails. Failures are plain
/// `anyhow` errors; the role-process boundary turns them into a recorded
/// fault. `shutdown` is only called on graceful teardown, never after a
/// crash.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    async fn run(&self, config: PipelineConfig) -> anyhow::Result<()>;

    async fn shutdown(&self);
}
