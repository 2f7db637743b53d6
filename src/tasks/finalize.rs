//! Pipeline tail tasks: completion bookkeeping and downstream parse
//! triggering.

use super::{Task, TaskContext, TaskResult};
use crate::error::Result;
use crate::events::StatusEventPublisher;
use crate::models::TaskKind;
use async_trait::async_trait;
use tracing::info;

/// Final bookkeeping step before the process is marked complete.
pub struct CompletingTask;

#[async_trait]
impl Task for CompletingTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Completing
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult> {
        info!(process_id = %ctx.process_id, "All pipeline work finished");
        Ok(TaskResult::completed(format!(
            "experiment {} execution finished",
            ctx.process_id
        )))
    }

    async fn cancel(&self, _ctx: &TaskContext) {}
}

/// Signals downstream result-parsing that fresh outputs are available. The
/// parsing pipeline itself is an external consumer of the alert channel.
pub struct ParsingTriggerTask {
    publisher: StatusEventPublisher,
}

impl ParsingTriggerTask {
    pub fn new(publisher: StatusEventPublisher) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl Task for ParsingTriggerTask {
    fn kind(&self) -> TaskKind {
        TaskKind::ParsingTrigger
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult> {
        self.publisher.publish_alert(
            "parsing_trigger",
            format!(
                "outputs for process {} available at {}",
                ctx.process_id,
                ctx.compute.output_dir.display()
            ),
        );
        Ok(TaskResult::completed("parsing pipeline notified"))
    }

    async fn cancel(&self, _ctx: &TaskContext) {}
}
