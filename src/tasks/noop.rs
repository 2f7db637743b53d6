use super::{Task, TaskContext, TaskResult};
use crate::error::Result;
use crate::models::TaskKind;
use async_trait::async_trait;
use tracing::debug;

/// Stand-in for task types that are meaningless on a given backend, so every
/// backend shares the same pipeline shape.
pub struct NoOpTask {
    kind: TaskKind,
    note: String,
}

impl NoOpTask {
    pub fn new(kind: TaskKind, note: impl Into<String>) -> Self {
        Self {
            kind,
            note: note.into(),
        }
    }
}

#[async_trait]
impl Task for NoOpTask {
    fn kind(&self) -> TaskKind {
        self.kind
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult> {
        debug!(process_id = %ctx.process_id, kind = %self.kind, "No-op task");
        Ok(TaskResult::completed(self.note.clone()))
    }

    async fn cancel(&self, _ctx: &TaskContext) {}
}
