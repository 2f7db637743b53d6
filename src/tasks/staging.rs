//! Data staging tasks: inputs onto the backend, outputs and archives off it.

use super::{backend_outcome, Task, TaskContext, TaskResult};
use crate::error::Result;
use crate::models::TaskKind;
use async_trait::async_trait;
use tracing::info;

/// Files listed under this parameter key are staged relative to the
/// compute descriptor's input/output directories.
const FILES_PARAM: &str = "files";

fn file_list(ctx: &TaskContext) -> Option<Vec<String>> {
    let value = ctx.record.parameters.get(FILES_PARAM)?;
    let names = value
        .as_array()?
        .iter()
        .filter_map(|entry| entry.as_str().map(ToString::to_string))
        .collect::<Vec<_>>();
    Some(names)
}

/// Copies declared input files into the backend working directory.
pub struct InputStagingTask;

#[async_trait]
impl Task for InputStagingTask {
    fn kind(&self) -> TaskKind {
        TaskKind::InputStaging
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult> {
        let Some(files) = file_list(ctx) else {
            return Ok(TaskResult::failed(format!(
                "task {} has no `{FILES_PARAM}` parameter listing inputs to stage",
                ctx.record.id
            )));
        };
        if files.is_empty() {
            return Ok(TaskResult::completed("no input files to stage"));
        }

        for name in &files {
            let source = ctx.compute.input_dir.join(name);
            let dest = ctx.compute.working_dir.join(name);
            if let Err(err) = ctx.client.transfer_in(&source, &dest).await {
                return backend_outcome("input staging", err);
            }
        }

        info!(process_id = %ctx.process_id, count = files.len(), "Inputs staged");
        Ok(TaskResult::completed(format!(
            "staged {} input file(s)",
            files.len()
        )))
    }

    async fn cancel(&self, _ctx: &TaskContext) {}
}

/// Copies declared output files from the working directory to the output
/// destination.
pub struct OutputStagingTask;

#[async_trait]
impl Task for OutputStagingTask {
    fn kind(&self) -> TaskKind {
        TaskKind::OutputStaging
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult> {
        let Some(files) = file_list(ctx) else {
            return Ok(TaskResult::failed(format!(
                "task {} has no `{FILES_PARAM}` parameter listing outputs to stage",
                ctx.record.id
            )));
        };
        if files.is_empty() {
            return Ok(TaskResult::completed("no output files to stage"));
        }

        for name in &files {
            let source = ctx.compute.working_dir.join(name);
            let dest = ctx.compute.output_dir.join(name);
            if let Err(err) = ctx.client.transfer_out(&source, &dest).await {
                return backend_outcome("output staging", err);
            }
        }

        info!(process_id = %ctx.process_id, count = files.len(), "Outputs staged");
        Ok(TaskResult::completed(format!(
            "staged {} output file(s)",
            files.len()
        )))
    }

    async fn cancel(&self, _ctx: &TaskContext) {}
}

/// Packs the working directory into a tarball and stages it out.
pub struct ArchiveTask;

#[async_trait]
impl Task for ArchiveTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Archive
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult> {
        let working_dir = &ctx.compute.working_dir;
        let archive_name = format!("{}.tar.gz", ctx.process_id);
        let command = format!("tar czf /tmp/{archive_name} -C {} .", working_dir.display());

        match ctx.client.execute(&command, None).await {
            Ok(output) if output.succeeded() => {}
            Ok(output) => {
                return Ok(TaskResult::failed(format!(
                    "archive creation failed: {}",
                    output.stderr.trim()
                )))
            }
            Err(err) => return backend_outcome("archive creation", err),
        }

        let source = std::path::PathBuf::from(format!("/tmp/{archive_name}"));
        let dest = ctx.compute.output_dir.join(&archive_name);
        if let Err(err) = ctx.client.transfer_out(&source, &dest).await {
            return backend_outcome("archive staging", err);
        }

        Ok(TaskResult::completed(format!(
            "workspace archived to {}",
            dest.display()
        )))
    }

    async fn cancel(&self, _ctx: &TaskContext) {}
}
