//! Network nodes

use std::path::PathBuf;
use std::sync::Arc;

use node_vm::Value;

use crate::download::download;
use crate::extensions::extension_keys;
use crate::jobs::JobManager;
use crate::registry::{ExecContext, ExecOutput, NodeType, TaskRegistry};
use crate::types::AttrUi;
use crate::Result;

use super::{switch, GROUP_NET};

pub fn register(registry: &mut TaskRegistry) {
    registry.register(
        NodeType::new("net_download", GROUP_NET)
            .attr("url", "")
            .attr_ui("path", "", AttrUi::widget("file"))
            .attr_ui("delete_on_cancel", "0", switch())
            .attr_ui("_done", "0", AttrUi::default().read_only())
            .with_callback(net_download),
    );
}

/// Starts a download job unless the file is already there
///
/// `_done` becomes 1 when the job completes; the job is retired by the next
/// runtime tick, which also re-runs the pass.
async fn net_download(ctx: ExecContext) -> Result<ExecOutput> {
    let out = ExecOutput::new();
    let url = ctx.text("url");
    let path = ctx.text("path");
    if url.is_empty() {
        return Ok(out.attr_error("url", "empty"));
    }
    if path.is_empty() {
        return Ok(out.attr_error("path", "empty"));
    }

    let target = PathBuf::from(&path);
    if tokio::fs::try_exists(&target).await? {
        return Ok(out.output("_done", Value::from_bool(true)));
    }

    let jobs = ctx.extension::<Arc<JobManager>>(extension_keys::JOBS)?;
    if !jobs.is_running(&ctx.path) {
        let client = jobs.http_client().clone();
        let delete = ctx.bool("delete_on_cancel");
        log::info!("Downloading {} into {}", url, path);
        jobs.add_job(&ctx.path, move |job| async move {
            download(&client, &url, &target, delete, &job).await?;
            job.set_output("_done", Value::from_bool(true));
            Ok(())
        });
    }
    Ok(out.output("_done", Value::from_bool(false)))
}
