//! Code nodes run by external worker processes
//!
//! The `program` attribute names a directory under the workers dir holding
//! the worker binary. Every other input attribute is sent to the worker as
//! text. What comes back is sorted into three piles:
//!
//! - read-only or `_` attributes become outputs
//! - attributes the node doesn't have yet are declared on it
//! - inputs the worker changed are written back after the pass
//!
//! `code_python` sends its `code` and inputs to the code service as a job;
//! the `_` variables the code leaves behind become outputs.

use std::collections::HashMap;
use std::sync::Arc;

use node_vm::{is_output_attr, Value};
use node_worker::{WorkerAttr, WorkerServer};

use crate::extensions::extension_keys;
use crate::jobs::{interrupted, JobManager};
use crate::registry::{ExecContext, ExecOutput, NodeType, TaskRegistry};
use crate::services::CodeService;
use crate::types::AttrUi;
use crate::{NodeEngineError, Result};

use super::GROUP_CODE;

pub const PROGRAM_ATTR: &str = "program";
pub const CODE_ATTR: &str = "code";

pub fn register(registry: &mut TaskRegistry) {
    registry.register(
        NodeType::new("code", GROUP_CODE)
            .attr_ui(PROGRAM_ATTR, "", AttrUi::widget("combo"))
            .user_attrs()
            .with_callback(run_worker),
    );
    registry.register(
        NodeType::new("code_python", GROUP_CODE)
            .attr_ui(CODE_ATTR, "", AttrUi::widget("code"))
            .user_attrs()
            .with_callback(run_python),
    );
}

/// Numbers travel as decimal text
pub fn wire_value(text: &str) -> Value {
    match text.trim().parse::<f64>() {
        Ok(n) if !text.trim().is_empty() => Value::Number(n),
        _ => Value::Text(text.to_string()),
    }
}

fn worker_inputs(ctx: &ExecContext) -> HashMap<String, String> {
    ctx.inputs
        .iter()
        .filter(|(name, _)| name.as_str() != PROGRAM_ATTR && !is_output_attr(name))
        .map(|(name, value)| (name.clone(), value.as_text()))
        .collect()
}

fn collect(ctx: &ExecContext, inputs: &HashMap<String, String>, attrs: Vec<WorkerAttr>) -> ExecOutput {
    let mut out = ExecOutput::new();
    for attr in attrs {
        if attr.name == PROGRAM_ATTR {
            continue;
        }
        if !attr.error.is_empty() {
            out = out.attr_error(&attr.name, attr.error.clone());
        }

        let value = wire_value(&attr.value);
        if attr.gui_read_only || is_output_attr(&attr.name) {
            out = out.output(&attr.name, value);
            continue;
        }
        match inputs.get(&attr.name) {
            None if !ctx.inputs.contains_key(&attr.name) => {
                out = out.declare(&attr.name, &value.to_literal());
            }
            Some(sent) if *sent != attr.value => {
                out = out.set(ctx.node, None, &attr.name, value);
            }
            _ => {}
        }
    }
    out
}

async fn run_worker(ctx: ExecContext) -> Result<ExecOutput> {
    let program = ctx.text(PROGRAM_ATTR);
    if program.is_empty() {
        return Ok(ExecOutput::new().attr_error(PROGRAM_ATTR, "empty"));
    }

    let server = Arc::clone(ctx.extension::<Arc<WorkerServer>>(extension_keys::WORKER_SERVER)?);
    let inputs = worker_inputs(&ctx);
    let progress = ctx.progress.clone();
    let attrs = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(NodeEngineError::Cancelled),
        result = server.execute(&program, &ctx.path, &inputs, |p| progress.set(p.proc.min(1.0), &p.desc)) => result?,
    };
    Ok(collect(&ctx, &inputs, attrs))
}

/// Inputs of a `code_python` node as JSON variables
fn python_attrs(ctx: &ExecContext) -> serde_json::Map<String, serde_json::Value> {
    ctx.inputs
        .iter()
        .filter(|(name, _)| name.as_str() != CODE_ATTR && !is_output_attr(name))
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect()
}

async fn run_python(ctx: ExecContext) -> Result<ExecOutput> {
    let out = ExecOutput::new();
    let code = ctx.text(CODE_ATTR);
    if code.is_empty() {
        return Ok(out.attr_error(CODE_ATTR, "empty"));
    }
    if code.to_lowercase().contains("import") {
        return Ok(out.attr_error(CODE_ATTR, "Code contains 'import' keyword"));
    }

    let attrs = python_attrs(&ctx);
    let service = Arc::clone(ctx.extension::<Arc<dyn CodeService>>(extension_keys::CODE)?);
    let jobs = ctx.extension::<Arc<JobManager>>(extension_keys::JOBS)?;
    jobs.add_job(&ctx.path, move |job| async move {
        job.set_progress(job.progress(), "running");
        let reply = tokio::select! {
            biased;
            _ = job.cancelled() => return Err(interrupted("running")),
            reply = service.run(&code, &attrs) => reply?,
        };
        for (name, value) in &reply.attrs {
            if is_output_attr(name) {
                job.set_output(name, Value::from_json(value));
            }
        }
        if !reply.err.is_empty() {
            job.set_error(reply.err);
        }
        job.set_progress(1.0, "");
        Ok(())
    });
    Ok(out)
}
