//! Language model and speech nodes
//!
//! Both run their service call as a job. The body returns at once; the
//! result lands on the node when the job is retired. Services cache their
//! responses, so the pass that follows a finished job re-runs the job
//! against the cache and the value settles.

use std::future::Future;
use std::sync::Arc;

use node_vm::Value;

use crate::extensions::extension_keys;
use crate::jobs::{interrupted, JobHandle, JobManager};
use crate::registry::{ExecContext, ExecOutput, NodeType, TaskRegistry};
use crate::services::{CompletionService, TranscriptionService};
use crate::types::AttrUi;
use crate::Result;

use super::GROUP_NN;

pub const DEFAULT_WHISPER_MODEL: &str = "ggml-tiny.en";

pub fn register(registry: &mut TaskRegistry) {
    registry.register(
        NodeType::new("llm_complete", GROUP_NN)
            .attr("prompt", "")
            .attr_ui("_out", "", AttrUi::default().read_only())
            .with_callback(llm_complete),
    );
    registry.register(
        NodeType::new("whisper", GROUP_NN)
            .attr("model", &format!("\"{}\"", DEFAULT_WHISPER_MODEL))
            .attr_ui("audio", "", AttrUi::widget("blob"))
            .attr_ui("_text", "", AttrUi::default().read_only())
            .with_callback(whisper),
    );
}

/// Run `call` until it finishes or the job is interrupted
async fn until_interrupted<F>(job: &JobHandle, what: &str, call: F) -> Result<String>
where
    F: Future<Output = Result<String>>,
{
    job.set_progress(job.progress(), what);
    tokio::select! {
        biased;
        _ = job.cancelled() => Err(interrupted(what)),
        result = call => result,
    }
}

async fn llm_complete(ctx: ExecContext) -> Result<ExecOutput> {
    let out = ExecOutput::new();
    let prompt = ctx.text("prompt");
    if prompt.is_empty() {
        return Ok(out.attr_error("prompt", "empty"));
    }

    let service = Arc::clone(ctx.extension::<Arc<dyn CompletionService>>(extension_keys::COMPLETION)?);
    let jobs = ctx.extension::<Arc<JobManager>>(extension_keys::JOBS)?;
    jobs.add_job(&ctx.path, move |job| async move {
        let text = until_interrupted(&job, "generating", service.complete(&prompt)).await?;
        job.set_output("_out", Value::Text(text));
        job.set_progress(1.0, "");
        Ok(())
    });
    Ok(out)
}

async fn whisper(ctx: ExecContext) -> Result<ExecOutput> {
    let out = ExecOutput::new();
    let model = ctx.text("model");
    if model.is_empty() {
        return Ok(out.attr_error("model", "empty"));
    }
    let audio = ctx.input("audio").to_blob();
    if audio.is_empty() {
        return Ok(out.attr_error("audio", "empty"));
    }

    let service = Arc::clone(ctx.extension::<Arc<dyn TranscriptionService>>(extension_keys::TRANSCRIPTION)?);
    let jobs = ctx.extension::<Arc<JobManager>>(extension_keys::JOBS)?;
    jobs.add_job(&ctx.path, move |job| async move {
        let text = until_interrupted(&job, "transcribing", service.transcribe(audio.data(), &model)).await?;
        job.set_output("_text", Value::Text(text));
        job.set_progress(1.0, "");
        Ok(())
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::extensions::ExecutorExtensions;
    use crate::tasks::test_util::{context, run};

    struct Echo;

    #[async_trait]
    impl CompletionService for Echo {
        async fn complete(&self, prompt: &str) -> Result<String> {
            Ok(format!("echo: {}", prompt))
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(usize, String)>>,
    }

    #[async_trait]
    impl TranscriptionService for Recorder {
        async fn transcribe(&self, audio: &[u8], model: &str) -> Result<String> {
            self.calls.lock().push((audio.len(), model.to_string()));
            Ok("hello".into())
        }
    }

    async fn finished(jobs: &JobManager, path: &str) -> JobHandle {
        let handle = jobs.find(path).unwrap();
        while !handle.is_done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle
    }

    #[tokio::test]
    async fn test_llm_complete_runs_as_job() {
        let jobs = Arc::new(JobManager::new(Duration::from_secs(5)).unwrap());
        let service: Arc<dyn CompletionService> = Arc::new(Echo);
        let mut ext = ExecutorExtensions::new();
        ext.set(extension_keys::JOBS, Arc::clone(&jobs));
        ext.set(extension_keys::COMPLETION, service);

        let ctx = context("llm_complete", &[("prompt", Value::Text("hi".into()))], ext);
        let path = ctx.path.clone();
        let out = run(ctx).await.unwrap();
        assert!(out.outputs.is_empty());

        let handle = finished(&jobs, &path).await;
        assert_eq!(handle.error(), None);
        assert_eq!(handle.progress(), 1.0);
    }

    #[tokio::test]
    async fn test_whisper_passes_model_and_audio() {
        let jobs = Arc::new(JobManager::new(Duration::from_secs(5)).unwrap());
        let recorder = Arc::new(Recorder::default());
        let service: Arc<dyn TranscriptionService> = recorder.clone();
        let mut ext = ExecutorExtensions::new();
        ext.set(extension_keys::JOBS, Arc::clone(&jobs));
        ext.set(extension_keys::TRANSCRIPTION, service);

        let ctx = context(
            "whisper",
            &[
                ("model", Value::Text("base.en".into())),
                ("audio", Value::blob(vec![1, 2, 3])),
            ],
            ext,
        );
        let path = ctx.path.clone();
        run(ctx).await.unwrap();
        finished(&jobs, &path).await;

        assert_eq!(recorder.calls.lock().clone(), vec![(3, "base.en".to_string())]);
    }

    #[tokio::test]
    async fn test_empty_inputs_are_attribute_errors() {
        let ctx = context("llm_complete", &[], ExecutorExtensions::new());
        let out = run(ctx).await.unwrap();
        assert_eq!(out.attr_errors, vec![("prompt".to_string(), "empty".to_string())]);

        let ctx = context("whisper", &[("model", Value::Text("base.en".into()))], ExecutorExtensions::new());
        let out = run(ctx).await.unwrap();
        assert_eq!(out.attr_errors, vec![("audio".to_string(), "empty".to_string())]);
    }
}
