//! Background jobs bound to node paths
//!
//! Long work (downloads, model calls) outlives a single pass. A node body
//! starts it with [`JobManager::add_job`] and returns immediately; the job
//! runs as its own tokio task and reports through its [`JobHandle`]. On every
//! runtime tick [`JobManager::tick`] copies job state onto the node found by
//! path and retires finished jobs.
//!
//! Jobs are keyed by path, not id, so a job survives the node being
//! recreated by undo or reload.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use node_vm::Value;

use crate::error::{NodeEngineError, Result};
use crate::events::{EventSink, NodeEvent};
use crate::graph::Graph;

/// Progress a job starts with, so it never shows as idle
pub const INITIAL_PROGRESS: f64 = 0.001;

const STOP_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct JobState {
    cancel: CancellationToken,
    proc: AtomicU64,
    desc: Mutex<String>,
    error: Mutex<Option<String>>,
    outputs: Mutex<Vec<(String, Value)>>,
    done: AtomicBool,
}

/// Shared state of one job
#[derive(Debug, Clone)]
pub struct JobHandle {
    state: Arc<JobState>,
}

impl JobHandle {
    fn new() -> Self {
        Self {
            state: Arc::new(JobState {
                cancel: CancellationToken::new(),
                proc: AtomicU64::new(INITIAL_PROGRESS.to_bits()),
                desc: Mutex::new(String::new()),
                error: Mutex::new(None),
                outputs: Mutex::new(Vec::new()),
                done: AtomicBool::new(false),
            }),
        }
    }

    pub fn interrupt(&self) {
        self.state.cancel.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.cancel.is_cancelled()
    }

    /// Resolves once the job is interrupted
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.state.cancel.cancelled()
    }

    pub fn set_progress(&self, proc: f64, desc: &str) {
        self.state.proc.store(proc.to_bits(), Ordering::Relaxed);
        *self.state.desc.lock() = desc.to_string();
    }

    pub fn progress(&self) -> f64 {
        f64::from_bits(self.state.proc.load(Ordering::Relaxed))
    }

    pub fn desc(&self) -> String {
        self.state.desc.lock().clone()
    }

    pub fn set_error(&self, error: impl Into<String>) {
        *self.state.error.lock() = Some(error.into());
    }

    pub fn error(&self) -> Option<String> {
        self.state.error.lock().clone()
    }

    /// Value written to the node's attribute when the job is retired
    pub fn set_output(&self, name: &str, value: Value) {
        let mut outputs = self.state.outputs.lock();
        outputs.retain(|(n, _)| n != name);
        outputs.push((name.to_string(), value));
    }

    fn take_outputs(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut *self.state.outputs.lock())
    }

    pub fn is_done(&self) -> bool {
        self.state.done.load(Ordering::Acquire)
    }

    fn finish(&self) {
        self.state.done.store(true, Ordering::Release);
    }
}

struct Job {
    path: String,
    handle: JobHandle,
    started: Instant,
}

/// List of running jobs
pub struct JobManager {
    jobs: Mutex<Vec<Job>>,
    http: reqwest::Client,
}

impl JobManager {
    /// `http_timeout` bounds every request made by download jobs
    pub fn new(http_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(http_timeout).build()?;
        Ok(Self {
            jobs: Mutex::new(Vec::new()),
            http,
        })
    }

    /// Client shared by download jobs
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Start a job for the node at `path`
    ///
    /// A job already registered for the path is interrupted and forgotten,
    /// not awaited. An error returned by the job becomes its terminal error.
    pub fn add_job<F, Fut>(&self, path: &str, job: F) -> JobHandle
    where
        F: FnOnce(JobHandle) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = JobHandle::new();
        {
            let mut jobs = self.jobs.lock();
            if let Some(pos) = jobs.iter().position(|j| j.path == path) {
                let old = jobs.remove(pos);
                log::debug!("Job for '{}' superseded", path);
                old.handle.interrupt();
            }
            jobs.push(Job {
                path: path.to_string(),
                handle: handle.clone(),
                started: Instant::now(),
            });
        }

        let future = job(handle.clone());
        let state = handle.clone();
        let path = path.to_string();
        tokio::spawn(async move {
            if let Err(e) = future.await {
                log::warn!("Job for '{}' failed: {}", path, e);
                state.set_error(e.to_string());
            }
            state.finish();
        });
        handle
    }

    /// True while a job for `path` has not finished
    pub fn is_running(&self, path: &str) -> bool {
        self.jobs
            .lock()
            .iter()
            .any(|j| j.path == path && !j.handle.is_done())
    }

    pub fn find(&self, path: &str) -> Option<JobHandle> {
        self.jobs
            .lock()
            .iter()
            .find(|j| j.path == path)
            .map(|j| j.handle.clone())
    }

    /// Interrupt the job of one node; it is retired by the next tick
    pub fn interrupt(&self, path: &str) {
        if let Some(job) = self.jobs.lock().iter().find(|j| j.path == path) {
            job.handle.interrupt();
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Copy job state onto nodes and retire finished jobs
    ///
    /// With `execute` off every job is stopped first. Returns true when a
    /// retired job changed an attribute value.
    pub async fn tick(&self, graph: &mut Graph, sink: &dyn EventSink, execute: bool) -> bool {
        if !execute {
            self.stop_all().await;
        }

        let finished: Vec<Job> = {
            let mut jobs = self.jobs.lock();
            let (done, running): (Vec<Job>, Vec<Job>) = jobs.drain(..).partition(|j| j.handle.is_done());
            *jobs = running;
            for job in jobs.iter() {
                Self::report(graph, sink, job, false);
            }
            done
        };

        let mut changed = false;
        for job in finished {
            Self::report(graph, sink, &job, true);
            let Some(id) = graph.find_by_path(&job.path) else {
                continue;
            };
            for (name, value) in job.handle.take_outputs() {
                match graph.set_output(id, &name, value) {
                    Ok(c) => changed |= c,
                    Err(e) => log::warn!("Job output {} for '{}': {}", name, job.path, e),
                }
            }
            if let Some(node) = graph.node_mut(id) {
                node.exe_time = job.started.elapsed().as_secs_f64();
            }
        }
        changed
    }

    fn report(graph: &mut Graph, sink: &dyn EventSink, job: &Job, done: bool) {
        let progress = job.handle.progress();
        let desc = job.handle.desc();
        if let Some(node) = graph.find_by_path(&job.path).and_then(|id| graph.node_mut(id)) {
            node.progress = progress;
            node.progress_desc = desc.clone();
            if let Some(err) = job.handle.error() {
                node.exe_error = Some(err);
            }
        }
        let _ = sink.send(NodeEvent::JobProgress {
            path: job.path.clone(),
            progress,
            message: desc,
            done,
        });
    }

    /// Interrupt every job and wait until all of them finished
    pub async fn stop_all(&self) {
        let handles: Vec<JobHandle> = self.jobs.lock().iter().map(|j| j.handle.clone()).collect();
        if handles.is_empty() {
            return;
        }
        log::info!("Stopping {} job(s)", handles.len());
        for handle in &handles {
            handle.interrupt();
        }
        while !handles.iter().all(JobHandle::is_done) {
            tokio::time::sleep(STOP_POLL).await;
        }
        self.jobs.lock().clear();
    }
}

/// Error a job returns when it noticed its interrupt
pub fn interrupted(what: &str) -> NodeEngineError {
    NodeEngineError::failed(format!("{} canceled", what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecEventSink;

    fn manager() -> JobManager {
        JobManager::new(Duration::from_secs(5)).unwrap()
    }

    async fn wait_done(handle: &JobHandle) {
        while !handle.is_done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_new_job_for_same_path_interrupts_old_one() {
        let jobs = manager();
        let first = jobs.add_job("a", |h| async move {
            h.cancelled().await;
            Err(interrupted("first"))
        });
        assert_eq!(first.progress(), INITIAL_PROGRESS);

        let second = jobs.add_job("a", |h| async move {
            h.set_progress(1.0, "ok");
            Ok(())
        });

        wait_done(&first).await;
        assert!(first.is_interrupted());
        assert_eq!(first.error().as_deref(), Some("first canceled"));
        assert!(!second.is_interrupted());
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_tick_copies_state_and_retires_done_jobs() {
        let mut graph = Graph::new();
        let root = graph.root();
        let node = graph.add_node(root, "dl", "net_download").unwrap();
        let sink = VecEventSink::new();
        let jobs = manager();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = jobs.add_job("dl", |h| async move {
            h.set_progress(0.5, "50%");
            let _ = rx.await;
            h.set_output("_out", Value::Text("done".into()));
            Ok(())
        });
        while handle.progress() != 0.5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(!jobs.tick(&mut graph, &sink, true).await);
        assert_eq!(graph.node(node).unwrap().progress, 0.5);
        assert_eq!(graph.node(node).unwrap().progress_desc, "50%");
        assert!(jobs.is_running("dl"));

        tx.send(()).unwrap();
        wait_done(&handle).await;
        assert!(jobs.tick(&mut graph, &sink, true).await);
        assert!(jobs.is_empty());
        let out = graph.node(node).unwrap().attr("_out").unwrap();
        assert_eq!(out.cached_value(), Some(&Value::Text("done".into())));

        let events = sink.events();
        assert!(matches!(events.last(), Some(NodeEvent::JobProgress { done: true, .. })));
    }

    #[tokio::test]
    async fn test_job_error_lands_on_node() {
        let mut graph = Graph::new();
        let root = graph.root();
        let node = graph.add_node(root, "job", "net_download").unwrap();
        let jobs = manager();

        let handle = jobs.add_job("job", |_| async move { Err(NodeEngineError::failed("boom")) });
        wait_done(&handle).await;
        jobs.tick(&mut graph, &crate::events::NullEventSink, true).await;
        assert_eq!(graph.node(node).unwrap().exe_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_missing_node_is_ignored() {
        let mut graph = Graph::new();
        let jobs = manager();
        let handle = jobs.add_job("gone", |h| async move {
            h.set_output("_out", Value::Number(1.0));
            Ok(())
        });
        wait_done(&handle).await;
        assert!(!jobs.tick(&mut graph, &crate::events::NullEventSink, true).await);
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_stop_all_waits_for_jobs() {
        let jobs = manager();
        let a = jobs.add_job("a", |h| async move {
            h.cancelled().await;
            Ok(())
        });
        let b = jobs.add_job("b", |h| async move {
            h.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        });

        jobs.stop_all().await;
        assert!(a.is_done());
        assert!(b.is_done());
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_tick_with_execution_off_stops_jobs() {
        let mut graph = Graph::new();
        let jobs = manager();
        let handle = jobs.add_job("a", |h| async move {
            h.cancelled().await;
            Ok(())
        });
        jobs.tick(&mut graph, &crate::events::NullEventSink, false).await;
        assert!(handle.is_done());
        assert!(jobs.is_empty());
    }
}
