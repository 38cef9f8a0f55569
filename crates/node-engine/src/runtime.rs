//! Runtime facade
//!
//! [`Runtime`] owns the graph and everything that executes it. A host calls
//! [`Runtime::tick`] once per frame; a headless caller awaits
//! [`Runtime::run_pass`]. Editing the graph through the runtime marks it
//! dirty and the next tick starts a new pass.
//!
//! A pass goes through these steps:
//!
//! 1. reset node states and add declared attributes
//! 2. recompile every expression and flag loops
//! 3. mark attributes expressions read
//! 4. tick the scheduler until no node is waiting or running
//! 5. apply the attribute writes bodies queued
//! 6. drop attributes nothing used
//!
//! Jobs are ticked after every step. A write or a job result that changes a
//! value makes the graph dirty again.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use node_vm::{AttrRef, NodeId, Value};
use node_worker::WorkerServer;

use crate::config::EngineConfig;
use crate::error::{NodeEngineError, Result};
use crate::events::{EventSink, NodeEvent};
use crate::extensions::ExecutorExtensions;
use crate::graph::Graph;
use crate::jobs::JobManager;
use crate::registry::{DeferredSet, TaskRegistry};
use crate::scheduler::Scheduler;
use crate::undo::UndoStack;

/// Pause between scheduler ticks inside [`Runtime::run_pass`]
const PASS_POLL: Duration = Duration::from_millis(1);

pub struct Runtime {
    config: EngineConfig,
    graph: Graph,
    registry: TaskRegistry,
    scheduler: Scheduler,
    jobs: Arc<JobManager>,
    server: Option<Arc<WorkerServer>>,
    sink: Arc<dyn EventSink>,
    sets: Vec<DeferredSet>,
    undo: UndoStack,
    dirty: bool,
    in_pass: bool,
    execute: bool,
}

impl Runtime {
    pub(crate) fn from_parts(
        config: EngineConfig,
        graph: Graph,
        registry: TaskRegistry,
        extensions: Arc<ExecutorExtensions>,
        jobs: Arc<JobManager>,
        server: Option<Arc<WorkerServer>>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            scheduler: Scheduler::new(config.max_threads, extensions),
            undo: UndoStack::new(config.max_undo),
            config,
            graph,
            registry,
            jobs,
            server,
            sink,
            sets: Vec::new(),
            dirty: true,
            in_pass: false,
            execute: true,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Mutable graph; the graph is marked dirty
    pub fn graph_mut(&mut self) -> &mut Graph {
        self.dirty = true;
        &mut self.graph
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.jobs
    }

    pub fn worker_server(&self) -> Option<&Arc<WorkerServer>> {
        self.server.as_ref()
    }

    pub fn extensions(&self) -> &Arc<ExecutorExtensions> {
        self.scheduler.extensions()
    }

    pub fn pass(&self) -> u64 {
        self.scheduler.pass()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn in_pass(&self) -> bool {
        self.in_pass
    }

    pub fn is_executing(&self) -> bool {
        self.execute
    }

    /// Turn execution on or off; the graph is marked dirty either way
    ///
    /// With execution off no pass starts and jobs are stopped on the next tick.
    pub fn set_execute(&mut self, execute: bool) {
        self.execute = execute;
        self.dirty = true;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// One non-blocking step
    ///
    /// Returns true while a pass runs, a new one is due, or jobs are alive.
    pub async fn tick(&mut self) -> bool {
        if !self.in_pass && self.dirty && self.execute {
            self.begin_pass();
        }
        if self.in_pass {
            self.step();
        }
        self.tick_jobs().await;
        self.in_pass || (self.dirty && self.execute) || !self.jobs.is_empty()
    }

    /// Run one whole pass, starting one if none is in progress
    pub async fn run_pass(&mut self) {
        if !self.in_pass {
            self.begin_pass();
        }
        loop {
            self.step();
            if !self.in_pass {
                break;
            }
            tokio::time::sleep(PASS_POLL).await;
        }
        self.tick_jobs().await;
    }

    /// Run passes until the graph settles and every job finished
    pub async fn run_until_idle(&mut self) {
        while self.tick().await {
            tokio::time::sleep(PASS_POLL).await;
        }
    }

    fn begin_pass(&mut self) {
        self.dirty = false;
        self.graph.prepare_pass(&self.registry);
        self.graph.compile_all();
        let loops = self.graph.check_loops();
        if loops > 0 {
            log::warn!("{} attribute(s) are part of a loop", loops);
        }
        self.graph.mark_used();
        self.sets.clear();
        let pass = self.scheduler.begin_pass();
        self.in_pass = true;
        log::debug!("Pass {} started over {} node(s)", pass, self.graph.len());
        let _ = self.sink.send(NodeEvent::PassStarted {
            pass,
            nodes: self.graph.len(),
        });
    }

    fn step(&mut self) {
        let active = self
            .scheduler
            .tick(&mut self.graph, &self.registry, self.sink.as_ref(), &mut self.sets);
        if !active {
            self.finish_pass();
        }
    }

    fn finish_pass(&mut self) {
        self.in_pass = false;
        let changed = self.apply_sets();
        if changed {
            self.dirty = true;
        }
        let pruned = self.graph.prune_unused_attrs(&self.registry);
        if pruned > 0 {
            log::debug!("Pruned {} unused attribute(s)", pruned);
        }
        let pass = self.scheduler.pass();
        log::debug!("Pass {} finished", pass);
        let _ = self.sink.send(NodeEvent::PassCompleted { pass, changed });
    }

    /// Apply writes queued by bodies; returns true when a source changed
    fn apply_sets(&mut self) -> bool {
        let mut changed = false;
        for set in std::mem::take(&mut self.sets) {
            let result = match self.graph.resolve_target(set.origin, set.node.as_deref()) {
                Some(target) => self
                    .graph
                    .set_attr_value(&AttrRef::new(target, set.attr.clone()), &set.value),
                None => Err(NodeEngineError::NodeNotFound(set.node.clone().unwrap_or_default())),
            };
            match result {
                Ok(c) => changed |= c,
                Err(e) => {
                    log::warn!("Write of {} from {} failed: {}", set.attr, set.origin, e);
                    if let Some(node) = self.graph.node_mut(set.origin) {
                        node.exe_error = Some(e.to_string());
                    }
                }
            }
        }
        changed
    }

    async fn tick_jobs(&mut self) {
        if self.jobs.tick(&mut self.graph, self.sink.as_ref(), self.execute).await {
            self.dirty = true;
        }
    }

    /// Drop the pass in progress; its running bodies finish unobserved
    fn abandon_pass(&mut self) {
        if self.in_pass {
            self.scheduler.begin_pass();
            self.in_pass = false;
            self.sets.clear();
        }
        self.dirty = true;
    }

    /// Stop running bodies, worker connections and jobs
    pub async fn stop(&mut self) {
        self.scheduler.stop(self.server.as_deref()).await;
        self.jobs.stop_all().await;
        self.in_pass = false;
        self.sets.clear();
        self.dirty = true;
    }

    // --- edits ---

    pub fn add_node(&mut self, parent: NodeId, name: &str, exe: &str) -> Result<NodeId> {
        if !self.registry.has_node_type(exe) {
            return Err(NodeEngineError::UnknownNodeType(exe.to_string()));
        }
        self.dirty = true;
        self.graph.add_node(parent, name, exe)
    }

    /// Close worker connections and jobs bound to node paths that are gone
    fn release_paths(&self, paths: &[String]) {
        for path in paths {
            if let Some(server) = &self.server {
                server.remove(path);
            }
            self.jobs.interrupt(path);
        }
    }

    /// Remove a subtree, closing its worker connections and jobs
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        self.abandon_pass();
        let paths = self.graph.remove_node(id)?;
        self.release_paths(&paths);
        Ok(())
    }

    /// Rename a node; its subtree's old paths lose their workers and jobs
    pub fn rename_node(&mut self, id: NodeId, name: &str) -> Result<String> {
        self.abandon_pass();
        let subtree = self.graph.subtree(id);
        let before: Vec<String> = subtree.iter().map(|&n| self.graph.path(n)).collect();
        let name = self.graph.rename_node(id, name)?;
        let stale: Vec<String> = subtree
            .iter()
            .zip(before)
            .filter(|(n, old)| *old != self.graph.path(**n))
            .map(|(_, old)| old)
            .collect();
        self.release_paths(&stale);
        Ok(name)
    }

    pub fn rename_attr(&mut self, id: NodeId, old: &str, name: &str) -> Result<String> {
        self.dirty = true;
        self.graph.rename_attr(id, old, name)
    }

    pub fn copy_subtree(&mut self, id: NodeId, target: NodeId) -> Result<NodeId> {
        self.abandon_pass();
        self.graph.copy_subtree(id, target)
    }

    pub fn set_source(&mut self, node: NodeId, attr: &str, source: &str) -> Result<bool> {
        let changed = self.graph.set_source(&AttrRef::new(node, attr), source)?;
        self.dirty |= changed;
        Ok(changed)
    }

    /// Write through the attribute's editable constant
    pub fn set_attr_value(&mut self, node: NodeId, attr: &str, value: &Value) -> Result<bool> {
        let changed = self.graph.set_attr_value(&AttrRef::new(node, attr), value)?;
        self.dirty |= changed;
        Ok(changed)
    }

    /// Swap in another graph, e.g. one loaded from disk
    pub fn replace_graph(&mut self, graph: Graph) {
        self.abandon_pass();
        self.graph = graph;
    }

    pub async fn load(&mut self, path: &Path) -> Result<()> {
        let graph = Graph::load(path).await?;
        self.replace_graph(graph);
        log::info!("Loaded {}", path.display());
        Ok(())
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.graph.save(path).await?;
        log::info!("Saved {}", path.display());
        Ok(())
    }

    // --- undo ---

    /// Record the current graph; returns false if nothing changed
    pub fn checkpoint(&mut self) -> Result<bool> {
        self.undo.push(&self.graph)
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    pub fn undo(&mut self) -> Result<bool> {
        match self.undo.undo() {
            Some(graph) => {
                self.replace_graph(graph?);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn redo(&mut self) -> Result<bool> {
        match self.undo.redo() {
            Some(graph) => {
                self.replace_graph(graph?);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::builder::RuntimeBuilder;
    use crate::events::VecEventSink;
    use crate::registry::{ExecOutput, NodeType};

    fn runtime() -> Runtime {
        let config = EngineConfig {
            max_threads: 2,
            http_timeout: Duration::from_secs(5),
            ..EngineConfig::default()
        };
        RuntimeBuilder::new(config)
            .register(
                NodeType::new("double", "test")
                    .attr("n", "0")
                    .attr("_out", "")
                    .with_callback(|ctx| async move {
                        Ok(ExecOutput::new().output("_out", Value::Number(ctx.number("n") * 2.0)))
                    }),
            )
            .build()
            .unwrap()
    }

    fn value(rt: &mut Runtime, id: NodeId, attr: &str) -> Value {
        rt.graph_mut().attr_value(&AttrRef::new(id, attr))
    }

    #[tokio::test]
    async fn test_pass_computes_outputs_across_nodes() {
        let mut rt = runtime();
        let root = rt.graph().root();
        let a = rt.add_node(root, "a", "double").unwrap();
        let b = rt.add_node(root, "b", "double").unwrap();
        rt.run_pass().await;
        rt.set_source(a, "n", "4").unwrap();
        rt.set_source(b, "n", "a._out + 1").unwrap();
        rt.run_pass().await;

        assert_eq!(value(&mut rt, a, "_out"), Value::Number(8.0));
        assert_eq!(value(&mut rt, b, "_out"), Value::Number(18.0));
    }

    #[tokio::test]
    async fn test_set_attribute_writes_after_pass() {
        let sink = Arc::new(VecEventSink::new());
        let mut rt = RuntimeBuilder::new(EngineConfig::default())
            .event_sink(sink.clone())
            .build()
            .unwrap();
        let root = rt.graph().root();
        let vars = rt.add_node(root, "vars", "vars").unwrap();
        rt.graph_mut().node_mut(vars).unwrap().add_attr("x", "1");
        let setter = rt.add_node(root, "setter", "set_attribute").unwrap();
        rt.run_pass().await;

        rt.set_source(setter, "node", "\"vars\"").unwrap();
        rt.set_source(setter, "attr", "\"x\"").unwrap();
        rt.set_source(setter, "value", "42").unwrap();
        rt.set_source(setter, "trigger", "1").unwrap();
        rt.run_pass().await;

        let graph = rt.graph();
        assert_eq!(graph.node(vars).unwrap().attr("x").unwrap().source, "42");
        assert_eq!(graph.node(setter).unwrap().attr("trigger").unwrap().source, "0");
        assert!(rt.is_dirty());
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, NodeEvent::PassCompleted { changed: true, .. })));
    }

    #[tokio::test]
    async fn test_missing_write_target_flags_origin() {
        let mut rt = runtime();
        let root = rt.graph().root();
        let setter = rt.add_node(root, "setter", "set_attribute").unwrap();
        rt.run_pass().await;
        rt.set_source(setter, "node", "\"nobody\"").unwrap();
        rt.set_source(setter, "attr", "\"x\"").unwrap();
        rt.set_source(setter, "trigger", "1").unwrap();
        rt.run_pass().await;

        assert_eq!(
            rt.graph().node(setter).unwrap().exe_error.as_deref(),
            Some("Node(nobody) not found")
        );
    }

    #[tokio::test]
    async fn test_tick_runs_only_when_dirty_and_executing() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let mut rt = RuntimeBuilder::new(EngineConfig::default())
            .register(NodeType::new("count", "test").with_callback(move |_ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(ExecOutput::new())
                }
            }))
            .build()
            .unwrap();
        let root = rt.graph().root();
        rt.add_node(root, "c", "count").unwrap();

        rt.run_until_idle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!rt.tick().await);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        rt.set_execute(false);
        assert!(!rt.tick().await);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        rt.set_execute(true);
        rt.run_until_idle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_undo_redo_restores_graph() {
        let mut rt = runtime();
        let root = rt.graph().root();
        rt.checkpoint().unwrap();
        rt.add_node(root, "a", "double").unwrap();
        rt.checkpoint().unwrap();

        assert!(rt.undo().unwrap());
        assert!(rt.graph().find_by_path("a").is_none());
        assert!(rt.redo().unwrap());
        assert!(rt.graph().find_by_path("a").is_some());
        assert!(!rt.redo().unwrap());
    }

    #[tokio::test]
    async fn test_rename_interrupts_jobs_of_old_paths() {
        let mut rt = runtime();
        let root = rt.graph().root();
        let group = rt.add_node(root, "group", "layout").unwrap();
        let inner = rt.add_node(group, "dl", "double").unwrap();
        assert_eq!(rt.graph().path(inner), "group/dl");

        let job = rt.jobs().add_job("group/dl", |h| async move {
            h.cancelled().await;
            Err(crate::jobs::interrupted("waiting"))
        });
        let other = rt.jobs().add_job("keep", |h| async move {
            h.cancelled().await;
            Ok(())
        });

        rt.rename_node(group, "renamed").unwrap();
        assert_eq!(rt.graph().path(inner), "renamed/dl");
        assert!(job.is_interrupted());
        assert!(!other.is_interrupted());

        rt.stop().await;
    }

    #[tokio::test]
    async fn test_rename_to_same_name_keeps_jobs() {
        let mut rt = runtime();
        let root = rt.graph().root();
        let a = rt.add_node(root, "a", "double").unwrap();
        let job = rt.jobs().add_job("a", |h| async move {
            h.cancelled().await;
            Ok(())
        });

        rt.rename_node(a, "a").unwrap();
        assert!(!job.is_interrupted());

        rt.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_type_and_remove() {
        let mut rt = runtime();
        let root = rt.graph().root();
        assert!(matches!(
            rt.add_node(root, "x", "no_such_type"),
            Err(NodeEngineError::UnknownNodeType(_))
        ));
        let a = rt.add_node(root, "a", "double").unwrap();
        rt.remove_node(a).unwrap();
        assert!(rt.graph().node(a).is_none());
        rt.run_pass().await;
        assert!(!rt.in_pass());
    }
}
