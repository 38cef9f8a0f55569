//! Node scheduler
//!
//! Drives one pass over the graph, one cooperative [`Scheduler::tick`] at a
//! time. Each tick:
//!
//! 1. drains finished bodies from the result channel and writes their
//!    outputs into the graph,
//! 2. copies progress of running bodies onto their nodes,
//! 3. walks waiting nodes parent-first and dispatches every ready one.
//!
//! A node is ready when the nodes its expressions read from and its parent
//! are done. A looping node counts as done for its own descendants while
//! it iterates: when all of them finished, the next item is written to
//! `_key`/`_value` and the subtree waits again. Admission is a semaphore sized by `max_threads`; when it is
//! exhausted the tick ends and the next one tries again. There is no queue.
//!
//! The graph is only touched here, on the caller's task. Bodies get an owned
//! snapshot of their inputs and report back through the channel.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use node_vm::{NodeId, Value};
use node_worker::WorkerServer;

use crate::error::{NodeEngineError, Result};
use crate::events::{EventSink, NodeEvent};
use crate::extensions::ExecutorExtensions;
use crate::graph::Graph;
use crate::registry::{DeferredSet, ExecContext, ExecOutput, ProgressHandle, TaskRegistry};
use crate::types::NodeState;

/// Error put on nodes that can never become ready
pub const STALLED_ERROR: &str = "Waiting on a dependency cycle";

struct TaskResult {
    node: NodeId,
    pass: u64,
    outcome: Result<ExecOutput>,
    elapsed: Duration,
}

struct RunningNode {
    path: String,
    progress: ProgressHandle,
}

/// Node whose subtree runs once per item
struct ActiveLoop {
    path: String,
    remaining: VecDeque<(Value, Value)>,
    exe_time: f64,
}

pub struct Scheduler {
    max_threads: usize,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
    results_tx: UnboundedSender<TaskResult>,
    results_rx: UnboundedReceiver<TaskResult>,
    cancel: CancellationToken,
    extensions: Arc<ExecutorExtensions>,
    running: HashMap<NodeId, RunningNode>,
    loops: HashMap<NodeId, ActiveLoop>,
    pass: u64,
}

impl Scheduler {
    pub fn new(max_threads: usize, extensions: Arc<ExecutorExtensions>) -> Self {
        let max_threads = max_threads.max(1);
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            max_threads,
            permits: Arc::new(Semaphore::new(max_threads)),
            tasks: JoinSet::new(),
            results_tx,
            results_rx,
            cancel: CancellationToken::new(),
            extensions,
            running: HashMap::new(),
            loops: HashMap::new(),
            pass: 0,
        }
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    pub fn extensions(&self) -> &Arc<ExecutorExtensions> {
        &self.extensions
    }

    /// Bodies dispatched and not yet drained
    pub fn num_running(&self) -> usize {
        self.running.len()
    }

    pub fn is_running(&self) -> bool {
        !self.running.is_empty()
    }

    /// Loops still iterating over their items
    pub fn num_loops(&self) -> usize {
        self.loops.len()
    }

    fn is_active(&self) -> bool {
        self.is_running() || !self.loops.is_empty()
    }

    /// Results of earlier passes are dropped from now on
    pub fn begin_pass(&mut self) -> u64 {
        self.pass += 1;
        self.running.clear();
        self.loops.clear();
        self.pass
    }

    pub fn pass(&self) -> u64 {
        self.pass
    }

    /// One scheduling step; returns true while the pass is still active
    ///
    /// Writes queued by bodies are appended to `sets`.
    pub fn tick(
        &mut self,
        graph: &mut Graph,
        registry: &TaskRegistry,
        sink: &dyn EventSink,
        sets: &mut Vec<DeferredSet>,
    ) -> bool {
        let mut moved = self.drain_results(graph, sink, sets);
        moved |= self.advance_loops(graph, sink);
        self.report_progress(graph, sink);

        for id in graph.flatten() {
            let Some(node) = graph.node(id) else {
                continue;
            };
            if node.state != NodeState::Waiting {
                continue;
            }

            if node.has_compile_error() {
                log::debug!("'{}' skipped, attribute has a compile error", graph.path(id));
                Self::finish_inline(graph, id);
                moved = true;
                continue;
            }
            let deps = graph.dependency_nodes(id);
            if deps
                .iter()
                .any(|d| graph.node(*d).is_some_and(|n| n.has_compile_error()))
            {
                log::debug!("'{}' skipped, a dependency has a compile error", graph.path(id));
                Self::finish_inline(graph, id);
                moved = true;
                continue;
            }
            let parent_done = node.parent.map_or(true, |p| self.settled_for(graph, p, id));
            let deps_done = deps.iter().all(|d| self.settled_for(graph, *d, id));
            if !parent_done || !deps_done {
                continue;
            }

            if node.bypass {
                Self::finish_inline(graph, id);
                moved = true;
                continue;
            }

            let node_type = node.exe.clone();
            let inputs = graph.evaluate_node(id);
            let Some(executor) = registry.get(&node_type).and_then(|t| t.executor()) else {
                Self::finish_inline(graph, id);
                moved = true;
                continue;
            };

            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                return true;
            };

            let path = graph.path(id);
            let progress = ProgressHandle::new();
            let ctx = ExecContext {
                node: id,
                path: path.clone(),
                node_type,
                inputs,
                progress: progress.clone(),
                cancel: self.cancel.child_token(),
                extensions: Arc::clone(&self.extensions),
            };
            let tx = self.results_tx.clone();
            let pass = self.pass;
            self.tasks.spawn(async move {
                let started = Instant::now();
                let outcome = match AssertUnwindSafe(executor.execute(ctx)).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(NodeEngineError::failed("node body panicked")),
                };
                drop(permit);
                let _ = tx.send(TaskResult {
                    node: id,
                    pass,
                    outcome,
                    elapsed: started.elapsed(),
                });
            });

            if let Some(node) = graph.node_mut(id) {
                node.state = NodeState::Running;
            }
            log::debug!("'{}' dispatched", path);
            let _ = sink.send(NodeEvent::NodeStarted { path: path.clone() });
            self.running.insert(id, RunningNode { path, progress });
            moved = true;
        }

        let waiting: Vec<NodeId> = graph
            .nodes()
            .filter(|n| n.state == NodeState::Waiting)
            .map(|n| n.id)
            .collect();
        if waiting.is_empty() {
            return self.is_active();
        }
        if !moved && !self.is_running() {
            for id in waiting {
                let path = graph.path(id);
                log::warn!("'{}' can't become ready", path);
                if let Some(node) = graph.node_mut(id) {
                    node.state = NodeState::Done;
                    node.exe_error = Some(STALLED_ERROR.to_string());
                }
                let _ = sink.send(NodeEvent::node_failed(&path, STALLED_ERROR));
            }
            return !self.loops.is_empty();
        }
        true
    }

    /// Whether `reader` may read `dep`: done, or a loop `reader` is inside
    fn settled_for(&self, graph: &Graph, dep: NodeId, reader: NodeId) -> bool {
        match graph.node(dep) {
            Some(node) if node.is_done() => true,
            Some(_) => self.loops.contains_key(&dep) && graph.is_ancestor(dep, reader),
            None => true,
        }
    }

    fn start_loop(
        &mut self,
        graph: &mut Graph,
        sink: &dyn EventSink,
        id: NodeId,
        path: String,
        items: Vec<(Value, Value)>,
        exe_time: f64,
    ) {
        let mut active = ActiveLoop {
            path,
            remaining: items.into(),
            exe_time,
        };
        match active.remaining.pop_front() {
            Some(item) => {
                log::debug!("'{}' loops over {} item(s)", active.path, active.remaining.len() + 1);
                Self::write_item(graph, id, item);
                self.loops.insert(id, active);
            }
            None => {
                let body: Vec<NodeId> = graph.subtree(id).into_iter().skip(1).collect();
                for n in body {
                    Self::finish_inline(graph, n);
                }
                Self::finish_loop(graph, sink, id, active);
            }
        }
    }

    /// Next item for every loop whose subtree finished; true if any moved
    fn advance_loops(&mut self, graph: &mut Graph, sink: &dyn EventSink) -> bool {
        let ids: Vec<NodeId> = self.loops.keys().copied().collect();
        let mut moved = false;
        for id in ids {
            let body: Vec<NodeId> = graph.subtree(id).into_iter().skip(1).collect();
            let finished = body
                .iter()
                .all(|n| !self.loops.contains_key(n) && graph.node(*n).map_or(true, |node| node.is_done()));
            if !finished {
                continue;
            }
            moved = true;
            let next = self.loops.get_mut(&id).and_then(|l| l.remaining.pop_front());
            match next {
                Some(item) => {
                    Self::write_item(graph, id, item);
                    graph.rerun(&body);
                }
                None => {
                    if let Some(active) = self.loops.remove(&id) {
                        Self::finish_loop(graph, sink, id, active);
                    }
                }
            }
        }
        if moved {
            graph.invalidate_values();
        }
        moved
    }

    fn write_item(graph: &mut Graph, id: NodeId, (key, value): (Value, Value)) {
        for (name, v) in [("_key", key), ("_value", value)] {
            if let Err(e) = graph.set_output(id, name, v) {
                log::warn!("'{}' can't write {}: {}", graph.path(id), name, e);
            }
        }
    }

    fn finish_loop(graph: &mut Graph, sink: &dyn EventSink, id: NodeId, active: ActiveLoop) {
        if let Some(node) = graph.node_mut(id) {
            node.state = NodeState::Done;
            node.exe_time = active.exe_time;
        }
        let _ = sink.send(NodeEvent::NodeCompleted {
            path: active.path,
            exe_time: active.exe_time,
        });
    }

    fn finish_inline(graph: &mut Graph, id: NodeId) {
        if let Some(node) = graph.node_mut(id) {
            node.state = NodeState::Done;
        }
    }

    fn drain_results(&mut self, graph: &mut Graph, sink: &dyn EventSink, sets: &mut Vec<DeferredSet>) -> bool {
        while self.tasks.try_join_next().is_some() {}

        let mut applied = false;
        while let Ok(result) = self.results_rx.try_recv() {
            if result.pass != self.pass {
                log::debug!("Dropping result of pass {} for {}", result.pass, result.node);
                continue;
            }
            let Some(running) = self.running.remove(&result.node) else {
                continue;
            };
            let id = result.node;
            let exe_time = result.elapsed.as_secs_f64();
            let path = running.path.clone();
            if let Some(items) = Self::apply_result(graph, sink, sets, running.path, result) {
                self.start_loop(graph, sink, id, path, items, exe_time);
            }
            applied = true;
        }
        if applied {
            graph.invalidate_values();
        }
        applied
    }

    /// Write a body's result into the graph
    ///
    /// Returns the items of a looping node; such a node stays running.
    fn apply_result(
        graph: &mut Graph,
        sink: &dyn EventSink,
        sets: &mut Vec<DeferredSet>,
        path: String,
        result: TaskResult,
    ) -> Option<Vec<(Value, Value)>> {
        let id = result.node;
        let exe_time = result.elapsed.as_secs_f64();
        let mut error = None;
        let mut iterate = None;

        match result.outcome {
            Ok(out) => {
                for (name, default) in &out.declare {
                    if let Err(e) = graph.declare_attr(id, name, default) {
                        log::warn!("'{}' can't declare {}: {}", path, name, e);
                    }
                }
                for (name, value) in out.outputs {
                    if let Err(e) = graph.set_output(id, &name, value) {
                        log::warn!("'{}' can't write {}: {}", path, name, e);
                    }
                }
                for (name, message) in out.attr_errors {
                    if error.is_none() {
                        error = Some(format!("{}: {}", name, message));
                    }
                    if let Err(e) = graph.set_attr_error(id, &name, message) {
                        log::warn!("'{}' can't flag {}: {}", path, name, e);
                    }
                }
                sets.extend(out.sets);
                iterate = out.iterate;
            }
            Err(e) => {
                let message = e.to_string();
                if let Some(node) = graph.node_mut(id) {
                    node.exe_error = Some(message.clone());
                }
                error = Some(message);
            }
        }

        if error.is_none() && iterate.is_some() {
            return iterate;
        }

        if let Some(node) = graph.node_mut(id) {
            node.state = NodeState::Done;
            node.exe_time = exe_time;
        }
        match error {
            Some(message) => {
                log::warn!("'{}' failed: {}", path, message);
                let _ = sink.send(NodeEvent::node_failed(&path, &message));
            }
            None => {
                let _ = sink.send(NodeEvent::NodeCompleted { path, exe_time });
            }
        }
        None
    }

    fn report_progress(&self, graph: &mut Graph, sink: &dyn EventSink) {
        for (id, running) in &self.running {
            let Some(node) = graph.node_mut(*id) else {
                continue;
            };
            let proc = running.progress.proc();
            let desc = running.progress.desc();
            if node.progress != proc || node.progress_desc != desc {
                node.progress = proc;
                node.progress_desc = desc;
                let _ = sink.send(NodeEvent::node_progress(&running.path, proc, &node.progress_desc));
            }
        }
    }

    /// Cancel every body, close worker connections and wait for all tasks
    ///
    /// Nodes that were running stay `Running` until the next pass resets them.
    pub async fn stop(&mut self, server: Option<&WorkerServer>) {
        self.cancel.cancel();
        if let Some(server) = server {
            server.interrupt();
        }
        let mut joined = 0;
        while self.tasks.join_next().await.is_some() {
            joined += 1;
        }
        if joined > 0 {
            log::info!("Stopped {} running node(s)", joined);
        }
        while self.results_rx.try_recv().is_ok() {}
        self.running.clear();
        self.loops.clear();
        self.cancel = CancellationToken::new();
    }
}
