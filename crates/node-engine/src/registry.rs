//! Node type registry
//!
//! Maps a node type name (`Node::exe`) to its declaration: group, declared
//! attributes, container/UI flags and an optional [`NodeExecutor`]. Types
//! without an executor have no body; the scheduler marks them done as soon
//! as their attributes are evaluated.
//!
//! # Usage
//!
//! ```ignore
//! let mut registry = TaskRegistry::builtin();
//! registry.register(
//!     NodeType::new("double", "math")
//!         .attr("n", "0")
//!         .attr("_out", "")
//!         .with_callback(|ctx| async move {
//!             Ok(ExecOutput::new().output("_out", (ctx.number("n") * 2.0).into()))
//!         }),
//! );
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use node_vm::{NodeId, Value};

use crate::error::{NodeEngineError, Result};
use crate::extensions::ExecutorExtensions;
use crate::types::AttrUi;

/// Body of one node type
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, ctx: ExecContext) -> Result<ExecOutput>;
}

/// Progress shared between a running body and the scheduler
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    inner: Arc<ProgressInner>,
}

#[derive(Debug, Default)]
struct ProgressInner {
    proc: AtomicU64,
    desc: Mutex<String>,
}

impl ProgressHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, proc: f64, desc: &str) {
        self.inner.proc.store(proc.to_bits(), Ordering::Relaxed);
        let mut guard = self.inner.desc.lock();
        if guard.as_str() != desc {
            *guard = desc.to_string();
        }
    }

    pub fn proc(&self) -> f64 {
        f64::from_bits(self.inner.proc.load(Ordering::Relaxed))
    }

    pub fn desc(&self) -> String {
        self.inner.desc.lock().clone()
    }
}

/// Everything a body gets for one run
///
/// `inputs` is an owned snapshot; the graph itself is never reachable from a
/// task.
pub struct ExecContext {
    pub node: NodeId,
    pub path: String,
    pub node_type: String,
    pub inputs: HashMap<String, Value>,
    pub progress: ProgressHandle,
    pub cancel: CancellationToken,
    pub extensions: Arc<ExecutorExtensions>,
}

impl ExecContext {
    pub fn input(&self, name: &str) -> Value {
        self.inputs.get(name).cloned().unwrap_or_default()
    }

    pub fn text(&self, name: &str) -> String {
        self.inputs.get(name).map(Value::as_text).unwrap_or_default()
    }

    pub fn number(&self, name: &str) -> f64 {
        self.inputs.get(name).map(Value::as_number).unwrap_or(0.0)
    }

    pub fn bool(&self, name: &str) -> bool {
        self.inputs.get(name).is_some_and(Value::as_bool)
    }

    /// Service registered under `key`
    pub fn extension<T: Send + Sync + 'static>(&self, key: &str) -> Result<&T> {
        self.extensions
            .get::<T>(key)
            .ok_or_else(|| NodeEngineError::failed(format!("Service '{}' is not available", key)))
    }
}

/// Attribute write applied after the pass
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredSet {
    /// Node whose body asked for the write
    pub origin: NodeId,
    /// Target node name or path; `None` is the origin itself
    pub node: Option<String>,
    pub attr: String,
    pub value: Value,
}

/// Result of one body run
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Values for output attributes of the node
    pub outputs: Vec<(String, Value)>,
    pub sets: Vec<DeferredSet>,
    /// Per-attribute execution errors
    pub attr_errors: Vec<(String, String)>,
    /// Attributes the node should have, with their default sources
    pub declare: Vec<(String, String)>,
    /// `(key, value)` items to run the node's children once for each
    pub iterate: Option<Vec<(Value, Value)>>,
}

impl ExecOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(mut self, name: &str, value: Value) -> Self {
        self.outputs.push((name.to_string(), value));
        self
    }

    pub fn set(mut self, origin: NodeId, node: Option<&str>, attr: &str, value: Value) -> Self {
        self.sets.push(DeferredSet {
            origin,
            node: node.map(str::to_string),
            attr: attr.to_string(),
            value,
        });
        self
    }

    pub fn attr_error(mut self, attr: &str, error: impl Into<String>) -> Self {
        self.attr_errors.push((attr.to_string(), error.into()));
        self
    }

    pub fn declare(mut self, attr: &str, default: &str) -> Self {
        self.declare.push((attr.to_string(), default.to_string()));
        self
    }

    pub fn iterate(mut self, items: Vec<(Value, Value)>) -> Self {
        self.iterate = Some(items);
        self
    }
}

type BoxedCallback =
    Box<dyn Fn(ExecContext) -> Pin<Box<dyn Future<Output = Result<ExecOutput>> + Send>> + Send + Sync>;

/// Async closure as a [`NodeExecutor`]
pub struct CallbackExecutor {
    callback: BoxedCallback,
}

impl CallbackExecutor {
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: Fn(ExecContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ExecOutput>> + Send + 'static,
    {
        Self {
            callback: Box::new(move |ctx| Box::pin(callback(ctx))),
        }
    }
}

#[async_trait]
impl NodeExecutor for CallbackExecutor {
    async fn execute(&self, ctx: ExecContext) -> Result<ExecOutput> {
        (self.callback)(ctx).await
    }
}

/// Attribute a node type always has
#[derive(Debug, Clone, PartialEq)]
pub struct AttrDecl {
    pub name: String,
    /// Source the attribute starts with
    pub default: String,
    pub ui: AttrUi,
}

/// Declaration of one node type
#[derive(Clone)]
pub struct NodeType {
    pub name: String,
    pub group: String,
    pub attrs: Vec<AttrDecl>,
    /// Lays out child nodes
    pub container: bool,
    /// Drawn as a widget
    pub ui: bool,
    /// Attributes are added by the user or the body, never pruned
    pub user_attrs: bool,
    executor: Option<Arc<dyn NodeExecutor>>,
}

impl std::fmt::Debug for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeType")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("attrs", &self.attrs)
            .field("has_body", &self.has_body())
            .finish()
    }
}

impl NodeType {
    pub fn new(name: &str, group: &str) -> Self {
        Self {
            name: name.to_string(),
            group: group.to_string(),
            attrs: Vec::new(),
            container: false,
            ui: false,
            user_attrs: false,
            executor: None,
        }
    }

    pub fn attr(self, name: &str, default: &str) -> Self {
        self.attr_ui(name, default, AttrUi::default())
    }

    pub fn attr_ui(mut self, name: &str, default: &str, ui: AttrUi) -> Self {
        self.attrs.push(AttrDecl {
            name: name.to_string(),
            default: default.to_string(),
            ui,
        });
        self
    }

    pub fn container(mut self) -> Self {
        self.container = true;
        self
    }

    pub fn widget(mut self) -> Self {
        self.ui = true;
        self
    }

    pub fn user_attrs(mut self) -> Self {
        self.user_attrs = true;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn NodeExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_callback<F, Fut>(self, callback: F) -> Self
    where
        F: Fn(ExecContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ExecOutput>> + Send + 'static,
    {
        self.with_executor(Arc::new(CallbackExecutor::new(callback)))
    }

    pub fn has_body(&self) -> bool {
        self.executor.is_some()
    }

    pub fn executor(&self) -> Option<Arc<dyn NodeExecutor>> {
        self.executor.clone()
    }
}

/// Registry of node types
#[derive(Debug, Default, Clone)]
pub struct TaskRegistry {
    types: HashMap<String, NodeType>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in node type
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        crate::tasks::register_builtins(&mut registry);
        registry
    }

    /// Add a type; an existing type with the same name is replaced
    pub fn register(&mut self, node_type: NodeType) {
        self.types.insert(node_type.name.clone(), node_type);
    }

    pub fn get(&self, name: &str) -> Option<&NodeType> {
        self.types.get(name)
    }

    pub fn has_node_type(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Type names, sorted
    pub fn node_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Type names per group, each list sorted
    pub fn groups(&self) -> HashMap<&str, Vec<&str>> {
        let mut grouped: HashMap<&str, Vec<&str>> = HashMap::new();
        for node_type in self.types.values() {
            grouped
                .entry(node_type.group.as_str())
                .or_default()
                .push(node_type.name.as_str());
        }
        for names in grouped.values_mut() {
            names.sort_unstable();
        }
        grouped
    }

    /// Entries from `other` override entries in `self` with the same name.
    pub fn merge(&mut self, other: TaskRegistry) {
        self.types.extend(other.types);
    }
}
