//! Node Engine - node graph runtime
//!
//! A graph is a tree of nodes. Every node has a type and a list of
//! attributes whose sources are expressions in the `node-vm` language.
//! Attributes read each other across nodes, and those reads order the
//! node bodies within a pass. The engine provides:
//!
//! - The node tree with scoped name lookup, renames that rewrite
//!   references, and JSON persistence
//! - A scheduler that runs node bodies on up to `max_threads` tasks
//! - Background jobs (downloads, AI requests) whose results feed back into
//!   the graph
//! - Built-in node types for UI, loops, files, network, SQLite, AI
//!   services, Python and external worker programs
//! - Compressed snapshot undo/redo
//!
//! # Architecture
//!
//! - [`Graph`]: node tree, attribute compilation and evaluation
//! - [`Scheduler`]: bounded parallel execution of one pass
//! - [`JobManager`]: jobs that outlive passes
//! - [`Runtime`]: ties them together behind a `tick` loop
//! - [`EventSink`]: execution events for any host
//!
//! # Example
//!
//! ```ignore
//! use node_engine::{EngineConfig, RuntimeBuilder};
//!
//! let mut runtime = RuntimeBuilder::new(EngineConfig::default()).build()?;
//! let root = runtime.graph().root();
//! let files = runtime.add_node(root, "files", "read_dir")?;
//! runtime.set_source(files, "path", "\"/tmp\"")?;
//! runtime.run_pass().await;
//! ```

pub mod attribute;
pub mod builder;
pub mod config;
pub mod db;
pub mod download;
pub mod error;
pub mod events;
pub mod extensions;
pub mod graph;
pub mod jobs;
pub mod node;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod services;
pub mod tasks;
pub mod types;
pub mod undo;

#[cfg(test)]
mod test_http;

// Re-export key types
pub use attribute::Attribute;
pub use builder::RuntimeBuilder;
pub use config::EngineConfig;
pub use db::{Database, DbHandle, SqliteDatabase};
pub use error::{NodeEngineError, Result};
pub use events::{EventSink, LogEventSink, NodeEvent, NullEventSink, VecEventSink};
pub use extensions::{extension_keys, ExecutorExtensions};
pub use graph::Graph;
pub use jobs::{JobHandle, JobManager};
pub use node::{Node, NodeSave};
pub use registry::{ExecContext, ExecOutput, NodeExecutor, NodeType, TaskRegistry};
pub use runtime::Runtime;
pub use scheduler::Scheduler;
pub use services::{
    CodeReply, CodeService, CompletionService, HttpCodeService, HttpCompletionService,
    HttpTranscriptionService, ResponseCache, TranscriptionService,
};
pub use types::{AttrUi, NodeState, Position};
pub use undo::UndoStack;

// Types hosts need alongside the engine
pub use node_vm::{AttrRef, NodeId, Value};
