//! Fluent builder for [`Runtime`]
//!
//! Collects the graph, node types and services a runtime needs, then wires
//! them into the executor extensions every node body sees.
//!
//! # Example
//!
//! ```ignore
//! let runtime = RuntimeBuilder::new(EngineConfig::default())
//!     .graph(Graph::load(path).await?)
//!     .event_sink(Arc::new(LogEventSink))
//!     .worker_server(Arc::new(server))
//!     .completion(Arc::new(HttpCompletionService::new(url, "llama", timeout)?))
//!     .build()?;
//! ```

use std::sync::Arc;

use node_worker::WorkerServer;

use crate::config::EngineConfig;
use crate::db::{Database, SqliteDatabase};
use crate::error::Result;
use crate::events::{EventSink, NullEventSink};
use crate::extensions::{extension_keys, ExecutorExtensions};
use crate::graph::Graph;
use crate::jobs::JobManager;
use crate::registry::{NodeType, TaskRegistry};
use crate::runtime::Runtime;
use crate::services::{CodeService, CompletionService, TranscriptionService};

pub struct RuntimeBuilder {
    config: EngineConfig,
    graph: Graph,
    registry: TaskRegistry,
    sink: Arc<dyn EventSink>,
    server: Option<Arc<WorkerServer>>,
    database: Option<Arc<dyn Database>>,
    extensions: ExecutorExtensions,
}

impl RuntimeBuilder {
    /// Empty graph, built-in node types, no event sink
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            graph: Graph::new(),
            registry: TaskRegistry::builtin(),
            sink: Arc::new(NullEventSink),
            server: None,
            database: None,
            extensions: ExecutorExtensions::new(),
        }
    }

    pub fn graph(mut self, graph: Graph) -> Self {
        self.graph = graph;
        self
    }

    /// Replace the whole registry
    pub fn registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Add or override one node type
    pub fn register(mut self, node_type: NodeType) -> Self {
        self.registry.register(node_type);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn worker_server(mut self, server: Arc<WorkerServer>) -> Self {
        self.server = Some(server);
        self
    }

    /// Defaults to [`SqliteDatabase`]
    pub fn database(mut self, database: Arc<dyn Database>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn completion(mut self, service: Arc<dyn CompletionService>) -> Self {
        self.extensions.set(extension_keys::COMPLETION, service);
        self
    }

    pub fn transcription(mut self, service: Arc<dyn TranscriptionService>) -> Self {
        self.extensions.set(extension_keys::TRANSCRIPTION, service);
        self
    }

    /// Runs `code_python` nodes
    pub fn code(mut self, service: Arc<dyn CodeService>) -> Self {
        self.extensions.set(extension_keys::CODE, service);
        self
    }

    /// Any other service a custom node type reads
    pub fn extension<T: Send + Sync + 'static>(mut self, key: &str, value: T) -> Self {
        self.extensions.set(key, value);
        self
    }

    pub fn build(self) -> Result<Runtime> {
        let mut extensions = self.extensions;
        let jobs = Arc::new(JobManager::new(self.config.http_timeout)?);
        extensions.set(extension_keys::JOBS, Arc::clone(&jobs));
        extensions.set(extension_keys::CONFIG, self.config.clone());

        let database = self
            .database
            .unwrap_or_else(|| Arc::new(SqliteDatabase::new()) as Arc<dyn Database>);
        extensions.set(extension_keys::DATABASE, database);
        if let Some(server) = &self.server {
            extensions.set(extension_keys::WORKER_SERVER, Arc::clone(server));
        }

        Ok(Runtime::from_parts(
            self.config,
            self.graph,
            self.registry,
            Arc::new(extensions),
            jobs,
            self.server,
            self.sink,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_wires_services() {
        let runtime = RuntimeBuilder::new(EngineConfig::default()).build().unwrap();
        let ext = runtime.extensions();
        assert!(ext.get::<Arc<JobManager>>(extension_keys::JOBS).is_some());
        assert!(ext.get::<Arc<dyn Database>>(extension_keys::DATABASE).is_some());
        assert!(ext.get::<EngineConfig>(extension_keys::CONFIG).is_some());
        assert!(!ext.has(extension_keys::WORKER_SERVER));
        assert!(runtime.registry().has_node_type("sqlite_select"));
    }
}
