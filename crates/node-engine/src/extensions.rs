//! Typed extension map for runtime services.
//!
//! `ExecutorExtensions` lets the host hand node bodies the objects they
//! need but the graph can't own: the job manager, the worker server, the
//! database and the AI service clients. The scheduler passes the map to
//! every `NodeExecutor` behind an `Arc`.
//!
//! # Example
//!
//! ```ignore
//! use node_engine::{extension_keys, ExecutorExtensions};
//! use std::sync::Arc;
//!
//! let mut ext = ExecutorExtensions::new();
//! ext.set(extension_keys::JOBS, Arc::new(JobManager::new(timeout)?));
//!
//! // In a NodeExecutor:
//! let jobs = ctx.extension::<Arc<JobManager>>(extension_keys::JOBS)?;
//! ```

use std::any::Any;
use std::collections::HashMap;

/// Services keyed by name, stored as `Box<dyn Any>`
pub struct ExecutorExtensions {
    inner: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl ExecutorExtensions {
    /// Create an empty extension map
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    /// Insert a typed value under the given key, replacing any previous one
    pub fn set<T: Send + Sync + 'static>(&mut self, key: &str, value: T) {
        self.inner.insert(key.to_string(), Box::new(value));
    }

    /// Get a typed value by key
    ///
    /// Returns `None` if the key doesn't exist or the type doesn't match.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.inner.get(key).and_then(|v| v.downcast_ref())
    }

    /// Check whether a key exists in the map
    pub fn has(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }
}

impl Default for ExecutorExtensions {
    fn default() -> Self {
        Self::new()
    }
}

/// Well-known extension keys for standard dependencies.
pub mod extension_keys {
    /// `Arc<JobManager>`
    pub const JOBS: &str = "jobs";
    /// `Arc<node_worker::WorkerServer>`
    pub const WORKER_SERVER: &str = "worker_server";
    /// `Arc<dyn Database>`
    pub const DATABASE: &str = "database";
    /// `Arc<dyn CompletionService>`
    pub const COMPLETION: &str = "completion";
    /// `Arc<dyn TranscriptionService>`
    pub const TRANSCRIPTION: &str = "transcription";
    /// `Arc<dyn CodeService>`
    pub const CODE: &str = "code";
    /// `EngineConfig`
    pub const CONFIG: &str = "config";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_set_and_get() {
        let mut ext = ExecutorExtensions::new();
        ext.set(extension_keys::CONFIG, "hello".to_string());

        assert_eq!(ext.get::<String>(extension_keys::CONFIG), Some(&"hello".to_string()));
        assert!(ext.has(extension_keys::CONFIG));
        assert!(!ext.has(extension_keys::JOBS));
    }

    #[test]
    fn test_type_mismatch_returns_none() {
        let mut ext = ExecutorExtensions::new();
        ext.set("count", 42u32);

        assert!(ext.get::<String>("count").is_none());
        assert_eq!(ext.get::<u32>("count"), Some(&42));
    }

    #[test]
    fn test_trait_objects_behind_arc() {
        trait Greeter: Send + Sync {
            fn greet(&self) -> String;
        }
        struct Hello;
        impl Greeter for Hello {
            fn greet(&self) -> String {
                "hello".into()
            }
        }

        let mut ext = ExecutorExtensions::new();
        let greeter: Arc<dyn Greeter> = Arc::new(Hello);
        ext.set("greeter", greeter);

        let got = ext.get::<Arc<dyn Greeter>>("greeter").unwrap();
        assert_eq!(got.greet(), "hello");
    }
}
