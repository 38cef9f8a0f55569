//! Engine configuration
//!
//! Everything the runtime would otherwise read from globals is passed in
//! here explicitly.

use std::path::PathBuf;
use std::time::Duration;

/// Default timeout of download and service requests
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Node bodies running at once
    pub max_threads: usize,
    /// Directory holding `<node_type>/main` worker programs
    pub workers_dir: PathBuf,
    /// Worker server port, 0 picks a free one
    pub worker_port: u16,
    pub http_timeout: Duration,
    /// Undo snapshots kept
    pub max_undo: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
            workers_dir: PathBuf::from("workers"),
            worker_port: 0,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            max_undo: 100,
        }
    }
}

/// Available parallelism, at least one
pub fn default_max_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
