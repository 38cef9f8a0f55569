//! Process spawning abstraction
//!
//! The server starts one worker process per code node. Spawning goes through
//! [`ProcessSpawner`] so hosts can launch workers their own way:
//! - [`TokioProcessSpawner`] runs the binary with `tokio::process`
//! - tests run the client SDK in-process instead of a real binary

use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::{Child, Command};

use crate::error::{Result, WorkerError};

/// Handle to a spawned worker process
pub trait ProcessHandle: Send + Sync {
    /// OS process id, if there is one
    fn pid(&self) -> Option<u32>;

    /// Kill the process
    fn kill(&self) -> Result<()>;
}

/// Trait for spawning worker processes
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    /// Start `program` with `args`
    async fn spawn(&self, program: &Path, args: &[String]) -> Result<Box<dyn ProcessHandle>>;
}

/// Process handle backed by a `tokio::process::Child`
struct TokioProcessHandle {
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
}

impl ProcessHandle for TokioProcessHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn kill(&self) -> Result<()> {
        let mut guard = self.child.lock();
        if let Some(child) = guard.as_mut() {
            child.start_kill()?;
        }
        *guard = None;
        Ok(())
    }
}

/// Spawner that runs worker binaries as child processes
///
/// Children are killed when their handle is dropped.
#[derive(Debug, Default, Clone)]
pub struct TokioProcessSpawner;

impl TokioProcessSpawner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessSpawner for TokioProcessSpawner {
    async fn spawn(&self, program: &Path, args: &[String]) -> Result<Box<dyn ProcessHandle>> {
        if !tokio::fs::try_exists(program).await.unwrap_or(false) {
            return Err(WorkerError::ProgramNotFound(program.to_path_buf()));
        }

        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        if let Some(dir) = program.parent() {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| WorkerError::Spawn(format!("{}: {}", program.display(), e)))?;
        let pid = child.id();
        log::debug!("Spawned worker {} (pid {:?})", program.display(), pid);

        Ok(Box::new(TokioProcessHandle {
            child: Mutex::new(Some(child)),
            pid,
        }))
    }
}
