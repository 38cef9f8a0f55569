//! Worker server
//!
//! Owns the listening socket and a cache of live connections keyed by node
//! path. A connection is created on first use:
//!
//! 1. spawn `<workers_dir>/<node_type>/main <uid> <port>`
//! 2. accept the connection back
//! 3. check the uid and read the declared attributes
//!
//! and reused for every later run of the same node. `interrupt` closes all
//! of them; a run blocked on one of them fails with `Interrupted`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::attrs::WorkerAttr;
use crate::error::{Result, WorkerError};
use crate::process::{ProcessHandle, ProcessSpawner};
use crate::session::{Connection, WorkerProgress};

/// Connection shared between the cache and the task running it
pub type SharedConnection = Arc<tokio::sync::Mutex<Connection>>;

/// How long a spawned worker has to connect back
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

struct CachedConnection {
    node_type: String,
    conn: SharedConnection,
    cancel: CancellationToken,
    process: Box<dyn ProcessHandle>,
}

impl CachedConnection {
    fn close(self, path: &str) {
        self.cancel.cancel();
        if let Err(e) = self.process.kill() {
            log::warn!("Failed to kill worker for '{}': {}", path, e);
        }
    }
}

/// Spawns workers and keeps their connections
pub struct WorkerServer {
    listener: TcpListener,
    addr: SocketAddr,
    workers_dir: PathBuf,
    spawner: Arc<dyn ProcessSpawner>,
    accept_timeout: Duration,
    /// Serializes spawn + accept so connections can't be swapped
    accept_lock: tokio::sync::Mutex<()>,
    connections: Mutex<HashMap<String, CachedConnection>>,
}

impl WorkerServer {
    /// Listen on `127.0.0.1:port`; port 0 picks a free one
    pub async fn bind(port: u16, workers_dir: impl Into<PathBuf>, spawner: Arc<dyn ProcessSpawner>) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;
        log::info!("Worker server listening on {}", addr);
        Ok(Self {
            listener,
            addr,
            workers_dir: workers_dir.into(),
            spawner,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            accept_lock: tokio::sync::Mutex::new(()),
            connections: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn workers_dir(&self) -> &Path {
        &self.workers_dir
    }

    /// Names of the worker programs found in the workers directory
    pub fn list_programs(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.workers_dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().join("main").exists())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    pub fn num_connections(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_connected(&self, path: &str) -> bool {
        self.connections.lock().contains_key(path)
    }

    fn cached(&self, node_type: &str, path: &str) -> Option<SharedConnection> {
        let mut connections = self.connections.lock();
        let reusable = connections
            .get(path)
            .map(|entry| entry.node_type == node_type && !entry.cancel.is_cancelled());
        match reusable {
            Some(true) => connections.get(path).map(|entry| Arc::clone(&entry.conn)),
            Some(false) => {
                if let Some(stale) = connections.remove(path) {
                    stale.close(path);
                }
                None
            }
            None => None,
        }
    }

    /// Connection for the node at `path`, spawning the worker if needed
    pub async fn start(&self, node_type: &str, path: &str) -> Result<SharedConnection> {
        if let Some(conn) = self.cached(node_type, path) {
            return Ok(conn);
        }

        let _guard = self.accept_lock.lock().await;
        // another task may have connected while we waited
        if let Some(conn) = self.cached(node_type, path) {
            return Ok(conn);
        }

        let uid = uuid::Uuid::new_v4().to_string();
        let program = self.workers_dir.join(node_type).join("main");
        let args = vec![uid.clone(), self.port().to_string()];
        let process = self.spawner.spawn(&program, &args).await?;

        let accepted = tokio::time::timeout(self.accept_timeout, self.listener.accept()).await;
        let stream = match accepted {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                let _ = process.kill();
                return Err(e.into());
            }
            Err(_) => {
                let _ = process.kill();
                return Err(WorkerError::AcceptTimeout(self.accept_timeout.as_secs()));
            }
        };

        let cancel = CancellationToken::new();
        let conn = match Connection::handshake(stream, node_type, &uid, cancel.clone()).await {
            Ok(conn) => conn,
            Err(e) => {
                let _ = process.kill();
                return Err(e);
            }
        };
        log::info!("Worker {} connected for '{}'", node_type, path);

        let conn = Arc::new(tokio::sync::Mutex::new(conn));
        self.connections.lock().insert(
            path.to_string(),
            CachedConnection {
                node_type: node_type.to_string(),
                conn: Arc::clone(&conn),
                cancel,
                process,
            },
        );
        Ok(conn)
    }

    /// Run the worker of the node at `path` once
    ///
    /// A transport or protocol failure drops the cached connection so the
    /// next run starts a fresh worker; an error reported by the worker keeps it.
    pub async fn execute<F>(
        &self,
        node_type: &str,
        path: &str,
        inputs: &HashMap<String, String>,
        on_progress: F,
    ) -> Result<Vec<WorkerAttr>>
    where
        F: FnMut(&WorkerProgress) + Send,
    {
        let conn = self.start(node_type, path).await?;
        let result = {
            let mut conn = conn.lock().await;
            conn.run(inputs, on_progress).await
        };
        if let Err(e) = &result {
            if e.is_fatal() {
                log::warn!("Worker for '{}' failed: {}", path, e);
                self.remove_conn(path, &conn);
            }
        }
        result
    }

    fn remove_conn(&self, path: &str, conn: &SharedConnection) {
        let mut connections = self.connections.lock();
        let same = connections
            .get(path)
            .map(|entry| Arc::ptr_eq(&entry.conn, conn))
            .unwrap_or(false);
        if same {
            if let Some(entry) = connections.remove(path) {
                entry.close(path);
            }
        }
    }

    /// Close the connection of one node
    pub fn remove(&self, path: &str) {
        if let Some(entry) = self.connections.lock().remove(path) {
            entry.close(path);
        }
    }

    /// Close every connection
    pub fn interrupt(&self) {
        let drained: Vec<(String, CachedConnection)> = self.connections.lock().drain().collect();
        if !drained.is_empty() {
            log::info!("Interrupting {} worker connection(s)", drained.len());
        }
        for (path, entry) in drained {
            entry.close(&path);
        }
    }
}

impl Drop for WorkerServer {
    fn drop(&mut self) {
        self.interrupt();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::client::Worker;

    struct TaskHandle(JoinHandle<()>);

    impl ProcessHandle for TaskHandle {
        fn pid(&self) -> Option<u32> {
            None
        }

        fn kill(&self) -> Result<()> {
            self.0.abort();
            Ok(())
        }
    }

    /// Runs the "double" worker as a task instead of a process
    #[derive(Default)]
    struct InProcessSpawner {
        spawned: AtomicUsize,
        wrong_uid: bool,
    }

    async fn double_worker(uid: String, port: u16) {
        let attrs = vec![WorkerAttr::input("n", "0"), WorkerAttr::output("_out", "")];
        let mut worker = Worker::start(&uid, port, attrs).await.unwrap();
        while worker.get().await.is_ok() {
            let n: f64 = worker.attr("n").unwrap_or("0").parse().unwrap_or(0.0);
            if n < 0.0 {
                worker.error("negative input").await.unwrap();
                continue;
            }
            if n == 99.0 {
                // hang until interrupted
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            worker.progress(0.5, "half", false).await.unwrap();
            worker.set_attr("_out", (n * 2.0).to_string());
            worker.finalize().await.unwrap();
        }
    }

    #[async_trait]
    impl ProcessSpawner for InProcessSpawner {
        async fn spawn(&self, program: &Path, args: &[String]) -> Result<Box<dyn ProcessHandle>> {
            assert!(program.ends_with("double/main"));
            self.spawned.fetch_add(1, Ordering::SeqCst);
            let uid = if self.wrong_uid {
                "bogus".to_string()
            } else {
                args[0].clone()
            };
            let port: u16 = args[1].parse().unwrap();
            Ok(Box::new(TaskHandle(tokio::spawn(double_worker(uid, port)))))
        }
    }

    async fn server(spawner: Arc<InProcessSpawner>) -> WorkerServer {
        WorkerServer::bind(0, "/workers", spawner)
            .await
            .unwrap()
            .with_accept_timeout(Duration::from_secs(5))
    }

    fn inputs(n: &str) -> HashMap<String, String> {
        HashMap::from([("n".to_string(), n.to_string())])
    }

    fn out(attrs: &[WorkerAttr]) -> &str {
        attrs
            .iter()
            .find(|a| a.name == "_out")
            .map(|a| a.value.as_str())
            .unwrap_or("")
    }

    #[tokio::test]
    async fn test_run_and_reuse_connection() {
        let spawner = Arc::new(InProcessSpawner::default());
        let server = server(spawner.clone()).await;

        let mut seen = Vec::new();
        let attrs = server
            .execute("double", "root/calc", &inputs("21"), |p| seen.push(p.clone()))
            .await
            .unwrap();
        assert_eq!(out(&attrs), "42");
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].desc, "half");
        assert!(seen[1].proc > 1.9);

        let attrs = server
            .execute("double", "root/calc", &inputs("5"), |_| {})
            .await
            .unwrap();
        assert_eq!(out(&attrs), "10");
        assert_eq!(spawner.spawned.load(Ordering::SeqCst), 1);
        assert_eq!(server.num_connections(), 1);
    }

    #[tokio::test]
    async fn test_worker_error_keeps_connection() {
        let spawner = Arc::new(InProcessSpawner::default());
        let server = server(spawner.clone()).await;

        let err = server
            .execute("double", "root/calc", &inputs("-1"), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "negative input");
        assert!(server.is_connected("root/calc"));

        let attrs = server
            .execute("double", "root/calc", &inputs("2"), |_| {})
            .await
            .unwrap();
        assert_eq!(out(&attrs), "4");
    }

    #[tokio::test]
    async fn test_uid_mismatch_is_rejected() {
        let spawner = Arc::new(InProcessSpawner {
            wrong_uid: true,
            ..Default::default()
        });
        let server = server(spawner).await;
        let err = server.start("double", "root/calc").await.unwrap_err();
        assert!(matches!(err, WorkerError::UidMismatch));
        assert_eq!(server.num_connections(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_unblocks_running_worker() {
        let spawner = Arc::new(InProcessSpawner::default());
        let server = Arc::new(server(spawner).await);

        server.start("double", "root/calc").await.unwrap();
        let running = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                server
                    .execute("double", "root/calc", &inputs("99"), |_| {})
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        server.interrupt();
        let result = running.await.unwrap();
        assert!(matches!(result, Err(WorkerError::Interrupted)));
        assert_eq!(server.num_connections(), 0);
    }

    #[tokio::test]
    async fn test_separate_paths_get_separate_workers() {
        let spawner = Arc::new(InProcessSpawner::default());
        let server = server(spawner.clone()).await;
        server.start("double", "root/a").await.unwrap();
        server.start("double", "root/b").await.unwrap();
        assert_eq!(spawner.spawned.load(Ordering::SeqCst), 2);

        server.remove("root/a");
        assert!(!server.is_connected("root/a"));
        assert!(server.is_connected("root/b"));
    }
}
