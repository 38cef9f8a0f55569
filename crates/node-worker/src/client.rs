//! Worker side of the protocol
//!
//! A worker binary is started as `main <uid> <port>`. It connects back,
//! declares its attributes and then serves runs:
//!
//! ```ignore
//! let mut worker = Worker::from_args(std::env::args().skip(1), attrs).await?;
//! while worker.get().await.is_ok() {
//!     let n = worker.attr("n").unwrap_or("0").parse::<f64>().unwrap_or(0.0);
//!     worker.set_attr("_out", (n * 2.0).to_string());
//!     worker.finalize().await?;
//! }
//! ```

use tokio::net::TcpStream;

use crate::attrs::{recv_attrs, send_attrs, WorkerAttr};
use crate::error::{Result, WorkerError};
use crate::wire::{recv_pair_number, send_pair, send_pair_number};

/// `proc` sent by [`Worker::finalize`]
pub const FINALIZE_PROC: f64 = 10.0;

/// Connected worker
pub struct Worker {
    stream: TcpStream,
    attrs: Vec<WorkerAttr>,
}

impl Worker {
    /// Connect to the host, present `uid` and declare `attrs`
    pub async fn start(uid: &str, port: u16, attrs: Vec<WorkerAttr>) -> Result<Self> {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
        send_pair(&mut stream, "uid", uid).await?;
        send_attrs(&mut stream, &attrs).await?;
        Ok(Self { stream, attrs })
    }

    /// Start from the process arguments `<uid> <port>`
    pub async fn from_args<I>(mut args: I, attrs: Vec<WorkerAttr>) -> Result<Self>
    where
        I: Iterator<Item = String>,
    {
        let uid = args.next().unwrap_or_default();
        let port = args.next().unwrap_or_default();
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| WorkerError::InvalidNumber(port.clone()))?;
        Self::start(&uid, port, attrs).await
    }

    /// Wait for the next run and take its attribute snapshot
    pub async fn get(&mut self) -> Result<()> {
        let (name, count) = recv_pair_number(&mut self.stream).await?;
        if name != "attrs" {
            return Err(WorkerError::UnknownMessage(name));
        }
        recv_attrs(&mut self.stream, count, &mut self.attrs, false).await
    }

    pub fn attrs(&self) -> &[WorkerAttr] {
        &self.attrs
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Set a declared attribute; unknown names are ignored with a warning
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        match self.attrs.iter_mut().find(|a| a.name == name) {
            Some(attr) => attr.value = value.into(),
            None => log::warn!("Attribute({}) not found", name),
        }
    }

    async fn send_progress(&mut self, proc: f64, desc: &str, error: &str) -> Result<()> {
        send_pair_number(&mut self.stream, "progress", 3).await?;
        send_pair(&mut self.stream, "proc", &proc.to_string()).await?;
        send_pair(&mut self.stream, "desc", desc).await?;
        send_pair(&mut self.stream, "error", error).await
    }

    /// Report progress, optionally sending the attribute values first
    pub async fn progress(&mut self, proc: f64, desc: &str, send_outputs: bool) -> Result<()> {
        if send_outputs {
            send_attrs(&mut self.stream, &self.attrs).await?;
        }
        self.send_progress(proc, desc, "").await
    }

    /// Send the attributes and end the run successfully
    pub async fn finalize(&mut self) -> Result<()> {
        self.progress(FINALIZE_PROC, "", true).await
    }

    /// End the run with an error
    pub async fn error(&mut self, message: &str) -> Result<()> {
        self.send_progress(0.0, "", message).await
    }
}
