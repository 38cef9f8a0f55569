//! Host side of one worker connection
//!
//! After the handshake the worker's declared attributes are known. Each run
//! sends the current attribute snapshot and then follows the worker's
//! messages until it reports completion (`proc > 1.9`) or an error.

use std::collections::HashMap;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::attrs::{recv_attrs, send_attrs, WorkerAttr};
use crate::error::{Result, WorkerError};
use crate::wire::{expect_pair, recv_pair, recv_pair_number};

/// `proc` above this value means the worker finished successfully
pub const DONE_THRESHOLD: f64 = 1.9;

/// Progress reported by a worker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerProgress {
    pub proc: f64,
    pub desc: String,
}

/// Live connection to one worker process
pub struct Connection {
    node_type: String,
    stream: TcpStream,
    attrs: Vec<WorkerAttr>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("node_type", &self.node_type)
            .field("attrs", &self.attrs.len())
            .finish()
    }
}

impl Connection {
    /// Verify the worker's uid and read its declared attributes
    pub async fn handshake(
        mut stream: TcpStream,
        node_type: &str,
        uid: &str,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let got = expect_pair(&mut stream, "uid").await?;
        if got != uid {
            log::warn!("Worker {} sent uid({}), expected uid({})", node_type, got, uid);
            return Err(WorkerError::UidMismatch);
        }

        let (name, count) = recv_pair_number(&mut stream).await?;
        if name != "attrs" {
            return Err(WorkerError::UnexpectedMessage {
                expected: "attrs".to_string(),
                got: name,
            });
        }
        let mut attrs = Vec::new();
        recv_attrs(&mut stream, count, &mut attrs, true).await?;

        Ok(Self {
            node_type: node_type.to_string(),
            stream,
            attrs,
            cancel,
        })
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    /// Attributes declared by the worker, with the values of the last run
    pub fn attrs(&self) -> &[WorkerAttr] {
        &self.attrs
    }

    /// Run the worker once
    ///
    /// `inputs` overwrite the values of matching declared attributes. Returns
    /// the attribute set as the worker left it.
    pub async fn run<F>(&mut self, inputs: &HashMap<String, String>, on_progress: F) -> Result<Vec<WorkerAttr>>
    where
        F: FnMut(&WorkerProgress) + Send,
    {
        for attr in self.attrs.iter_mut() {
            if let Some(value) = inputs.get(&attr.name) {
                attr.value = value.clone();
            }
            attr.error.clear();
        }

        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WorkerError::Interrupted),
            result = self.exchange(on_progress) => result,
        }
    }

    async fn exchange<F>(&mut self, mut on_progress: F) -> Result<Vec<WorkerAttr>>
    where
        F: FnMut(&WorkerProgress) + Send,
    {
        send_attrs(&mut self.stream, &self.attrs).await?;

        loop {
            let (name, count) = recv_pair_number(&mut self.stream).await?;
            match name.as_str() {
                "progress" => {
                    let mut progress = WorkerProgress::default();
                    let mut error = String::new();
                    for _ in 0..count {
                        let (field, value) = recv_pair(&mut self.stream).await?;
                        match field.as_str() {
                            "proc" => progress.proc = value.trim().parse().unwrap_or(0.0),
                            "desc" => progress.desc = value,
                            "error" => error = value,
                            other => log::warn!("Unknown progress field({})", other),
                        }
                    }
                    if !error.is_empty() {
                        return Err(WorkerError::Worker(error));
                    }
                    on_progress(&progress);
                    if progress.proc > DONE_THRESHOLD {
                        return Ok(self.attrs.clone());
                    }
                }
                "attrs" => recv_attrs(&mut self.stream, count, &mut self.attrs, false).await?,
                _ => return Err(WorkerError::UnknownMessage(name)),
            }
        }
    }
}
