//! Node Worker - out-of-process execution for code nodes
//!
//! A code node runs as a separate worker binary that talks to the host over
//! a private TCP protocol built from length-prefixed name/value pairs.
//!
//! - `wire`: pair framing
//! - `attrs`: attribute records
//! - `session`: host side of one connection (handshake and run loop)
//! - `server`: listener, worker spawning and the connection cache
//! - `client`: worker side SDK
//! - `process`: process spawning abstraction

pub mod attrs;
pub mod client;
pub mod error;
pub mod process;
pub mod server;
pub mod session;
pub mod wire;

// Re-export key types
pub use attrs::WorkerAttr;
pub use client::Worker;
pub use error::{Result, WorkerError};
pub use process::{ProcessHandle, ProcessSpawner, TokioProcessSpawner};
pub use server::{SharedConnection, WorkerServer};
pub use session::{Connection, WorkerProgress};
