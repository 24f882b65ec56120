//! FCP client: connects to a node, multiplexes concurrent requests over one
//! socket, and exposes synchronous and callback-driven calling conventions.
//!
//! The wire format and status derivation live in `fcp-core`; this crate adds
//! the I/O: a dedicated engine thread owns the socket, matches replies to
//! request records by identifier, retries transient failures, enforces
//! per-request deadlines, and runs callbacks on short-lived worker threads.

mod client;
pub mod config;
mod engine;
mod error;
mod options;
mod registry;
mod request;

pub use client::Client;
pub use config::ClientConfig;
pub use engine::Observer;
pub use error::Error;
pub use options::{GetOptions, Persistence, PutDirOptions, PutOptions, UploadFrom};
pub use request::{content_identifier, generate_identifier, Callback, Request};

pub use fcp_core::{Fields, FreenetUri, Message, Status};
