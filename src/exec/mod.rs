// src/exec/mod.rs

//! Payload execution support.
//!
//! - [`payload`] defines what a job runs and the context it runs with.
//! - [`command`] runs shell-command payloads as child processes.
//! - [`resolver`] locates a definition's artifacts on disk.
//! - [`context`] and [`cache`] build and reuse one execution context per
//!   job definition version.

pub mod cache;
pub mod command;
pub mod context;
pub mod payload;
pub mod resolver;

pub use cache::PayloadCache;
pub use command::{CommandPayload, ProcessExit};
pub use context::{ExecutionContext, LIBRARY_PATH_VAR};
pub use payload::{JobContext, Payload, PayloadFuture, PayloadRegistry};
pub use resolver::{ArtifactResolver, FsArtifactResolver, ResolveError};
