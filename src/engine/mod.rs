// src/engine/mod.rs

//! Scheduling and dispatch for one node.
//!
//! This module ties together:
//! - one [`Poller`] per queue assigned to the node, claiming pending work
//! - one [`WorkerPool`] per queue, bounding concurrent execution
//! - the [`loader`], which runs one claimed instance to a terminal state
//! - the Highlander guard ([`highlander`]) for exclusive job definitions
//! - the History writer ([`history`]), which retries transient store failures
//!
//! [`Engine`] owns all of the above and drives the node lifecycle
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`.

use std::fmt;

pub mod highlander;
pub mod history;
pub mod kill;
pub mod loader;
pub mod node;
pub mod poller;
pub mod pool;
pub mod runtime;
pub mod single;
pub mod status;

pub use history::RetryPolicy;
pub use kill::KillRegistry;
pub use node::NodeContext;
pub use poller::{Poller, TickReport};
pub use pool::{PoolLoad, PoolStats, WorkerPool};
pub use runtime::Engine;

/// Observable lifecycle state of an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::Stopped => "STOPPED",
            EngineState::Starting => "STARTING",
            EngineState::Running => "RUNNING",
            EngineState::Stopping => "STOPPING",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
