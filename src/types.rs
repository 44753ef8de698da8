// src/types.rs

//! Identifiers and lifecycle states shared by every layer of the engine.

use std::fmt;

macro_rules! store_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                $name(raw)
            }
        }
    };
}

store_id!(
    /// Identifier of a job instance. The same value identifies its History
    /// record once the instance has terminated.
    JobInstanceId
);
store_id!(JobDefId);
store_id!(QueueId);
store_id!(NodeId);

/// Lifecycle state of a job instance.
///
/// ```text
/// Submitted ──claim──▶ Attributed ──start──▶ Running ──▶ Ended | Crashed | Killed
///    │  ▲                   │
///  hold resume              └── kill before start / conflict ──▶ Killed | Crashed
///    ▼  │
///  Holded          Submitted ──cancel──▶ Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Submitted,
    Holded,
    Attributed,
    Running,
    Ended,
    Crashed,
    Killed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Ended | JobState::Crashed | JobState::Killed | JobState::Cancelled
        )
    }

    /// Claimed by a node and not yet finished.
    pub fn is_claimed(self) -> bool {
        matches!(self, JobState::Attributed | JobState::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Submitted => "SUBMITTED",
            JobState::Holded => "HOLDED",
            JobState::Attributed => "ATTRIBUTED",
            JobState::Running => "RUNNING",
            JobState::Ended => "ENDED",
            JobState::Crashed => "CRASHED",
            JobState::Killed => "KILLED",
            JobState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one execution, produced by the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ended,
    Crashed {
        cause: String,
        /// Exit code of a command payload that exited unsuccessfully.
        exit_code: Option<i32>,
    },
    Killed { cause: String },
}

impl Outcome {
    pub fn state(&self) -> JobState {
        match self {
            Outcome::Ended => JobState::Ended,
            Outcome::Crashed { .. } => JobState::Crashed,
            Outcome::Killed { .. } => JobState::Killed,
        }
    }

    pub fn cause(&self) -> Option<&str> {
        match self {
            Outcome::Ended => None,
            Outcome::Crashed { cause, .. } | Outcome::Killed { cause } => Some(cause),
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Outcome::Crashed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}
