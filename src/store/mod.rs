// src/store/mod.rs

//! Persistence port.
//!
//! The engine never talks to a database directly: every read and every
//! mutation of shared state goes through [`JobStore`]. Each mutating method is
//! one transaction against one job-instance row (plus, for
//! [`JobStore::finalize`], the matching History insert), so any relational
//! backend can implement it with conditional `UPDATE ... WHERE state = ...`
//! statements.
//!
//! - [`model`] holds the row types.
//! - [`memory`] is an in-process implementation used by tests and by
//!   single-process deployments.
//! - [`seed`] fills a [`MemoryStore`] from the configuration file.

pub mod memory;
pub mod model;
pub mod seed;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{JobDefId, JobInstanceId, JobState, NodeId, Outcome, QueueId};

pub use memory::MemoryStore;
pub use model::{
    EnqueueRequest, History, InstanceTags, JobDefinition, JobInstance, JobStatus, Keywords,
    NewJobDefinition, Node, PayloadKind, PayloadSpec, Queue, QueueAssignment,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("job instance {0} is no longer pending")]
    ClaimConflict(JobInstanceId),

    #[error("job instance {id} conflicts with running instance {rival} of the same exclusive job definition")]
    ExclusivityConflict {
        id: JobInstanceId,
        rival: JobInstanceId,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("job instance {id} cannot go from {from} to {to}")]
    InvalidTransition {
        id: JobInstanceId,
        from: JobState,
        to: JobState,
    },
}

impl StoreError {
    /// Transient failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Repository interface over the shared relational store.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    async fn node_by_name(&self, name: &str) -> StoreResult<Option<Node>>;

    async fn assignments_for_node(&self, node: NodeId) -> StoreResult<Vec<QueueAssignment>>;

    async fn queue(&self, id: QueueId) -> StoreResult<Option<Queue>>;

    async fn job_definition(&self, id: JobDefId) -> StoreResult<Option<JobDefinition>>;

    /// `Submitted` instances of `queue`, highest priority first, then oldest
    /// first, at most `limit` of them.
    async fn candidates(&self, queue: QueueId, limit: usize) -> StoreResult<Vec<JobInstance>>;

    /// Non-terminal, non-held instances of `job_def` other than `exclude`.
    async fn live_rivals(
        &self,
        job_def: JobDefId,
        exclude: JobInstanceId,
    ) -> StoreResult<Vec<JobInstance>>;

    /// `Submitted -> Attributed`, recording the owner. Fails with
    /// [`StoreError::ClaimConflict`] if the row is no longer `Submitted`.
    async fn claim(
        &self,
        id: JobInstanceId,
        node: NodeId,
        at: DateTime<Utc>,
    ) -> StoreResult<JobInstance>;

    /// `Attributed -> Running` for the owning node. For exclusive job
    /// definitions this fails with [`StoreError::ExclusivityConflict`] when
    /// another instance of the definition is already running.
    async fn start(
        &self,
        id: JobInstanceId,
        node: NodeId,
        at: DateTime<Utc>,
    ) -> StoreResult<JobInstance>;

    async fn set_progress(&self, id: JobInstanceId, progress: i32) -> StoreResult<()>;

    async fn request_kill(&self, id: JobInstanceId) -> StoreResult<()>;

    async fn kill_requested(&self, id: JobInstanceId) -> StoreResult<bool>;

    /// Insert the History row for `id` and delete the active row, in one
    /// transaction. Calling it again for an already finalized id returns the
    /// existing History.
    async fn finalize(
        &self,
        id: JobInstanceId,
        outcome: &Outcome,
        at: DateTime<Utc>,
    ) -> StoreResult<History>;

    async fn instance(&self, id: JobInstanceId) -> StoreResult<Option<JobInstance>>;

    async fn history(&self, id: JobInstanceId) -> StoreResult<Option<History>>;

    /// Claimed instances still owned by `node`.
    async fn instances_owned_by(&self, node: NodeId) -> StoreResult<Vec<JobInstance>>;

    // Client-side operations.

    async fn enqueue(&self, request: EnqueueRequest) -> StoreResult<JobInstanceId>;

    /// `Submitted -> Holded`.
    async fn hold(&self, id: JobInstanceId) -> StoreResult<()>;

    /// `Holded -> Submitted`.
    async fn resume(&self, id: JobInstanceId) -> StoreResult<()>;

    /// Pending (`Submitted` or `Holded`) straight to a `Cancelled` History.
    async fn cancel(&self, id: JobInstanceId, at: DateTime<Utc>) -> StoreResult<History>;
}
