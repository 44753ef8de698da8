use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use jobengine::store::{
    EnqueueRequest, History, JobDefinition, JobInstance, JobStore, MemoryStore, Node, Queue,
    QueueAssignment, StoreError, StoreResult,
};
use jobengine::types::{JobDefId, JobInstanceId, NodeId, Outcome, QueueId};

/// Wraps a [`MemoryStore`] and fails selected calls with
/// [`StoreError::Unavailable`] a set number of times.
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    finalize_failures: AtomicU32,
    candidates_failures: AtomicU32,
    finalize_calls: AtomicU32,
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn outage(what: &str) -> StoreError {
    StoreError::Unavailable(format!("injected failure in {what}"))
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            finalize_failures: AtomicU32::new(0),
            candidates_failures: AtomicU32::new(0),
            finalize_calls: AtomicU32::new(0),
        }
    }

    pub fn fail_finalize(&self, times: u32) {
        self.finalize_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_candidates(&self, times: u32) {
        self.candidates_failures.store(times, Ordering::SeqCst);
    }

    pub fn finalize_calls(&self) -> u32 {
        self.finalize_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn node_by_name(&self, name: &str) -> StoreResult<Option<Node>> {
        self.inner.node_by_name(name).await
    }

    async fn assignments_for_node(&self, node: NodeId) -> StoreResult<Vec<QueueAssignment>> {
        self.inner.assignments_for_node(node).await
    }

    async fn queue(&self, id: QueueId) -> StoreResult<Option<Queue>> {
        self.inner.queue(id).await
    }

    async fn job_definition(&self, id: JobDefId) -> StoreResult<Option<JobDefinition>> {
        self.inner.job_definition(id).await
    }

    async fn candidates(&self, queue: QueueId, limit: usize) -> StoreResult<Vec<JobInstance>> {
        if take_failure(&self.candidates_failures) {
            return Err(outage("candidates"));
        }
        self.inner.candidates(queue, limit).await
    }

    async fn live_rivals(
        &self,
        job_def: JobDefId,
        exclude: JobInstanceId,
    ) -> StoreResult<Vec<JobInstance>> {
        self.inner.live_rivals(job_def, exclude).await
    }

    async fn claim(
        &self,
        id: JobInstanceId,
        node: NodeId,
        at: DateTime<Utc>,
    ) -> StoreResult<JobInstance> {
        self.inner.claim(id, node, at).await
    }

    async fn start(
        &self,
        id: JobInstanceId,
        node: NodeId,
        at: DateTime<Utc>,
    ) -> StoreResult<JobInstance> {
        self.inner.start(id, node, at).await
    }

    async fn set_progress(&self, id: JobInstanceId, progress: i32) -> StoreResult<()> {
        self.inner.set_progress(id, progress).await
    }

    async fn request_kill(&self, id: JobInstanceId) -> StoreResult<()> {
        self.inner.request_kill(id).await
    }

    async fn kill_requested(&self, id: JobInstanceId) -> StoreResult<bool> {
        self.inner.kill_requested(id).await
    }

    async fn finalize(
        &self,
        id: JobInstanceId,
        outcome: &Outcome,
        at: DateTime<Utc>,
    ) -> StoreResult<History> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.finalize_failures) {
            return Err(outage("finalize"));
        }
        self.inner.finalize(id, outcome, at).await
    }

    async fn instance(&self, id: JobInstanceId) -> StoreResult<Option<JobInstance>> {
        self.inner.instance(id).await
    }

    async fn history(&self, id: JobInstanceId) -> StoreResult<Option<History>> {
        self.inner.history(id).await
    }

    async fn instances_owned_by(&self, node: NodeId) -> StoreResult<Vec<JobInstance>> {
        self.inner.instances_owned_by(node).await
    }

    async fn enqueue(&self, request: EnqueueRequest) -> StoreResult<JobInstanceId> {
        self.inner.enqueue(request).await
    }

    async fn hold(&self, id: JobInstanceId) -> StoreResult<()> {
        self.inner.hold(id).await
    }

    async fn resume(&self, id: JobInstanceId) -> StoreResult<()> {
        self.inner.resume(id).await
    }

    async fn cancel(&self, id: JobInstanceId, at: DateTime<Utc>) -> StoreResult<History> {
        self.inner.cancel(id, at).await
    }
}
