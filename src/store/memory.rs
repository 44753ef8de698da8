// src/store/memory.rs

//! In-memory [`JobStore`].
//!
//! One mutex guards every table, so each trait method behaves like a
//! serializable transaction: the conditional claim, the conditional start and
//! the active-to-history move are all atomic, exactly as they must be in a
//! relational backend. Several engines sharing one `Arc<MemoryStore>` behave
//! like several nodes sharing one database.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::model::{
    EnqueueRequest, History, JobDefinition, JobInstance, NewJobDefinition, Node, Queue,
    QueueAssignment,
};
use super::{JobStore, StoreError, StoreResult};
use crate::types::{JobDefId, JobInstanceId, JobState, NodeId, Outcome, QueueId};

#[derive(Debug, Default)]
struct Tables {
    next_id: u64,
    queues: BTreeMap<QueueId, Queue>,
    nodes: BTreeMap<NodeId, Node>,
    assignments: Vec<QueueAssignment>,
    job_defs: BTreeMap<JobDefId, JobDefinition>,
    instances: BTreeMap<JobInstanceId, JobInstance>,
    history: BTreeMap<JobInstanceId, History>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn instance_mut(&mut self, id: JobInstanceId) -> StoreResult<&mut JobInstance> {
        self.instances
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("job instance {id}")))
    }

    /// Build the History row from the active row and delete the latter.
    fn move_to_history(
        &mut self,
        id: JobInstanceId,
        state: JobState,
        cause: Option<String>,
        exit_code: Option<i32>,
        at: DateTime<Utc>,
    ) -> StoreResult<History> {
        let ji = self
            .instances
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("job instance {id}")))?;
        let jd = self
            .job_defs
            .get(&ji.job_def)
            .ok_or_else(|| StoreError::NotFound(format!("job definition {}", ji.job_def)))?;
        let queue_name = self
            .queues
            .get(&ji.queue)
            .map(|q| q.name.clone())
            .unwrap_or_default();
        let node_name = ji
            .node
            .and_then(|n| self.nodes.get(&n))
            .map(|n| n.name.clone());

        let history = History {
            id,
            job_def: jd.id,
            application_name: jd.application_name.clone(),
            queue: ji.queue,
            queue_name,
            node: ji.node,
            node_name,
            exclusive: jd.exclusive,
            state,
            progress: ji.progress,
            cause,
            exit_code,
            enqueued_at: ji.enqueued_at,
            attributed_at: ji.attributed_at,
            started_at: ji.started_at,
            ended_at: at,
            instance_tags: ji.tags.clone(),
            definition_tags: jd.tags.clone(),
        };

        self.history.insert(id, history.clone());
        self.instances.remove(&id);
        Ok(history)
    }
}

/// Shared in-process store.
#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the database going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn tables(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    // Administration; not part of the engine's port.

    pub fn add_queue(
        &self,
        name: impl Into<String>,
        concurrency: usize,
        is_default: bool,
    ) -> StoreResult<QueueId> {
        let mut t = self.tables()?;
        let id = QueueId(t.next_id());
        let name = name.into();
        if is_default {
            for q in t.queues.values_mut() {
                q.is_default = false;
            }
        }
        t.queues.insert(
            id,
            Queue {
                id,
                description: format!("queue {name}"),
                name,
                concurrency,
                is_default,
            },
        );
        Ok(id)
    }

    pub fn add_node(&self, name: impl Into<String>) -> StoreResult<NodeId> {
        let mut t = self.tables()?;
        let id = NodeId(t.next_id());
        t.nodes.insert(
            id,
            Node {
                id,
                name: name.into(),
            },
        );
        Ok(id)
    }

    pub fn assign(&self, node: NodeId, queue: QueueId, poll_interval: Duration) -> StoreResult<()> {
        let mut t = self.tables()?;
        if !t.nodes.contains_key(&node) {
            return Err(StoreError::NotFound(format!("node {node}")));
        }
        if !t.queues.contains_key(&queue) {
            return Err(StoreError::NotFound(format!("queue {queue}")));
        }
        t.assignments.retain(|a| !(a.node == node && a.queue == queue));
        t.assignments.push(QueueAssignment {
            node,
            queue,
            poll_interval,
        });
        Ok(())
    }

    pub fn add_job_definition(&self, def: NewJobDefinition) -> StoreResult<JobDefId> {
        let mut t = self.tables()?;
        if !t.queues.contains_key(&def.queue) {
            return Err(StoreError::NotFound(format!("queue {}", def.queue)));
        }
        let id = JobDefId(t.next_id());
        t.job_defs.insert(id, def.into_definition(id));
        Ok(id)
    }

    pub fn queue_by_name(&self, name: &str) -> StoreResult<Option<Queue>> {
        let t = self.tables()?;
        Ok(t.queues.values().find(|q| q.name == name).cloned())
    }

    pub fn job_definition_by_name(&self, application_name: &str) -> StoreResult<Option<JobDefinition>> {
        let t = self.tables()?;
        Ok(t.job_defs
            .values()
            .find(|jd| jd.application_name == application_name)
            .cloned())
    }

    /// Every active row, for assertions and diagnostics.
    pub fn active_instances(&self) -> StoreResult<Vec<JobInstance>> {
        let t = self.tables()?;
        Ok(t.instances.values().cloned().collect())
    }

    pub fn all_history(&self) -> StoreResult<Vec<History>> {
        let t = self.tables()?;
        Ok(t.history.values().cloned().collect())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn node_by_name(&self, name: &str) -> StoreResult<Option<Node>> {
        let t = self.tables()?;
        Ok(t.nodes.values().find(|n| n.name == name).cloned())
    }

    async fn assignments_for_node(&self, node: NodeId) -> StoreResult<Vec<QueueAssignment>> {
        let t = self.tables()?;
        Ok(t.assignments
            .iter()
            .filter(|a| a.node == node)
            .cloned()
            .collect())
    }

    async fn queue(&self, id: QueueId) -> StoreResult<Option<Queue>> {
        let t = self.tables()?;
        Ok(t.queues.get(&id).cloned())
    }

    async fn job_definition(&self, id: JobDefId) -> StoreResult<Option<JobDefinition>> {
        let t = self.tables()?;
        Ok(t.job_defs.get(&id).cloned())
    }

    async fn candidates(&self, queue: QueueId, limit: usize) -> StoreResult<Vec<JobInstance>> {
        let t = self.tables()?;
        let mut pending: Vec<JobInstance> = t
            .instances
            .values()
            .filter(|ji| ji.state == JobState::Submitted && ji.queue == queue)
            .cloned()
            .collect();
        pending.sort_by_key(|ji| ji.order_key());
        pending.truncate(limit);
        Ok(pending)
    }

    async fn live_rivals(
        &self,
        job_def: JobDefId,
        exclude: JobInstanceId,
    ) -> StoreResult<Vec<JobInstance>> {
        let t = self.tables()?;
        Ok(t.instances
            .values()
            .filter(|ji| {
                ji.job_def == job_def
                    && ji.id != exclude
                    && matches!(
                        ji.state,
                        JobState::Submitted | JobState::Attributed | JobState::Running
                    )
            })
            .cloned()
            .collect())
    }

    async fn claim(
        &self,
        id: JobInstanceId,
        node: NodeId,
        at: DateTime<Utc>,
    ) -> StoreResult<JobInstance> {
        let mut t = self.tables()?;
        let ji = match t.instances.get_mut(&id) {
            Some(ji) if ji.state == JobState::Submitted => ji,
            _ => return Err(StoreError::ClaimConflict(id)),
        };
        ji.state = JobState::Attributed;
        ji.node = Some(node);
        ji.attributed_at = Some(at);
        debug!(job_id = %id, node = %node, "row claimed");
        Ok(ji.clone())
    }

    async fn start(
        &self,
        id: JobInstanceId,
        node: NodeId,
        at: DateTime<Utc>,
    ) -> StoreResult<JobInstance> {
        let mut t = self.tables()?;
        let (job_def, state, owner) = {
            let ji = t.instance_mut(id)?;
            (ji.job_def, ji.state, ji.node)
        };
        if state != JobState::Attributed || owner != Some(node) {
            return Err(StoreError::InvalidTransition {
                id,
                from: state,
                to: JobState::Running,
            });
        }

        let exclusive = t.job_defs.get(&job_def).is_some_and(|jd| jd.exclusive);
        if exclusive {
            let rival = t
                .instances
                .values()
                .find(|other| {
                    other.job_def == job_def && other.id != id && other.state == JobState::Running
                })
                .map(|other| other.id);
            if let Some(rival) = rival {
                return Err(StoreError::ExclusivityConflict { id, rival });
            }
        }

        let ji = t.instance_mut(id)?;
        ji.state = JobState::Running;
        ji.started_at = Some(at);
        Ok(ji.clone())
    }

    async fn set_progress(&self, id: JobInstanceId, progress: i32) -> StoreResult<()> {
        let mut t = self.tables()?;
        t.instance_mut(id)?.progress = Some(progress);
        Ok(())
    }

    async fn request_kill(&self, id: JobInstanceId) -> StoreResult<()> {
        let mut t = self.tables()?;
        t.instance_mut(id)?.kill_requested = true;
        Ok(())
    }

    async fn kill_requested(&self, id: JobInstanceId) -> StoreResult<bool> {
        let t = self.tables()?;
        Ok(t.instances.get(&id).is_some_and(|ji| ji.kill_requested))
    }

    async fn finalize(
        &self,
        id: JobInstanceId,
        outcome: &Outcome,
        at: DateTime<Utc>,
    ) -> StoreResult<History> {
        let mut t = self.tables()?;
        if !t.instances.contains_key(&id) {
            return t
                .history
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("job instance {id}")));
        }

        let state = t.instance_mut(id)?.state;
        if !state.is_claimed() {
            return Err(StoreError::InvalidTransition {
                id,
                from: state,
                to: outcome.state(),
            });
        }

        t.move_to_history(
            id,
            outcome.state(),
            outcome.cause().map(str::to_string),
            outcome.exit_code(),
            at,
        )
    }

    async fn instance(&self, id: JobInstanceId) -> StoreResult<Option<JobInstance>> {
        let t = self.tables()?;
        Ok(t.instances.get(&id).cloned())
    }

    async fn history(&self, id: JobInstanceId) -> StoreResult<Option<History>> {
        let t = self.tables()?;
        Ok(t.history.get(&id).cloned())
    }

    async fn instances_owned_by(&self, node: NodeId) -> StoreResult<Vec<JobInstance>> {
        let t = self.tables()?;
        Ok(t.instances
            .values()
            .filter(|ji| ji.node == Some(node) && ji.state.is_claimed())
            .cloned()
            .collect())
    }

    async fn enqueue(&self, request: EnqueueRequest) -> StoreResult<JobInstanceId> {
        let mut t = self.tables()?;
        let jd = t
            .job_defs
            .values()
            .find(|jd| jd.application_name == request.application_name)
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!("job definition {}", request.application_name))
            })?;
        let queue = request.queue.unwrap_or(jd.queue);
        if !t.queues.contains_key(&queue) {
            return Err(StoreError::NotFound(format!("queue {queue}")));
        }

        let id = JobInstanceId(t.next_id());
        t.instances.insert(
            id,
            JobInstance {
                id,
                job_def: jd.id,
                queue,
                priority: request.priority.unwrap_or(jd.priority),
                state: JobState::Submitted,
                node: None,
                enqueued_at: Utc::now(),
                attributed_at: None,
                started_at: None,
                tags: request.tags,
                progress: None,
                kill_requested: false,
            },
        );
        debug!(job_id = %id, application = %jd.application_name, queue = %queue, "enqueued");
        Ok(id)
    }

    async fn hold(&self, id: JobInstanceId) -> StoreResult<()> {
        let mut t = self.tables()?;
        let ji = t.instance_mut(id)?;
        if ji.state != JobState::Submitted {
            return Err(StoreError::InvalidTransition {
                id,
                from: ji.state,
                to: JobState::Holded,
            });
        }
        ji.state = JobState::Holded;
        Ok(())
    }

    async fn resume(&self, id: JobInstanceId) -> StoreResult<()> {
        let mut t = self.tables()?;
        let ji = t.instance_mut(id)?;
        if ji.state != JobState::Holded {
            return Err(StoreError::InvalidTransition {
                id,
                from: ji.state,
                to: JobState::Submitted,
            });
        }
        ji.state = JobState::Submitted;
        Ok(())
    }

    async fn cancel(&self, id: JobInstanceId, at: DateTime<Utc>) -> StoreResult<History> {
        let mut t = self.tables()?;
        let state = t.instance_mut(id)?.state;
        if !matches!(state, JobState::Submitted | JobState::Holded) {
            return Err(StoreError::InvalidTransition {
                id,
                from: state,
                to: JobState::Cancelled,
            });
        }
        t.move_to_history(
            id,
            JobState::Cancelled,
            Some("cancelled before execution".to_string()),
            None,
            at,
        )
    }
}
