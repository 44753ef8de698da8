// src/engine/runtime.rs

//! The node engine: lifecycle around pollers and worker pools.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineSettings;
use crate::engine::kill::KillRegistry;
use crate::engine::node::NodeContext;
use crate::engine::poller::Poller;
use crate::engine::pool::{PoolStats, WorkerPool};
use crate::engine::{EngineState, single, status};
use crate::errors::{EngineError, Result};
use crate::exec::{ArtifactResolver, FsArtifactResolver, PayloadCache, PayloadRegistry};
use crate::store::{JobInstance, JobStatus, JobStore, Queue, QueueAssignment, StoreError};
use crate::types::{JobInstanceId, JobState, Outcome, QueueId};

/// Cause recorded for instances found running by a node that just started.
pub const RESTART_CAUSE: &str = "node restarted during execution";

/// Pollers, pools and the shared context of a started engine.
#[derive(Debug)]
struct Started {
    ctx: Arc<NodeContext>,
    pools: Vec<Arc<WorkerPool>>,
    pollers: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

/// Dropping a started engine without `stop()` still stops claiming and
/// admission. Loaders already holding a slot run to completion detached.
impl Drop for Started {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for pool in &self.pools {
            pool.close();
        }
    }
}

pub struct Engine {
    node_name: String,
    store: Arc<dyn JobStore>,
    settings: EngineSettings,
    payloads: PayloadRegistry,
    resolver: Arc<dyn ArtifactResolver>,
    cache: Arc<PayloadCache>,
    state: watch::Sender<EngineState>,
    started: Option<Started>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("node", &self.node_name)
            .field("state", &self.state())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine for the node called `node_name`. Artifacts resolve under
    /// `settings.artifact_root` unless another resolver is supplied.
    pub fn new(node_name: impl Into<String>, store: Arc<dyn JobStore>, settings: EngineSettings) -> Self {
        let resolver = Arc::new(FsArtifactResolver::new(settings.artifact_root.clone()));
        let (state, _) = watch::channel(EngineState::Stopped);
        Self {
            node_name: node_name.into(),
            store,
            settings,
            payloads: PayloadRegistry::new(),
            resolver,
            cache: Arc::new(PayloadCache::new()),
            state,
            started: None,
        }
    }

    pub fn with_payloads(mut self, payloads: PayloadRegistry) -> Self {
        self.payloads = payloads;
        self
    }

    pub fn with_resolver(mut self, resolver: impl ArtifactResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    pub fn payload_cache(&self) -> &PayloadCache {
        &self.cache
    }

    fn set_state(&self, next: EngineState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!(node = %self.node_name, from = %prev, to = %next, "engine state changed");
        }
    }

    fn expect_state(&self, expected: EngineState) -> Result<()> {
        let actual = self.state();
        if actual != expected {
            return Err(EngineError::InvalidState {
                expected: expected.as_str(),
                actual: actual.as_str(),
            });
        }
        Ok(())
    }

    /// Bring the node up. On failure nothing is left running and the engine
    /// is back in `Stopped`.
    pub async fn start(&mut self) -> Result<()> {
        self.expect_state(EngineState::Stopped)?;
        self.settings.check()?;
        self.set_state(EngineState::Starting);

        match self.bring_up().await {
            Ok(started) => {
                self.started = Some(started);
                self.set_state(EngineState::Running);
                Ok(())
            }
            Err(err) => {
                warn!(node = %self.node_name, error = %err, "engine failed to start");
                self.set_state(EngineState::Stopped);
                Err(err)
            }
        }
    }

    async fn node_context(&self) -> Result<Arc<NodeContext>> {
        let node = self
            .store
            .node_by_name(&self.node_name)
            .await
            .map_err(|e| EngineError::FatalStartup(format!("cannot read node '{}': {e}", self.node_name)))?
            .ok_or_else(|| EngineError::FatalStartup(format!("unknown node '{}'", self.node_name)))?;

        Ok(Arc::new(NodeContext {
            node,
            store: Arc::clone(&self.store),
            settings: self.settings.clone(),
            payloads: self.payloads.clone(),
            resolver: Arc::clone(&self.resolver),
            cache: Arc::clone(&self.cache),
            kills: KillRegistry::new(),
        }))
    }

    async fn bring_up(&self) -> Result<Started> {
        let fatal = |what: &str, e: StoreError| EngineError::FatalStartup(format!("{what}: {e}"));

        let ctx = self.node_context().await?;
        let assignments = self
            .store
            .assignments_for_node(ctx.node.id)
            .await
            .map_err(|e| fatal("cannot read queue assignments", e))?;

        let mut queues: Vec<(Queue, QueueAssignment)> = Vec::with_capacity(assignments.len());
        for a in assignments {
            let queue = self
                .store
                .queue(a.queue)
                .await
                .map_err(|e| fatal("cannot read queue", e))?
                .ok_or_else(|| EngineError::FatalStartup(format!("queue {} not found", a.queue)))?;
            queues.push((queue, a));
        }
        if queues.is_empty() {
            warn!(node = %ctx.node.name, "node has no queue assignments; nothing will be polled");
        }

        let resubmit = self.recover(&ctx, &queues).await?;

        // Nothing below can fail.
        let shutdown = CancellationToken::new();
        let mut pools = Vec::with_capacity(queues.len());
        let mut pollers = Vec::with_capacity(queues.len());
        let mut by_queue: HashMap<QueueId, Arc<WorkerPool>> = HashMap::new();
        for (queue, assignment) in queues {
            let pool = WorkerPool::spawn(queue, Arc::clone(&ctx));
            by_queue.insert(assignment.queue, Arc::clone(&pool));
            pools.push(Arc::clone(&pool));
            let poller = Poller::new(Arc::clone(&ctx), pool, assignment.poll_interval);
            pollers.push(tokio::spawn(poller.run(shutdown.child_token())));
        }

        for instance in resubmit {
            if let Some(pool) = by_queue.get(&instance.queue) {
                info!(job_id = %instance.id, queue = %pool.queue().name, "resubmitting attributed instance");
                pool.submit(instance);
            }
        }

        info!(node = %ctx.node.name, queues = pools.len(), "engine started");
        Ok(Started {
            ctx,
            pools,
            pollers,
            shutdown,
        })
    }

    /// Settle what a previous run of this node left behind. Running
    /// instances are crashed; attributed ones are returned for resubmission.
    async fn recover(
        &self,
        ctx: &NodeContext,
        queues: &[(Queue, QueueAssignment)],
    ) -> Result<Vec<JobInstance>> {
        let owned = self
            .store
            .instances_owned_by(ctx.node.id)
            .await
            .map_err(|e| EngineError::FatalStartup(format!("cannot read owned instances: {e}")))?;

        let mut resubmit = Vec::new();
        for instance in owned {
            let served = queues.iter().any(|(q, _)| q.id == instance.queue);
            let outcome = match instance.state {
                JobState::Attributed if served => {
                    resubmit.push(instance);
                    continue;
                }
                JobState::Attributed => Outcome::Crashed {
                    cause: "queue no longer served by its node".to_string(),
                    exit_code: None,
                },
                JobState::Running => Outcome::Crashed {
                    cause: RESTART_CAUSE.to_string(),
                    exit_code: None,
                },
                _ => continue,
            };
            warn!(job_id = %instance.id, state = %instance.state, cause = ?outcome.cause(), "recovering orphaned instance");
            self.store
                .finalize(instance.id, &outcome, Utc::now())
                .await
                .map_err(|e| EngineError::FatalStartup(format!("cannot recover instance {}: {e}", instance.id)))?;
        }
        Ok(resubmit)
    }

    /// Stop claiming, let running instances finish within the grace period,
    /// then kill the rest and wait for their History.
    pub async fn stop(&mut self) -> Result<()> {
        self.expect_state(EngineState::Running)?;
        self.set_state(EngineState::Stopping);

        if let Some(mut started) = self.started.take() {
            shut_down(&mut started, self.settings.grace_period).await;
        }

        self.set_state(EngineState::Stopped);
        Ok(())
    }

    /// Request a kill. The store flag reaches whichever node runs the
    /// instance; a local instance is also interrupted right away.
    pub async fn kill(&self, id: JobInstanceId) -> Result<()> {
        self.store.request_kill(id).await?;
        if let Some(started) = &self.started {
            if started.ctx.kills.kill(id) {
                debug!(job_id = %id, "kill delivered locally");
            }
        }
        info!(job_id = %id, "kill requested");
        Ok(())
    }

    pub async fn status(&self, id: JobInstanceId) -> Result<Option<JobStatus>> {
        Ok(status::query(self.store.as_ref(), id).await?)
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.started
            .as_ref()
            .map(|s| s.pools.iter().map(|p| p.stats()).collect())
            .unwrap_or_default()
    }

    /// Run one pending instance inline on this node. Only allowed while the
    /// engine is stopped.
    pub async fn run_single(&self, id: JobInstanceId) -> Result<JobStatus> {
        self.expect_state(EngineState::Stopped)?;
        self.settings.check()?;
        let ctx = self.node_context().await?;
        single::run_single(&ctx, id).await
    }
}

async fn shut_down(started: &mut Started, grace: Duration) {
    started.shutdown.cancel();
    for poller in started.pollers.drain(..) {
        let _ = poller.await;
    }
    for pool in &started.pools {
        pool.close();
    }

    let deadline = Instant::now() + grace;
    let mut drained = true;
    for pool in &started.pools {
        if timeout_at(deadline, pool.wait_no_running()).await.is_err() {
            drained = false;
            break;
        }
    }

    if !drained {
        let remaining: usize = started.pools.iter().map(|p| p.running()).sum();
        warn!(remaining, grace_ms = grace.as_millis() as u64, "grace period over; killing running instances");
        started.ctx.kills.kill_all();
        for pool in &started.pools {
            pool.wait_no_running().await;
        }
    }

    for pool in &started.pools {
        pool.shutdown().await;
    }
    info!(node = %started.ctx.node.name, "engine stopped");
}
