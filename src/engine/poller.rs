// src/engine/poller.rs

//! Per-queue scheduling loop.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::highlander;
use crate::engine::node::NodeContext;
use crate::engine::pool::WorkerPool;
use crate::store::{JobDefinition, StoreError, StoreResult};
use crate::types::{JobDefId, JobInstanceId};

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Won and handed to the pool.
    pub claimed: Vec<JobInstanceId>,
    /// Left pending because an exclusive rival blocks them.
    pub deferred: Vec<JobInstanceId>,
    /// Taken by someone else between the query and the claim.
    pub lost: Vec<JobInstanceId>,
    /// The store failed and the rest of the tick was skipped.
    pub aborted: bool,
}

/// Claims pending instances of one queue for this node.
#[derive(Debug)]
pub struct Poller {
    ctx: Arc<NodeContext>,
    pool: Arc<WorkerPool>,
    interval: Duration,
}

impl Poller {
    pub fn new(ctx: Arc<NodeContext>, pool: Arc<WorkerPool>, interval: Duration) -> Self {
        Self {
            ctx,
            pool,
            interval,
        }
    }

    /// Poll every `interval` until `shutdown` fires. A tick in progress
    /// finishes first, so every won claim reaches the pool.
    pub async fn run(self, shutdown: CancellationToken) {
        let queue = self.pool.queue().name.clone();
        info!(
            queue = %queue,
            node = %self.ctx.node.name,
            interval_ms = self.interval.as_millis() as u64,
            "poller started"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!(queue = %queue, "poller stopped");
    }

    /// One scheduling pass. Never fails: a store outage is logged and ends
    /// the tick early.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        if let Err(err) = self.try_tick(&mut report).await {
            warn!(
                queue = %self.pool.queue().name,
                error = %err,
                "poll tick skipped; store unavailable"
            );
            report.aborted = true;
        }
        report
    }

    async fn try_tick(&self, report: &mut TickReport) -> StoreResult<()> {
        let free = self.pool.free_slots();
        if free == 0 {
            return Ok(());
        }

        let store = self.ctx.store.as_ref();
        let queue = self.pool.queue();
        let candidates = store.candidates(queue.id, free).await?;
        let mut definitions: HashMap<JobDefId, Option<JobDefinition>> = HashMap::new();

        for candidate in candidates {
            let jd = match definitions.entry(candidate.job_def) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => e.insert(store.job_definition(candidate.job_def).await?),
            };

            if jd.as_ref().is_some_and(|jd| jd.exclusive) {
                if let Some(rival) = highlander::blocking_rival(store, &candidate).await? {
                    debug!(
                        queue = %queue.name,
                        job_id = %candidate.id,
                        rival = %rival.id,
                        rival_state = %rival.state,
                        "exclusive instance deferred"
                    );
                    report.deferred.push(candidate.id);
                    continue;
                }
            }

            match store.claim(candidate.id, self.ctx.node.id, Utc::now()).await {
                Ok(claimed) => {
                    debug!(queue = %queue.name, job_id = %claimed.id, "instance claimed");
                    report.claimed.push(claimed.id);
                    self.pool.submit(claimed);
                }
                Err(StoreError::ClaimConflict(id)) => {
                    debug!(queue = %queue.name, job_id = %id, "claim lost to another node");
                    report.lost.push(id);
                }
                Err(err) if err.is_transient() => return Err(err),
                Err(err) => {
                    warn!(queue = %queue.name, job_id = %candidate.id, error = %err, "claim failed");
                    report.lost.push(candidate.id);
                }
            }
        }

        Ok(())
    }
}
