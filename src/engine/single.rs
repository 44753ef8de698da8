// src/engine/single.rs

//! Single-launch mode: run one given instance inline, without pollers or
//! pools, and report how it finished.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::engine::node::NodeContext;
use crate::engine::{highlander, loader};
use crate::errors::Result;
use crate::store::{JobStatus, StoreError};
use crate::types::JobInstanceId;

/// Claim `id` for this node and run it to completion. An exclusive instance
/// is refused while a rival is claimed or ahead of it in queue order, exactly
/// as a poller would defer it.
pub async fn run_single(ctx: &Arc<NodeContext>, id: JobInstanceId) -> Result<JobStatus> {
    let store = ctx.store.as_ref();
    let pending = store
        .instance(id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("job instance {id}")))?;
    let jd = store
        .job_definition(pending.job_def)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("job definition {}", pending.job_def)))?;

    if jd.exclusive {
        if let Some(rival) = highlander::blocking_rival(store, &pending).await? {
            warn!(
                job_id = %id,
                rival = %rival.id,
                rival_state = %rival.state,
                "single launch refused; exclusive rival"
            );
            return Err(StoreError::ExclusivityConflict { id, rival: rival.id }.into());
        }
    }

    let claimed = store.claim(id, ctx.node.id, Utc::now()).await?;
    info!(job_id = %id, node = %ctx.node.name, "single launch");
    let history = loader::run(ctx, claimed).await?;
    Ok(JobStatus::from(&history))
}
