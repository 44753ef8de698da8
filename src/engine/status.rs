// src/engine/status.rs

use crate::store::{JobStatus, JobStore, StoreResult};
use crate::types::JobInstanceId;

/// Current state of `id`: the active row if there is one, else its History.
pub async fn query(store: &dyn JobStore, id: JobInstanceId) -> StoreResult<Option<JobStatus>> {
    if let Some(active) = store.instance(id).await? {
        return Ok(Some(JobStatus::from(&active)));
    }
    Ok(store.history(id).await?.as_ref().map(JobStatus::from))
}
