// src/engine/highlander.rs

//! Highlander guard for exclusive job definitions.
//!
//! A pending instance of an exclusive definition may be claimed only when no
//! other instance of the definition is claimed, and no other pending one is
//! ahead of it in queue order. The check is advisory: it is not atomic with
//! the claim, and the store's start transition refuses a second running
//! instance regardless.

use crate::store::{JobInstance, JobStore, StoreResult};
use crate::types::JobState;

/// The rival that keeps `candidate` from being claimed, if any.
pub async fn blocking_rival(
    store: &dyn JobStore,
    candidate: &JobInstance,
) -> StoreResult<Option<JobInstance>> {
    let rivals = store.live_rivals(candidate.job_def, candidate.id).await?;
    let key = candidate.order_key();
    Ok(rivals.into_iter().find(|rival| match rival.state {
        JobState::Attributed | JobState::Running => true,
        JobState::Submitted => rival.order_key() < key,
        _ => false,
    }))
}

pub async fn may_claim(store: &dyn JobStore, candidate: &JobInstance) -> StoreResult<bool> {
    Ok(blocking_rival(store, candidate).await?.is_none())
}
