// src/engine/history.rs

//! History writer.
//!
//! Finalizing an instance inserts its History row and deletes the active row
//! in one store transaction. A transiently unavailable store is retried with
//! doubling backoff; once the attempts are exhausted an alarm is logged and
//! the instance stays in the active table for an operator to resolve.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::EngineSettings;
use crate::engine::node::NodeContext;
use crate::errors::{EngineError, Result};
use crate::store::{History, StoreError, StoreResult};
use crate::types::{JobInstanceId, Outcome};

/// Retry budget for store calls that must not be lost to a blip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

/// The last error of a retried call and how many attempts were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted {
    pub attempts: u32,
    pub last: StoreError,
}

impl RetryPolicy {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            attempts: settings.history_write_attempts.max(1),
            backoff: settings.history_retry_backoff,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the attempts run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> std::result::Result<T, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.attempts => {
                    warn!(
                        operation = what,
                        attempt,
                        max_attempts = self.attempts,
                        error = %err,
                        "store call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(last) => {
                    return Err(Exhausted {
                        attempts: attempt,
                        last,
                    });
                }
            }
        }
    }
}

/// Persist the terminal record of `id`.
pub async fn write(ctx: &NodeContext, id: JobInstanceId, outcome: &Outcome) -> Result<History> {
    let store = &ctx.store;
    let written = ctx
        .retry_policy()
        .run("history write", move || store.finalize(id, outcome, Utc::now()))
        .await;

    match written {
        Ok(history) => {
            info!(
                job_id = %id,
                state = %history.state,
                application = %history.application_name,
                "history written"
            );
            Ok(history)
        }
        Err(Exhausted { attempts, last }) => {
            error!(
                alarm = true,
                job_id = %id,
                state = %outcome.state(),
                attempts,
                error = %last,
                "ALARM: could not write history; instance left in the active table"
            );
            Err(EngineError::HistoryWriteFailed {
                id,
                attempts,
                source: last,
            })
        }
    }
}
