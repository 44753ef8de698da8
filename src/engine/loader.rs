// src/engine/loader.rs

//! Runs one claimed instance to a terminal state.
//!
//! Steps, in order:
//! 1. load the job definition
//! 2. honour a kill that arrived before start
//! 3. resolve artifacts and obtain the execution context from the cache
//! 4. `Attributed -> Running` (refused for a second running exclusive instance)
//! 5. run the payload on its own task, checking for kill requests meanwhile
//! 6. hand the outcome to the history writer
//!
//! Every failure in steps 1 to 5 becomes an [`Outcome`]; nothing escapes as
//! an error except a History write that exhausted its retries. Steps 1 to 5
//! run on their own task, so a panic there still ends in a CRASHED History.

use std::any::Any;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::history::{self, Exhausted};
use crate::engine::node::NodeContext;
use crate::errors::Result;
use crate::exec::{ExecutionContext, JobContext, ProcessExit};
use crate::store::{History, JobDefinition, JobInstance, StoreError};
use crate::types::{JobInstanceId, Outcome};

pub async fn run(ctx: &Arc<NodeContext>, instance: JobInstance) -> Result<History> {
    let id = instance.id;
    let outcome = {
        let kill = ctx.kills.register(id);
        let token = kill.token().clone();
        let task_ctx = Arc::clone(ctx);
        let execution =
            tokio::spawn(async move { execute(&task_ctx, instance, &token).await }).await;
        match execution {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => {
                error!(job_id = %id, "loader panicked");
                crashed(format!("loader panicked: {}", panic_message(err.into_panic())))
            }
            Err(err) => crashed(format!("loader task failed: {err}")),
        }
    };

    match &outcome {
        Outcome::Ended => info!(job_id = %id, "instance ended"),
        Outcome::Crashed { cause, exit_code } => {
            warn!(job_id = %id, cause = %cause, exit_code = ?exit_code, "instance crashed")
        }
        Outcome::Killed { cause } => info!(job_id = %id, cause = %cause, "instance killed"),
    }

    history::write(ctx, id, &outcome).await
}

fn crashed(cause: impl Into<String>) -> Outcome {
    Outcome::Crashed {
        cause: cause.into(),
        exit_code: None,
    }
}

fn killed(ctx: &NodeContext) -> Outcome {
    let cause = if ctx.kills.is_shutting_down() {
        "interrupted by engine shutdown"
    } else {
        "kill requested"
    };
    Outcome::Killed {
        cause: cause.to_string(),
    }
}

async fn execute(ctx: &NodeContext, instance: JobInstance, token: &CancellationToken) -> Outcome {
    let id = instance.id;
    let node = ctx.node.id;
    let store = &ctx.store;
    let retry = ctx.retry_policy();

    let job_def = instance.job_def;
    let jd = match retry
        .run("load job definition", move || store.job_definition(job_def))
        .await
    {
        Ok(Some(jd)) => jd,
        Ok(None) => {
            return crashed(format!(
                "resolution failure: job definition {job_def} not found"
            ));
        }
        Err(Exhausted { last, .. }) => return crashed(format!("resolution failure: {last}")),
    };

    if kill_pending(ctx, id, token).await {
        return Outcome::Killed {
            cause: "killed before execution".to_string(),
        };
    }

    let execution = match ctx
        .cache
        .context_for(&jd, &ctx.resolver, &ctx.payloads)
        .await
    {
        Ok(execution) => execution,
        Err(err) => return crashed(format!("resolution failure: {err}")),
    };

    let running = match retry
        .run("start", move || store.start(id, node, Utc::now()))
        .await
    {
        Ok(running) => running,
        Err(Exhausted {
            last: StoreError::ExclusivityConflict { rival, .. },
            ..
        }) => {
            return crashed(format!(
                "exclusivity conflict: instance {rival} of {} is already running",
                jd.application_name
            ));
        }
        Err(Exhausted { last, .. }) => return crashed(format!("start refused: {last}")),
    };

    info!(
        job_id = %id,
        application = %jd.application_name,
        queue = %running.queue,
        "instance running"
    );
    run_payload(ctx, running, jd, execution, token).await
}

/// Local token or store flag, checked at the safe point before start.
async fn kill_pending(ctx: &NodeContext, id: JobInstanceId, token: &CancellationToken) -> bool {
    if token.is_cancelled() {
        return true;
    }
    match ctx.store.kill_requested(id).await {
        Ok(requested) => requested,
        Err(err) => {
            debug!(job_id = %id, error = %err, "kill flag unreadable at safe point");
            false
        }
    }
}

async fn run_payload(
    ctx: &NodeContext,
    running: JobInstance,
    jd: JobDefinition,
    execution: Arc<ExecutionContext>,
    token: &CancellationToken,
) -> Outcome {
    let id = running.id;
    let job = JobContext::new(
        running,
        jd,
        Arc::clone(&execution),
        token.clone(),
        Arc::clone(&ctx.store),
    );
    // Own task, so a panicking payload surfaces as a JoinError.
    let mut handle = tokio::spawn(execution.payload().run(job));

    let mut kill_check = interval(ctx.settings.kill_check_interval);
    kill_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    kill_check.reset();

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                handle.abort();
                let _ = (&mut handle).await;
                return killed(ctx);
            }

            joined = &mut handle => {
                return match joined {
                    Ok(Ok(())) => Outcome::Ended,
                    Ok(Err(_)) if token.is_cancelled() => killed(ctx),
                    Ok(Err(err)) => Outcome::Crashed {
                        cause: format!("{err:#}"),
                        exit_code: err.downcast_ref::<ProcessExit>().map(|exit| exit.code),
                    },
                    Err(err) if err.is_panic() => {
                        crashed(format!("payload panicked: {}", panic_message(err.into_panic())))
                    }
                    Err(err) => crashed(format!("payload task failed: {err}")),
                };
            }

            _ = kill_check.tick() => {
                match ctx.store.kill_requested(id).await {
                    Ok(true) => {
                        info!(job_id = %id, "kill request found in store");
                        token.cancel();
                    }
                    Ok(false) => {}
                    Err(err) => debug!(job_id = %id, error = %err, "kill flag check failed"),
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
