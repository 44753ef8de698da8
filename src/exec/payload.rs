// src/exec/payload.rs

//! Payload abstraction.
//!
//! A payload is the code a job instance runs. The loader hands it a
//! [`JobContext`] and awaits the returned future:
//! - `Ok(())` ends the instance normally.
//! - `Err(_)` crashes it, with the error chain recorded as the cause.
//! - a panic is caught by the loader and also crashes it.
//!
//! Payloads should watch [`JobContext::cancel`] and return promptly once it
//! fires. The loader drops the future anyway when a kill is confirmed.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::exec::command::CommandPayload;
use crate::exec::context::ExecutionContext;
use crate::exec::resolver::ResolveError;
use crate::store::{JobDefinition, JobInstance, JobStore, PayloadKind};
use crate::types::JobInstanceId;

pub type PayloadFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

pub trait Payload: Send + Sync {
    fn run(&self, ctx: JobContext) -> PayloadFuture;
}

/// Everything a running payload can see and do.
#[derive(Clone)]
pub struct JobContext {
    pub instance: JobInstance,
    pub definition: JobDefinition,
    pub execution: Arc<ExecutionContext>,
    pub cancel: CancellationToken,
    store: Arc<dyn JobStore>,
}

impl JobContext {
    pub(crate) fn new(
        instance: JobInstance,
        definition: JobDefinition,
        execution: Arc<ExecutionContext>,
        cancel: CancellationToken,
        store: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            instance,
            definition,
            execution,
            cancel,
            store,
        }
    }

    pub fn id(&self) -> JobInstanceId {
        self.instance.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record progress on the active row. Failures are logged, never fatal.
    pub async fn report_progress(&self, progress: i32) {
        if let Err(err) = self.store.set_progress(self.instance.id, progress).await {
            warn!(job = %self.instance.id, progress, error = %err, "failed to record progress");
        }
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("instance", &self.instance.id)
            .field("application", &self.definition.application_name)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

struct FnPayload<F>(F);

impl<F, Fut> Payload for FnPayload<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn run(&self, ctx: JobContext) -> PayloadFuture {
        Box::pin((self.0)(ctx))
    }
}

/// In-process payloads addressable by name from job definitions.
#[derive(Clone, Default)]
pub struct PayloadRegistry {
    builtins: HashMap<String, Arc<dyn Payload>>,
}

impl PayloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, payload: impl Payload + 'static) -> &mut Self {
        self.builtins.insert(name.into(), Arc::new(payload));
        self
    }

    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(name, FnPayload(f))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Payload>> {
        self.builtins.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builtins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn instantiate(&self, kind: &PayloadKind) -> Result<Arc<dyn Payload>, ResolveError> {
        match kind {
            PayloadKind::Command { cmd } => Ok(Arc::new(CommandPayload::new(cmd.clone()))),
            PayloadKind::Builtin { name } => self
                .get(name)
                .ok_or_else(|| ResolveError::UnknownBuiltin(name.clone())),
        }
    }
}

impl fmt::Debug for PayloadRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadRegistry")
            .field("builtins", &self.names())
            .finish()
    }
}
