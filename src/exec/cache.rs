// src/exec/cache.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::debug;

use crate::exec::context::ExecutionContext;
use crate::exec::payload::PayloadRegistry;
use crate::exec::resolver::{ArtifactResolver, ResolveError};
use crate::store::JobDefinition;
use crate::types::JobDefId;

type CacheKey = (JobDefId, String);
type Slot = Arc<OnceCell<Arc<ExecutionContext>>>;

/// Execution contexts keyed by job definition and version.
///
/// Each key has its own cell: loaders racing on a cold key wait for one
/// resolution, while other keys proceed. Failed resolutions leave the cell
/// empty, so fixing a missing artifact takes effect on the next instance.
#[derive(Debug, Default)]
pub struct PayloadCache {
    entries: Mutex<HashMap<CacheKey, Slot>>,
    resolutions: AtomicUsize,
}

impl PayloadCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: CacheKey) -> Slot {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(entries.entry(key).or_default())
    }

    pub async fn context_for(
        &self,
        jd: &JobDefinition,
        resolver: &Arc<dyn ArtifactResolver>,
        payloads: &PayloadRegistry,
    ) -> Result<Arc<ExecutionContext>, ResolveError> {
        let slot = self.slot((jd.id, jd.version.clone()));
        let context = slot
            .get_or_try_init(|| async {
                let payload = payloads.instantiate(&jd.payload.kind)?;

                // Artifact lookup touches the filesystem; keep it off the
                // async workers.
                let resolver = Arc::clone(resolver);
                let definition = jd.clone();
                let libraries = match tokio::task::spawn_blocking(move || {
                    resolver.resolve(&definition)
                })
                .await
                {
                    Ok(resolved) => resolved?,
                    Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                    Err(err) => return Err(ResolveError::Interrupted(err.to_string())),
                };

                let built = ExecutionContext::build(jd, libraries, payload)?;
                self.resolutions.fetch_add(1, Ordering::Relaxed);
                debug!(
                    application = %jd.application_name,
                    version = %jd.version,
                    "execution context built"
                );
                Ok::<_, ResolveError>(Arc::new(built))
            })
            .await?;
        Ok(Arc::clone(context))
    }

    /// Number of contexts built so far.
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::Relaxed)
    }

    /// Number of contexts currently cached.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
