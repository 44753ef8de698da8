// src/exec/context.rs

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::exec::payload::Payload;
use crate::exec::resolver::ResolveError;
use crate::store::JobDefinition;
use crate::types::JobDefId;

/// Environment variable listing a definition's resolved libraries, joined
/// with the platform path separator.
pub const LIBRARY_PATH_VAR: &str = "JOBENGINE_LIBRARY_PATH";

/// Isolated execution environment for one job definition version. Built once
/// and shared by every instance of that version.
#[derive(Clone)]
pub struct ExecutionContext {
    pub job_def: JobDefId,
    pub version: String,
    pub libraries: Vec<PathBuf>,
    pub env: Vec<(String, String)>,
    payload: Arc<dyn Payload>,
}

impl ExecutionContext {
    pub fn build(
        jd: &JobDefinition,
        libraries: Vec<PathBuf>,
        payload: Arc<dyn Payload>,
    ) -> Result<Self, ResolveError> {
        let mut env_vars = Vec::new();
        if !libraries.is_empty() {
            let joined = env::join_paths(&libraries)
                .map_err(|e| ResolveError::InvalidPath(e.to_string()))?;
            env_vars.push((
                LIBRARY_PATH_VAR.to_string(),
                joined.to_string_lossy().into_owned(),
            ));
        }
        Ok(Self {
            job_def: jd.id,
            version: jd.version.clone(),
            libraries,
            env: env_vars,
            payload,
        })
    }

    pub fn payload(&self) -> Arc<dyn Payload> {
        Arc::clone(&self.payload)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("job_def", &self.job_def)
            .field("version", &self.version)
            .field("libraries", &self.libraries)
            .finish_non_exhaustive()
    }
}
