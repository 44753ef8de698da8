// src/engine/kill.rs

//! Per-instance kill tokens for the instances running on this node.
//!
//! Every token is a child of one root token, so firing the root (forced
//! shutdown) also cancels tokens registered afterwards.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::types::JobInstanceId;

#[derive(Debug, Default)]
pub struct KillRegistry {
    root: CancellationToken,
    tokens: Mutex<HashMap<JobInstanceId, CancellationToken>>,
}

/// Keeps an instance's token registered; unregisters on drop.
#[derive(Debug)]
pub struct KillGuard<'a> {
    registry: &'a KillRegistry,
    id: JobInstanceId,
    token: CancellationToken,
}

impl KillGuard<'_> {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for KillGuard<'_> {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

impl KillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobInstanceId, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, id: JobInstanceId) -> KillGuard<'_> {
        let token = self.root.child_token();
        self.lock().insert(id, token.clone());
        KillGuard {
            registry: self,
            id,
            token,
        }
    }

    /// Fire the token of `id`. Returns false if it does not run here.
    pub fn kill(&self, id: JobInstanceId) -> bool {
        match self.lock().get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn kill_all(&self) {
        self.root.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }
}
