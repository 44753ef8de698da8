// src/engine/node.rs

use std::fmt;
use std::sync::Arc;

use crate::config::EngineSettings;
use crate::engine::history::RetryPolicy;
use crate::engine::kill::KillRegistry;
use crate::exec::{ArtifactResolver, PayloadCache, PayloadRegistry};
use crate::store::{JobStore, Node};

/// Everything a poller, pool or loader of one started node shares.
pub struct NodeContext {
    pub node: Node,
    pub store: Arc<dyn JobStore>,
    pub settings: EngineSettings,
    pub payloads: PayloadRegistry,
    pub resolver: Arc<dyn ArtifactResolver>,
    pub cache: Arc<PayloadCache>,
    pub kills: KillRegistry,
}

impl NodeContext {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_settings(&self.settings)
    }
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("node", &self.node)
            .field("settings", &self.settings)
            .field("payloads", &self.payloads)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}
