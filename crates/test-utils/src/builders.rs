#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jobengine::config::EngineSettings;
use jobengine::engine::{Engine, KillRegistry, NodeContext};
use jobengine::exec::{FsArtifactResolver, PayloadCache, PayloadRegistry};
use jobengine::fs::MockFileSystem;
use jobengine::store::{
    EnqueueRequest, History, JobInstance, JobStore, MemoryStore, NewJobDefinition, Node,
    PayloadKind,
};
use jobengine::types::{JobDefId, JobInstanceId, JobState, NodeId, QueueId};

use crate::eventually;

/// Engine settings scaled down for tests.
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        grace_period: Duration::from_secs(2),
        kill_check_interval: Duration::from_millis(10),
        history_write_attempts: 5,
        history_retry_backoff: Duration::from_millis(5),
        ..EngineSettings::default()
    }
}

pub const TEST_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A shared in-memory store plus name lookups, standing in for one cluster.
#[derive(Debug, Clone)]
pub struct TestCluster {
    pub store: Arc<MemoryStore>,
    queues: HashMap<String, QueueId>,
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl TestCluster {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            queues: HashMap::new(),
        }
    }

    pub fn dyn_store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store) as Arc<dyn JobStore>
    }

    /// Add a queue. The first queue becomes the default one.
    pub fn with_queue(mut self, name: &str, concurrency: usize) -> Self {
        let is_default = self.queues.is_empty();
        let id = self
            .store
            .add_queue(name, concurrency, is_default)
            .expect("add queue");
        self.queues.insert(name.to_string(), id);
        self
    }

    pub fn queue_id(&self, name: &str) -> QueueId {
        *self.queues.get(name).expect("unknown queue")
    }

    /// Add a node polling `queues` every [`TEST_POLL_INTERVAL`].
    pub fn with_node(self, name: &str, queues: &[&str]) -> Self {
        self.node(name, queues);
        self
    }

    pub fn node(&self, name: &str, queues: &[&str]) -> NodeId {
        let node = self.store.add_node(name).expect("add node");
        for q in queues {
            self.store
                .assign(node, self.queue_id(q), TEST_POLL_INTERVAL)
                .expect("assign queue");
        }
        node
    }

    pub fn builtin(&self, application: &str, queue: &str, payload: &str) -> JobDefId {
        self.define(NewJobDefinition::new(
            application,
            self.queue_id(queue),
            PayloadKind::Builtin {
                name: payload.to_string(),
            },
        ))
    }

    pub fn exclusive_builtin(&self, application: &str, queue: &str, payload: &str) -> JobDefId {
        self.define(
            NewJobDefinition::new(
                application,
                self.queue_id(queue),
                PayloadKind::Builtin {
                    name: payload.to_string(),
                },
            )
            .exclusive(true),
        )
    }

    pub fn define(&self, def: NewJobDefinition) -> JobDefId {
        self.store.add_job_definition(def).expect("add job definition")
    }

    pub async fn enqueue(&self, application: &str) -> JobInstanceId {
        self.store
            .enqueue(EnqueueRequest::new(application))
            .await
            .expect("enqueue")
    }

    pub async fn submit(&self, request: EnqueueRequest) -> JobInstanceId {
        self.store.enqueue(request).await.expect("enqueue")
    }

    /// Engine for `node` with test settings and the given builtins.
    pub fn engine(&self, node: &str, payloads: PayloadRegistry) -> Engine {
        Engine::new(node, self.dyn_store(), fast_settings()).with_payloads(payloads)
    }

    /// Shared context of a started node, for driving pollers, pools and the
    /// history writer without an [`Engine`]. Artifacts resolve against an
    /// empty mock filesystem.
    pub fn node_context(
        &self,
        node: NodeId,
        name: &str,
        store: Arc<dyn JobStore>,
        payloads: PayloadRegistry,
    ) -> Arc<NodeContext> {
        Arc::new(NodeContext {
            node: Node {
                id: node,
                name: name.to_string(),
            },
            store,
            settings: fast_settings(),
            payloads,
            resolver: Arc::new(FsArtifactResolver::with_fs("/artifacts", MockFileSystem::new())),
            cache: Arc::new(PayloadCache::new()),
            kills: KillRegistry::new(),
        })
    }

    pub fn history(&self, id: JobInstanceId) -> Option<History> {
        self.store
            .all_history()
            .expect("history")
            .into_iter()
            .find(|h| h.id == id)
    }

    pub fn active(&self, id: JobInstanceId) -> Option<JobInstance> {
        self.store
            .active_instances()
            .expect("active instances")
            .into_iter()
            .find(|ji| ji.id == id)
    }

    pub fn count_in_state(&self, state: JobState) -> usize {
        self.store
            .active_instances()
            .expect("active instances")
            .iter()
            .filter(|ji| ji.state == state)
            .count()
    }

    pub async fn wait_for_history(&self, id: JobInstanceId) -> History {
        eventually(&format!("history of {id}"), || self.history(id)).await
    }

    pub async fn wait_for_state(&self, id: JobInstanceId, state: JobState) -> JobInstance {
        eventually(&format!("{id} to be {state}"), || {
            self.active(id).filter(|ji| ji.state == state)
        })
        .await
    }
}
