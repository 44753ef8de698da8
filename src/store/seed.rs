// src/store/seed.rs

//! Populate a [`MemoryStore`] from the configuration file.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::config::ConfigFile;
use crate::store::model::{Keywords, NewJobDefinition, PayloadSpec};
use crate::store::{MemoryStore, StoreError, StoreResult};
use crate::types::QueueId;

/// Create every queue, node, assignment and job definition of `cfg`.
pub fn seed_memory_store(store: &MemoryStore, cfg: &ConfigFile) -> StoreResult<()> {
    let mut queues: HashMap<&str, QueueId> = HashMap::new();
    for q in &cfg.queues {
        let id = store.add_queue(q.name.clone(), q.concurrency, q.default)?;
        debug!(queue = %q.name, id = %id, concurrency = q.concurrency, "queue created");
        queues.insert(q.name.as_str(), id);
    }
    let default_queue = cfg
        .queues
        .iter()
        .find(|q| q.default)
        .and_then(|q| queues.get(q.name.as_str()).copied());

    let lookup = |name: &str| {
        queues
            .get(name)
            .copied()
            .ok_or_else(|| StoreError::NotFound(format!("queue {name}")))
    };

    for node in &cfg.nodes {
        let node_id = store.add_node(node.name.clone())?;
        for a in &node.assignments {
            store.assign(node_id, lookup(&a.queue)?, a.poll_interval)?;
        }
    }

    for jd in &cfg.job_definitions {
        let queue = match &jd.queue {
            Some(name) => lookup(name)?,
            None => default_queue.ok_or_else(|| StoreError::NotFound("default queue".to_string()))?,
        };
        let [keyword1, keyword2, keyword3] = jd.keywords.clone();
        store.add_job_definition(NewJobDefinition {
            application_name: jd.application_name.clone(),
            version: jd.version.clone().unwrap_or_else(|| "1".to_string()),
            queue,
            priority: jd.priority,
            exclusive: jd.exclusive,
            tags: Keywords {
                application: jd.application.clone(),
                module: jd.module.clone(),
                keyword1,
                keyword2,
                keyword3,
            },
            payload: PayloadSpec {
                kind: jd.payload.clone(),
                libraries: jd.libraries.clone(),
            },
        })?;
    }

    info!(
        queues = cfg.queues.len(),
        nodes = cfg.nodes.len(),
        job_definitions = cfg.job_definitions.len(),
        "in-memory store seeded from config"
    );
    Ok(())
}
