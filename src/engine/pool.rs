// src/engine/pool.rs

//! Worker pool: bounded execution slots for one queue on one node.
//!
//! - `submit` pushes a claimed instance onto an unbounded local queue and
//!   returns at once.
//! - A dispatcher task takes instances off that queue in order, acquires a
//!   semaphore permit for each and spawns a loader that holds the permit.
//! - The permit is released by drop, so every exit path of the loader frees
//!   its slot.
//!
//! Running and waiting counts are published on a `watch` channel so callers
//! can wait for the pool to drain.

use std::sync::{Arc, Mutex};

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::loader;
use crate::engine::node::NodeContext;
use crate::store::{JobInstance, Queue};

/// Instances holding a slot and instances queued for one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolLoad {
    pub running: usize,
    pub waiting: usize,
}

/// Snapshot reported by [`crate::engine::Engine::pool_stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub queue: String,
    pub capacity: usize,
    pub running: usize,
    pub waiting: usize,
}

#[derive(Debug)]
pub struct WorkerPool {
    queue: Queue,
    tx: mpsc::UnboundedSender<JobInstance>,
    load: Arc<watch::Sender<PoolLoad>>,
    admission: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// A held execution slot.
struct Slot {
    _permit: tokio::sync::OwnedSemaphorePermit,
    load: Arc<watch::Sender<PoolLoad>>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.load
            .send_modify(|l| l.running = l.running.saturating_sub(1));
    }
}

impl WorkerPool {
    /// Create the pool and spawn its dispatcher.
    pub fn spawn(queue: Queue, ctx: Arc<NodeContext>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (load, _) = watch::channel(PoolLoad::default());
        let load = Arc::new(load);
        let admission = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(queue.concurrency));

        let handle = tokio::spawn(dispatch(
            ctx,
            queue.name.clone(),
            rx,
            semaphore,
            Arc::clone(&load),
            admission.clone(),
        ));

        Arc::new(Self {
            queue,
            tx,
            load,
            admission,
            dispatcher: Mutex::new(Some(handle)),
        })
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn capacity(&self) -> usize {
        self.queue.concurrency
    }

    pub fn load(&self) -> PoolLoad {
        *self.load.borrow()
    }

    pub fn running(&self) -> usize {
        self.load().running
    }

    pub fn waiting(&self) -> usize {
        self.load().waiting
    }

    pub fn free_slots(&self) -> usize {
        let load = self.load();
        self.capacity()
            .saturating_sub(load.running + load.waiting)
    }

    pub fn stats(&self) -> PoolStats {
        let load = self.load();
        PoolStats {
            queue: self.queue.name.clone(),
            capacity: self.capacity(),
            running: load.running,
            waiting: load.waiting,
        }
    }

    /// Queue a claimed instance for execution. Returns false if the pool no
    /// longer admits work; the instance then stays claimed in the store.
    pub fn submit(&self, instance: JobInstance) -> bool {
        if self.admission.is_cancelled() {
            warn!(queue = %self.queue.name, job_id = %instance.id, "pool closed; instance left attributed");
            return false;
        }
        let id = instance.id;
        self.load.send_modify(|l| l.waiting += 1);
        if self.tx.send(instance).is_err() {
            self.load
                .send_modify(|l| l.waiting = l.waiting.saturating_sub(1));
            warn!(queue = %self.queue.name, job_id = %id, "dispatcher gone; instance left attributed");
            return false;
        }
        debug!(queue = %self.queue.name, job_id = %id, "instance queued for a slot");
        true
    }

    /// Resolve once no instance holds a slot.
    pub async fn wait_no_running(&self) {
        let mut rx = self.load.subscribe();
        let _ = rx.wait_for(|l| l.running == 0).await;
    }

    /// Resolve once nothing is running or waiting.
    pub async fn wait_idle(&self) {
        let mut rx = self.load.subscribe();
        let _ = rx.wait_for(|l| l.running == 0 && l.waiting == 0).await;
    }

    /// Stop admission. Instances still waiting are not started.
    pub fn close(&self) {
        self.admission.cancel();
    }

    /// Stop admission and wait for the dispatcher to exit. Loaders already
    /// holding a slot keep running.
    pub async fn shutdown(&self) {
        self.close();
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn dispatch(
    ctx: Arc<NodeContext>,
    queue: String,
    mut rx: mpsc::UnboundedReceiver<JobInstance>,
    semaphore: Arc<Semaphore>,
    load: Arc<watch::Sender<PoolLoad>>,
    admission: CancellationToken,
) {
    debug!(queue = %queue, "dispatcher started");

    loop {
        let instance = tokio::select! {
            biased;
            _ = admission.cancelled() => break,
            next = rx.recv() => match next {
                Some(instance) => instance,
                None => break,
            },
        };

        let permit = tokio::select! {
            biased;
            _ = admission.cancelled() => {
                debug!(queue = %queue, job_id = %instance.id, "admission closed; instance left attributed");
                load.send_modify(|l| l.waiting = l.waiting.saturating_sub(1));
                break;
            }
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        load.send_modify(|l| {
            l.waiting = l.waiting.saturating_sub(1);
            l.running += 1;
        });
        let slot = Slot {
            _permit: permit,
            load: Arc::clone(&load),
        };

        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let _slot = slot;
            // Failures are logged by the loader and the history writer.
            let _ = loader::run(&ctx, instance).await;
        });
    }

    rx.close();
    let mut left = 0usize;
    while let Ok(instance) = rx.try_recv() {
        debug!(queue = %queue, job_id = %instance.id, "admission closed; instance left attributed");
        left += 1;
    }
    if left > 0 {
        load.send_modify(|l| l.waiting = l.waiting.saturating_sub(left));
        info!(queue = %queue, left, "queued instances left attributed for restart recovery");
    }
    debug!(queue = %queue, "dispatcher finished");
}
