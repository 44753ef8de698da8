use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::Semaphore;

use jobengine::exec::{JobContext, Payload, PayloadFuture};
use jobengine::types::JobInstanceId;

/// Shared record of what scripted payloads did.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    started: Arc<Mutex<Vec<JobInstanceId>>>,
    finished: Arc<Mutex<Vec<JobInstanceId>>>,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> Vec<JobInstanceId> {
        self.started.lock().unwrap().clone()
    }

    /// Payloads that returned on their own (not dropped by a kill).
    pub fn finished(&self) -> Vec<JobInstanceId> {
        self.finished.lock().unwrap().clone()
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest number of payloads observed running at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self, id: JobInstanceId) -> Running {
        self.started.lock().unwrap().push(id);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Running {
            recorder: self.clone(),
        }
    }
}

/// Decrements the running count even when the payload future is dropped.
struct Running {
    recorder: Recorder,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.recorder.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Lets gated payloads through one at a time or all at once.
#[derive(Debug, Clone)]
pub struct Gate {
    permits: Arc<Semaphore>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn open_one(&self) {
        self.permits.add_permits(1);
    }

    pub fn open_all(&self) {
        self.permits.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    async fn pass(&self) {
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

#[derive(Debug, Clone)]
pub enum Behaviour {
    Succeed,
    Fail(String),
    Panic(String),
    Sleep(Duration),
    /// Wait for the gate, then succeed.
    Gated(Gate),
    /// Never return, ignoring the cancellation token.
    Hang,
    /// Return an error as soon as the cancellation token fires.
    Cooperative,
    /// Report each progress value, then succeed.
    Progress(Vec<i32>),
}

/// A builtin payload whose behaviour is fixed by the test.
#[derive(Debug, Clone)]
pub struct ScriptedPayload {
    behaviour: Behaviour,
    recorder: Recorder,
}

impl ScriptedPayload {
    pub fn new(behaviour: Behaviour, recorder: &Recorder) -> Self {
        Self {
            behaviour,
            recorder: recorder.clone(),
        }
    }
}

impl Payload for ScriptedPayload {
    fn run(&self, ctx: JobContext) -> PayloadFuture {
        let behaviour = self.behaviour.clone();
        let recorder = self.recorder.clone();
        Box::pin(async move {
            let id = ctx.id();
            let _running = recorder.enter(id);
            match behaviour {
                Behaviour::Succeed => {}
                Behaviour::Fail(msg) => return Err(anyhow!(msg)),
                Behaviour::Panic(msg) => panic!("{msg}"),
                Behaviour::Sleep(d) => tokio::time::sleep(d).await,
                Behaviour::Gated(gate) => gate.pass().await,
                Behaviour::Hang => std::future::pending::<()>().await,
                Behaviour::Cooperative => {
                    ctx.cancel.cancelled().await;
                    return Err(anyhow!("stopped on request"));
                }
                Behaviour::Progress(values) => {
                    for p in values {
                        ctx.report_progress(p).await;
                    }
                }
            }
            recorder.finished.lock().unwrap().push(id);
            Ok(())
        })
    }
}
