mod common;
use crate::common::{TestCluster, TestResult, init_tracing, scripted, with_timeout};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use jobengine::engine::highlander;
use jobengine::store::JobStore;
use jobengine::types::{JobDefId, JobState};
use jobengine_test_utils::fake_payload::{Behaviour, Recorder};

fn claimed_count(cluster: &TestCluster, def: JobDefId) -> usize {
    cluster
        .store
        .active_instances()
        .expect("active")
        .iter()
        .filter(|ji| ji.job_def == def && ji.state.is_claimed())
        .count()
}

#[tokio::test]
async fn two_nodes_never_hold_exclusive_instances_at_once() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new()
        .with_queue("batch", 4)
        .with_node("node-a", &["batch"])
        .with_node("node-b", &["batch"]);
    let sync = cluster.exclusive_builtin("sync", "batch", "sync");

    let recorder = Recorder::new();
    let entries = [("sync", Behaviour::Sleep(Duration::from_millis(15)))];
    let mut engine_a = cluster.engine("node-a", scripted(&entries, &recorder));
    let mut engine_b = cluster.engine("node-b", scripted(&entries, &recorder));

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(cluster.enqueue("sync").await);
    }

    let done = Arc::new(AtomicBool::new(false));
    let max_claimed = Arc::new(AtomicUsize::new(0));
    let monitor = {
        let cluster = cluster.clone();
        let done = Arc::clone(&done);
        let max_claimed = Arc::clone(&max_claimed);
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                max_claimed.fetch_max(claimed_count(&cluster, sync), Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    engine_a.start().await?;
    engine_b.start().await?;

    let histories = with_timeout(async {
        let mut out = Vec::new();
        for id in &ids {
            out.push(cluster.wait_for_history(*id).await);
        }
        out
    })
    .await;

    done.store(true, Ordering::SeqCst);
    monitor.await?;
    engine_a.stop().await?;
    engine_b.stop().await?;

    assert!(max_claimed.load(Ordering::SeqCst) <= 1);
    assert_eq!(recorder.peak(), 1);
    assert!(histories.iter().all(|h| h.state == JobState::Ended && h.exclusive));

    let mut intervals: Vec<_> = histories
        .iter()
        .map(|h| (h.started_at.expect("started"), h.ended_at))
        .collect();
    intervals.sort();
    for pair in intervals.windows(2) {
        assert!(pair[1].0 >= pair[0].1, "exclusive runs overlapped");
    }
    Ok(())
}

#[tokio::test]
async fn pending_rivals_run_in_queue_order() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 4).with_node("n1", &["q"]);
    cluster.exclusive_builtin("sync", "q", "sync");
    cluster.builtin("free", "q", "free");

    let recorder = Recorder::new();
    let payloads = scripted(
        &[
            ("sync", Behaviour::Sleep(Duration::from_millis(10))),
            ("free", Behaviour::Succeed),
        ],
        &recorder,
    );

    let first = cluster.enqueue("sync").await;
    let second = cluster.enqueue("sync").await;
    let other = cluster.enqueue("free").await;

    let mut engine = cluster.engine("n1", payloads);
    engine.start().await?;
    with_timeout(async {
        for id in [first, second, other] {
            assert_eq!(cluster.wait_for_history(id).await.state, JobState::Ended);
        }
    })
    .await;
    engine.stop().await?;

    let started = recorder.started();
    let pos = |id| started.iter().position(|s| *s == id).expect("started");
    assert!(pos(first) < pos(second));
    Ok(())
}

#[tokio::test]
async fn guard_blocks_on_claimed_or_earlier_pending_rival() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 4);
    let node = cluster.node("n1", &["q"]);
    cluster.exclusive_builtin("sync", "q", "sync");
    let store = cluster.dyn_store();

    let first = cluster.enqueue("sync").await;
    let second = cluster.enqueue("sync").await;

    let first_row = store.instance(first).await?.expect("first");
    let second_row = store.instance(second).await?.expect("second");

    assert!(highlander::may_claim(store.as_ref(), &first_row).await?);
    let blocker = highlander::blocking_rival(store.as_ref(), &second_row).await?;
    assert_eq!(blocker.map(|r| r.id), Some(first), "earlier pending rival blocks");

    store.claim(first, node, Utc::now()).await?;
    let blocker = highlander::blocking_rival(store.as_ref(), &second_row).await?;
    assert_eq!(blocker.map(|r| (r.id, r.state)), Some((first, JobState::Attributed)));

    // Attributed rival blocks every later submission too.
    let third = cluster.enqueue("sync").await;
    let third_row = store.instance(third).await?.expect("third");
    assert!(!highlander::may_claim(store.as_ref(), &third_row).await?);
    Ok(())
}

#[tokio::test]
async fn start_conflict_crashes_the_second_instance() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 4);
    let elsewhere = cluster.node("elsewhere", &[]);
    let here = cluster.node("here", &["q"]);
    cluster.exclusive_builtin("sync", "q", "sync");
    let store = cluster.dyn_store();

    // Bypass the guard: both instances end up claimed.
    let running = cluster.enqueue("sync").await;
    let late = cluster.enqueue("sync").await;
    store.claim(running, elsewhere, Utc::now()).await?;
    store.start(running, elsewhere, Utc::now()).await?;
    store.claim(late, here, Utc::now()).await?;

    let recorder = Recorder::new();
    let mut engine = cluster.engine("here", scripted(&[("sync", Behaviour::Succeed)], &recorder));
    engine.start().await?;

    let history = with_timeout(cluster.wait_for_history(late)).await;
    engine.stop().await?;

    assert_eq!(history.state, JobState::Crashed);
    assert!(
        history
            .cause
            .as_deref()
            .unwrap_or_default()
            .contains("exclusivity conflict")
    );
    assert!(recorder.started().is_empty(), "conflicting payload never ran");
    assert_eq!(
        cluster.active(running).map(|ji| ji.state),
        Some(JobState::Running),
        "the running instance is untouched"
    );
    Ok(())
}
