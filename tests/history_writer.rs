mod common;
use crate::common::{TestCluster, TestResult, eventually, fast_settings, init_tracing, scripted, with_timeout};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jobengine::engine::{Engine, RetryPolicy, history};
use jobengine::errors::EngineError;
use jobengine::store::{JobStore, StoreError};
use jobengine::types::{JobInstanceId, JobState, Outcome};
use jobengine_test_utils::fake_payload::{Behaviour, Recorder};
use jobengine_test_utils::flaky_store::FlakyStore;

#[tokio::test]
async fn transient_failures_are_retried_until_history_lands() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1).with_node("n1", &["q"]);
    cluster.builtin("job", "q", "job");

    let flaky = Arc::new(FlakyStore::new(Arc::clone(&cluster.store)));
    flaky.fail_finalize(2);

    let recorder = Recorder::new();
    let mut engine = Engine::new("n1", Arc::clone(&flaky) as Arc<dyn JobStore>, fast_settings())
        .with_payloads(scripted(&[("job", Behaviour::Succeed)], &recorder));
    engine.start().await?;

    let id = cluster.enqueue("job").await;
    let history = with_timeout(cluster.wait_for_history(id)).await;
    engine.stop().await?;

    assert_eq!(history.state, JobState::Ended);
    assert_eq!(flaky.finalize_calls(), 3);
    assert!(cluster.active(id).is_none());
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_raise_history_write_failed() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1);
    let node = cluster.node("n1", &["q"]);
    cluster.builtin("job", "q", "job");

    let flaky = Arc::new(FlakyStore::new(Arc::clone(&cluster.store)));
    let ctx = cluster.node_context(
        node,
        "n1",
        Arc::clone(&flaky) as Arc<dyn JobStore>,
        Default::default(),
    );

    let id = cluster.enqueue("job").await;
    cluster.store.claim(id, node, Utc::now()).await?;
    flaky.fail_finalize(100);

    let err = history::write(&ctx, id, &Outcome::Ended)
        .await
        .expect_err("store never comes back");

    let attempts = fast_settings().history_write_attempts;
    match err {
        EngineError::HistoryWriteFailed { id: failed, attempts: made, source } => {
            assert_eq!(failed, id);
            assert_eq!(made, attempts);
            assert!(source.is_transient());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(flaky.finalize_calls(), attempts);
    assert_eq!(
        cluster.active(id).map(|ji| ji.state),
        Some(JobState::Attributed),
        "nothing half-written"
    );
    assert!(cluster.history(id).is_none());
    Ok(())
}

#[tokio::test]
async fn permanent_failures_are_not_retried() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1);
    let node = cluster.node("n1", &["q"]);
    let ctx = cluster.node_context(node, "n1", cluster.dyn_store(), Default::default());

    let err = history::write(&ctx, JobInstanceId(999), &Outcome::Ended)
        .await
        .expect_err("no such instance");
    assert!(matches!(
        err,
        EngineError::HistoryWriteFailed { attempts: 1, source: StoreError::NotFound(_), .. }
    ));
    Ok(())
}

#[tokio::test]
async fn failed_history_write_still_frees_the_slot() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1).with_node("n1", &["q"]);
    cluster.builtin("job", "q", "job");

    let flaky = Arc::new(FlakyStore::new(Arc::clone(&cluster.store)));
    flaky.fail_finalize(u32::MAX);

    let recorder = Recorder::new();
    let mut engine = Engine::new("n1", Arc::clone(&flaky) as Arc<dyn JobStore>, fast_settings())
        .with_payloads(scripted(&[("job", Behaviour::Succeed)], &recorder));
    engine.start().await?;

    let id = cluster.enqueue("job").await;
    let attempts = fast_settings().history_write_attempts;
    with_timeout(eventually("retries exhausted and slot freed", || {
        (flaky.finalize_calls() >= attempts
            && engine.pool_stats().iter().all(|s| s.running == 0))
        .then_some(())
    }))
    .await;
    engine.stop().await?;

    assert_eq!(recorder.finished(), vec![id]);
    assert_eq!(cluster.active(id).map(|ji| ji.state), Some(JobState::Running));
    assert!(cluster.history(id).is_none());
    Ok(())
}

#[tokio::test]
async fn retry_policy_doubles_its_backoff() {
    init_tracing();
    let policy = RetryPolicy {
        attempts: 3,
        backoff: Duration::from_millis(20),
    };
    let began = tokio::time::Instant::now();
    let mut calls = 0u32;
    let result: Result<(), _> = policy
        .run("always down", || {
            calls += 1;
            async { Err(StoreError::Unavailable("down".to_string())) }
        })
        .await;

    let exhausted = result.expect_err("never succeeds");
    assert_eq!(exhausted.attempts, 3);
    assert_eq!(calls, 3);
    assert!(began.elapsed() >= Duration::from_millis(60), "20ms + 40ms of backoff");
}
