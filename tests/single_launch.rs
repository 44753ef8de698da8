mod common;
use crate::common::{TestCluster, TestResult, init_tracing, scripted, with_timeout};

use chrono::Utc;
use jobengine::errors::EngineError;
use jobengine::store::{JobStore, StoreError};
use jobengine::types::JobState;
use jobengine_test_utils::fake_payload::{Behaviour, Recorder};

#[tokio::test]
async fn runs_one_instance_inline_and_reports_status() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1).with_node("n1", &["q"]);
    cluster.builtin("job", "q", "job");
    let id = cluster.enqueue("job").await;

    let recorder = Recorder::new();
    let engine = cluster.engine("n1", scripted(&[("job", Behaviour::Progress(vec![50, 100]))], &recorder));
    let status = with_timeout(engine.run_single(id)).await?;

    assert_eq!(status.id, id);
    assert_eq!(status.state, JobState::Ended);
    assert_eq!(status.progress, Some(100));
    assert!(status.ended_at.is_some());
    assert_eq!(recorder.finished(), vec![id]);
    assert!(cluster.active(id).is_none());
    Ok(())
}

#[tokio::test]
async fn failing_payload_reports_crash() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1).with_node("n1", &["q"]);
    cluster.builtin("job", "q", "job");
    let id = cluster.enqueue("job").await;

    let recorder = Recorder::new();
    let engine = cluster.engine("n1", scripted(&[("job", Behaviour::Fail("disk full".into()))], &recorder));
    let status = with_timeout(engine.run_single(id)).await?;

    assert_eq!(status.state, JobState::Crashed);
    assert!(status.cause.unwrap_or_default().contains("disk full"));
    Ok(())
}

#[tokio::test]
async fn refused_while_engine_is_running() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new()
        .with_queue("q", 1)
        .with_queue("unserved", 1)
        .with_node("n1", &["q"]);
    cluster.builtin("job", "unserved", "job");

    let recorder = Recorder::new();
    let mut engine = cluster.engine("n1", scripted(&[("job", Behaviour::Succeed)], &recorder));
    engine.start().await?;
    let id = cluster.enqueue("job").await;

    let err = engine.run_single(id).await.expect_err("engine is running");
    assert!(matches!(err, EngineError::InvalidState { .. }), "got {err:?}");
    assert_eq!(cluster.active(id).map(|ji| ji.state), Some(JobState::Submitted));

    engine.stop().await?;
    Ok(())
}

#[tokio::test]
async fn already_claimed_instance_is_a_conflict() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1).with_node("n1", &["q"]);
    let other = cluster.node("n2", &["q"]);
    cluster.builtin("job", "q", "job");
    let id = cluster.enqueue("job").await;
    cluster.store.claim(id, other, Utc::now()).await?;

    let recorder = Recorder::new();
    let engine = cluster.engine("n1", scripted(&[("job", Behaviour::Succeed)], &recorder));
    let err = engine.run_single(id).await.expect_err("claimed by n2");

    assert!(
        matches!(err, EngineError::Store(StoreError::ClaimConflict(c)) if c == id),
        "got {err:?}"
    );
    assert!(recorder.started().is_empty());
    assert_eq!(cluster.active(id).and_then(|ji| ji.node), Some(other));
    Ok(())
}

#[tokio::test]
async fn exclusive_instance_waits_for_a_claimed_rival() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1).with_node("n1", &["q"]);
    let other = cluster.node("n2", &["q"]);
    cluster.exclusive_builtin("sync", "q", "sync");
    let first = cluster.enqueue("sync").await;
    let second = cluster.enqueue("sync").await;
    cluster.store.claim(first, other, Utc::now()).await?;

    let recorder = Recorder::new();
    let engine = cluster.engine("n1", scripted(&[("sync", Behaviour::Succeed)], &recorder));
    let err = engine.run_single(second).await.expect_err("rival is attributed");

    assert!(
        matches!(
            &err,
            EngineError::Store(StoreError::ExclusivityConflict { id, rival }) if *id == second && *rival == first
        ),
        "got {err:?}"
    );
    assert!(recorder.started().is_empty());
    assert_eq!(cluster.active(second).map(|ji| ji.state), Some(JobState::Submitted));
    assert_eq!(cluster.active(first).map(|ji| ji.state), Some(JobState::Attributed));
    Ok(())
}

#[tokio::test]
async fn exclusive_instance_runs_once_rivals_are_gone() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1).with_node("n1", &["q"]);
    cluster.exclusive_builtin("sync", "q", "sync");
    let first = cluster.enqueue("sync").await;
    let second = cluster.enqueue("sync").await;

    let recorder = Recorder::new();
    let engine = cluster.engine("n1", scripted(&[("sync", Behaviour::Succeed)], &recorder));

    // `second` is behind `first` in queue order.
    assert!(engine.run_single(second).await.is_err());
    assert_eq!(with_timeout(engine.run_single(first)).await?.state, JobState::Ended);
    assert_eq!(with_timeout(engine.run_single(second)).await?.state, JobState::Ended);
    assert_eq!(recorder.finished(), vec![first, second]);
    Ok(())
}
