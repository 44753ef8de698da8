mod common;
use crate::common::{TestCluster, TestResult, eventually, fast_settings, init_tracing, scripted, with_timeout};

use std::time::{Duration, Instant};

use chrono::Utc;
use jobengine::config::EngineSettings;
use jobengine::engine::runtime::RESTART_CAUSE;
use jobengine::engine::{Engine, EngineState};
use jobengine::errors::EngineError;
use jobengine::store::JobStore;
use jobengine::types::JobState;
use jobengine_test_utils::fake_payload::{Behaviour, Gate, Recorder};

fn with_grace(grace: Duration) -> EngineSettings {
    EngineSettings {
        grace_period: grace,
        ..fast_settings()
    }
}

#[tokio::test]
async fn lifecycle_states_are_observable() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1).with_node("n1", &["q"]);
    let mut engine = cluster.engine("n1", Default::default());
    let mut states = engine.subscribe();

    assert_eq!(engine.state(), EngineState::Stopped);
    engine.start().await?;
    assert_eq!(engine.state(), EngineState::Running);
    assert_eq!(*states.borrow_and_update(), EngineState::Running);

    engine.stop().await?;
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(states.has_changed()?);
    Ok(())
}

#[tokio::test]
async fn start_and_stop_reject_wrong_state() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1).with_node("n1", &["q"]);
    let mut engine = cluster.engine("n1", Default::default());

    assert!(matches!(
        engine.stop().await,
        Err(EngineError::InvalidState { actual: "STOPPED", .. })
    ));

    engine.start().await?;
    assert!(matches!(
        engine.start().await,
        Err(EngineError::InvalidState { expected: "STOPPED", actual: "RUNNING" })
    ));
    engine.stop().await?;
    Ok(())
}

#[tokio::test]
async fn unknown_node_is_fatal_and_leaves_engine_stopped() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1).with_node("n1", &["q"]);
    let mut engine = cluster.engine("ghost", Default::default());

    let err = engine.start().await.expect_err("unknown node must not start");
    assert!(matches!(err, EngineError::FatalStartup(ref msg) if msg.contains("ghost")));
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(engine.pool_stats().is_empty());
    Ok(())
}

#[tokio::test]
async fn unreachable_store_at_start_is_fatal() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1).with_node("n1", &["q"]);
    let mut engine = cluster.engine("n1", Default::default());

    cluster.store.set_available(false);
    let err = engine.start().await.expect_err("store is down");
    assert!(matches!(err, EngineError::FatalStartup(_)));
    assert_eq!(engine.state(), EngineState::Stopped);

    cluster.store.set_available(true);
    engine.start().await?;
    engine.stop().await?;
    Ok(())
}

#[tokio::test]
async fn stop_kills_instances_still_running_after_grace() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1).with_node("n1", &["q"]);
    cluster.builtin("stuck", "q", "stuck");

    let recorder = Recorder::new();
    let grace = Duration::from_millis(100);
    let mut engine = Engine::new("n1", cluster.dyn_store(), with_grace(grace))
        .with_payloads(scripted(&[("stuck", Behaviour::Hang)], &recorder));
    engine.start().await?;

    let id = cluster.enqueue("stuck").await;
    with_timeout(cluster.wait_for_state(id, JobState::Running)).await;

    let began = Instant::now();
    with_timeout(engine.stop()).await?;
    let took = began.elapsed();

    assert!(took >= grace, "stop returned after {took:?}, before the grace period");
    assert_eq!(engine.state(), EngineState::Stopped);

    let history = cluster.history(id).expect("history written before stop returns");
    assert_eq!(history.state, JobState::Killed);
    assert_eq!(history.cause.as_deref(), Some("interrupted by engine shutdown"));
    assert_eq!(recorder.current(), 0, "payload future dropped");
    Ok(())
}

#[tokio::test]
async fn stop_lets_instances_finish_within_grace() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1).with_node("n1", &["q"]);
    cluster.builtin("slow", "q", "slow");

    let recorder = Recorder::new();
    let gate = Gate::new();
    let mut engine = cluster.engine("n1", scripted(&[("slow", Behaviour::Gated(gate.clone()))], &recorder));
    engine.start().await?;

    let id = cluster.enqueue("slow").await;
    with_timeout(cluster.wait_for_state(id, JobState::Running)).await;

    let opener = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.open_all();
    });
    with_timeout(engine.stop()).await?;
    opener.await?;

    let history = cluster.history(id).expect("history");
    assert_eq!(history.state, JobState::Ended);
    assert_eq!(recorder.finished(), vec![id]);
    Ok(())
}

#[tokio::test]
async fn no_claims_after_stop() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1).with_node("n1", &["q"]);
    cluster.builtin("job", "q", "job");

    let recorder = Recorder::new();
    let mut engine = cluster.engine("n1", scripted(&[("job", Behaviour::Succeed)], &recorder));
    engine.start().await?;
    engine.stop().await?;

    let id = cluster.enqueue("job").await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(cluster.active(id).map(|ji| ji.state), Some(JobState::Submitted));
    assert!(recorder.started().is_empty());
    Ok(())
}

#[tokio::test]
async fn restart_recovers_instances_left_by_previous_run() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 2);
    let node = cluster.node("n1", &["q"]);
    cluster.builtin("job", "q", "job");
    let store = cluster.dyn_store();

    let orphan = cluster.enqueue("job").await;
    store.claim(orphan, node, Utc::now()).await?;
    store.start(orphan, node, Utc::now()).await?;

    let waiting = cluster.enqueue("job").await;
    store.claim(waiting, node, Utc::now()).await?;

    let recorder = Recorder::new();
    let mut engine = cluster.engine("n1", scripted(&[("job", Behaviour::Succeed)], &recorder));
    engine.start().await?;

    let crashed = cluster.history(orphan).expect("recovered during start");
    assert_eq!(crashed.state, JobState::Crashed);
    assert_eq!(crashed.cause.as_deref(), Some(RESTART_CAUSE));

    let resumed = with_timeout(cluster.wait_for_history(waiting)).await;
    engine.stop().await?;

    assert_eq!(resumed.state, JobState::Ended);
    assert_eq!(resumed.node, Some(node), "owner kept through recovery");
    assert_eq!(recorder.started(), vec![waiting]);
    Ok(())
}

#[tokio::test]
async fn store_outage_while_running_only_pauses_polling() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1).with_node("n1", &["q"]);
    cluster.builtin("job", "q", "job");

    let recorder = Recorder::new();
    let mut engine = cluster.engine("n1", scripted(&[("job", Behaviour::Succeed)], &recorder));
    engine.start().await?;

    cluster.store.set_available(false);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(engine.state(), EngineState::Running);
    cluster.store.set_available(true);

    let id = cluster.enqueue("job").await;
    let history = with_timeout(cluster.wait_for_history(id)).await;
    engine.stop().await?;

    assert_eq!(history.state, JobState::Ended);
    Ok(())
}

#[tokio::test]
async fn zero_kill_check_interval_is_refused_at_start() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1).with_node("n1", &["q"]);
    let settings = EngineSettings {
        kill_check_interval: Duration::ZERO,
        ..fast_settings()
    };
    let mut engine = Engine::new("n1", cluster.dyn_store(), settings);

    let err = engine.start().await.expect_err("zero interval");
    assert!(
        matches!(&err, EngineError::ConfigError(msg) if msg.contains("kill_check_interval")),
        "got {err:?}"
    );
    assert_eq!(engine.state(), EngineState::Stopped);
    Ok(())
}

#[tokio::test]
async fn dropping_a_started_engine_stops_admission() -> TestResult {
    init_tracing();
    let cluster = TestCluster::new().with_queue("q", 1);
    let node = cluster.node("n1", &["q"]);
    cluster.builtin("slow", "q", "slow");

    let first = cluster.enqueue("slow").await;
    let second = cluster.enqueue("slow").await;
    cluster.store.claim(first, node, Utc::now()).await?;
    cluster.store.claim(second, node, Utc::now()).await?;

    let recorder = Recorder::new();
    let gate = Gate::new();
    let mut engine = cluster.engine("n1", scripted(&[("slow", Behaviour::Gated(gate.clone()))], &recorder));
    // Recovery hands both to the pool: one runs, one waits for the slot.
    engine.start().await?;
    let running = with_timeout(eventually("one instance running", || {
        [first, second]
            .into_iter()
            .find(|id| cluster.active(*id).is_some_and(|ji| ji.state == JobState::Running))
    }))
    .await;
    let waiting = if running == first { second } else { first };

    drop(engine);
    gate.open_all();
    let history = with_timeout(cluster.wait_for_history(running)).await;
    assert_eq!(history.state, JobState::Ended);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.started(), vec![running]);
    assert_eq!(cluster.active(waiting).map(|ji| ji.state), Some(JobState::Attributed));
    Ok(())
}
