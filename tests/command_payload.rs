#![cfg(unix)]

mod common;
use crate::common::{TestCluster, TestResult, init_tracing, with_timeout};

use jobengine::exec::PayloadRegistry;
use jobengine::store::{History, NewJobDefinition, PayloadKind};
use jobengine::types::JobState;

fn command(cluster: &TestCluster, application: &str, cmd: &str) {
    cluster.define(NewJobDefinition::new(
        application,
        cluster.queue_id("q"),
        PayloadKind::Command {
            cmd: cmd.to_string(),
        },
    ));
}

async fn run_to_history(cluster: &TestCluster, application: &str) -> Result<History, Box<dyn std::error::Error>> {
    let mut engine = cluster.engine("n1", PayloadRegistry::new());
    engine.start().await?;
    let id = cluster.enqueue(application).await;
    let history = with_timeout(cluster.wait_for_history(id)).await;
    engine.stop().await?;
    Ok(history)
}

fn cluster() -> TestCluster {
    TestCluster::new().with_queue("q", 2).with_node("n1", &["q"])
}

#[tokio::test]
async fn successful_command_ends() -> TestResult {
    init_tracing();
    let cluster = cluster();
    command(&cluster, "ok", "true");

    let history = run_to_history(&cluster, "ok").await?;
    assert_eq!(history.state, JobState::Ended, "cause: {:?}", history.cause);
    assert_eq!(history.exit_code, None);
    Ok(())
}

#[tokio::test]
async fn non_zero_exit_crashes_with_the_code() -> TestResult {
    init_tracing();
    let cluster = cluster();
    command(&cluster, "broken", "exit 3");

    let history = run_to_history(&cluster, "broken").await?;
    assert_eq!(history.state, JobState::Crashed);
    assert_eq!(history.cause.as_deref(), Some("process exited with code 3"));
    assert_eq!(history.exit_code, Some(3));
    Ok(())
}

#[tokio::test]
async fn command_sees_instance_environment() -> TestResult {
    init_tracing();
    let cluster = cluster();
    command(
        &cluster,
        "env-check",
        r#"test "$JOBENGINE_APPLICATION" = "env-check" && test -n "$JOBENGINE_JOB_ID""#,
    );

    let history = run_to_history(&cluster, "env-check").await?;
    assert_eq!(history.state, JobState::Ended, "cause: {:?}", history.cause);
    Ok(())
}

#[tokio::test]
async fn progress_lines_update_the_instance() -> TestResult {
    init_tracing();
    let cluster = cluster();
    command(&cluster, "chatty", "echo 'progress: 40%'; sleep 0.3");

    let history = run_to_history(&cluster, "chatty").await?;
    assert_eq!(history.state, JobState::Ended, "cause: {:?}", history.cause);
    assert_eq!(history.progress, Some(40));
    Ok(())
}

#[tokio::test]
async fn killed_command_process_is_reported_killed() -> TestResult {
    init_tracing();
    let cluster = cluster();
    command(&cluster, "slow", "sleep 30");

    let mut engine = cluster.engine("n1", PayloadRegistry::new());
    engine.start().await?;
    let id = cluster.enqueue("slow").await;
    with_timeout(cluster.wait_for_state(id, JobState::Running)).await;
    engine.kill(id).await?;

    let history = with_timeout(cluster.wait_for_history(id)).await;
    engine.stop().await?;

    assert_eq!(history.state, JobState::Killed);
    assert_eq!(history.cause.as_deref(), Some("kill requested"));
    assert_eq!(history.exit_code, None, "a killed process has no exit code");
    Ok(())
}
