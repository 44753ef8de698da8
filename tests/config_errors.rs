// tests/config_errors.rs

use std::io::Write;
use std::time::Duration;

use jobengine::config::{ConfigFile, load_and_validate, parse_duration, validate_config};
use jobengine::errors::EngineError;
use jobengine::logging::parse_level_str;
use jobengine::store::seed::seed_memory_store;
use jobengine::store::{MemoryStore, PayloadKind};
use tempfile::NamedTempFile;
use tracing::Level;

fn load(contents: &str) -> Result<ConfigFile, EngineError> {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    load_and_validate(file.path())
}

fn expect_config_error(contents: &str, needles: &[&str]) {
    match load(contents) {
        Err(EngineError::ConfigError(msg)) => {
            for needle in needles {
                assert!(msg.contains(needle), "{msg:?} should mention {needle:?}");
            }
        }
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

const VALID: &str = r#"
[engine]
node = "node1"
grace_period = "10s"
kill_check_interval = "250ms"
history_write_attempts = 3

[[queue]]
name = "batch"
concurrency = 4
default = true

[[queue]]
name = "urgent"

[[node]]
name = "node1"
assignment = [{ queue = "batch", poll_interval = "2s" }, { queue = "urgent" }]

[[job_definition]]
application_name = "report"
command = "generate-report --daily"
keyword1 = "finance"

[[job_definition]]
application_name = "reindex"
queue = "urgent"
builtin = "reindex"
exclusive = true
priority = 5
libraries = ["reindex/lib"]
"#;

#[test]
fn test_valid_config_loads_with_defaults_applied() {
    let cfg = load(VALID).expect("valid config");

    assert_eq!(cfg.node.as_deref(), Some("node1"));
    assert_eq!(cfg.engine.grace_period, Duration::from_secs(10));
    assert_eq!(cfg.engine.kill_check_interval, Duration::from_millis(250));
    assert_eq!(cfg.engine.history_write_attempts, 3);
    assert_eq!(cfg.engine.history_retry_backoff, Duration::from_millis(200));

    assert_eq!(cfg.queues[1].concurrency, 1, "concurrency defaults to 1");
    let assignments = &cfg.nodes[0].assignments;
    assert_eq!(assignments[0].poll_interval, Duration::from_secs(2));
    assert_eq!(assignments[1].poll_interval, Duration::from_secs(1));

    let reindex = &cfg.job_definitions[1];
    assert!(reindex.exclusive);
    assert_eq!(
        reindex.payload,
        PayloadKind::Builtin {
            name: "reindex".to_string()
        }
    );
}

#[test]
fn test_duplicate_queue_is_rejected() {
    expect_config_error(
        r#"
[[queue]]
name = "batch"

[[queue]]
name = "batch"
"#,
        &["batch", "twice"],
    );
}

#[test]
fn test_assignment_to_unknown_queue_is_rejected() {
    expect_config_error(
        r#"
[[queue]]
name = "batch"

[[node]]
name = "node1"
assignment = [{ queue = "nightly" }]
"#,
        &["node1", "unknown queue", "nightly"],
    );
}

#[test]
fn test_job_definition_needs_exactly_one_payload() {
    expect_config_error(
        r#"
[[queue]]
name = "batch"
default = true

[[job_definition]]
application_name = "both"
command = "true"
builtin = "noop"
"#,
        &["both", "exactly one"],
    );
    expect_config_error(
        r#"
[[queue]]
name = "batch"
default = true

[[job_definition]]
application_name = "neither"
"#,
        &["neither", "exactly one"],
    );
}

#[test]
fn test_job_definition_without_queue_needs_a_default() {
    expect_config_error(
        r#"
[[queue]]
name = "batch"

[[job_definition]]
application_name = "report"
command = "true"
"#,
        &["report", "default"],
    );
}

#[test]
fn test_bad_duration_names_the_field() {
    expect_config_error(
        r#"
[engine]
grace_period = "soon"

[[queue]]
name = "batch"
"#,
        &["grace_period"],
    );
}

#[test]
fn test_zero_history_attempts_is_rejected() {
    expect_config_error(
        r#"
[engine]
history_write_attempts = 0

[[queue]]
name = "batch"
"#,
        &["history_write_attempts"],
    );
}

#[test]
fn test_zero_kill_check_interval_is_rejected() {
    expect_config_error(
        r#"
[engine]
kill_check_interval = "0s"

[[queue]]
name = "batch"
"#,
        &["kill_check_interval", "> 0"],
    );
}

#[test]
fn test_zero_concurrency_is_rejected() {
    expect_config_error(
        r#"
[[queue]]
name = "batch"
concurrency = 0
"#,
        &["batch", "concurrency"],
    );
}

#[test]
fn test_malformed_toml_is_a_toml_error() {
    let result = load("[[queue]\nname = ");
    assert!(matches!(result, Err(EngineError::TomlError(_))), "got {result:?}");
}

#[test]
fn test_node_override_must_be_declared() {
    let mut cfg = load(VALID).expect("valid config");
    assert!(validate_config(&cfg).is_ok());

    cfg.node = Some("ghost".to_string());
    match validate_config(&cfg) {
        Err(EngineError::ConfigError(msg)) => assert!(msg.contains("ghost")),
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn test_parse_duration_units() {
    assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
    assert_eq!(parse_duration(" 5s "), Ok(Duration::from_secs(5)));
    assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
    assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
    assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
    assert!(parse_duration("ms").is_err());
    assert!(parse_duration("").is_err());
    assert!(parse_duration("10").is_err());
    assert!(parse_duration("3d").is_err());
}

#[test]
fn test_parse_level_str() {
    assert_eq!(parse_level_str("DEBUG"), Some(Level::DEBUG));
    assert_eq!(parse_level_str("warning"), Some(Level::WARN));
    assert_eq!(parse_level_str("loud"), None);
}

#[test]
fn test_seed_memory_store_from_config() {
    let cfg = load(VALID).expect("valid config");
    let store = MemoryStore::new();
    seed_memory_store(&store, &cfg).expect("seeded");

    let batch = store.queue_by_name("batch").unwrap().expect("batch queue");
    assert!(batch.is_default);
    assert_eq!(batch.concurrency, 4);

    let report = store
        .job_definition_by_name("report")
        .unwrap()
        .expect("report definition");
    assert_eq!(report.queue, batch.id, "falls back to the default queue");
    assert_eq!(report.tags.keyword1.as_deref(), Some("finance"));

    let reindex = store
        .job_definition_by_name("reindex")
        .unwrap()
        .expect("reindex definition");
    assert!(reindex.exclusive);
    assert_eq!(reindex.priority, 5);
    assert_eq!(reindex.payload.libraries.len(), 1);
}
