// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::store::PayloadKind;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [engine]
/// node = "node1"
/// grace_period = "30s"
///
/// [[queue]]
/// name = "batch"
/// concurrency = 4
/// default = true
///
/// [[node]]
/// name = "node1"
/// assignment = [{ queue = "batch", poll_interval = "1s" }]
///
/// [[job_definition]]
/// application_name = "report"
/// command = "generate-report --daily"
/// ```
///
/// Queues, nodes and job definitions seed the in-memory store.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: RawEngineSection,

    #[serde(default)]
    pub queue: Vec<QueueConfig>,

    #[serde(default)]
    pub node: Vec<RawNodeConfig>,

    #[serde(default)]
    pub job_definition: Vec<RawJobDefinitionConfig>,
}

/// `[engine]` section, durations still as strings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawEngineSection {
    /// Node this process runs as; `--node` overrides it.
    #[serde(default)]
    pub node: Option<String>,

    #[serde(default)]
    pub grace_period: Option<String>,

    #[serde(default)]
    pub kill_check_interval: Option<String>,

    #[serde(default)]
    pub history_write_attempts: Option<u32>,

    #[serde(default)]
    pub history_retry_backoff: Option<String>,

    /// Directory job-definition libraries are resolved against.
    #[serde(default)]
    pub artifact_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct QueueConfig {
    pub name: String,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub default: bool,
}

fn default_concurrency() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawNodeConfig {
    pub name: String,

    #[serde(default)]
    pub assignment: Vec<RawAssignmentConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAssignmentConfig {
    pub queue: String,

    #[serde(default)]
    pub poll_interval: Option<String>,
}

/// `[[job_definition]]` entry. Exactly one of `command` / `builtin` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct RawJobDefinitionConfig {
    pub application_name: String,

    /// Queue name; the default queue when omitted.
    #[serde(default)]
    pub queue: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub priority: i32,

    /// Highlander: at most one claimed instance cluster-wide.
    #[serde(default)]
    pub exclusive: bool,

    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub builtin: Option<String>,

    #[serde(default)]
    pub libraries: Vec<PathBuf>,

    #[serde(default)]
    pub application: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub keyword1: Option<String>,
    #[serde(default)]
    pub keyword2: Option<String>,
    #[serde(default)]
    pub keyword3: Option<String>,
}

/// Runtime knobs of one engine node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// How long `stop()` lets running payloads finish before killing them.
    pub grace_period: Duration,
    /// How often a running loader checks the store for a kill request.
    pub kill_check_interval: Duration,
    /// Attempts at the terminal History write before raising the alarm.
    pub history_write_attempts: u32,
    /// First retry delay of the History write; doubles on each attempt.
    pub history_retry_backoff: Duration,
    pub artifact_root: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
            kill_check_interval: Duration::from_millis(500),
            history_write_attempts: 5,
            history_retry_backoff: Duration::from_millis(200),
            artifact_root: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub name: String,
    pub assignments: Vec<AssignmentConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentConfig {
    pub queue: String,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinitionConfig {
    pub application_name: String,
    pub queue: Option<String>,
    pub version: Option<String>,
    pub priority: i32,
    pub exclusive: bool,
    pub payload: PayloadKind,
    pub libraries: Vec<PathBuf>,
    pub application: Option<String>,
    pub module: Option<String>,
    pub keywords: [Option<String>; 3],
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub node: Option<String>,
    pub engine: EngineSettings,
    pub queues: Vec<QueueConfig>,
    pub nodes: Vec<NodeConfig>,
    pub job_definitions: Vec<JobDefinitionConfig>,
}

/// Poll interval of assignments that do not set one.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
