// src/config/validate.rs

use std::collections::HashSet;
use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{
    AssignmentConfig, ConfigFile, DEFAULT_POLL_INTERVAL, EngineSettings, JobDefinitionConfig,
    NodeConfig, RawConfigFile, RawEngineSection, RawJobDefinitionConfig, RawNodeConfig,
};
use crate::errors::{EngineError, Result};
use crate::store::PayloadKind;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = EngineError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_queues(&raw)?;
        let engine = engine_settings(&raw.engine)?;
        let nodes = nodes(&raw)?;
        let job_definitions = job_definitions(&raw)?;

        Ok(ConfigFile {
            node: raw.engine.node,
            engine,
            queues: raw.queue,
            nodes,
            job_definitions,
        })
    }
}

/// Re-run validation on an already-built config (used after CLI overrides).
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    if let Some(node) = &cfg.node {
        if !cfg.nodes.iter().any(|n| &n.name == node) {
            return Err(EngineError::ConfigError(format!(
                "node '{}' is not declared in any [[node]] section",
                node
            )));
        }
    }
    Ok(())
}

fn config_err(msg: impl Into<String>) -> EngineError {
    EngineError::ConfigError(msg.into())
}

fn duration_field(name: &str, value: Option<&str>, default: Duration) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(s) => parse_duration(s).map_err(|e| config_err(format!("{name}: {e}"))),
    }
}

fn engine_settings(raw: &RawEngineSection) -> Result<EngineSettings> {
    let defaults = EngineSettings::default();

    let settings = EngineSettings {
        grace_period: duration_field(
            "[engine].grace_period",
            raw.grace_period.as_deref(),
            defaults.grace_period,
        )?,
        kill_check_interval: duration_field(
            "[engine].kill_check_interval",
            raw.kill_check_interval.as_deref(),
            defaults.kill_check_interval,
        )?,
        history_write_attempts: raw
            .history_write_attempts
            .unwrap_or(defaults.history_write_attempts),
        history_retry_backoff: duration_field(
            "[engine].history_retry_backoff",
            raw.history_retry_backoff.as_deref(),
            defaults.history_retry_backoff,
        )?,
        artifact_root: raw.artifact_root.clone().unwrap_or(defaults.artifact_root),
    };
    settings.check()?;
    Ok(settings)
}

impl EngineSettings {
    /// Reject settings the engine cannot run with. Config loading calls this,
    /// and so does [`crate::engine::Engine::start`] for settings built in code.
    pub fn check(&self) -> Result<()> {
        if self.history_write_attempts == 0 {
            return Err(config_err(
                "[engine].history_write_attempts must be >= 1 (got 0)",
            ));
        }
        if self.kill_check_interval.is_zero() {
            return Err(config_err("[engine].kill_check_interval must be > 0"));
        }
        Ok(())
    }
}

fn validate_queues(cfg: &RawConfigFile) -> Result<()> {
    if cfg.queue.is_empty() {
        return Err(config_err(
            "config must contain at least one [[queue]] section",
        ));
    }

    let mut names = HashSet::new();
    for q in &cfg.queue {
        if !names.insert(q.name.as_str()) {
            return Err(config_err(format!("queue '{}' is declared twice", q.name)));
        }
        if q.concurrency == 0 {
            return Err(config_err(format!(
                "queue '{}' must have concurrency >= 1 (got 0)",
                q.name
            )));
        }
    }

    let defaults = cfg.queue.iter().filter(|q| q.default).count();
    if defaults > 1 {
        return Err(config_err("at most one queue may set `default = true`"));
    }
    Ok(())
}

fn queue_exists(cfg: &RawConfigFile, name: &str) -> bool {
    cfg.queue.iter().any(|q| q.name == name)
}

fn nodes(cfg: &RawConfigFile) -> Result<Vec<NodeConfig>> {
    let mut names = HashSet::new();
    cfg.node
        .iter()
        .map(|node| {
            if !names.insert(node.name.as_str()) {
                return Err(config_err(format!("node '{}' is declared twice", node.name)));
            }
            node_config(cfg, node)
        })
        .collect()
}

fn node_config(cfg: &RawConfigFile, node: &RawNodeConfig) -> Result<NodeConfig> {
    let mut assignments = Vec::with_capacity(node.assignment.len());
    for a in &node.assignment {
        if !queue_exists(cfg, &a.queue) {
            return Err(config_err(format!(
                "node '{}' is assigned to unknown queue '{}'",
                node.name, a.queue
            )));
        }
        let poll_interval = duration_field(
            &format!("node '{}' poll_interval", node.name),
            a.poll_interval.as_deref(),
            DEFAULT_POLL_INTERVAL,
        )?;
        if poll_interval.is_zero() {
            return Err(config_err(format!(
                "node '{}' poll_interval for queue '{}' must be > 0",
                node.name, a.queue
            )));
        }
        assignments.push(AssignmentConfig {
            queue: a.queue.clone(),
            poll_interval,
        });
    }

    Ok(NodeConfig {
        name: node.name.clone(),
        assignments,
    })
}

fn job_definitions(cfg: &RawConfigFile) -> Result<Vec<JobDefinitionConfig>> {
    let has_default_queue = cfg.queue.iter().any(|q| q.default);
    let mut names = HashSet::new();

    cfg.job_definition
        .iter()
        .map(|jd| {
            if !names.insert(jd.application_name.as_str()) {
                return Err(config_err(format!(
                    "job definition '{}' is declared twice",
                    jd.application_name
                )));
            }
            match &jd.queue {
                Some(q) if !queue_exists(cfg, q) => {
                    return Err(config_err(format!(
                        "job definition '{}' uses unknown queue '{}'",
                        jd.application_name, q
                    )));
                }
                None if !has_default_queue => {
                    return Err(config_err(format!(
                        "job definition '{}' names no queue and no queue is marked default",
                        jd.application_name
                    )));
                }
                _ => {}
            }
            job_definition(jd)
        })
        .collect()
}

fn job_definition(jd: &RawJobDefinitionConfig) -> Result<JobDefinitionConfig> {
    let payload = match (&jd.command, &jd.builtin) {
        (Some(cmd), None) => PayloadKind::Command { cmd: cmd.clone() },
        (None, Some(name)) => PayloadKind::Builtin { name: name.clone() },
        _ => {
            return Err(config_err(format!(
                "job definition '{}' must set exactly one of `command` or `builtin`",
                jd.application_name
            )));
        }
    };

    Ok(JobDefinitionConfig {
        application_name: jd.application_name.clone(),
        queue: jd.queue.clone(),
        version: jd.version.clone(),
        priority: jd.priority,
        exclusive: jd.exclusive,
        payload,
        libraries: jd.libraries.clone(),
        application: jd.application.clone(),
        module: jd.module.clone(),
        keywords: [
            jd.keyword1.clone(),
            jd.keyword2.clone(),
            jd.keyword3.clone(),
        ],
    })
}
