// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod store;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate, validate_config};
use crate::engine::Engine;
use crate::store::seed::seed_memory_store;
use crate::store::{EnqueueRequest, JobStore, MemoryStore, PayloadKind};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and the `--node` override
/// - an in-memory store seeded from the config
/// - the engine for the selected node
/// - `--enqueue` submissions
/// - Ctrl-C handling and graceful stop
pub async fn run(args: CliArgs) -> Result<()> {
    let mut cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config {}", args.config))?;
    if let Some(node) = args.node.clone() {
        cfg.node = Some(node);
    }
    validate_config(&cfg)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let node = cfg
        .node
        .clone()
        .ok_or_else(|| anyhow!("no node to run as: pass --node or set [engine].node"))?;

    let store = Arc::new(MemoryStore::new());
    seed_memory_store(&store, &cfg)?;

    let mut engine = Engine::new(node, Arc::clone(&store) as Arc<dyn JobStore>, cfg.engine.clone());
    engine.start().await?;

    for application in &args.enqueue {
        let id = store
            .enqueue(EnqueueRequest::new(application.clone()))
            .await
            .with_context(|| format!("enqueueing {application}"))?;
        info!(job_id = %id, application = %application, "instance submitted");
    }

    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl+C")?;
    info!("shutdown requested");

    engine.stop().await?;
    Ok(())
}

/// Simple dry-run output: print queues, nodes and job definitions.
fn print_dry_run(cfg: &ConfigFile) {
    println!("jobengine dry-run");
    println!("  node = {}", cfg.node.as_deref().unwrap_or("<unset>"));
    println!("  grace_period = {:?}", cfg.engine.grace_period);
    println!("  kill_check_interval = {:?}", cfg.engine.kill_check_interval);
    println!(
        "  history_write_attempts = {}",
        cfg.engine.history_write_attempts
    );
    println!("  artifact_root = {}", cfg.engine.artifact_root.display());
    println!();

    println!("queues ({}):", cfg.queues.len());
    for q in &cfg.queues {
        let default = if q.default { " (default)" } else { "" };
        println!("  - {}{default}: concurrency {}", q.name, q.concurrency);
    }

    println!("nodes ({}):", cfg.nodes.len());
    for n in &cfg.nodes {
        println!("  - {}", n.name);
        for a in &n.assignments {
            println!("      polls {} every {:?}", a.queue, a.poll_interval);
        }
    }

    println!("job definitions ({}):", cfg.job_definitions.len());
    for jd in &cfg.job_definitions {
        println!("  - {}", jd.application_name);
        println!("      queue: {}", jd.queue.as_deref().unwrap_or("<default>"));
        match &jd.payload {
            PayloadKind::Command { cmd } => println!("      command: {cmd}"),
            PayloadKind::Builtin { name } => println!("      builtin: {name}"),
        }
        if jd.exclusive {
            println!("      exclusive: true");
        }
        if jd.priority != 0 {
            println!("      priority: {}", jd.priority);
        }
        if !jd.libraries.is_empty() {
            println!("      libraries: {:?}", jd.libraries);
        }
    }

    debug!("dry-run complete (no execution)");
}
