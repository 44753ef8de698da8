// src/exec/command.rs

//! Shell-command payloads.

use std::process::Stdio;

use anyhow::{Context, Result, bail};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::exec::payload::{JobContext, Payload, PayloadFuture};

/// Stdout lines starting with this prefix update the instance's progress.
pub const PROGRESS_PREFIX: &str = "progress:";

/// A command payload's process exited unsuccessfully. The loader records
/// `code` on the History row.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("process exited with code {code}")]
pub struct ProcessExit {
    pub code: i32,
}

/// Runs `cmd` through the platform shell. The execution context's
/// environment is applied, plus the instance id and application name.
#[derive(Debug, Clone)]
pub struct CommandPayload {
    cmd: String,
}

impl CommandPayload {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }
}

impl Payload for CommandPayload {
    fn run(&self, ctx: JobContext) -> PayloadFuture {
        let cmd = self.cmd.clone();
        Box::pin(async move { run_command(&cmd, ctx).await })
    }
}

fn parse_progress(line: &str) -> Option<i32> {
    line.trim()
        .strip_prefix(PROGRESS_PREFIX)?
        .trim()
        .trim_end_matches('%')
        .parse()
        .ok()
}

async fn run_command(cmd_line: &str, ctx: JobContext) -> Result<()> {
    let id = ctx.id();
    info!(job = %id, cmd = %cmd_line, "starting payload process");

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd_line);
        c
    };

    cmd.envs(ctx.execution.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .env("JOBENGINE_JOB_ID", id.to_string())
        .env("JOBENGINE_APPLICATION", &ctx.definition.application_name)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for job {id}"))?;

    if let Some(stdout) = child.stdout.take() {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match parse_progress(&line) {
                    Some(p) => ctx.report_progress(p).await,
                    None => debug!(job = %ctx.id(), "stdout: {}", line),
                }
            }
        });
    }

    // Always consume stderr so buffers don't fill.
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(job = %id, "stderr: {}", line);
            }
        });
    }

    tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| format!("waiting for process of job {id}"))?;
            let code = status.code().unwrap_or(-1);
            info!(job = %id, exit_code = code, success = status.success(), "payload process exited");
            if !status.success() {
                return Err(ProcessExit { code }.into());
            }
            Ok(())
        }
        _ = ctx.cancel.cancelled() => {
            info!(job = %id, "kill requested; killing payload process");
            if let Err(e) = child.kill().await {
                warn!(job = %id, error = %e, "failed to kill payload process");
            }
            bail!("process killed")
        }
    }
}
