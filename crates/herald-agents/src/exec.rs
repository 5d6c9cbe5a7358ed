//! Subprocess execution for agent invocations.
//!
//! Commands run under `bash -lc` with inputs supplied through `HERALD_*`
//! env vars. Every run has a hard wall-clock timeout and an output cap;
//! on breach the child is killed and the error surfaces. Agents that need
//! a terminal are run on a pseudo-terminal instead of a pipe.

use std::io::Read;
use std::process::Stdio;

use async_trait::async_trait;
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{AgentError, Result};

/// One subprocess invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Command string for `bash -lc`.
    pub command: String,
    /// Env pairs the command references as shell expansions.
    pub env: Vec<(String, String)>,
    pub cwd: Option<String>,
    pub timeout_ms: u64,
    pub max_buffer: usize,
    /// Fold stderr into stdout before parsing.
    pub merge_stderr: bool,
    /// Attach the child to a pseudo-terminal.
    pub needs_pty: bool,
}

#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub exit_code: i32,
}

/// Narrow seam between the runner and the operating system, so the pipeline
/// can be driven by scripted executors in tests.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run the command to completion. `chunks`, when given, receives live
    /// output fragments as they arrive (used for cron job logs).
    async fn exec(
        &self,
        req: ExecRequest,
        chunks: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<ExecOutput>;
}

pub struct SubprocessExecutor;

#[async_trait]
impl CommandExecutor for SubprocessExecutor {
    async fn exec(
        &self,
        req: ExecRequest,
        chunks: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<ExecOutput> {
        let output = if req.needs_pty {
            exec_pty(&req, chunks).await?
        } else {
            exec_piped(&req, chunks).await?
        };

        // Exit code is informational: partial stdout is worth parsing, an
        // empty failure is not.
        if output.exit_code != 0 {
            if output.stdout.trim().is_empty() {
                if output.exit_code == 127 {
                    return Err(AgentError::MissingBinary(command_head(&req.command)));
                }
                return Err(AgentError::NonZeroExit {
                    code: output.exit_code,
                });
            }
            warn!(
                code = output.exit_code,
                "agent exited non-zero with partial output, parsing anyway"
            );
        }
        Ok(output)
    }
}

async fn exec_piped(
    req: &ExecRequest,
    chunks: Option<mpsc::UnboundedSender<String>>,
) -> Result<ExecOutput> {
    let mut line = req.command.clone();
    if req.merge_stderr {
        line.push_str(" 2>&1");
    }
    debug!(command = %line, "exec");

    let mut cmd = tokio::process::Command::new("bash");
    cmd.arg("-lc")
        .arg(&line)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    for (k, v) in &req.env {
        cmd.env(k, v);
    }
    if let Some(cwd) = &req.cwd {
        cmd.current_dir(cwd);
    }

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AgentError::MissingBinary("bash".to_string())
        } else {
            AgentError::Io(e)
        }
    })?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| AgentError::Pty("child stdout not captured".to_string()))?;

    let max = req.max_buffer;
    let read_and_wait = async {
        let mut out = String::new();
        let mut buf = vec![0u8; 8192];
        loop {
            let n = stdout.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
            if out.len() + chunk.len() > max {
                return Err(AgentError::MaxBufferExceeded { max });
            }
            if let Some(tx) = &chunks {
                let _ = tx.send(chunk.clone());
            }
            out.push_str(&chunk);
        }
        let status = child.wait().await?;
        Ok::<_, AgentError>(ExecOutput {
            stdout: out,
            exit_code: status.code().unwrap_or(-1),
        })
    };

    match tokio::time::timeout(
        std::time::Duration::from_millis(req.timeout_ms),
        read_and_wait,
    )
    .await
    {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => {
            kill_child(&child);
            Err(e)
        }
        Err(_elapsed) => {
            kill_child(&child);
            Err(AgentError::Timeout { ms: req.timeout_ms })
        }
    }
}

async fn exec_pty(
    req: &ExecRequest,
    chunks: Option<mpsc::UnboundedSender<String>>,
) -> Result<ExecOutput> {
    debug!(command = %req.command, "exec (pty)");

    let pty = native_pty_system();
    let pair = pty
        .openpty(PtySize {
            rows: 24,
            cols: 120,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| AgentError::Pty(e.to_string()))?;

    let mut builder = CommandBuilder::new("bash");
    builder.args(["-lc", req.command.as_str()]);
    for (k, v) in &req.env {
        builder.env(k, v);
    }
    if let Some(cwd) = &req.cwd {
        builder.cwd(cwd);
    }

    let mut child = pair
        .slave
        .spawn_command(builder)
        .map_err(|e| AgentError::Pty(e.to_string()))?;
    drop(pair.slave);

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| AgentError::Pty(e.to_string()))?;
    let mut killer = child.clone_killer();
    let master = pair.master;
    let max = req.max_buffer;

    // PTY reads are blocking; drive them off the runtime.
    let join = tokio::task::spawn_blocking(move || -> Result<ExecOutput> {
        let _master = master; // keep the PTY open until the read loop ends
        let mut out = String::new();
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    if out.len() + chunk.len() > max {
                        return Err(AgentError::MaxBufferExceeded { max });
                    }
                    if let Some(tx) = &chunks {
                        let _ = tx.send(chunk.clone());
                    }
                    out.push_str(&chunk);
                }
                // The PTY returns EIO once the child side closes.
                Err(_) => break,
            }
        }
        let status = child.wait()?;
        Ok(ExecOutput {
            stdout: out,
            exit_code: status.exit_code() as i32,
        })
    });

    match tokio::time::timeout(std::time::Duration::from_millis(req.timeout_ms), join).await {
        Ok(Ok(result)) => result,
        Ok(Err(_join_err)) => Err(AgentError::Pty("pty reader task panicked".to_string())),
        Err(_elapsed) => {
            let _ = killer.kill();
            Err(AgentError::Timeout { ms: req.timeout_ms })
        }
    }
}

/// SIGKILL by pid; reliable even when the child ignores SIGTERM.
fn kill_child(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        #[cfg(unix)]
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

/// First word of the command line, for error messages.
fn command_head(command: &str) -> String {
    command
        .split_whitespace()
        .next()
        .unwrap_or(command)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(command: &str) -> ExecRequest {
        ExecRequest {
            command: command.to_string(),
            env: Vec::new(),
            cwd: None,
            timeout_ms: 10_000,
            max_buffer: 1024 * 1024,
            merge_stderr: false,
            needs_pty: false,
        }
    }

    #[tokio::test]
    async fn captures_stdout() {
        let out = SubprocessExecutor.exec(req("printf hello"), None).await.unwrap();
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn env_values_reach_the_command() {
        let mut r = req("printf '%s' \"$HERALD_PROMPT\"");
        r.env.push(("HERALD_PROMPT".to_string(), "it's here".to_string()));
        let out = SubprocessExecutor.exec(r, None).await.unwrap();
        assert_eq!(out.stdout, "it's here");
    }

    #[tokio::test]
    async fn merge_stderr_folds_into_stdout() {
        let mut r = req("printf err >&2");
        r.merge_stderr = true;
        let out = SubprocessExecutor.exec(r, None).await.unwrap();
        assert_eq!(out.stdout, "err");
    }

    #[tokio::test]
    async fn stderr_discarded_without_merge() {
        let out = SubprocessExecutor
            .exec(req("printf err >&2; printf out"), None)
            .await
            .unwrap();
        assert_eq!(out.stdout, "out");
    }

    #[tokio::test]
    async fn timeout_kills_and_errors() {
        let mut r = req("sleep 30");
        r.timeout_ms = 200;
        let err = SubprocessExecutor.exec(r, None).await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout { ms: 200 }));
    }

    #[tokio::test]
    async fn buffer_cap_is_enforced() {
        let mut r = req("yes long-line | head -c 100000");
        r.max_buffer = 4096;
        let err = SubprocessExecutor.exec(r, None).await.unwrap_err();
        assert!(matches!(err, AgentError::MaxBufferExceeded { .. }));
    }

    #[tokio::test]
    async fn nonzero_exit_with_stdout_is_tolerated() {
        let out = SubprocessExecutor
            .exec(req("printf partial; exit 3"), None)
            .await
            .unwrap();
        assert_eq!(out.stdout, "partial");
        assert_eq!(out.exit_code, 3);
    }

    #[tokio::test]
    async fn nonzero_exit_without_stdout_errors() {
        let err = SubprocessExecutor.exec(req("exit 3"), None).await.unwrap_err();
        assert!(matches!(err, AgentError::NonZeroExit { code: 3 }));
    }

    #[tokio::test]
    async fn missing_binary_maps_exit_127() {
        let err = SubprocessExecutor
            .exec(req("definitely-not-a-real-binary-xyz"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MissingBinary(_)));
    }

    #[tokio::test]
    async fn chunks_observer_sees_live_output() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let out = SubprocessExecutor
            .exec(req("printf hello"), Some(tx))
            .await
            .unwrap();
        assert_eq!(out.stdout, "hello");
        let mut seen = String::new();
        while let Ok(chunk) = rx.try_recv() {
            seen.push_str(&chunk);
        }
        assert_eq!(seen, "hello");
    }
}
