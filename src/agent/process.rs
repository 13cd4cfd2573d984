use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::error::{AppError, Result};

/// A CLI invocation of an agent backend.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Written to stdin, which is then closed. `None` gives the child a null stdin.
    pub stdin: Option<String>,
    pub env_remove: Vec<String>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            stdin: None,
            env_remove: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub status: Option<ExitStatus>,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.is_some_and(|s| s.success())
    }

    /// Human-readable reason for a failed run, including captured stderr.
    pub fn failure_message(&self, program: &str) -> String {
        let reason = match self.status {
            _ if self.timed_out => "timed out".to_string(),
            Some(status) => match status.code() {
                Some(code) => format!("exited with code {code}"),
                None => "terminated by signal".to_string(),
            },
            None => "did not exit".to_string(),
        };
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("{program} {reason}")
        } else {
            format!("{program} {reason}\nstderr: {stderr}")
        }
    }
}

/// Run a subprocess, handing each non-empty stdout line to `on_line`.
///
/// The child is killed and reaped when `timeout` elapses, and also if this
/// future is dropped. Stderr is drained in the background and returned in
/// the outcome.
pub async fn run_streaming<F>(spec: &ProcessSpec, timeout: Duration, mut on_line: F) -> Result<ProcessOutcome>
where
    F: FnMut(&str) + Send,
{
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.cwd)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for key in &spec.env_remove {
        cmd.env_remove(key);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| AppError::Agent(format!("Failed to start '{}': {e}", spec.program)))?;

    tracing::debug!(program = %spec.program, pid = ?child.id(), "Agent process started");

    // Feed stdin from a task so a chatty child cannot deadlock on a full stdout pipe.
    if let (Some(mut stdin), Some(input)) = (child.stdin.take(), spec.stdin.clone()) {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                tracing::debug!(error = %e, "Failed to write agent stdin");
            }
            let _ = stdin.shutdown().await;
        });
    }

    let stderr_buf = Arc::new(Mutex::new(String::new()));
    if let Some(stderr) = child.stderr.take() {
        let buf = Arc::clone(&stderr_buf);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if let Ok(mut b) = buf.lock() {
                    if !b.is_empty() {
                        b.push('\n');
                    }
                    b.push_str(&line);
                }
            }
        });
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Agent("stdout not captured".to_string()))?;
    let mut lines = BufReader::new(stdout).lines();

    let result = tokio::time::timeout(timeout, async {
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if !line.is_empty() {
                on_line(line);
            }
        }
        child.wait().await
    })
    .await;

    let stderr = || stderr_buf.lock().map(|b| b.clone()).unwrap_or_default();

    match result {
        Ok(Ok(status)) => Ok(ProcessOutcome {
            status: Some(status),
            stderr: stderr(),
            timed_out: false,
        }),
        Ok(Err(e)) => {
            let _ = child.kill().await;
            Err(AppError::Io(e))
        }
        Err(_) => {
            tracing::warn!(
                program = %spec.program,
                timeout_secs = timeout.as_secs(),
                "Agent process timed out, killing it"
            );
            // kill() also waits, so the child is reaped before we return.
            if let Err(e) = child.kill().await {
                tracing::warn!(program = %spec.program, error = %e, "Failed to kill agent process");
            }
            Ok(ProcessOutcome {
                status: None,
                stderr: stderr(),
                timed_out: true,
            })
        }
    }
}
