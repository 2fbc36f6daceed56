//! Claude CLI adapter.
//!
//! Runs `claude -p --output-format stream-json` once per turn and collects the
//! final `result` event.

use std::{collections::VecDeque, process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::Mutex,
};
use tracing::{debug, warn};

use relay_core::{
    errors::Error,
    model::{
        client::{ClaudeCliPromptAdapter, ModelClient},
        types::{ClaudeCliConfig, RunRequest, RunResult, SessionRef},
    },
    utils::truncate_text,
    Result,
};

const STDERR_TAIL_MAX_BYTES: usize = 16 * 1024;
const STDERR_TAIL_MAX_LINES: usize = 200;

#[derive(Clone, Debug)]
pub struct ClaudeCliClient {
    adapter: ClaudeCliPromptAdapter,
    timeout: Duration,
}

impl ClaudeCliClient {
    pub fn new(cfg: ClaudeCliConfig, timeout: Duration) -> Self {
        Self {
            adapter: ClaudeCliPromptAdapter { cfg },
            timeout,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
}

impl StderrTail {
    fn push_line(&mut self, line: String) {
        self.bytes = self.bytes.saturating_add(line.len() + 1);
        self.lines.push_back(line);

        while self.lines.len() > STDERR_TAIL_MAX_LINES || self.bytes > STDERR_TAIL_MAX_BYTES {
            let Some(front) = self.lines.pop_front() else {
                break;
            };
            self.bytes = self.bytes.saturating_sub(front.len() + 1);
        }
    }

    fn snapshot(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Fields gathered from the stream-json event sequence.
#[derive(Debug, Default, PartialEq)]
struct StreamSummary {
    session: Option<SessionRef>,
    text: Option<String>,
    is_error: Option<bool>,
}

impl StreamSummary {
    fn observe(&mut self, line: &str) -> std::result::Result<(), serde_json::Error> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        let value: serde_json::Value = serde_json::from_str(line)?;

        if self.session.is_none() {
            if let Some(id) = value.get("session_id").and_then(|v| v.as_str()) {
                self.session = Some(SessionRef(id.to_string()));
            }
        }

        if value.get("type").and_then(|v| v.as_str()) == Some("result") {
            if let Some(text) = value.get("result").and_then(|v| v.as_str()) {
                self.text = Some(text.to_string());
            }
            if let Some(is_error) = value.get("is_error").and_then(|v| v.as_bool()) {
                self.is_error = Some(is_error);
            }
        }
        Ok(())
    }
}

async fn read_stream(
    stdout: impl AsyncRead + Unpin,
    stderr_tail: &Mutex<StderrTail>,
) -> Result<StreamSummary> {
    let mut summary = StreamSummary::default();
    let mut reader = BufReader::new(stdout).lines();
    while let Some(line) = reader.next_line().await? {
        if let Err(e) = summary.observe(&line) {
            let mut msg = format!(
                "claude stream-json parse failed: {e}\nstdout line: {}",
                truncate_text(&line, 500)
            );
            let stderr = stderr_tail.lock().await.snapshot();
            if !stderr.trim().is_empty() {
                msg.push_str("\nstderr (tail):\n");
                msg.push_str(&stderr);
            }
            return Err(Error::External(msg));
        }
    }
    Ok(summary)
}

async fn kill_child(child: &mut Child) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill claude process");
    }
}

#[async_trait]
impl ModelClient for ClaudeCliClient {
    async fn run(&self, req: RunRequest) -> Result<RunResult> {
        let inv = self.adapter.build_invocation(&req);

        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args)
            .current_dir(&inv.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &inv.env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn()?;
        debug!(cwd = %inv.cwd.display(), resume = req.resume.is_some(), "claude process started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::External("claude stdout was not captured".to_string()))?;
        let stderr_tail = Arc::new(Mutex::new(StderrTail::default()));

        // Drain stderr so a full pipe never blocks the child.
        if let Some(stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut r = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = r.next_line().await {
                    tail.lock().await.push_line(line);
                }
            });
        }

        let summary = match tokio::time::timeout(self.timeout, read_stream(stdout, &stderr_tail)).await
        {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                kill_child(&mut child).await;
                return Err(e);
            }
            Err(_) => {
                kill_child(&mut child).await;
                return Err(Error::External(format!(
                    "claude timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        let status = child.wait().await?;
        if !status.success() && summary.text.is_none() {
            let stderr = stderr_tail.lock().await.snapshot();
            if !stderr.trim().is_empty() {
                return Err(Error::External(format!(
                    "claude exited with status {status}\nstderr (tail):\n{stderr}"
                )));
            }
            return Err(Error::External(format!("claude exited with status {status}")));
        }

        Ok(RunResult {
            session: summary.session,
            is_error: summary.is_error.unwrap_or(!status.success()),
            text: summary.text.unwrap_or_default(),
        })
    }
}
