//! Removal engine backed by an external process
//!
//! The program is started once per job with the image handle as its last
//! argument. It reports on stdout, one JSON object per line:
//!
//! ```text
//! {"type":"progress","key":"fetch:/models/isnet","current":3,"total":8}
//! {"type":"progress","key":"compute:inference","current":0,"total":1}
//! {"type":"done","output":"/tmp/portrait-nobg.png"}
//! ```
//!
//! or `{"type":"error","message":"..."}` on failure. Lines that are not
//! protocol messages are logged and skipped.

use crate::{
    engine::{EngineOptions, ProgressCallback, RemovalEngine},
    error::EngineFailure,
    types::{ImageHandle, OutputHandle},
};
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum EngineMessage {
    Progress { key: String, current: u64, total: u64 },
    Done { output: String },
    Error { message: String },
}

/// Engine that delegates to an external program
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add a fixed argument passed before the per-job arguments
    #[must_use]
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command(&self, image: &ImageHandle, options: &EngineOptions) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(public_path) = &options.public_path {
            cmd.arg("--public-path").arg(public_path);
        }
        cmd.arg("--revision")
            .arg(options.revision.to_string())
            .arg(image.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RemovalEngine for CommandEngine {
    async fn remove_background(
        &self,
        image: &ImageHandle,
        progress: ProgressCallback,
        options: &EngineOptions,
    ) -> Result<OutputHandle, EngineFailure> {
        let mut child = self
            .command(image, options)
            .spawn()
            .map_err(|e| EngineFailure::new(format!("failed to start '{}': {}", self.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineFailure::new("engine stdout was not captured"))?;
        let stderr = child.stderr.take();

        // Drained concurrently so a chatty engine cannot block on a full pipe
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                if let Err(e) = stderr.read_to_string(&mut buf).await {
                    tracing::debug!(error = %e, "Failed to read engine stderr");
                }
            }
            buf
        });

        let mut output = None;
        let mut failure = None;
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| EngineFailure::new(format!("failed to read engine output: {}", e)))?
        {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<EngineMessage>(line) {
                Ok(EngineMessage::Progress {
                    key,
                    current,
                    total,
                }) => progress.report(&key, current, total),
                Ok(EngineMessage::Done { output: handle }) => output = Some(handle),
                Ok(EngineMessage::Error { message }) => failure = Some(message),
                Err(e) => tracing::debug!(line, error = %e, "Skipping non-protocol engine output"),
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| EngineFailure::new(format!("failed to wait for engine: {}", e)))?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if let Some(message) = failure {
            return Err(EngineFailure::new(message));
        }
        if !status.success() {
            let detail = stderr_text.lines().rev().find(|l| !l.trim().is_empty());
            return Err(EngineFailure::new(match detail {
                Some(detail) => format!("'{}' exited with {}: {}", self.program, status, detail.trim()),
                None => format!("'{}' exited with {}", self.program, status),
            }));
        }

        output
            .map(OutputHandle::from)
            .ok_or_else(|| EngineFailure::new("engine exited without reporting an output"))
    }

    fn name(&self) -> &str {
        &self.program
    }
}
