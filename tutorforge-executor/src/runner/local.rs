//! Local shell runner.
//!
//! Spawns commands through `sh -c` with piped output, a hard deadline
//! that kills the child on expiry, and a before/after scan of the working
//! directory to report created and modified files.

use super::{CommandOutcome, Runner};
use crate::error::{ErrorKind, ExecutionError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Runs commands through the local shell.
pub struct LocalRunner {
    max_output_bytes: usize,
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRunner {
    /// Create a runner with the default 1 MiB output cap.
    pub fn new() -> Self {
        Self {
            max_output_bytes: 1024 * 1024,
        }
    }

    /// Cap captured stdout/stderr at `bytes`.
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }
}

#[async_trait::async_trait]
impl Runner for LocalRunner {
    async fn execute(
        &self,
        command: &str,
        env: &HashMap<String, String>,
        working_dir: &Path,
        deadline: Duration,
    ) -> Result<CommandOutcome, ExecutionError> {
        tokio::fs::create_dir_all(working_dir).await.map_err(|e| {
            ExecutionError::new(
                ErrorKind::Internal,
                "runner",
                format!("failed to create working directory: {e}"),
            )
        })?;

        let before = scan_tree(working_dir).await;

        let mut cmd = Command::new("sh");
        cmd.args(["-c", command])
            .current_dir(working_dir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ExecutionError::new(
                ErrorKind::Internal,
                "runner",
                format!("failed to spawn command: {e}"),
            )
        })?;

        let mut stdout = child.stdout.take().ok_or_else(|| {
            ExecutionError::new(ErrorKind::Internal, "runner", "failed to capture stdout")
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| {
            ExecutionError::new(ErrorKind::Internal, "runner", "failed to capture stderr")
        })?;

        let result = tokio::time::timeout(deadline, async {
            let stdout_task = tokio::spawn(async move {
                let mut buf = Vec::new();
                stdout.read_to_end(&mut buf).await.map(|_| buf)
            });
            let stderr_task = tokio::spawn(async move {
                let mut buf = Vec::new();
                stderr.read_to_end(&mut buf).await.map(|_| buf)
            });

            let status = child.wait().await;
            let (stdout_bytes, stderr_bytes) = tokio::join!(stdout_task, stderr_task);
            (status, stdout_bytes, stderr_bytes)
        })
        .await;

        let (status, stdout_bytes, stderr_bytes) = match result {
            Ok(parts) => parts,
            Err(_) => {
                return Err(ExecutionError::new(
                    ErrorKind::Timeout,
                    "runner",
                    format!(
                        "command {command:?} exceeded its {}s deadline",
                        deadline.as_secs()
                    ),
                ));
            }
        };

        let status = status.map_err(|e| {
            ExecutionError::new(ErrorKind::Internal, "runner", format!("wait failed: {e}"))
        })?;
        let stdout_bytes = stdout_bytes
            .map_err(|e| ExecutionError::new(ErrorKind::Internal, "runner", e.to_string()))?
            .map_err(|e| ExecutionError::new(ErrorKind::Internal, "runner", e.to_string()))?;
        let stderr_bytes = stderr_bytes
            .map_err(|e| ExecutionError::new(ErrorKind::Internal, "runner", e.to_string()))?
            .map_err(|e| ExecutionError::new(ErrorKind::Internal, "runner", e.to_string()))?;

        let after = scan_tree(working_dir).await;
        let (created_files, modified_files) = diff_trees(&before, &after);

        Ok(CommandOutcome {
            exit_code: status.code().unwrap_or(-1),
            stdout: truncate_output(stdout_bytes, self.max_output_bytes),
            stderr: truncate_output(stderr_bytes, self.max_output_bytes),
            created_files,
            modified_files,
        })
    }

    async fn health_check(&self) -> Result<(), ExecutionError> {
        let outcome = self
            .execute(
                "true",
                &HashMap::new(),
                &std::env::temp_dir(),
                Duration::from_secs(5),
            )
            .await?;
        if outcome.success() {
            Ok(())
        } else {
            Err(ExecutionError::new(
                ErrorKind::Internal,
                "runner",
                format!("shell probe exited {}", outcome.exit_code),
            ))
        }
    }
}

fn truncate_output(bytes: Vec<u8>, max: usize) -> String {
    let end = bytes.len().min(max);
    let mut text = String::from_utf8_lossy(&bytes[..end]).into_owned();
    if bytes.len() > max {
        text.push_str("\n[output truncated]");
    }
    text
}

/// Modification times of every file under `root`, keyed by path.
async fn scan_tree(root: &Path) -> HashMap<PathBuf, SystemTime> {
    let mut files = HashMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if metadata.is_dir() {
                stack.push(path);
            } else if let Ok(mtime) = metadata.modified() {
                files.insert(path, mtime);
            }
        }
    }
    files
}

fn diff_trees(
    before: &HashMap<PathBuf, SystemTime>,
    after: &HashMap<PathBuf, SystemTime>,
) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut created = Vec::new();
    let mut modified = Vec::new();
    for (path, mtime) in after {
        match before.get(path) {
            None => created.push(path.clone()),
            Some(previous) if previous != mtime => modified.push(path.clone()),
            Some(_) => {}
        }
    }
    created.sort();
    modified.sort();
    (created, modified)
}
