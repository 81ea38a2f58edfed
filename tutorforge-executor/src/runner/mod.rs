//! # Runner Module
//!
//! The capability surface the executor consumes to actually run shell
//! commands. Backends are pluggable behind the [`Runner`] trait; the
//! built-in [`local::LocalRunner`] executes through the local shell with
//! per-run working-directory isolation and deadline enforcement.

use crate::config::{ExecutionEnvironment, ExecutorConfig};
use crate::error::{ErrorKind, ExecutionError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub mod local;

/// Observable outcome of one executed command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Process exit code; -1 when the process died without one
    pub exit_code: i32,
    /// Captured stdout, possibly truncated
    pub stdout: String,
    /// Captured stderr, possibly truncated
    pub stderr: String,
    /// Files that appeared under the working directory
    pub created_files: Vec<PathBuf>,
    /// Files whose modification time changed
    pub modified_files: Vec<PathBuf>,
}

impl CommandOutcome {
    /// Whether the command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Command execution backend.
#[async_trait::async_trait]
pub trait Runner: Send + Sync {
    /// Run `command` with the given environment in `working_dir`, bounded
    /// by `deadline`. Exceeding the deadline kills the process and
    /// returns a `timeout` error.
    async fn execute(
        &self,
        command: &str,
        env: &HashMap<String, String>,
        working_dir: &Path,
        deadline: Duration,
    ) -> Result<CommandOutcome, ExecutionError>;

    /// Cheap backend liveness probe.
    async fn health_check(&self) -> Result<(), ExecutionError>;
}

/// Build the runner for the configured environment.
///
/// `Local` and `Sandbox` run through the local shell; container, cluster
/// and cloud backends plug in behind the trait and are not built in.
pub fn create_runner(config: &ExecutorConfig) -> Result<Arc<dyn Runner>, ExecutionError> {
    match config.environment {
        ExecutionEnvironment::Local | ExecutionEnvironment::Sandbox => {
            Ok(Arc::new(local::LocalRunner::new()))
        }
        other => Err(ExecutionError::new(
            ErrorKind::Internal,
            "runner",
            format!("no built-in runner for environment {other:?}; plug one in behind the Runner trait"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_and_sandbox_environments_have_runners() {
        let mut config = ExecutorConfig::default();
        assert!(create_runner(&config).is_ok());
        config.environment = ExecutionEnvironment::Sandbox;
        assert!(create_runner(&config).is_ok());
        config.environment = ExecutionEnvironment::Docker;
        assert!(create_runner(&config).is_err());
    }
}
