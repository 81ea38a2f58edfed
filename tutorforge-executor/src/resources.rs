//! Run-level resource tracking.
//!
//! Accumulates the footprint of a tutorial run (processes spawned, files
//! created, bytes written) and checks it against the configured limits
//! after every command. A breached limit aborts the run with a
//! `resource` error.

use crate::config::ResourceLimits;
use crate::error::{ErrorKind, ExecutionError};
use crate::runner::CommandOutcome;
use serde::{Deserialize, Serialize};

/// Accumulated resource footprint of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Shell processes spawned
    pub processes_created: u64,
    /// Files created under the working directory
    pub files_created: u64,
    /// Bytes written into created and modified files
    pub disk_bytes_written: u64,
}

impl ResourceUsage {
    /// Fold one command outcome into the usage totals.
    pub fn record(&mut self, outcome: &CommandOutcome) {
        self.processes_created += 1;
        self.files_created += outcome.created_files.len() as u64;
        for path in outcome.created_files.iter().chain(&outcome.modified_files) {
            if let Ok(metadata) = std::fs::metadata(path) {
                self.disk_bytes_written += metadata.len();
            }
        }
    }

    /// Check the totals against the configured limits.
    pub fn check(&self, limits: &ResourceLimits) -> Result<(), ExecutionError> {
        if let Some(max) = limits.max_processes {
            if self.processes_created > max {
                return Err(breach(format!(
                    "{} processes created, limit {max}",
                    self.processes_created
                )));
            }
        }
        if let Some(max) = limits.max_files_created {
            if self.files_created > max {
                return Err(breach(format!(
                    "{} files created, limit {max}",
                    self.files_created
                )));
            }
        }
        if let Some(max_mb) = limits.max_disk_mb {
            let used_mb = self.disk_bytes_written / (1024 * 1024);
            if used_mb > max_mb {
                return Err(breach(format!(
                    "{used_mb} MB written to disk, limit {max_mb} MB"
                )));
            }
        }
        Ok(())
    }
}

fn breach(message: String) -> ExecutionError {
    ExecutionError::new(ErrorKind::Resource, "resources", message).recoverable(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn outcome_with_files(files: Vec<PathBuf>) -> CommandOutcome {
        CommandOutcome {
            exit_code: 0,
            created_files: files,
            ..CommandOutcome::default()
        }
    }

    #[test]
    fn process_limit_breach() {
        let mut usage = ResourceUsage::default();
        let limits = ResourceLimits {
            max_processes: Some(2),
            ..ResourceLimits::default()
        };
        usage.record(&outcome_with_files(vec![]));
        usage.record(&outcome_with_files(vec![]));
        assert!(usage.check(&limits).is_ok());
        usage.record(&outcome_with_files(vec![]));
        let err = usage.check(&limits).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Resource);
        assert!(!err.recoverable);
    }

    #[test]
    fn file_limit_breach() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "data").unwrap();

        let mut usage = ResourceUsage::default();
        let limits = ResourceLimits {
            max_files_created: Some(0),
            ..ResourceLimits::default()
        };
        usage.record(&outcome_with_files(vec![file]));
        assert!(usage.check(&limits).is_err());
        assert!(usage.disk_bytes_written >= 4);
    }

    #[test]
    fn unlimited_by_default() {
        let mut usage = ResourceUsage::default();
        for _ in 0..1000 {
            usage.record(&outcome_with_files(vec![]));
        }
        assert!(usage.check(&ResourceLimits::default()).is_ok());
    }
}
