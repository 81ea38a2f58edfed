//! # Executor Configuration Module
//!
//! Everything a tutorial run can be tuned with: execution environment,
//! validation and error-handling modes, the safety gate, timeout policy,
//! resource limits, cleanup policy and reporting. All types serialize, so
//! a whole configuration can live in a TOML or JSON document.

use crate::error::{ErrorKind, ExecutionError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where commands actually run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionEnvironment {
    /// The local shell
    Local,
    /// The local shell inside an isolated per-run directory
    Sandbox,
    /// A container backend (pluggable, not built in)
    Docker,
    /// A cluster backend (pluggable, not built in)
    Kubernetes,
    /// A cloud-runner backend (pluggable, not built in)
    Aws,
}

/// How validation failures are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// A failed rule fails the action
    Strict,
    /// A failed rule is recorded as a warning
    Lenient,
    /// A failed rule defers to the router's validation verdict
    Adaptive,
}

/// How action failures are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandlingMode {
    /// Abort the run at the first failed action
    Fail,
    /// Proceed to the next instruction
    Continue,
    /// Interpret the error and attempt one ranked recovery
    Recover,
    /// Surface the error to an operator callback
    Interactive,
}

/// Pre-execution static screening applied to every command string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SafetyMode {
    /// No screening
    None,
    /// Reject obviously destructive commands
    Basic,
    /// Basic plus privilege-escalation patterns
    Restrictive,
    /// Only allowlisted leading tokens may run
    Paranoid {
        /// Permitted first tokens; empty falls back to the default set
        #[serde(default)]
        allowlist: Vec<String>,
    },
}

impl SafetyMode {
    /// Whether any screening happens at all.
    pub fn is_enforcing(&self) -> bool {
        !matches!(self, SafetyMode::None)
    }
}

/// Hierarchical deadlines; the shortest effective deadline wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    /// Bound on a single instruction, actions included
    #[serde(with = "tutorforge_providers_sdk::duration_serde")]
    pub instruction: Duration,
    /// Bound on the whole tutorial run
    #[serde(with = "tutorforge_providers_sdk::duration_serde")]
    pub total: Duration,
    /// Bound on a single AI call
    #[serde(with = "tutorforge_providers_sdk::duration_serde")]
    pub ai: Duration,
    /// Bound on a single shell command
    #[serde(with = "tutorforge_providers_sdk::duration_serde")]
    pub command: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            instruction: Duration::from_secs(300),
            total: Duration::from_secs(3600),
            ai: Duration::from_secs(60),
            command: Duration::from_secs(120),
        }
    }
}

/// Resource ceilings; `None` disables a check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Peak memory in megabytes
    pub max_memory_mb: Option<u64>,
    /// Disk written in megabytes
    pub max_disk_mb: Option<u64>,
    /// CPU usage percentage
    pub max_cpu_percent: Option<u64>,
    /// Network traffic in megabytes
    pub max_network_mb: Option<u64>,
    /// Processes spawned
    pub max_processes: Option<u64>,
    /// Files created
    pub max_files_created: Option<u64>,
}

/// What happens to files created during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupPolicy {
    /// Remove created files after a successful run
    pub on_success: bool,
    /// Remove created files after a failed run
    pub on_failure: bool,
    /// File names never removed
    #[serde(default)]
    pub preserve_files: Vec<String>,
    /// Commands run after file cleanup, under the same safety rules
    #[serde(default)]
    pub custom_cleanup: Vec<String>,
}

/// Report output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Json,
    Markdown,
}

/// Report generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Whether reports are written at all
    pub enabled: bool,
    /// Formats to emit
    pub output_formats: Vec<ReportFormat>,
    /// Directory reports are written into
    pub output_path: PathBuf,
    /// Include captured stdout in reports
    pub include_stdout: bool,
    /// Include captured stderr in reports
    pub include_stderr: bool,
    /// Include the environment variables in reports
    pub include_environment: bool,
    /// Include created-file lists in reports
    pub include_files: bool,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_formats: vec![ReportFormat::Json],
            output_path: PathBuf::from("reports"),
            include_stdout: true,
            include_stderr: true,
            include_environment: false,
            include_files: true,
        }
    }
}

/// Full executor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Root directory the run operates in; commands cannot escape it when
    /// the safety mode is enforcing
    pub working_directory: PathBuf,
    /// Command backend
    pub environment: ExecutionEnvironment,
    /// Validation disposition
    pub validation_mode: ValidationMode,
    /// Failure disposition
    pub error_handling: ErrorHandlingMode,
    /// Reject interpretations below this confidence when strict
    /// validation is on
    pub validation_threshold: f64,
    /// Whether low-confidence interpretations fail the run
    pub strict_validation: bool,
    /// Command screening
    pub safety_mode: SafetyMode,
    /// Deadlines
    pub timeout_policy: TimeoutPolicy,
    /// Resource ceilings
    pub resource_limits: ResourceLimits,
    /// File cleanup
    pub cleanup_policy: CleanupPolicy,
    /// Report generation
    pub reporting: ReportingConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            working_directory: PathBuf::from("tutorial-run"),
            environment: ExecutionEnvironment::Local,
            validation_mode: ValidationMode::Strict,
            error_handling: ErrorHandlingMode::Fail,
            validation_threshold: 0.6,
            strict_validation: false,
            safety_mode: SafetyMode::Basic,
            timeout_policy: TimeoutPolicy::default(),
            resource_limits: ResourceLimits::default(),
            cleanup_policy: CleanupPolicy::default(),
            reporting: ReportingConfig::default(),
        }
    }
}

impl ExecutorConfig {
    /// Check the configuration for values that cannot work.
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.working_directory.as_os_str().is_empty() {
            return Err(ExecutionError::new(
                ErrorKind::Internal,
                "config",
                "working_directory must not be empty",
            ));
        }
        if !(0.0..=1.0).contains(&self.validation_threshold) {
            return Err(ExecutionError::new(
                ErrorKind::Internal,
                "config",
                format!(
                    "validation_threshold {} outside [0, 1]",
                    self.validation_threshold
                ),
            ));
        }
        let policy = &self.timeout_policy;
        if policy.total.is_zero()
            || policy.instruction.is_zero()
            || policy.ai.is_zero()
            || policy.command.is_zero()
        {
            return Err(ExecutionError::new(
                ErrorKind::Internal,
                "config",
                "timeout policy entries must be non-zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(ExecutorConfig::default().validate().is_ok());
    }

    #[test]
    fn bad_threshold_is_rejected() {
        let config = ExecutorConfig {
            validation_threshold: 1.5,
            ..ExecutorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = ExecutorConfig {
            timeout_policy: TimeoutPolicy {
                command: Duration::ZERO,
                ..TimeoutPolicy::default()
            },
            ..ExecutorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = ExecutorConfig {
            safety_mode: SafetyMode::Paranoid {
                allowlist: vec!["echo".into(), "ls".into()],
            },
            ..ExecutorConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        let back: ExecutorConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
