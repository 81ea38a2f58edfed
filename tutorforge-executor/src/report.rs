//! # Execution Reporting Module
//!
//! The structured result of a tutorial run: per-step, per-instruction and
//! per-action outcomes, aggregate success, quality score, performance
//! metrics and an error summary. A failed run still carries everything
//! that happened before the failure; partial progress is never discarded.
//!
//! Reports serialize to JSON and render to Markdown per the configured
//! [`ReportingConfig`](crate::config::ReportingConfig).

use crate::config::{ReportFormat, ReportingConfig};
use crate::error::{ErrorKind, ErrorRecord};
use crate::resources::ResourceUsage;
use crate::validation::ValidationRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Outcome of one executed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Action description
    pub description: String,
    /// Shell string for command actions, empty otherwise
    pub command: String,
    /// Exit code, when a process ran
    pub exit_code: Option<i32>,
    /// Captured stdout, subject to reporting config
    pub stdout: String,
    /// Captured stderr, subject to reporting config
    pub stderr: String,
    /// Whether the action succeeded
    pub success: bool,
    /// When the action started
    pub start_time: DateTime<Utc>,
    /// When the action finished
    pub end_time: DateTime<Utc>,
    /// `end_time − start_time` in milliseconds
    pub duration_ms: u64,
    /// Failure detail, when the action failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    /// Validation verdict, when a rule was applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRecord>,
}

/// Outcome of one recovery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    /// Recovery flavor; `"fix"` for interpreted recovery commands
    pub kind: String,
    /// The recovery command that ran
    pub command: String,
    /// Whether the recovery (fix plus re-run) succeeded
    pub success: bool,
}

/// Outcome of one instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionResult {
    /// Raw instruction text
    pub instruction: String,
    /// Whether every action succeeded (after any recovery)
    pub success: bool,
    /// Per-action outcomes
    pub actions: Vec<ActionResult>,
    /// Recovery attempt, when one was made
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryRecord>,
    /// Validation warnings recorded under lenient handling
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Source section number
    pub section_number: u32,
    /// Source section title
    pub title: String,
    /// Whether every instruction succeeded
    pub success: bool,
    /// Per-instruction outcomes
    pub instructions: Vec<InstructionResult>,
}

/// Aggregate performance of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Commands executed
    pub total_commands: u64,
    /// Mean command duration in milliseconds
    pub avg_command_duration_ms: f64,
    /// Resource footprint
    pub resources: ResourceUsage,
}

/// Failure totals and remediation pointers for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Errors across the run
    pub total_errors: u64,
    /// Error counts by kind name
    pub errors_by_kind: BTreeMap<String, u64>,
    /// Recovery attempts made
    pub recovery_attempts: u64,
    /// Recovery attempts that succeeded
    pub recovery_successes: u64,
    /// Critical error messages, verbatim
    pub critical_errors: Vec<String>,
    /// Suggested remediation strings
    pub remediation: Vec<String>,
}

impl ErrorSummary {
    /// Fold one error into the totals.
    pub fn record(&mut self, record: &ErrorRecord) {
        self.total_errors += 1;
        *self
            .errors_by_kind
            .entry(record.kind.name().to_string())
            .or_default() += 1;
        if record.kind.is_critical() || record.kind == ErrorKind::Permission {
            self.critical_errors.push(record.message.clone());
        }
        match record.kind {
            ErrorKind::Permission => self.push_remediation(
                "relax the safety mode or rewrite the rejected command",
            ),
            ErrorKind::NoViableProvider => {
                self.push_remediation("register more providers or loosen routing constraints")
            }
            ErrorKind::RateLimited => {
                self.push_remediation("wait for the rate limit to reset or add capacity")
            }
            ErrorKind::Timeout => self.push_remediation("raise the timeout policy for slow steps"),
            ErrorKind::Resource => {
                self.push_remediation("raise the resource limits or split the tutorial")
            }
            _ => {}
        }
    }

    fn push_remediation(&mut self, text: &str) {
        if !self.remediation.iter().any(|r| r == text) {
            self.remediation.push(text.to_string());
        }
    }
}

/// Complete, structured result of one tutorial run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Unique run identifier
    pub run_id: Uuid,
    /// Tutorial title
    pub tutorial_title: String,
    /// Whether the run as a whole succeeded
    pub success: bool,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
    /// Total wall time in milliseconds
    pub duration_ms: u64,
    /// Steps that began executing
    pub steps_executed: usize,
    /// Per-step outcomes
    pub results: Vec<StepResult>,
    /// Fraction of successful actions, 0–100
    pub quality_score: f64,
    /// Aggregate performance
    pub performance: PerformanceMetrics,
    /// Failure totals and remediation
    pub error_summary: ErrorSummary,
}

impl ExecutionResult {
    /// Count of actions across the whole run.
    pub fn action_count(&self) -> usize {
        self.results
            .iter()
            .flat_map(|s| &s.instructions)
            .map(|i| i.actions.len())
            .sum()
    }
}

/// Write the configured report documents, returning the paths written.
pub async fn write_reports(
    result: &ExecutionResult,
    config: &ReportingConfig,
) -> std::io::Result<Vec<PathBuf>> {
    if !config.enabled {
        return Ok(Vec::new());
    }
    tokio::fs::create_dir_all(&config.output_path).await?;

    let mut written = Vec::new();
    for format in &config.output_formats {
        let (name, contents) = match format {
            ReportFormat::Json => (
                format!("run-{}.json", result.run_id),
                serde_json::to_string_pretty(result).map_err(std::io::Error::other)?,
            ),
            ReportFormat::Markdown => (
                format!("run-{}.md", result.run_id),
                render_markdown(result),
            ),
        };
        let path = config.output_path.join(name);
        tokio::fs::write(&path, contents).await?;
        written.push(path);
    }
    Ok(written)
}

fn render_markdown(result: &ExecutionResult) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "# Tutorial run: {}", result.tutorial_title);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "- **Outcome**: {}",
        if result.success { "success" } else { "failure" }
    );
    let _ = writeln!(out, "- **Duration**: {} ms", result.duration_ms);
    let _ = writeln!(out, "- **Quality score**: {:.1}", result.quality_score);
    let _ = writeln!(
        out,
        "- **Steps executed**: {}/{}",
        result.steps_executed,
        result.results.len()
    );
    let _ = writeln!(out);

    for step in &result.results {
        let _ = writeln!(
            out,
            "## {}. {} — {}",
            step.section_number,
            step.title,
            if step.success { "ok" } else { "failed" }
        );
        for instruction in &step.instructions {
            let marker = if instruction.success { "x" } else { " " };
            let _ = writeln!(out, "- [{marker}] {}", instruction.instruction);
            for action in &instruction.actions {
                if !action.command.is_empty() {
                    let _ = writeln!(
                        out,
                        "    - `{}` → exit {}",
                        action.command,
                        action
                            .exit_code
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "-".into())
                    );
                }
            }
            if let Some(recovery) = &instruction.recovery {
                let _ = writeln!(
                    out,
                    "    - recovery `{}`: {}",
                    recovery.command,
                    if recovery.success { "succeeded" } else { "failed" }
                );
            }
        }
        let _ = writeln!(out);
    }

    if result.error_summary.total_errors > 0 {
        let _ = writeln!(out, "## Errors");
        for (kind, count) in &result.error_summary.errors_by_kind {
            let _ = writeln!(out, "- {kind}: {count}");
        }
        for remediation in &result.error_summary.remediation {
            let _ = writeln!(out, "- suggestion: {remediation}");
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_result(success: bool) -> ExecutionResult {
        let now = Utc::now();
        ExecutionResult {
            run_id: Uuid::new_v4(),
            tutorial_title: "demo".into(),
            success,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            steps_executed: 1,
            results: vec![StepResult {
                section_number: 1,
                title: "setup".into(),
                success,
                instructions: vec![],
            }],
            quality_score: if success { 100.0 } else { 0.0 },
            performance: PerformanceMetrics::default(),
            error_summary: ErrorSummary::default(),
        }
    }

    #[test]
    fn error_summary_totals_by_kind() {
        let mut summary = ErrorSummary::default();
        summary.record(&ErrorRecord {
            kind: ErrorKind::Timeout,
            message: "step timed out".into(),
            component: "executor".into(),
            recoverable: true,
        });
        summary.record(&ErrorRecord {
            kind: ErrorKind::Timeout,
            message: "another timeout".into(),
            component: "executor".into(),
            recoverable: true,
        });
        summary.record(&ErrorRecord {
            kind: ErrorKind::Permission,
            message: "sudo rejected".into(),
            component: "safety".into(),
            recoverable: false,
        });

        assert_eq!(summary.total_errors, 3);
        assert_eq!(summary.errors_by_kind["timeout"], 2);
        assert_eq!(summary.errors_by_kind["permission"], 1);
        assert_eq!(summary.critical_errors, vec!["sudo rejected".to_string()]);
        assert!(!summary.remediation.is_empty());
    }

    #[tokio::test]
    async fn reports_written_per_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReportingConfig {
            enabled: true,
            output_formats: vec![ReportFormat::Json, ReportFormat::Markdown],
            output_path: dir.path().to_path_buf(),
            ..ReportingConfig::default()
        };
        let result = minimal_result(true);

        let written = write_reports(&result, &config).await.unwrap();
        assert_eq!(written.len(), 2);

        let json = tokio::fs::read_to_string(&written[0]).await.unwrap();
        let parsed: ExecutionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);

        let markdown = tokio::fs::read_to_string(&written[1]).await.unwrap();
        assert!(markdown.contains("# Tutorial run: demo"));
    }

    #[tokio::test]
    async fn disabled_reporting_writes_nothing() {
        let result = minimal_result(false);
        let written = write_reports(&result, &ReportingConfig::default())
            .await
            .unwrap();
        assert!(written.is_empty());
    }
}
