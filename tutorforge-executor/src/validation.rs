//! Outcome validation.
//!
//! Applies declarative [`ValidationRule`]s to a command's observable
//! outcome. File-existence checks resolve relative to the run's working
//! directory and, whenever the safety mode is enforcing, refuse paths
//! that would escape it. `Custom` rules are judged by a provider and are
//! handled by the executor, not here.

use crate::config::SafetyMode;
use crate::error::{ErrorKind, ExecutionError};
use crate::runner::CommandOutcome;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tutorforge_providers_sdk::models::ValidationRule;

/// What a rule check concluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    /// The rule that was applied
    pub rule: ValidationRule,
    /// Whether it held
    pub passed: bool,
    /// Human-readable detail
    pub detail: String,
}

/// Apply one rule to a command outcome.
///
/// `Custom` rules return an internal error here; the executor routes them
/// to a provider instead.
pub fn apply_rule(
    rule: &ValidationRule,
    outcome: &CommandOutcome,
    working_dir: &Path,
    safety_mode: &SafetyMode,
) -> Result<ValidationRecord, ExecutionError> {
    let (passed, detail) = match rule {
        ValidationRule::ExitCode { code } => (
            outcome.exit_code == *code,
            format!("exit code {} (expected {})", outcome.exit_code, code),
        ),
        ValidationRule::FileExists { path } => {
            let resolved = resolve_within_root(working_dir, path, safety_mode.is_enforcing())?;
            (
                resolved.exists(),
                format!("path {} {}", resolved.display(), if resolved.exists() { "exists" } else { "missing" }),
            )
        }
        ValidationRule::OutputContains { needle } => (
            outcome.stdout.contains(needle.as_str()),
            format!("stdout {} {needle:?}", if outcome.stdout.contains(needle.as_str()) { "contains" } else { "lacks" }),
        ),
        ValidationRule::Regex { pattern } => {
            let regex = regex::Regex::new(pattern).map_err(|e| {
                ExecutionError::new(
                    ErrorKind::Validation,
                    "validation",
                    format!("invalid validation regex {pattern:?}: {e}"),
                )
            })?;
            (
                regex.is_match(&outcome.stdout),
                format!("stdout {} /{pattern}/", if regex.is_match(&outcome.stdout) { "matches" } else { "does not match" }),
            )
        }
        ValidationRule::Custom { expectation } => {
            return Err(ExecutionError::new(
                ErrorKind::Internal,
                "validation",
                format!("custom rule {expectation:?} must be judged by a provider"),
            ));
        }
    };

    Ok(ValidationRecord {
        rule: rule.clone(),
        passed,
        detail,
    })
}

/// Resolve `path` against `root`, lexically normalizing `.` and `..`.
///
/// When `enforce` is set, a result outside `root` is a permission error;
/// this is what keeps validation (and the run as a whole) inside the
/// configured working directory under any enforcing safety mode.
pub fn resolve_within_root(
    root: &Path,
    path: &str,
    enforce: bool,
) -> Result<PathBuf, ExecutionError> {
    let candidate = Path::new(path);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(Component::ParentDir);
                }
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }

    if enforce && !normalized.starts_with(root) {
        return Err(ExecutionError::new(
            ErrorKind::Permission,
            "validation",
            format!(
                "path {path:?} escapes the working directory {}",
                root.display()
            ),
        )
        .recoverable(false));
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(exit_code: i32, stdout: &str) -> CommandOutcome {
        CommandOutcome {
            exit_code,
            stdout: stdout.to_string(),
            ..CommandOutcome::default()
        }
    }

    #[test]
    fn exit_code_compares_numerically() {
        let record = apply_rule(
            &ValidationRule::ExitCode { code: 0 },
            &outcome(0, ""),
            Path::new("/work"),
            &SafetyMode::Basic,
        )
        .unwrap();
        assert!(record.passed);

        let record = apply_rule(
            &ValidationRule::ExitCode { code: 0 },
            &outcome(2, ""),
            Path::new("/work"),
            &SafetyMode::Basic,
        )
        .unwrap();
        assert!(!record.passed);
    }

    #[test]
    fn output_contains_and_regex() {
        let out = outcome(0, "installed 3 packages\n");
        assert!(apply_rule(
            &ValidationRule::OutputContains {
                needle: "installed".into()
            },
            &out,
            Path::new("/work"),
            &SafetyMode::Basic,
        )
        .unwrap()
        .passed);

        assert!(apply_rule(
            &ValidationRule::Regex {
                pattern: r"installed \d+ packages".into()
            },
            &out,
            Path::new("/work"),
            &SafetyMode::Basic,
        )
        .unwrap()
        .passed);

        assert!(apply_rule(
            &ValidationRule::Regex {
                pattern: "(unclosed".into()
            },
            &out,
            Path::new("/work"),
            &SafetyMode::Basic,
        )
        .is_err());
    }

    #[test]
    fn file_exists_resolves_relative_to_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("result.txt"), "ok").unwrap();

        let record = apply_rule(
            &ValidationRule::FileExists {
                path: "result.txt".into(),
            },
            &outcome(0, ""),
            dir.path(),
            &SafetyMode::Basic,
        )
        .unwrap();
        assert!(record.passed);

        let record = apply_rule(
            &ValidationRule::FileExists {
                path: "missing.txt".into(),
            },
            &outcome(0, ""),
            dir.path(),
            &SafetyMode::Basic,
        )
        .unwrap();
        assert!(!record.passed);
    }

    #[test]
    fn escaping_paths_are_rejected_when_enforcing() {
        let err = resolve_within_root(Path::new("/work/run"), "../../etc/passwd", true)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Permission);
        assert!(!err.recoverable);

        // Dotted paths that stay inside the root are fine
        let resolved =
            resolve_within_root(Path::new("/work/run"), "sub/../result.txt", true).unwrap();
        assert_eq!(resolved, PathBuf::from("/work/run/result.txt"));

        // With safety off, escapes resolve without complaint
        assert!(resolve_within_root(Path::new("/work/run"), "../../etc/passwd", false).is_ok());
    }

    #[test]
    fn custom_rules_are_not_judged_locally() {
        let err = apply_rule(
            &ValidationRule::Custom {
                expectation: "service is reachable".into(),
            },
            &outcome(0, ""),
            Path::new("/work"),
            &SafetyMode::Basic,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }
}
