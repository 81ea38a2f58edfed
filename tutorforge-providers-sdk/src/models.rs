//! # Capability Surface Models
//!
//! Request and response types exchanged with AI provider adapters. Every
//! provider, regardless of backend, speaks these four operations:
//!
//! - **Parse instruction**: natural-language instruction → typed actions
//! - **Validate expectation**: expected vs. actual outcome comparison
//! - **Compress context**: summarize an oversized request context
//! - **Interpret error**: ranked explanations with recovery commands
//!
//! The types here are deliberately backend-neutral: adapters translate them
//! to and from whatever wire format their service expects.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// The kind of work a routed request asks a provider to perform.
///
/// Used for cost estimation (each type carries its own pricing multiplier)
/// and for routing statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Turn a raw instruction into typed actions
    ParseInstruction,
    /// Compare an expected outcome against an observed one
    ValidateExpectation,
    /// Summarize an oversized tutorial context
    CompressContext,
    /// Explain a failure and suggest recovery commands
    InterpretError,
    /// Liveness probe
    HealthCheck,
    /// Anything else (certification probes, custom calls)
    Other,
}

/// Context handed to a provider alongside a request.
///
/// Accumulated by the caller (the tutorial executor threads one of these
/// through a whole run); providers use it to disambiguate instructions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Working directory the instructions operate in
    #[serde(default)]
    pub working_directory: String,
    /// Most recent commands executed, oldest first
    #[serde(default)]
    pub recent_commands: Vec<String>,
    /// Outputs of the most recent commands, index-aligned with `recent_commands`
    #[serde(default)]
    pub recent_outputs: Vec<String>,
    /// Environment variables visible to the instructions
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Files created so far in the enclosing run
    #[serde(default)]
    pub created_files: Vec<String>,
    /// Free-form metadata (section title, tutorial name, ...)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RequestContext {
    /// Approximate serialized size in bytes, used to decide when the
    /// context needs compression.
    pub fn approximate_size(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }
}

/// A typed, executable primitive produced by instruction parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// What this action does
    pub kind: ActionKind,
    /// Human-readable description
    pub description: String,
    /// Optional per-action deadline; the executor clamps this against its
    /// own timeout policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl Action {
    /// Convenience constructor for a shell command action.
    pub fn command(shell: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Command {
                shell: shell.into(),
            },
            description: description.into(),
            timeout: None,
        }
    }

    /// The shell string if this is a command action.
    pub fn shell(&self) -> Option<&str> {
        match &self.kind {
            ActionKind::Command { shell } => Some(shell),
            _ => None,
        }
    }
}

/// Action variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Run a shell command
    Command {
        /// The shell string to execute
        shell: String,
    },
    /// Apply a validation rule to the previous action's outcome
    Validate {
        /// The rule to apply
        rule: ValidationRule,
    },
    /// Evaluate a human-readable predicate (delegated to a provider)
    Check {
        /// The predicate text
        predicate: String,
    },
}

/// Declarative predicate checked against a command's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationRule {
    /// Exit code must equal the given value
    ExitCode { code: i32 },
    /// Path, resolved against the working directory, must exist
    FileExists { path: String },
    /// Stdout must contain the given substring
    OutputContains { needle: String },
    /// Stdout must match the given regular expression
    Regex { pattern: String },
    /// Free-form expectation judged by a provider
    Custom { expectation: String },
}

/// Expected value in a validation request.
///
/// Sources mix strings, booleans and numbers freely; the tagged variant
/// keeps that explicit instead of stringly-typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedValue {
    /// Boolean expectation
    Flag(bool),
    /// Numeric expectation
    Number(f64),
    /// Plain text expectation
    Text(String),
    /// Structured expectation (JSON document)
    Structured(serde_json::Value),
}

/// Result of parsing a natural-language instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedInstruction {
    /// One-line summary of what the instruction intends
    pub intent: String,
    /// Ordered actions implementing the instruction
    pub actions: Vec<Action>,
    /// Conditions that should hold before the actions run
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// Outcomes the author expects after the actions run
    #[serde(default)]
    pub expected_outcomes: Vec<String>,
    /// Provider confidence in this parse, in [0, 1]
    pub confidence: f64,
}

/// Result of comparing an expected outcome against an observed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Whether the actual outcome satisfies the expectation
    pub matched: bool,
    /// Provider confidence in the verdict, in [0, 1]
    pub confidence: f64,
    /// Short explanation of the verdict
    pub rationale: String,
}

/// Result of compressing an oversized context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedContext {
    /// Summary replacing the bulk of the context
    pub summary: String,
    /// Files worth preserving verbatim
    #[serde(default)]
    pub key_files: Vec<String>,
}

/// A ranked explanation for an observed failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorCandidate {
    /// What likely went wrong
    pub explanation: String,
    /// Commands that may fix the problem, in suggested order
    #[serde(default)]
    pub recovery_commands: Vec<String>,
    /// Relative likelihood of this explanation, in [0, 1]
    pub likelihood: f64,
}

/// Provider interpretation of an error message.
///
/// Candidates are ordered most-likely first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInterpretation {
    /// Ranked candidate explanations
    pub candidates: Vec<ErrorCandidate>,
}

impl ErrorInterpretation {
    /// The highest-ranked candidate, if any.
    pub fn top(&self) -> Option<&ErrorCandidate> {
        self.candidates.first()
    }
}

/// Confidence reported by a typed provider response, when it carries one.
///
/// The router records this into the provider's metrics after each request;
/// responses without an intrinsic confidence contribute nothing.
pub trait ResponseMeta {
    /// Confidence in [0, 1], if the response type carries one.
    fn confidence(&self) -> Option<f64> {
        None
    }
}

impl ResponseMeta for ParsedInstruction {
    fn confidence(&self) -> Option<f64> {
        Some(self.confidence)
    }
}

impl ResponseMeta for ValidationOutcome {
    fn confidence(&self) -> Option<f64> {
        Some(self.confidence)
    }
}

impl ResponseMeta for CompressedContext {}

impl ResponseMeta for ErrorInterpretation {}

impl ResponseMeta for () {}
