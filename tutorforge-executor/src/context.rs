//! Tutorial run context.
//!
//! A [`TutorialContext`] threads through interpretation and execution,
//! accumulating executed commands, their outputs, created files and
//! environment variables. Once its serialized size crosses the
//! compression threshold, the interpreter asks a provider to summarize
//! it; the latest few commands and outputs are always kept verbatim.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tutorforge_providers_sdk::models::{CompressedContext, RequestContext};

/// Aggregate size above which the interpreter requests compression.
pub const COMPRESSION_THRESHOLD_BYTES: usize = 5 * 1024;

/// Commands and outputs always kept verbatim through compression.
pub const KEEP_VERBATIM: usize = 5;

/// Accumulated state of one tutorial run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TutorialContext {
    /// Directory the run operates in
    pub working_directory: String,
    /// Commands executed so far, oldest first
    pub executed_commands: Vec<String>,
    /// Outputs of the executed commands, index-aligned
    pub previous_outputs: Vec<String>,
    /// Files created so far
    pub created_files: Vec<String>,
    /// Environment variables visible to commands
    pub environment: HashMap<String, String>,
    /// Summary replacing compressed-away history
    pub summary: Option<String>,
}

impl TutorialContext {
    /// Create a context rooted at the given working directory.
    pub fn new(working_directory: impl Into<String>) -> Self {
        Self {
            working_directory: working_directory.into(),
            ..Self::default()
        }
    }

    /// Record one executed command and its output.
    pub fn record_command(&mut self, command: impl Into<String>, output: impl Into<String>) {
        self.executed_commands.push(command.into());
        self.previous_outputs.push(output.into());
    }

    /// Record files created by a command.
    pub fn record_created_files<I, S>(&mut self, files: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.created_files.extend(files.into_iter().map(Into::into));
    }

    /// Approximate serialized size in bytes.
    pub fn approximate_size(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }

    /// Whether the context has outgrown the compression threshold.
    pub fn needs_compression(&self) -> bool {
        self.approximate_size() > COMPRESSION_THRESHOLD_BYTES
    }

    /// The provider-facing view of this context.
    pub fn to_request_context(&self) -> RequestContext {
        let keep = self.executed_commands.len().saturating_sub(KEEP_VERBATIM);
        let mut metadata = HashMap::new();
        if let Some(summary) = &self.summary {
            metadata.insert("history_summary".to_string(), summary.clone());
        }
        RequestContext {
            working_directory: self.working_directory.clone(),
            recent_commands: self.executed_commands[keep..].to_vec(),
            recent_outputs: self.previous_outputs[keep..].to_vec(),
            environment: self.environment.clone(),
            created_files: self.created_files.clone(),
            metadata,
        }
    }

    /// Replace the bulk of the history with a provider summary, keeping
    /// the latest [`KEEP_VERBATIM`] commands and outputs verbatim.
    pub fn apply_compression(&mut self, compressed: CompressedContext) {
        let keep = self.executed_commands.len().saturating_sub(KEEP_VERBATIM);
        self.executed_commands.drain(..keep);
        self.previous_outputs
            .drain(..keep.min(self.previous_outputs.len()));
        self.summary = Some(compressed.summary);
        if !compressed.key_files.is_empty() {
            self.created_files = compressed.key_files;
        }
    }
}
