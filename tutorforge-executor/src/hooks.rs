//! Execution hooks.
//!
//! Optional observer callbacks fired at every execution boundary. Hooks
//! are strictly observational: a hook that panics is logged and the run
//! continues.

use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// A boundary notification.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HookEvent {
    TutorialStarted { title: String },
    TutorialFinished { title: String, success: bool },
    StepStarted { section_number: u32, title: String },
    StepFinished { section_number: u32, success: bool },
    InstructionStarted { source: String },
    InstructionFinished { source: String, success: bool },
    ActionStarted { description: String },
    ActionFinished { description: String, success: bool },
    ErrorOccurred { message: String },
    ValidationChecked { passed: bool, detail: String },
    RecoveryAttempted { command: String, success: bool },
}

/// Observer callback type.
pub type Hook = Arc<dyn Fn(&HookEvent) + Send + Sync>;

/// A set of registered hooks.
#[derive(Clone, Default)]
pub struct ExecutionHooks {
    hooks: Vec<Hook>,
}

impl ExecutionHooks {
    /// No hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook, returning `self` for chaining.
    pub fn with_hook(mut self, hook: Hook) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Fire an event at every hook. Panicking hooks are logged and
    /// skipped; they never abort execution.
    pub fn fire(&self, event: &HookEvent) {
        for hook in &self.hooks {
            if catch_unwind(AssertUnwindSafe(|| hook(event))).is_err() {
                tracing::warn!(event = ?event, "execution hook panicked; continuing");
            }
        }
    }
}

impl std::fmt::Debug for ExecutionHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHooks")
            .field("count", &self.hooks.len())
            .finish()
    }
}
