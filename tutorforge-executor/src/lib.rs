//! # Tutorforge Executor
//!
//! Turns natural-language tutorials into validated, safety-checked shell
//! execution. The executor decomposes a [`tutorial::Tutorial`] into typed
//! actions by routing instructions through AI providers, runs those
//! actions through a sandboxed [`runner::Runner`], validates every
//! outcome against declarative rules, recovers from failures with
//! provider-interpreted fixes, and emits a structured
//! [`report::ExecutionResult`].
//!
//! ## Pipeline
//!
//! ```text
//! Tutorial → Interpreter (Router → Provider) → ExecutionPlan
//!          → TutorialExecutor (Runner + Router) → ExecutionResult
//! ```
//!
//! ## Guarantees
//!
//! - Steps, instructions and actions run strictly sequentially within a
//!   run; concurrency happens across runs, each in its own working
//!   directory
//! - Every command string passes the safety gate before any process is
//!   spawned, recovery fixes and cleanup commands included
//! - Working-directory paths never escape the configured root while the
//!   safety mode is enforcing
//! - Deadlines are hierarchical (tutorial ≥ instruction ≥ command); the
//!   shortest effective deadline wins
//! - A failed run returns a fully populated result with its error
//!   summary; partial progress is never discarded

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod interpreter;
pub mod report;
pub mod resources;
pub mod runner;
pub mod safety;
pub mod tutorial;
pub mod validation;

pub use config::{
    ErrorHandlingMode, ExecutionEnvironment, ExecutorConfig, SafetyMode, ValidationMode,
};
pub use context::TutorialContext;
pub use error::{ErrorKind, ExecutionError};
pub use executor::{OperatorCallback, OperatorDecision, TutorialExecutor};
pub use hooks::{ExecutionHooks, HookEvent};
pub use interpreter::{ExecutionPlan, Interpreter};
pub use report::ExecutionResult;
pub use runner::{CommandOutcome, Runner};
pub use safety::SafetyGate;
pub use tutorial::{Section, Tutorial};
