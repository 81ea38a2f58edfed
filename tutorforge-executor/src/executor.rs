//! # Tutorial Execution Engine
//!
//! Drives an interpreted tutorial to completion: strictly sequential
//! across steps, instructions and actions, with hierarchical deadlines,
//! a pre-execution safety gate on every command, configurable outcome
//! validation, failure recovery through provider error interpretation,
//! resource tracking, cleanup and structured reporting.
//!
//! Parallelism happens across concurrent tutorial runs, never inside
//! one: each run owns an isolated working directory and its own context.
//!
//! A failed run still returns a fully populated
//! [`ExecutionResult`](crate::report::ExecutionResult) with
//! `success = false`; partial progress is never discarded. `Err` from
//! [`TutorialExecutor::execute`] is reserved for setup problems (invalid
//! configuration, unusable working directory).

use crate::config::{ErrorHandlingMode, ExecutorConfig, ValidationMode};
use crate::context::TutorialContext;
use crate::error::{ErrorKind, ErrorRecord, ExecutionError};
use crate::hooks::{ExecutionHooks, HookEvent};
use crate::interpreter::{Interpreter, PlanStep, PlannedInstruction};
use crate::report::{
    ActionResult, ErrorSummary, ExecutionResult, InstructionResult, PerformanceMetrics,
    RecoveryRecord, StepResult,
};
use crate::resources::ResourceUsage;
use crate::runner::{create_runner, CommandOutcome, Runner};
use crate::safety::SafetyGate;
use crate::tutorial::Tutorial;
use crate::validation::{apply_rule, ValidationRecord};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tutorforge_providers_sdk::models::{
    Action, ActionKind, ExpectedValue, ValidationRule,
};
use tutorforge_providers_sdk::router::{Router, RoutingRequest};
use tutorforge_providers_sdk::models::RequestType;
use uuid::Uuid;

/// What an operator tells the executor to do with a failed action.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorDecision {
    /// Run the action once more
    Retry,
    /// Skip the action and continue the instruction
    Skip,
    /// Abort the whole run
    Abort,
    /// Run this command instead (screened like any other)
    Substitute(String),
}

/// Operator callback for `ErrorHandlingMode::Interactive`.
pub type OperatorCallback =
    Arc<dyn Fn(&ErrorRecord, &Action) -> OperatorDecision + Send + Sync>;

/// How a finished instruction directs the rest of the run.
enum Control {
    /// Keep executing
    Proceed,
    /// Stop everything after the current step
    AbortRun,
}

/// Mutable bookkeeping for one run.
struct RunState {
    usage: ResourceUsage,
    summary: ErrorSummary,
    command_durations_ms: Vec<u64>,
    run_deadline: Instant,
}

impl RunState {
    fn record_error(&mut self, err: &ExecutionError) -> ErrorRecord {
        let record = ErrorRecord::from(err);
        self.summary.record(&record);
        record
    }

    fn remaining(&self) -> Duration {
        self.run_deadline.saturating_duration_since(Instant::now())
    }
}

/// Executes tutorials against a router and a command runner.
pub struct TutorialExecutor {
    router: Arc<Router>,
    runner: Arc<dyn Runner>,
    config: ExecutorConfig,
    gate: SafetyGate,
    hooks: ExecutionHooks,
    operator: Option<OperatorCallback>,
    routing_template: RoutingRequest,
}

impl TutorialExecutor {
    /// Create an executor with the runner implied by the configured
    /// environment.
    pub fn new(router: Arc<Router>, config: ExecutorConfig) -> Result<Self, ExecutionError> {
        config.validate()?;
        let runner = create_runner(&config)?;
        Ok(Self::with_runner(router, config, runner))
    }

    /// Create an executor over an explicit runner backend.
    pub fn with_runner(
        router: Arc<Router>,
        config: ExecutorConfig,
        runner: Arc<dyn Runner>,
    ) -> Self {
        let gate = SafetyGate::new(config.safety_mode.clone());
        Self {
            router,
            runner,
            config,
            gate,
            hooks: ExecutionHooks::new(),
            operator: None,
            routing_template: RoutingRequest::new(RequestType::ParseInstruction),
        }
    }

    /// Attach boundary hooks.
    pub fn with_hooks(mut self, hooks: ExecutionHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Attach the operator callback used by interactive error handling.
    pub fn with_operator(mut self, operator: OperatorCallback) -> Self {
        self.operator = Some(operator);
        self
    }

    /// Constrain routing for every AI call this executor makes.
    pub fn with_routing_template(mut self, template: RoutingRequest) -> Self {
        self.routing_template = template;
        self
    }

    /// Execute a tutorial end to end.
    pub async fn execute(&self, tutorial: &Tutorial) -> Result<ExecutionResult, ExecutionError> {
        let run_id = Uuid::new_v4();
        let run_dir = self
            .config
            .working_directory
            .join(format!("run-{run_id}"));
        tokio::fs::create_dir_all(&run_dir).await.map_err(|e| {
            ExecutionError::new(
                ErrorKind::Internal,
                "executor",
                format!("cannot create run directory {}: {e}", run_dir.display()),
            )
        })?;

        let started_at = Utc::now();
        let started = Instant::now();
        let mut state = RunState {
            usage: ResourceUsage::default(),
            summary: ErrorSummary::default(),
            command_durations_ms: Vec::new(),
            run_deadline: started + self.config.timeout_policy.total,
        };
        let mut context = TutorialContext::new(run_dir.display().to_string());

        self.hooks.fire(&HookEvent::TutorialStarted {
            title: tutorial.title.clone(),
        });
        tracing::info!(run_id = %run_id, tutorial = %tutorial.title, "starting tutorial run");

        // Interpretation phase
        let interpreter = Interpreter::new(Arc::clone(&self.router), self.routing_template.clone());
        let plan = match interpreter
            .interpret(tutorial, &self.config, &mut context)
            .await
        {
            Ok(plan) => plan,
            Err(err) => {
                self.hooks.fire(&HookEvent::ErrorOccurred {
                    message: err.to_string(),
                });
                state.record_error(&err);
                let result = self.finish(
                    run_id,
                    &tutorial.title,
                    started_at,
                    started,
                    0,
                    Vec::new(),
                    state,
                    &mut context,
                    &run_dir,
                    false,
                )
                .await;
                return Ok(result);
            }
        };

        // Execution phase: strictly sequential
        let mut step_results = Vec::with_capacity(plan.steps.len());
        let mut aborted = false;
        for step in &plan.steps {
            self.hooks.fire(&HookEvent::StepStarted {
                section_number: step.section_number,
                title: step.title.clone(),
            });

            let (result, control) = self
                .execute_step(step, &run_dir, &mut context, &mut state)
                .await;

            self.hooks.fire(&HookEvent::StepFinished {
                section_number: step.section_number,
                success: result.success,
            });
            step_results.push(result);

            if matches!(control, Control::AbortRun) {
                aborted = true;
                break;
            }
        }

        let steps_executed = step_results.len();
        let success = !aborted && step_results.iter().all(|s| s.success);
        let result = self
            .finish(
                run_id,
                &plan.tutorial_title,
                started_at,
                started,
                steps_executed,
                step_results,
                state,
                &mut context,
                &run_dir,
                success,
            )
            .await;
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        run_id: Uuid,
        title: &str,
        started_at: chrono::DateTime<Utc>,
        started: Instant,
        steps_executed: usize,
        results: Vec<StepResult>,
        state: RunState,
        context: &mut TutorialContext,
        run_dir: &Path,
        success: bool,
    ) -> ExecutionResult {
        self.cleanup(success, context, run_dir).await;

        let total_actions: usize = results
            .iter()
            .flat_map(|s| &s.instructions)
            .map(|i| i.actions.len())
            .sum();
        let successful_actions: usize = results
            .iter()
            .flat_map(|s| &s.instructions)
            .flat_map(|i| &i.actions)
            .filter(|a| a.success)
            .count();
        let quality_score = if total_actions == 0 {
            if success {
                100.0
            } else {
                0.0
            }
        } else {
            successful_actions as f64 / total_actions as f64 * 100.0
        };

        let avg = if state.command_durations_ms.is_empty() {
            0.0
        } else {
            state.command_durations_ms.iter().sum::<u64>() as f64
                / state.command_durations_ms.len() as f64
        };

        let finished_at = Utc::now();
        let result = ExecutionResult {
            run_id,
            tutorial_title: title.to_string(),
            success,
            started_at,
            finished_at,
            duration_ms: started.elapsed().as_millis() as u64,
            steps_executed,
            results,
            quality_score,
            performance: PerformanceMetrics {
                total_commands: state.usage.processes_created,
                avg_command_duration_ms: avg,
                resources: state.usage,
            },
            error_summary: state.summary,
        };

        self.hooks.fire(&HookEvent::TutorialFinished {
            title: title.to_string(),
            success,
        });
        tracing::info!(
            run_id = %run_id,
            success,
            quality = result.quality_score,
            "tutorial run finished"
        );

        if self.config.reporting.enabled {
            if let Err(err) = crate::report::write_reports(&result, &self.config.reporting).await {
                tracing::warn!(error = %err, "failed to write execution reports");
            }
        }

        result
    }

    async fn execute_step(
        &self,
        step: &PlanStep,
        run_dir: &Path,
        context: &mut TutorialContext,
        state: &mut RunState,
    ) -> (StepResult, Control) {
        let mut instruction_results = Vec::with_capacity(step.instructions.len());
        let mut control = Control::Proceed;

        for instruction in &step.instructions {
            self.hooks.fire(&HookEvent::InstructionStarted {
                source: instruction.source.clone(),
            });

            let (result, instr_control) = self
                .execute_instruction(instruction, run_dir, context, state)
                .await;

            self.hooks.fire(&HookEvent::InstructionFinished {
                source: instruction.source.clone(),
                success: result.success,
            });

            let failed = !result.success;
            instruction_results.push(result);

            if matches!(instr_control, Control::AbortRun) {
                control = Control::AbortRun;
                break;
            }
            if failed && self.config.error_handling == ErrorHandlingMode::Fail {
                control = Control::AbortRun;
                break;
            }
        }

        let success = instruction_results.iter().all(|i| i.success);
        (
            StepResult {
                section_number: step.section_number,
                title: step.title.clone(),
                success,
                instructions: instruction_results,
            },
            control,
        )
    }

    async fn execute_instruction(
        &self,
        instruction: &PlannedInstruction,
        run_dir: &Path,
        context: &mut TutorialContext,
        state: &mut RunState,
    ) -> (InstructionResult, Control) {
        let instruction_deadline = Instant::now()
            + self
                .config
                .timeout_policy
                .instruction
                .min(state.remaining());
        let mut actions = Vec::with_capacity(instruction.parsed.actions.len());
        let mut warnings = Vec::new();
        let mut recovery = None;
        let mut last_outcome: Option<CommandOutcome> = None;
        let mut failed = false;
        let mut control = Control::Proceed;

        for action in &instruction.parsed.actions {
            self.hooks.fire(&HookEvent::ActionStarted {
                description: action.description.clone(),
            });

            let mut result = self
                .execute_action(action, run_dir, instruction_deadline, context, state, &mut last_outcome, &mut warnings)
                .await;

            // Failure handling per the configured mode
            if !result.success {
                if let Some(record) = result.error.clone() {
                    self.hooks.fire(&HookEvent::ErrorOccurred {
                        message: record.message.clone(),
                    });

                    if record.kind.is_critical() {
                        actions.push(result);
                        failed = true;
                        control = Control::AbortRun;
                        break;
                    }

                    match self.config.error_handling {
                        ErrorHandlingMode::Recover if record.recoverable => {
                            let (recovered, record_of_recovery) = self
                                .attempt_recovery(
                                    action,
                                    &result,
                                    run_dir,
                                    instruction_deadline,
                                    context,
                                    state,
                                    &mut last_outcome,
                                    &mut warnings,
                                )
                                .await;
                            if let Some(rec) = record_of_recovery {
                                state.summary.recovery_attempts += 1;
                                if rec.success {
                                    state.summary.recovery_successes += 1;
                                }
                                self.hooks.fire(&HookEvent::RecoveryAttempted {
                                    command: rec.command.clone(),
                                    success: rec.success,
                                });
                                recovery = Some(rec);
                            }
                            if let Some(new_result) = recovered {
                                result = new_result;
                            }
                        }
                        ErrorHandlingMode::Interactive => {
                            if let Some(operator) = &self.operator {
                                match operator(&record, action) {
                                    OperatorDecision::Retry => {
                                        let retried = self
                                            .execute_action(
                                                action,
                                                run_dir,
                                                instruction_deadline,
                                                context,
                                                state,
                                                &mut last_outcome,
                                                &mut warnings,
                                            )
                                            .await;
                                        result = retried;
                                    }
                                    OperatorDecision::Skip => {
                                        warnings.push(format!(
                                            "operator skipped failing action {:?}",
                                            action.description
                                        ));
                                        actions.push(result);
                                        continue;
                                    }
                                    OperatorDecision::Abort => {
                                        actions.push(result);
                                        failed = true;
                                        control = Control::AbortRun;
                                        break;
                                    }
                                    OperatorDecision::Substitute(command) => {
                                        let substitute = Action::command(
                                            command,
                                            format!("operator substitute for {:?}", action.description),
                                        );
                                        result = self
                                            .execute_action(
                                                &substitute,
                                                run_dir,
                                                instruction_deadline,
                                                context,
                                                state,
                                                &mut last_outcome,
                                                &mut warnings,
                                            )
                                            .await;
                                    }
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }

            self.hooks.fire(&HookEvent::ActionFinished {
                description: action.description.clone(),
                success: result.success,
            });

            let action_failed = !result.success;
            actions.push(result);
            if action_failed {
                failed = true;
                // Fail mode aborts at the step boundary; continue/recover
                // move on to the next instruction
                break;
            }
        }

        (
            InstructionResult {
                instruction: instruction.source.clone(),
                success: !failed,
                actions,
                recovery,
                warnings,
            },
            control,
        )
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_action(
        &self,
        action: &Action,
        run_dir: &Path,
        instruction_deadline: Instant,
        context: &mut TutorialContext,
        state: &mut RunState,
        last_outcome: &mut Option<CommandOutcome>,
        warnings: &mut Vec<String>,
    ) -> ActionResult {
        let start_time = Utc::now();

        let (success, command, exit_code, stdout, stderr, error, validation) = match &action.kind {
            ActionKind::Command { shell } => {
                let outcome = self
                    .run_command(shell, action.timeout, run_dir, instruction_deadline, context, state)
                    .await;
                match outcome {
                    Ok(outcome) => {
                        let success = outcome.success();
                        let stdout = outcome.stdout.clone();
                        let stderr = outcome.stderr.clone();
                        let exit_code = outcome.exit_code;
                        let error = if success {
                            None
                        } else {
                            let err = ExecutionError::new(
                                ErrorKind::Validation,
                                "executor",
                                format!("command {shell:?} exited {exit_code}"),
                            );
                            Some(state.record_error(&err))
                        };
                        *last_outcome = Some(outcome);
                        (success, shell.clone(), Some(exit_code), stdout, stderr, error, None)
                    }
                    Err(err) => {
                        let record = state.record_error(&err);
                        (false, shell.clone(), None, String::new(), String::new(), Some(record), None)
                    }
                }
            }
            ActionKind::Validate { rule } => {
                let (record, error) = self
                    .validate_outcome(rule, run_dir, context, state, last_outcome.as_ref(), warnings)
                    .await;
                let passed = record.as_ref().map(|r| r.passed).unwrap_or(false);
                let disposition_ok = error.is_none();
                (
                    passed || disposition_ok,
                    String::new(),
                    None,
                    String::new(),
                    String::new(),
                    error,
                    record,
                )
            }
            ActionKind::Check { predicate } => {
                let actual = last_outcome
                    .as_ref()
                    .map(|o| o.stdout.clone())
                    .unwrap_or_default();
                match self
                    .router
                    .validate_expectation(
                        &self.routing_template,
                        &ExpectedValue::Text(predicate.clone()),
                        &actual,
                        &context.to_request_context(),
                    )
                    .await
                {
                    Ok(outcome) => {
                        let record = ValidationRecord {
                            rule: ValidationRule::Custom {
                                expectation: predicate.clone(),
                            },
                            passed: outcome.matched,
                            detail: outcome.rationale,
                        };
                        self.hooks.fire(&HookEvent::ValidationChecked {
                            passed: record.passed,
                            detail: record.detail.clone(),
                        });
                        let error = if record.passed {
                            None
                        } else {
                            let err = ExecutionError::new(
                                ErrorKind::Validation,
                                "executor",
                                format!("check failed: {predicate}"),
                            );
                            Some(state.record_error(&err))
                        };
                        (record.passed, String::new(), None, String::new(), String::new(), error, Some(record))
                    }
                    Err(router_err) => {
                        let err = ExecutionError::from_router("executor", router_err);
                        let record = state.record_error(&err);
                        (false, String::new(), None, String::new(), String::new(), Some(record), None)
                    }
                }
            }
        };

        let end_time = Utc::now();
        ActionResult {
            description: action.description.clone(),
            command,
            exit_code,
            stdout: if self.config.reporting.include_stdout {
                stdout
            } else {
                String::new()
            },
            stderr: if self.config.reporting.include_stderr {
                stderr
            } else {
                String::new()
            },
            success,
            start_time,
            end_time,
            duration_ms: (end_time - start_time).num_milliseconds().max(0) as u64,
            error,
            validation,
        }
    }

    /// Screen, run and account for one shell command.
    async fn run_command(
        &self,
        shell: &str,
        action_timeout: Option<Duration>,
        run_dir: &Path,
        instruction_deadline: Instant,
        context: &mut TutorialContext,
        state: &mut RunState,
    ) -> Result<CommandOutcome, ExecutionError> {
        // Safety gate runs before anything is spawned
        self.gate.screen(shell)?;

        let remaining_run = state.remaining();
        let remaining_instruction =
            instruction_deadline.saturating_duration_since(Instant::now());
        if remaining_run.is_zero() || remaining_instruction.is_zero() {
            return Err(ExecutionError::new(
                ErrorKind::Timeout,
                "executor",
                format!("no time left in the run for command {shell:?}"),
            ));
        }
        // Shortest effective deadline wins
        let mut deadline = self
            .config
            .timeout_policy
            .command
            .min(remaining_instruction)
            .min(remaining_run);
        if let Some(action_timeout) = action_timeout {
            deadline = deadline.min(action_timeout);
        }

        let started = Instant::now();
        let outcome = self
            .runner
            .execute(shell, &context.environment, run_dir, deadline)
            .await?;
        state
            .command_durations_ms
            .push(started.elapsed().as_millis() as u64);

        context.record_command(shell, outcome.stdout.clone());
        context.record_created_files(
            outcome
                .created_files
                .iter()
                .map(|p| p.display().to_string()),
        );
        state.usage.record(&outcome);
        state.usage.check(&self.config.resource_limits)?;

        Ok(outcome)
    }

    /// Apply a validation rule under the configured validation mode.
    ///
    /// Returns the validation record plus an error when the failure
    /// should fail the action.
    async fn validate_outcome(
        &self,
        rule: &ValidationRule,
        run_dir: &Path,
        context: &TutorialContext,
        state: &mut RunState,
        last_outcome: Option<&CommandOutcome>,
        warnings: &mut Vec<String>,
    ) -> (Option<ValidationRecord>, Option<ErrorRecord>) {
        let Some(outcome) = last_outcome else {
            let err = ExecutionError::new(
                ErrorKind::Validation,
                "executor",
                "validation rule with no preceding command outcome",
            );
            return (None, Some(state.record_error(&err)));
        };

        let record = match rule {
            ValidationRule::Custom { expectation } => {
                match self
                    .router
                    .validate_expectation(
                        &self.routing_template,
                        &ExpectedValue::Text(expectation.clone()),
                        &outcome.stdout,
                        &context.to_request_context(),
                    )
                    .await
                {
                    Ok(verdict) => ValidationRecord {
                        rule: rule.clone(),
                        passed: verdict.matched,
                        detail: verdict.rationale,
                    },
                    Err(router_err) => {
                        let err = ExecutionError::from_router("executor", router_err);
                        return (None, Some(state.record_error(&err)));
                    }
                }
            }
            _ => match apply_rule(rule, outcome, run_dir, &self.config.safety_mode) {
                Ok(record) => record,
                Err(err) => {
                    return (None, Some(state.record_error(&err)));
                }
            },
        };

        self.hooks.fire(&HookEvent::ValidationChecked {
            passed: record.passed,
            detail: record.detail.clone(),
        });

        if record.passed {
            return (Some(record), None);
        }

        match self.config.validation_mode {
            ValidationMode::Strict => {
                let err = ExecutionError::new(
                    ErrorKind::Validation,
                    "executor",
                    format!("validation failed: {}", record.detail),
                );
                (Some(record), Some(state.record_error(&err)))
            }
            ValidationMode::Lenient => {
                warnings.push(format!("validation warning: {}", record.detail));
                (Some(record), None)
            }
            ValidationMode::Adaptive => {
                // Defer to a provider verdict; its confidence decides
                let verdict = self
                    .router
                    .validate_expectation(
                        &self.routing_template,
                        &ExpectedValue::Text(record.detail.clone()),
                        &outcome.stdout,
                        &context.to_request_context(),
                    )
                    .await;
                match verdict {
                    Ok(v) if v.matched && v.confidence >= self.config.validation_threshold => {
                        warnings.push(format!(
                            "validation accepted adaptively ({:.2}): {}",
                            v.confidence, record.detail
                        ));
                        (Some(record), None)
                    }
                    _ => {
                        let err = ExecutionError::new(
                            ErrorKind::Validation,
                            "executor",
                            format!("validation failed: {}", record.detail),
                        );
                        (Some(record), Some(state.record_error(&err)))
                    }
                }
            }
        }
    }

    /// One recovery attempt for a failed command action: interpret the
    /// failure, run the top ranked fix (screened), then re-run the
    /// original action once.
    #[allow(clippy::too_many_arguments)]
    async fn attempt_recovery(
        &self,
        action: &Action,
        failed_result: &ActionResult,
        run_dir: &Path,
        instruction_deadline: Instant,
        context: &mut TutorialContext,
        state: &mut RunState,
        last_outcome: &mut Option<CommandOutcome>,
        warnings: &mut Vec<String>,
    ) -> (Option<ActionResult>, Option<RecoveryRecord>) {
        // Only command failures are recoverable this way
        let Some(shell) = action.shell() else {
            return (None, None);
        };

        let error_message = if failed_result.stderr.is_empty() {
            failed_result
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| format!("command {shell:?} failed"))
        } else {
            failed_result.stderr.clone()
        };

        let interpretation = match self
            .router
            .interpret_error(
                &self.routing_template,
                &error_message,
                &context.to_request_context(),
            )
            .await
        {
            Ok(interpretation) => interpretation,
            Err(router_err) => {
                let err = ExecutionError::from_router("executor", router_err);
                state.record_error(&err);
                return (None, None);
            }
        };

        let Some(fix) = interpretation
            .top()
            .and_then(|candidate| candidate.recovery_commands.first())
            .cloned()
        else {
            tracing::debug!(command = %shell, "no recovery command suggested");
            return (None, None);
        };

        // The fix is screened like any other command
        if let Err(err) = self.gate.screen(&fix) {
            state.record_error(&err);
            return (
                None,
                Some(RecoveryRecord {
                    kind: "fix".into(),
                    command: fix,
                    success: false,
                }),
            );
        }

        let fix_outcome = self
            .run_command(&fix, None, run_dir, instruction_deadline, context, state)
            .await;
        let fix_ok = matches!(&fix_outcome, Ok(outcome) if outcome.success());
        if !fix_ok {
            if let Err(err) = fix_outcome {
                state.record_error(&err);
            }
            return (
                None,
                Some(RecoveryRecord {
                    kind: "fix".into(),
                    command: fix,
                    success: false,
                }),
            );
        }

        // Fix succeeded: re-run the original action once
        let rerun = self
            .execute_action(
                action,
                run_dir,
                instruction_deadline,
                context,
                state,
                last_outcome,
                warnings,
            )
            .await;
        let success = rerun.success;
        (
            Some(rerun),
            Some(RecoveryRecord {
                kind: "fix".into(),
                command: fix,
                success,
            }),
        )
    }

    async fn cleanup(&self, success: bool, context: &mut TutorialContext, run_dir: &Path) {
        let policy = &self.config.cleanup_policy;
        let should_clean = (success && policy.on_success) || (!success && policy.on_failure);
        if !should_clean {
            return;
        }

        for file in &context.created_files {
            let path = PathBuf::from(file);
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if policy.preserve_files.iter().any(|p| *p == name || *p == *file) {
                continue;
            }
            if let Err(err) = tokio::fs::remove_file(&path).await {
                tracing::debug!(file = %file, error = %err, "cleanup could not remove file");
            }
        }

        for command in &policy.custom_cleanup {
            // Custom cleanup obeys the same safety rules as every command
            if let Err(err) = self.gate.screen(command) {
                tracing::warn!(command = %command, error = %err, "cleanup command rejected by safety gate");
                continue;
            }
            let outcome = self
                .runner
                .execute(
                    command,
                    &context.environment,
                    run_dir,
                    self.config.timeout_policy.command,
                )
                .await;
            if let Err(err) = outcome {
                tracing::warn!(command = %command, error = %err, "cleanup command failed");
            }
        }
    }
}
