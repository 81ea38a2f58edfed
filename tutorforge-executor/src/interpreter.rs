//! # Interpretation Phase
//!
//! Turns a [`Tutorial`](crate::tutorial::Tutorial) into an
//! [`ExecutionPlan`]: every raw instruction goes through the router for
//! parsing into typed actions, and code examples are wrapped directly as
//! commands expected to exit zero. The tutorial context threads through
//! interpretation and is compressed through a provider once it outgrows
//! the threshold.

use crate::config::ExecutorConfig;
use crate::context::TutorialContext;
use crate::error::{ErrorKind, ExecutionError};
use crate::tutorial::Tutorial;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tutorforge_providers_sdk::models::{
    Action, ActionKind, ParsedInstruction, RequestType, ValidationRule,
};
use tutorforge_providers_sdk::router::{Router, RoutingRequest};

/// Confidence assigned to code examples wrapped without AI involvement.
const CODE_EXAMPLE_CONFIDENCE: f64 = 0.9;

/// Where a planned instruction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionOrigin {
    /// Parsed from natural-language text by a provider
    Parsed,
    /// Wrapped verbatim from a fenced code example
    CodeExample,
}

/// One interpreted instruction, ready to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedInstruction {
    /// The raw text this came from
    pub source: String,
    /// Whether it was AI-parsed or a wrapped code example
    pub origin: InstructionOrigin,
    /// The typed interpretation
    pub parsed: ParsedInstruction,
}

/// One plan step, mirroring a tutorial section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Source section number
    pub section_number: u32,
    /// Source section title
    pub title: String,
    /// Interpreted instructions, in document order
    pub instructions: Vec<PlannedInstruction>,
}

/// Ordered, read-only plan for a tutorial run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Source tutorial title
    pub tutorial_title: String,
    /// Ordered steps
    pub steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    /// Total planned instructions across steps.
    pub fn instruction_count(&self) -> usize {
        self.steps.iter().map(|s| s.instructions.len()).sum()
    }
}

/// Builds execution plans by routing instructions through providers.
pub struct Interpreter {
    router: Arc<Router>,
    routing_template: RoutingRequest,
}

impl Interpreter {
    /// Create an interpreter over the given router. `routing_template`
    /// carries the constraints (capabilities, region, caps) applied to
    /// every interpretation request.
    pub fn new(router: Arc<Router>, routing_template: RoutingRequest) -> Self {
        Self {
            router,
            routing_template,
        }
    }

    /// Interpret a tutorial into an execution plan.
    ///
    /// Under strict validation, an interpretation whose confidence falls
    /// below the configured threshold fails the whole phase.
    pub async fn interpret(
        &self,
        tutorial: &Tutorial,
        config: &ExecutorConfig,
        context: &mut TutorialContext,
    ) -> Result<ExecutionPlan, ExecutionError> {
        let mut steps = Vec::with_capacity(tutorial.sections.len());

        for section in &tutorial.sections {
            let mut instructions = Vec::new();

            for raw in &section.instructions {
                self.maybe_compress(context).await?;

                let parsed = self
                    .router
                    .parse_instruction(
                        &self.routing_template,
                        raw,
                        &context.to_request_context(),
                    )
                    .await
                    .map_err(|e| ExecutionError::from_router("interpreter", e))?;

                if config.strict_validation && parsed.confidence < config.validation_threshold {
                    return Err(ExecutionError::new(
                        ErrorKind::Validation,
                        "interpreter",
                        format!(
                            "interpretation confidence {:.2} below threshold {:.2} for {raw:?}",
                            parsed.confidence, config.validation_threshold
                        ),
                    ));
                }

                tracing::debug!(
                    section = section.number,
                    confidence = parsed.confidence,
                    actions = parsed.actions.len(),
                    "interpreted instruction"
                );
                instructions.push(PlannedInstruction {
                    source: raw.clone(),
                    origin: InstructionOrigin::Parsed,
                    parsed,
                });
            }

            for example in &section.code_examples {
                instructions.push(wrap_code_example(&example.code));
            }

            steps.push(PlanStep {
                section_number: section.number,
                title: section.title.clone(),
                instructions,
            });
        }

        Ok(ExecutionPlan {
            tutorial_title: tutorial.title.clone(),
            steps,
        })
    }

    async fn maybe_compress(&self, context: &mut TutorialContext) -> Result<(), ExecutionError> {
        if !context.needs_compression() {
            return Ok(());
        }
        let request = self.routing_template.retyped(RequestType::CompressContext);
        let compressed = self
            .router
            .compress_context(&request, &context.to_request_context())
            .await
            .map_err(|e| ExecutionError::from_router("interpreter", e))?;
        tracing::debug!(
            summary_len = compressed.summary.len(),
            "compressed tutorial context"
        );
        context.apply_compression(compressed);
        Ok(())
    }
}

/// Wrap a code example as a command expected to exit zero.
fn wrap_code_example(code: &str) -> PlannedInstruction {
    let shell = code.trim().to_string();
    PlannedInstruction {
        source: shell.clone(),
        origin: InstructionOrigin::CodeExample,
        parsed: ParsedInstruction {
            intent: "run documented code example".to_string(),
            actions: vec![
                Action {
                    kind: ActionKind::Command {
                        shell: shell.clone(),
                    },
                    description: format!("code example: {shell}"),
                    timeout: None,
                },
                Action {
                    kind: ActionKind::Validate {
                        rule: ValidationRule::ExitCode { code: 0 },
                    },
                    description: "code example exits cleanly".to_string(),
                    timeout: None,
                },
            ],
            prerequisites: Vec::new(),
            expected_outcomes: Vec::new(),
            confidence: CODE_EXAMPLE_CONFIDENCE,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tutorial::Section;
    use std::sync::Arc;
    use tutorforge_providers_sdk::circuit_breaker::CircuitBreakerConfig;
    use tutorforge_providers_sdk::monitor::{MonitorConfig, QualityMonitor};
    use tutorforge_providers_sdk::providers::scripted::ScriptedProvider;
    use tutorforge_providers_sdk::providers::{Provider, ProviderConfig};
    use tutorforge_providers_sdk::registry::ProviderRegistry;
    use tutorforge_providers_sdk::router::RouterConfig;

    async fn router_with(provider: ScriptedProvider) -> Arc<Router> {
        let registry = Arc::new(ProviderRegistry::new(CircuitBreakerConfig::default()));
        let name = provider.name().to_string();
        registry
            .register(Arc::new(provider), ProviderConfig::new(name))
            .await
            .unwrap();
        let monitor = QualityMonitor::new(Arc::clone(&registry), MonitorConfig::default());
        Arc::new(Router::new(registry, monitor, RouterConfig::default()))
    }

    fn template() -> RoutingRequest {
        RoutingRequest::new(RequestType::ParseInstruction)
    }

    #[tokio::test]
    async fn code_examples_become_exit_zero_commands() {
        let router = router_with(ScriptedProvider::builder("stub").build()).await;
        let interpreter = Interpreter::new(router, template());
        let tutorial = Tutorial::new("demo").with_section(
            Section::new(1, "setup").with_code_example("bash", "mkdir demo\n"),
        );
        let mut context = TutorialContext::new("/work");

        let plan = interpreter
            .interpret(&tutorial, &ExecutorConfig::default(), &mut context)
            .await
            .unwrap();

        let instruction = &plan.steps[0].instructions[0];
        assert_eq!(instruction.origin, InstructionOrigin::CodeExample);
        assert_eq!(instruction.parsed.confidence, CODE_EXAMPLE_CONFIDENCE);
        assert_eq!(instruction.parsed.actions[0].shell(), Some("mkdir demo"));
        assert!(matches!(
            instruction.parsed.actions[1].kind,
            ActionKind::Validate {
                rule: ValidationRule::ExitCode { code: 0 }
            }
        ));
    }

    #[tokio::test]
    async fn strict_validation_rejects_low_confidence() {
        let router = router_with(
            ScriptedProvider::builder("hesitant")
                .default_confidence(0.3)
                .build(),
        )
        .await;
        let interpreter = Interpreter::new(router, template());
        let tutorial = Tutorial::new("demo")
            .with_section(Section::new(1, "vague").with_instruction("do something unclear"));
        let config = ExecutorConfig {
            strict_validation: true,
            validation_threshold: 0.6,
            ..ExecutorConfig::default()
        };

        let err = interpreter
            .interpret(&tutorial, &config, &mut TutorialContext::new("/work"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn oversized_context_is_compressed_before_parsing() {
        let router = router_with(ScriptedProvider::builder("stub").build()).await;
        let interpreter = Interpreter::new(router, template());
        let tutorial = Tutorial::new("demo")
            .with_section(Section::new(1, "next").with_instruction("echo continue"));

        let mut context = TutorialContext::new("/work");
        for i in 0..60 {
            context.record_command(format!("setup-command-{i}"), "y".repeat(200));
        }
        assert!(context.needs_compression());

        interpreter
            .interpret(&tutorial, &ExecutorConfig::default(), &mut context)
            .await
            .unwrap();

        assert!(!context.needs_compression());
        assert!(context.summary.is_some());
        assert_eq!(
            context.executed_commands.len(),
            crate::context::KEEP_VERBATIM
        );
    }
}
