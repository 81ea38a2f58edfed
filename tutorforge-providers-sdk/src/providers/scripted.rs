//! Deterministic in-process provider adapter.
//!
//! Answers capability calls from canned rules instead of a network
//! backend. Used by the certifier for dry runs and throughout the test
//! suites, where repeatable behavior matters more than intelligence.
//!
//! Behavior is data-driven: substring-matched parse and interpretation
//! rules, a scripted queue of failures for resilience testing, optional
//! simulated latency, and a configurable pricing table.

use crate::error::ProviderError;
use crate::models::{
    Action, CompressedContext, ErrorCandidate, ErrorInterpretation, ExpectedValue,
    ParsedInstruction, RequestContext, RequestType, ValidationOutcome,
};
use crate::providers::{CostModel, Provider};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// A canned parse answer keyed by an instruction substring.
#[derive(Debug, Clone)]
pub struct ParseRule {
    /// Substring the instruction must contain
    pub contains: String,
    /// Result returned when the rule matches
    pub result: ParsedInstruction,
}

/// A canned interpretation keyed by an error-message substring.
#[derive(Debug, Clone)]
pub struct InterpretRule {
    /// Substring the error message must contain
    pub contains: String,
    /// Interpretation returned when the rule matches
    pub result: ErrorInterpretation,
}

/// Scripted failure kinds for the error queue.
#[derive(Debug, Clone)]
pub enum ScriptedFailure {
    /// Retry-eligible failure
    Transient,
    /// Deadline failure
    Timeout,
    /// Non-retriable failure
    Permanent,
    /// Throttled, with an optional reset time
    RateLimited(Option<chrono::DateTime<chrono::Utc>>),
}

impl ScriptedFailure {
    fn to_error(&self) -> ProviderError {
        match self {
            ScriptedFailure::Transient => ProviderError::Transient {
                message: "scripted transient failure".into(),
            },
            ScriptedFailure::Timeout => ProviderError::Timeout,
            ScriptedFailure::Permanent => ProviderError::Permanent {
                message: "scripted permanent failure".into(),
            },
            ScriptedFailure::RateLimited(reset_at) => ProviderError::RateLimited {
                reset_at: *reset_at,
            },
        }
    }
}

/// Deterministic provider adapter driven by canned rules.
pub struct ScriptedProvider {
    name: String,
    capabilities: Vec<String>,
    regions: Vec<String>,
    parse_rules: Vec<ParseRule>,
    refusal_markers: Vec<String>,
    default_confidence: f64,
    interpret_rules: Vec<InterpretRule>,
    validation: ValidationOutcome,
    cost_model: CostModel,
    simulated_latency: Option<Duration>,
    // Failures consumed before any capability call succeeds
    failure_queue: Mutex<VecDeque<ScriptedFailure>>,
    // Outcomes consumed by health probes; empty queue means healthy
    health_queue: Mutex<VecDeque<Result<(), ScriptedFailure>>>,
}

impl ScriptedProvider {
    /// Start building a scripted provider with the given name.
    pub fn builder(name: impl Into<String>) -> ScriptedProviderBuilder {
        ScriptedProviderBuilder::new(name)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.simulated_latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn next_failure(&self) -> Option<ProviderError> {
        self.failure_queue
            .lock()
            .expect("failure queue poisoned")
            .pop_front()
            .map(|f| f.to_error())
    }

    fn is_refused(&self, instruction: &str) -> bool {
        let lowered = instruction.to_lowercase();
        self.refusal_markers
            .iter()
            .any(|marker| lowered.contains(&marker.to_lowercase()))
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    fn regions(&self) -> Vec<String> {
        self.regions.clone()
    }

    async fn parse_instruction(
        &self,
        instruction: &str,
        _context: &RequestContext,
    ) -> Result<ParsedInstruction, ProviderError> {
        self.simulate_latency().await;
        if let Some(err) = self.next_failure() {
            return Err(err);
        }

        if self.is_refused(instruction) {
            return Ok(ParsedInstruction {
                intent: format!("refused: {instruction}"),
                actions: Vec::new(),
                prerequisites: Vec::new(),
                expected_outcomes: Vec::new(),
                confidence: 1.0,
            });
        }

        for rule in &self.parse_rules {
            if instruction.contains(&rule.contains) {
                return Ok(rule.result.clone());
            }
        }

        // Unmatched instructions become a single verbatim command
        Ok(ParsedInstruction {
            intent: instruction.to_string(),
            actions: vec![Action::command(instruction, instruction)],
            prerequisites: Vec::new(),
            expected_outcomes: Vec::new(),
            confidence: self.default_confidence,
        })
    }

    async fn validate_expectation(
        &self,
        expected: &ExpectedValue,
        actual: &str,
        _context: &RequestContext,
    ) -> Result<ValidationOutcome, ProviderError> {
        self.simulate_latency().await;
        if let Some(err) = self.next_failure() {
            return Err(err);
        }

        // Text expectations get a real substring check; everything else
        // falls back to the configured verdict
        if let ExpectedValue::Text(needle) = expected {
            let matched = actual.contains(needle.as_str());
            return Ok(ValidationOutcome {
                matched,
                confidence: self.validation.confidence,
                rationale: if matched {
                    format!("output contains {needle:?}")
                } else {
                    format!("output does not contain {needle:?}")
                },
            });
        }
        Ok(self.validation.clone())
    }

    async fn compress_context(
        &self,
        full_context: &RequestContext,
    ) -> Result<CompressedContext, ProviderError> {
        self.simulate_latency().await;
        if let Some(err) = self.next_failure() {
            return Err(err);
        }

        let commands = full_context.recent_commands.len();
        Ok(CompressedContext {
            summary: format!(
                "{} commands executed in {}",
                commands, full_context.working_directory
            ),
            key_files: full_context.created_files.iter().take(5).cloned().collect(),
        })
    }

    async fn interpret_error(
        &self,
        error_message: &str,
        _context: &RequestContext,
    ) -> Result<ErrorInterpretation, ProviderError> {
        self.simulate_latency().await;
        if let Some(err) = self.next_failure() {
            return Err(err);
        }

        for rule in &self.interpret_rules {
            if error_message.contains(&rule.contains) {
                return Ok(rule.result.clone());
            }
        }

        Ok(ErrorInterpretation {
            candidates: vec![ErrorCandidate {
                explanation: format!("unrecognized failure: {error_message}"),
                recovery_commands: Vec::new(),
                likelihood: 0.3,
            }],
        })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.simulate_latency().await;
        let next = self
            .health_queue
            .lock()
            .expect("health queue poisoned")
            .pop_front();
        match next {
            Some(Ok(())) | None => Ok(()),
            Some(Err(failure)) => Err(failure.to_error()),
        }
    }

    fn estimate_cost(&self, request_type: RequestType) -> f64 {
        self.cost_model.per_request(request_type)
    }
}

/// Builder for [`ScriptedProvider`].
pub struct ScriptedProviderBuilder {
    name: String,
    capabilities: Vec<String>,
    regions: Vec<String>,
    parse_rules: Vec<ParseRule>,
    refusal_markers: Vec<String>,
    default_confidence: f64,
    interpret_rules: Vec<InterpretRule>,
    validation: ValidationOutcome,
    cost_model: CostModel,
    simulated_latency: Option<Duration>,
    failures: VecDeque<ScriptedFailure>,
    health_outcomes: VecDeque<Result<(), ScriptedFailure>>,
}

impl ScriptedProviderBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: vec![
                "parse_instruction".to_string(),
                "validate_expectation".to_string(),
                "compress_context".to_string(),
                "interpret_error".to_string(),
            ],
            regions: vec!["global".to_string()],
            parse_rules: Vec::new(),
            refusal_markers: Vec::new(),
            default_confidence: 0.75,
            interpret_rules: Vec::new(),
            validation: ValidationOutcome {
                matched: true,
                confidence: 0.9,
                rationale: "scripted verdict".to_string(),
            },
            cost_model: CostModel::default(),
            simulated_latency: None,
            failures: VecDeque::new(),
            health_outcomes: VecDeque::new(),
        }
    }

    /// Replace the declared capabilities.
    pub fn capabilities(mut self, capabilities: Vec<String>) -> Self {
        if !capabilities.is_empty() {
            self.capabilities = capabilities;
        }
        self
    }

    /// Replace the served regions.
    pub fn regions(mut self, regions: Vec<String>) -> Self {
        if !regions.is_empty() {
            self.regions = regions;
        }
        self
    }

    /// Answer instructions containing `contains` with `result`.
    pub fn on_parse(mut self, contains: impl Into<String>, result: ParsedInstruction) -> Self {
        self.parse_rules.push(ParseRule {
            contains: contains.into(),
            result,
        });
        self
    }

    /// Refuse instructions containing `marker` (no actions returned).
    pub fn refuse_containing(mut self, marker: impl Into<String>) -> Self {
        self.refusal_markers.push(marker.into());
        self
    }

    /// Confidence reported for unmatched instructions.
    pub fn default_confidence(mut self, confidence: f64) -> Self {
        self.default_confidence = confidence;
        self
    }

    /// Answer error messages containing `contains` with `result`.
    pub fn on_interpret(
        mut self,
        contains: impl Into<String>,
        result: ErrorInterpretation,
    ) -> Self {
        self.interpret_rules.push(InterpretRule {
            contains: contains.into(),
            result,
        });
        self
    }

    /// Verdict returned for non-text expectations.
    pub fn validation_outcome(mut self, outcome: ValidationOutcome) -> Self {
        self.validation = outcome;
        self
    }

    /// Replace the pricing table.
    pub fn cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = cost_model;
        self
    }

    /// Sleep this long before answering any call.
    pub fn simulated_latency(mut self, latency: Duration) -> Self {
        self.simulated_latency = Some(latency);
        self
    }

    /// Queue a failure consumed by the next capability call.
    pub fn fail_next(mut self, failure: ScriptedFailure) -> Self {
        self.failures.push_back(failure);
        self
    }

    /// Queue `count` transient failures.
    pub fn fail_next_n(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.failures.push_back(ScriptedFailure::Transient);
        }
        self
    }

    /// Queue a health-probe outcome; once the queue drains, probes succeed.
    pub fn health_outcome(mut self, outcome: Result<(), ScriptedFailure>) -> Self {
        self.health_outcomes.push_back(outcome);
        self
    }

    /// Finish building.
    pub fn build(self) -> ScriptedProvider {
        ScriptedProvider {
            name: self.name,
            capabilities: self.capabilities,
            regions: self.regions,
            parse_rules: self.parse_rules,
            refusal_markers: self.refusal_markers,
            default_confidence: self.default_confidence,
            interpret_rules: self.interpret_rules,
            validation: self.validation,
            cost_model: self.cost_model,
            simulated_latency: self.simulated_latency,
            failure_queue: Mutex::new(self.failures),
            health_queue: Mutex::new(self.health_outcomes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parse_rule_takes_precedence_over_default() {
        let provider = ScriptedProvider::builder("stub")
            .on_parse(
                "install",
                ParsedInstruction {
                    intent: "install dependencies".into(),
                    actions: vec![Action::command("make install", "run installer")],
                    prerequisites: vec!["make present".into()],
                    expected_outcomes: vec![],
                    confidence: 0.95,
                },
            )
            .build();

        let parsed = provider
            .parse_instruction("install the tool", &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(parsed.intent, "install dependencies");

        let fallback = provider
            .parse_instruction("echo hello", &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(fallback.actions[0].shell(), Some("echo hello"));
    }

    #[tokio::test]
    async fn refusal_markers_return_no_actions() {
        let provider = ScriptedProvider::builder("stub")
            .refuse_containing("rm -rf /")
            .build();

        let parsed = provider
            .parse_instruction("please run rm -rf / now", &RequestContext::default())
            .await
            .unwrap();
        assert!(parsed.actions.is_empty());
        assert!(parsed.intent.starts_with("refused"));
    }

    #[tokio::test]
    async fn failure_queue_drains_in_order() {
        let provider = ScriptedProvider::builder("stub")
            .fail_next(ScriptedFailure::Transient)
            .fail_next(ScriptedFailure::Permanent)
            .build();

        let first = provider
            .parse_instruction("x", &RequestContext::default())
            .await
            .unwrap_err();
        assert!(first.is_retryable());

        let second = provider
            .parse_instruction("x", &RequestContext::default())
            .await
            .unwrap_err();
        assert!(!second.is_retryable());

        assert!(provider
            .parse_instruction("x", &RequestContext::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn text_expectations_use_substring_match() {
        let provider = ScriptedProvider::builder("stub").build();
        let outcome = provider
            .validate_expectation(
                &ExpectedValue::Text("Hello".into()),
                "Hello, world",
                &RequestContext::default(),
            )
            .await
            .unwrap();
        assert!(outcome.matched);

        let outcome = provider
            .validate_expectation(
                &ExpectedValue::Text("absent".into()),
                "Hello, world",
                &RequestContext::default(),
            )
            .await
            .unwrap();
        assert!(!outcome.matched);
    }

    #[tokio::test]
    async fn health_queue_then_healthy() {
        let provider = ScriptedProvider::builder("stub")
            .health_outcome(Err(ScriptedFailure::Timeout))
            .build();
        assert!(provider.health_check().await.is_err());
        assert!(provider.health_check().await.is_ok());
        assert!(provider.health_check().await.is_ok());
    }
}
