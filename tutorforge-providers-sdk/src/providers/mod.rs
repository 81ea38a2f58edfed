//! # Provider System Module
//!
//! The provider abstraction layer: a uniform capability surface over
//! heterogeneous AI backends, plus per-provider configuration and the
//! factory that builds adapters from config.
//!
//! ## Overview
//!
//! Every backend is wrapped in an adapter implementing the [`Provider`]
//! trait. The trait exposes exactly the operations the rest of the core
//! consumes:
//!
//! - **Instruction parsing**: raw tutorial text → typed actions
//! - **Expectation validation**: expected vs. observed outcome
//! - **Context compression**: summarize oversized run context
//! - **Error interpretation**: ranked fixes for an observed failure
//! - **Health checks**: lightweight, deadline-respecting liveness probes
//! - **Cost estimation**: pure function of request type and pricing table
//!
//! Adapters never surface backend-specific failures; they classify every
//! error into the classes in [`crate::error::ProviderError`] so the router
//! can reason about retries uniformly.
//!
//! ## Adapters
//!
//! - [`http::HttpProvider`] — generic JSON-over-HTTP backend
//! - [`scripted::ScriptedProvider`] — deterministic in-process backend for
//!   tests and certification dry runs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tutorforge_providers_sdk::providers::{create_provider, AdapterKind, ProviderConfig};
//! use std::time::Duration;
//!
//! let config = ProviderConfig::new("claude")
//!     .with_timeout(Duration::from_secs(30))
//!     .with_capabilities(["parse_instruction", "interpret_error"])
//!     .with_regions(["us-east-1", "global"]);
//!
//! let provider = create_provider(
//!     AdapterKind::Http { base_url: "https://ai.internal/v1".into(), api_key: "key".into() },
//!     &config,
//! )?;
//! ```

use crate::error::ProviderError;
use crate::models::{
    CompressedContext, ErrorInterpretation, ExpectedValue, ParsedInstruction, RequestContext,
    RequestType, ValidationOutcome,
};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub mod http;
pub mod scripted;

/// Uniform capability surface over an external AI backend.
///
/// Implementations must be cheap to clone behind an `Arc` and safe to call
/// concurrently; the registry stores them as trait objects.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider name; unique within a registry.
    fn name(&self) -> &str;

    /// Capabilities this backend declares (e.g. `"parse_instruction"`).
    fn capabilities(&self) -> Vec<String>;

    /// Regions this backend serves; `"global"` matches any request region.
    fn regions(&self) -> Vec<String>;

    /// Parse a natural-language instruction into typed actions.
    async fn parse_instruction(
        &self,
        instruction: &str,
        context: &RequestContext,
    ) -> Result<ParsedInstruction, ProviderError>;

    /// Judge whether an observed outcome satisfies an expectation.
    async fn validate_expectation(
        &self,
        expected: &ExpectedValue,
        actual: &str,
        context: &RequestContext,
    ) -> Result<ValidationOutcome, ProviderError>;

    /// Summarize an oversized context, keeping the files worth preserving.
    async fn compress_context(
        &self,
        full_context: &RequestContext,
    ) -> Result<CompressedContext, ProviderError>;

    /// Explain a failure and suggest recovery commands, ranked.
    async fn interpret_error(
        &self,
        error_message: &str,
        context: &RequestContext,
    ) -> Result<ErrorInterpretation, ProviderError>;

    /// Lightweight liveness probe. Callers bound it with their own
    /// deadline; implementations should answer quickly.
    async fn health_check(&self) -> Result<(), ProviderError>;

    /// Estimated cost in USD for a single request of the given type.
    /// Pure function of the type and the adapter's pricing table.
    fn estimate_cost(&self, request_type: RequestType) -> f64;
}

/// Per-request pricing table for an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Cost of a `parse_instruction` call in USD
    pub parse_instruction: f64,
    /// Cost of a `validate_expectation` call in USD
    pub validate_expectation: f64,
    /// Cost of a `compress_context` call in USD
    pub compress_context: f64,
    /// Cost of an `interpret_error` call in USD
    pub interpret_error: f64,
    /// Cost of any other call in USD
    pub other: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            parse_instruction: 0.003,
            validate_expectation: 0.0016,
            compress_context: 0.001,
            interpret_error: 0.0024,
            other: 0.002,
        }
    }
}

impl CostModel {
    /// Price for one request of the given type.
    pub fn per_request(&self, request_type: RequestType) -> f64 {
        match request_type {
            RequestType::ParseInstruction => self.parse_instruction,
            RequestType::ValidateExpectation => self.validate_expectation,
            RequestType::CompressContext => self.compress_context,
            RequestType::InterpretError => self.interpret_error,
            RequestType::HealthCheck | RequestType::Other => self.other,
        }
    }
}

/// Cost guard rails for a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLimit {
    /// Daily spend ceiling in USD; 0 disables the check
    pub daily: f64,
    /// Monthly spend ceiling in USD; 0 disables the check
    pub monthly: f64,
    /// Per-request ceiling in USD; 0 disables the check
    pub per_request: f64,
    /// Fraction of a ceiling at which an alert fires, in (0, 1]
    pub alert_threshold: f64,
}

impl Default for CostLimit {
    fn default() -> Self {
        Self {
            daily: 0.0,
            monthly: 0.0,
            per_request: 0.0,
            alert_threshold: 0.8,
        }
    }
}

/// Immutable per-provider configuration, fixed at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name; must match the adapter's `name()`
    pub name: String,
    /// Selection priority; higher wins under the priority strategy
    pub priority: i32,
    /// Weight for weighted-random selection, in [0, 1]
    pub weight: f64,
    /// Upper bound on concurrent in-flight requests
    pub max_concurrent: u32,
    /// Per-attempt deadline
    #[serde(with = "crate::duration_serde")]
    pub timeout: Duration,
    /// Retry behavior on transient failures
    pub retry_policy: RetryPolicy,
    /// Cost guard rails
    pub cost_limit: CostLimit,
    /// Declared capabilities
    pub capabilities: Vec<String>,
    /// Served regions; include `"global"` to match any request
    pub regions: Vec<String>,
}

impl ProviderConfig {
    /// Create a configuration with defaults for the given provider name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 50,
            weight: 1.0,
            max_concurrent: 10,
            timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            cost_limit: CostLimit::default(),
            capabilities: Vec::new(),
            regions: vec!["global".to_string()],
        }
    }

    /// Set the selection priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the weighted-selection weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Set the concurrent-request ceiling.
    pub fn with_max_concurrent(mut self, max_concurrent: u32) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the per-attempt deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Set the cost guard rails.
    pub fn with_cost_limit(mut self, cost_limit: CostLimit) -> Self {
        self.cost_limit = cost_limit;
        self
    }

    /// Set the declared capabilities.
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Set the served regions.
    pub fn with_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.regions = regions.into_iter().map(Into::into).collect();
        self
    }
}

/// Which adapter implementation to build for a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterKind {
    /// Generic JSON-over-HTTP backend
    Http {
        /// Base URL of the backend
        base_url: String,
        /// Bearer token; empty disables the auth header
        api_key: String,
    },
    /// Deterministic in-process backend for tests and dry runs
    Scripted,
}

/// Build a provider adapter from its kind and configuration.
pub fn create_provider(
    kind: AdapterKind,
    config: &ProviderConfig,
) -> Result<Arc<dyn Provider>, ProviderError> {
    match kind {
        AdapterKind::Http { base_url, api_key } => {
            let provider = http::HttpProvider::new(config.clone(), base_url, api_key)?;
            Ok(Arc::new(provider))
        }
        AdapterKind::Scripted => Ok(Arc::new(
            scripted::ScriptedProvider::builder(&config.name)
                .capabilities(config.capabilities.clone())
                .regions(config.regions.clone())
                .build(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_model_lookup() {
        let model = CostModel::default();
        assert!(
            model.per_request(RequestType::ParseInstruction)
                > model.per_request(RequestType::CompressContext)
        );
        assert_eq!(
            model.per_request(RequestType::HealthCheck),
            model.per_request(RequestType::Other)
        );
    }

    #[test]
    fn config_builder_chain() {
        let config = ProviderConfig::new("claude")
            .with_priority(100)
            .with_weight(0.6)
            .with_max_concurrent(4)
            .with_capabilities(["parse_instruction"])
            .with_regions(["us-east-1"]);

        assert_eq!(config.name, "claude");
        assert_eq!(config.priority, 100);
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.capabilities, vec!["parse_instruction"]);
        assert_eq!(config.regions, vec!["us-east-1"]);
    }

    #[test]
    fn factory_builds_scripted_adapter() {
        let config = ProviderConfig::new("stub").with_capabilities(["parse_instruction"]);
        let provider = create_provider(AdapterKind::Scripted, &config).unwrap();
        assert_eq!(provider.name(), "stub");
        assert!(provider
            .capabilities()
            .contains(&"parse_instruction".to_string()));
    }
}
