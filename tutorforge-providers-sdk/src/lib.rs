//! # Tutorforge Providers SDK
//!
//! Multi-provider AI routing and quality assurance for the tutorforge
//! platform. The SDK maintains a pool of heterogeneous AI backends,
//! selects the best one for each request under quality, cost, latency and
//! capability constraints, continuously measures provider health and
//! performance, and certifies providers against reproducible test
//! batteries.
//!
//! ## Overview
//!
//! - **Provider adapters**: a uniform capability surface (parse
//!   instructions, validate expectations, compress context, interpret
//!   errors) over any AI backend
//! - **Registry**: the indexed pool of registered adapters with their
//!   configs, live status and streaming metrics, guarded by one
//!   readers-writer lock
//! - **Router**: quality/cost/latency/capability-aware provider selection
//!   with seven strategies, per-provider retry policies, circuit breakers
//!   and fallback chains
//! - **Monitor**: periodic parallel health probes, EWMA metric
//!   aggregation, threshold events on an in-memory publish-subscribe bus
//! - **Certifier**: fixed test batteries scored across six categories,
//!   assigning gold/silver/bronze tiers with expiry
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tutorforge_providers_sdk::{
//!     circuit_breaker::CircuitBreakerConfig,
//!     models::{RequestContext, RequestType},
//!     monitor::{MonitorConfig, QualityMonitor},
//!     providers::{create_provider, AdapterKind, ProviderConfig},
//!     registry::ProviderRegistry,
//!     router::{Router, RouterConfig, RoutingRequest},
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Arc::new(ProviderRegistry::new(CircuitBreakerConfig::default()));
//!
//!     let config = ProviderConfig::new("claude")
//!         .with_priority(100)
//!         .with_capabilities(["parse_instruction", "interpret_error"]);
//!     let adapter = create_provider(
//!         AdapterKind::Http {
//!             base_url: "https://ai.internal/v1".into(),
//!             api_key: std::env::var("CLAUDE_KEY")?,
//!         },
//!         &config,
//!     )?;
//!     registry.register(adapter, config).await?;
//!
//!     let monitor = QualityMonitor::new(Arc::clone(&registry), MonitorConfig::default());
//!     Arc::clone(&monitor).start();
//!
//!     let router = Router::new(registry, monitor, RouterConfig::default());
//!     let request = RoutingRequest::new(RequestType::ParseInstruction);
//!     let parsed = router
//!         .parse_instruction(&request, "Install the toolchain", &RequestContext::default())
//!         .await?;
//!     println!("intent: {}", parsed.intent);
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency model
//!
//! One `tokio::sync::RwLock` protects the provider map; reads (candidate
//! scans) and writes (metric updates, breaker transitions) hold it
//! briefly. The monitor runs two long-lived loops plus one ephemeral task
//! per probe, so a slow probe of one provider never delays another.
//! Every outbound call is bounded by the provider's configured deadline;
//! cancelled attempts release their concurrency slot and breaker trial
//! without crediting a success or failure.

pub mod certifier;
pub mod circuit_breaker;
pub mod duration_serde;
pub mod error;
pub mod metrics;
pub mod models;
pub mod monitor;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod router;

pub use certifier::{
    Certification, CertificationSuite, CertificationTier, Certifier, CertifierConfig,
};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{CertificationError, ProviderError, RouterError};
pub use metrics::{ProviderMetrics, RequestOutcome};
pub use models::{
    Action, ActionKind, CompressedContext, ErrorInterpretation, ExpectedValue, ParsedInstruction,
    RequestContext, RequestType, ValidationOutcome, ValidationRule,
};
pub use monitor::{MonitorConfig, MonitorEvent, QualityMonitor, Severity};
pub use providers::{create_provider, AdapterKind, Provider, ProviderConfig};
pub use registry::{HealthState, ProviderRegistry, ProviderSnapshot, ProviderStatus};
pub use retry::RetryPolicy;
pub use router::{Router, RouterConfig, RoutingRequest, RoutingResult, RoutingStrategy};
