//! Router integration tests: strategy selection, viability filtering,
//! retry and fallback behavior, and breaker interaction.

use std::sync::Arc;
use std::time::Duration;

use tutorforge_providers_sdk::circuit_breaker::CircuitBreakerConfig;
use tutorforge_providers_sdk::error::RouterError;
use tutorforge_providers_sdk::metrics::ProviderMetrics;
use tutorforge_providers_sdk::models::{RequestContext, RequestType};
use tutorforge_providers_sdk::monitor::{MonitorConfig, QualityMonitor};
use tutorforge_providers_sdk::providers::scripted::{ScriptedFailure, ScriptedProvider, ScriptedProviderBuilder};
use tutorforge_providers_sdk::providers::ProviderConfig;
use tutorforge_providers_sdk::registry::ProviderRegistry;
use tutorforge_providers_sdk::retry::RetryPolicy;
use tutorforge_providers_sdk::router::{Router, RouterConfig, RoutingRequest, RoutingStrategy};

struct Harness {
    registry: Arc<ProviderRegistry>,
    router: Router,
}

fn harness(router_config: RouterConfig, breaker: CircuitBreakerConfig) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
    let registry = Arc::new(ProviderRegistry::new(breaker));
    let monitor = QualityMonitor::new(Arc::clone(&registry), MonitorConfig::default());
    let router = Router::new(Arc::clone(&registry), monitor, router_config);
    Harness { registry, router }
}

async fn register(
    harness: &Harness,
    name: &str,
    config: ProviderConfig,
    build: impl FnOnce(ScriptedProviderBuilder) -> ScriptedProviderBuilder,
) {
    let provider = Arc::new(build(ScriptedProvider::builder(name)).build());
    harness.registry.register(provider, config).await.unwrap();
}

fn metrics(
    accuracy: f64,
    success_rate: f64,
    avg_latency_ms: f64,
    avg_cost: f64,
) -> ProviderMetrics {
    ProviderMetrics {
        request_count: 100,
        success_rate,
        error_rate: 1.0 - success_rate,
        avg_latency_ms,
        avg_cost,
        confidence_score: 0.9,
        accuracy_score: accuracy,
        token_efficiency: 0.8,
        last_updated: Some(chrono::Utc::now()),
    }
}

/// Two providers with contrasting profiles: strategy choice decides.
async fn contrasting_pair(harness: &Harness) {
    register(
        harness,
        "provider-a",
        ProviderConfig::new("provider-a")
            .with_priority(100)
            .with_max_concurrent(10),
        |b| b,
    )
    .await;
    register(
        harness,
        "provider-b",
        ProviderConfig::new("provider-b")
            .with_priority(90)
            .with_max_concurrent(10),
        |b| b,
    )
    .await;

    harness
        .registry
        .restore_metrics("provider-a", metrics(0.95, 0.99, 1000.0, 0.005))
        .await
        .unwrap();
    harness
        .registry
        .restore_metrics("provider-b", metrics(0.90, 0.70, 500.0, 0.002))
        .await
        .unwrap();
}

#[tokio::test]
async fn strategy_matrix_on_contrasting_providers() {
    let h = harness(RouterConfig::default(), CircuitBreakerConfig::default());
    contrasting_pair(&h).await;

    // Load 1/10 on provider-a
    let _permit = h.registry.try_acquire_slot("provider-a").await.unwrap();

    let base = RoutingRequest::new(RequestType::ParseInstruction);

    let quality = h
        .router
        .route(&base.clone().with_strategy(RoutingStrategy::QualityFirst))
        .await
        .unwrap();
    assert_eq!(quality.provider, "provider-a");

    let priority = h
        .router
        .route(&base.clone().with_strategy(RoutingStrategy::Priority))
        .await
        .unwrap();
    assert_eq!(priority.provider, "provider-a");

    let cost = h
        .router
        .route(&base.clone().with_strategy(RoutingStrategy::CostOptimal))
        .await
        .unwrap();
    assert_eq!(cost.provider, "provider-b");

    let latency = h
        .router
        .route(&base.clone().with_strategy(RoutingStrategy::LatencyFirst))
        .await
        .unwrap();
    assert_eq!(latency.provider, "provider-b");

    // Accuracy-weighted composite keeps the higher-quality provider ahead
    let intelligent = h
        .router
        .route(&base.clone().with_strategy(RoutingStrategy::Intelligent))
        .await
        .unwrap();
    assert_eq!(intelligent.provider, "provider-a");
    assert_eq!(intelligent.alternatives, vec!["provider-b".to_string()]);
    assert!(intelligent.quality_score > 0.9);
}

#[tokio::test]
async fn routing_result_estimates_apply_cost_multiplier() -> anyhow::Result<()> {
    let h = harness(RouterConfig::default(), CircuitBreakerConfig::default());
    contrasting_pair(&h).await;

    let request = RoutingRequest::new(RequestType::ParseInstruction)
        .with_strategy(RoutingStrategy::QualityFirst);
    let result = h.router.route(&request).await?;
    // parse_instruction multiplies avg cost by 1.5
    assert!((result.estimated_cost - 0.005 * 1.5).abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn capability_and_region_filters() {
    let h = harness(RouterConfig::default(), CircuitBreakerConfig::default());
    register(
        &h,
        "regional",
        ProviderConfig::new("regional")
            .with_capabilities(["parse_instruction"])
            .with_regions(["eu-west-1"]),
        |b| b,
    )
    .await;

    // Capability mismatch
    let request = RoutingRequest::new(RequestType::ParseInstruction)
        .with_required_capabilities(["interpret_error"]);
    assert!(matches!(
        h.router.route(&request).await,
        Err(RouterError::NoViableProvider { .. })
    ));

    // Region mismatch
    let request =
        RoutingRequest::new(RequestType::ParseInstruction).with_region("us-east-1");
    assert!(matches!(
        h.router.route(&request).await,
        Err(RouterError::NoViableProvider { .. })
    ));

    // Matching region and capability
    let request = RoutingRequest::new(RequestType::ParseInstruction)
        .with_required_capabilities(["parse_instruction"])
        .with_region("eu-west-1");
    assert_eq!(h.router.route(&request).await.unwrap().provider, "regional");
}

#[tokio::test]
async fn global_region_matches_any_request() {
    let h = harness(RouterConfig::default(), CircuitBreakerConfig::default());
    register(
        &h,
        "global",
        ProviderConfig::new("global").with_regions(["global"]),
        |b| b,
    )
    .await;

    let request =
        RoutingRequest::new(RequestType::ParseInstruction).with_region("ap-south-1");
    assert_eq!(h.router.route(&request).await.unwrap().provider, "global");
}

#[tokio::test]
async fn latency_cap_equal_to_estimate_is_viable() {
    let h = harness(RouterConfig::default(), CircuitBreakerConfig::default());
    register(&h, "exact", ProviderConfig::new("exact"), |b| b).await;
    h.registry
        .restore_metrics("exact", metrics(0.9, 0.95, 800.0, 0.001))
        .await
        .unwrap();

    // Zero load, so the estimate equals avg latency; ≤ keeps it viable
    let request =
        RoutingRequest::new(RequestType::ParseInstruction).with_max_latency_ms(800.0);
    assert_eq!(h.router.route(&request).await.unwrap().provider, "exact");

    let request =
        RoutingRequest::new(RequestType::ParseInstruction).with_max_latency_ms(799.0);
    assert!(h.router.route(&request).await.is_err());
}

#[tokio::test]
async fn cost_cap_filters_expensive_providers() {
    let h = harness(RouterConfig::default(), CircuitBreakerConfig::default());
    contrasting_pair(&h).await;

    // parse multiplier 1.5: a=0.0075, b=0.003
    let request = RoutingRequest::new(RequestType::ParseInstruction)
        .with_max_cost(0.004)
        .with_strategy(RoutingStrategy::QualityFirst);
    assert_eq!(h.router.route(&request).await.unwrap().provider, "provider-b");
}

#[tokio::test]
async fn cold_provider_is_routable_despite_quality_threshold() {
    let config = RouterConfig {
        quality_threshold: 0.8,
        ..RouterConfig::default()
    };
    let h = harness(config, CircuitBreakerConfig::default());
    register(&h, "fresh", ProviderConfig::new("fresh"), |b| b).await;

    // All metrics at default zero, zero requests recorded
    let request = RoutingRequest::new(RequestType::ParseInstruction);
    assert_eq!(h.router.route(&request).await.unwrap().provider, "fresh");
}

#[tokio::test]
async fn quality_threshold_rejects_warm_low_accuracy_provider() {
    let config = RouterConfig {
        quality_threshold: 0.8,
        ..RouterConfig::default()
    };
    let h = harness(config, CircuitBreakerConfig::default());
    register(&h, "sloppy", ProviderConfig::new("sloppy"), |b| b).await;
    h.registry
        .restore_metrics("sloppy", metrics(0.5, 0.9, 100.0, 0.001))
        .await
        .unwrap();

    assert!(h
        .router
        .route(&RoutingRequest::new(RequestType::ParseInstruction))
        .await
        .is_err());
}

#[tokio::test]
async fn execute_falls_back_to_next_viable_provider() {
    let h = harness(RouterConfig::default(), CircuitBreakerConfig::default());
    register(
        &h,
        "primary",
        ProviderConfig::new("primary")
            .with_priority(100)
            .with_retry_policy(RetryPolicy::none()),
        |b| b.fail_next_n(5),
    )
    .await;
    register(
        &h,
        "backup",
        ProviderConfig::new("backup")
            .with_priority(10)
            .with_retry_policy(RetryPolicy::none()),
        |b| b,
    )
    .await;

    let request = RoutingRequest::new(RequestType::ParseInstruction)
        .with_strategy(RoutingStrategy::Priority);
    let context = RequestContext::default();
    let parsed = h
        .router
        .parse_instruction(&request, "echo hello", &context)
        .await
        .unwrap();
    assert_eq!(parsed.actions[0].shell(), Some("echo hello"));

    // The failed primary attempt was recorded
    let primary = h.registry.snapshot("primary").await.unwrap();
    assert_eq!(primary.metrics.request_count, 1);
    assert!(primary.metrics.error_rate > 0.0);
    let backup = h.registry.snapshot("backup").await.unwrap();
    assert_eq!(backup.metrics.request_count, 1);
}

#[tokio::test]
async fn permanent_failure_surfaces_without_fallback() {
    let h = harness(RouterConfig::default(), CircuitBreakerConfig::default());
    register(
        &h,
        "primary",
        ProviderConfig::new("primary")
            .with_priority(100)
            .with_retry_policy(RetryPolicy::none()),
        |b| b.fail_next(ScriptedFailure::Permanent),
    )
    .await;
    register(
        &h,
        "backup",
        ProviderConfig::new("backup").with_priority(10),
        |b| b,
    )
    .await;

    let request = RoutingRequest::new(RequestType::ParseInstruction)
        .with_strategy(RoutingStrategy::Priority);
    let err = h
        .router
        .parse_instruction(&request, "echo hello", &RequestContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Provider(_)));

    // The backup was never consulted
    let backup = h.registry.snapshot("backup").await.unwrap();
    assert_eq!(backup.metrics.request_count, 0);
}

#[tokio::test]
async fn breaker_opens_after_failures_and_recovers_after_timeout() {
    let breaker = CircuitBreakerConfig {
        enabled: true,
        failure_threshold: 3,
        recovery_timeout: Duration::from_millis(150),
        success_threshold: 1,
    };
    let config = RouterConfig {
        max_retries: 0,
        ..RouterConfig::default()
    };
    let h = harness(config, breaker);
    register(
        &h,
        "flaky",
        ProviderConfig::new("flaky").with_retry_policy(RetryPolicy::none()),
        |b| b.fail_next_n(3),
    )
    .await;

    let request = RoutingRequest::new(RequestType::ParseInstruction);
    let context = RequestContext::default();
    for _ in 0..3 {
        let result = h
            .router
            .parse_instruction(&request, "echo hi", &context)
            .await;
        assert!(result.is_err());
    }

    // Circuit open: the provider is no longer viable
    let err = h.router.route(&request).await.unwrap_err();
    assert!(matches!(err, RouterError::NoViableProvider { .. }));

    // After the recovery timeout the provider is admitted again and the
    // scripted failures are exhausted, so the trial succeeds
    tokio::time::sleep(Duration::from_millis(200)).await;
    let parsed = h
        .router
        .parse_instruction(&request, "echo hi", &context)
        .await
        .unwrap();
    assert_eq!(parsed.actions[0].shell(), Some("echo hi"));
}

#[tokio::test]
async fn fallback_chain_order_beats_strategy_order_on_fallback() {
    let config = RouterConfig {
        fallback_chain: vec!["reserve-b".to_string()],
        ..RouterConfig::default()
    };
    let h = harness(config, CircuitBreakerConfig::default());
    register(
        &h,
        "primary",
        ProviderConfig::new("primary")
            .with_priority(100)
            .with_retry_policy(RetryPolicy::none()),
        |b| b.fail_next_n(5),
    )
    .await;
    register(
        &h,
        "reserve-a",
        ProviderConfig::new("reserve-a").with_priority(50),
        |b| b,
    )
    .await;
    register(
        &h,
        "reserve-b",
        ProviderConfig::new("reserve-b").with_priority(10),
        |b| b,
    )
    .await;

    // Priority alone would fall back to reserve-a; the configured chain
    // puts reserve-b first
    let request = RoutingRequest::new(RequestType::ParseInstruction)
        .with_strategy(RoutingStrategy::Priority);
    h.router
        .parse_instruction(&request, "echo chained", &RequestContext::default())
        .await
        .unwrap();

    assert_eq!(
        h.registry.snapshot("reserve-b").await.unwrap().metrics.request_count,
        1
    );
    assert_eq!(
        h.registry.snapshot("reserve-a").await.unwrap().metrics.request_count,
        0
    );
}

#[tokio::test]
async fn empty_registry_yields_no_viable_provider() {
    let h = harness(RouterConfig::default(), CircuitBreakerConfig::default());
    let err = h
        .router
        .route(&RoutingRequest::new(RequestType::ParseInstruction))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::NoViableProvider { .. }));
}

#[tokio::test]
async fn rate_limited_provider_is_skipped_until_reset_passes() {
    let h = harness(RouterConfig::default(), CircuitBreakerConfig::default());
    register(&h, "limited", ProviderConfig::new("limited"), |b| b).await;

    // Mark the provider rate limited with a reset shortly in the future
    let reset = chrono::Utc::now() + chrono::Duration::milliseconds(150);
    h.registry
        .apply("limited", |entry| {
            entry.status.rate_limited = true;
            entry.status.rate_limit_reset = Some(reset);
        })
        .await
        .unwrap();

    let request = RoutingRequest::new(RequestType::ParseInstruction);
    assert!(h.router.route(&request).await.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.router.route(&request).await.unwrap().provider, "limited");
}
