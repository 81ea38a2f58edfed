//! # Quality-Aware Routing Module
//!
//! Provider selection and request execution for the tutorforge core. Given
//! a [`RoutingRequest`], the router scans the registry for viable
//! providers, picks one using the configured strategy, executes the call
//! with retry protection, and walks the fallback chain when the selected
//! provider keeps failing.
//!
//! ## Viability
//!
//! A provider is viable for a request iff all of the following hold:
//!
//! 1. It is administratively available and not `Unhealthy`
//! 2. Its circuit breaker admits selection
//! 3. It is not rate limited, or the reported reset time has passed
//! 4. Its current load is below `max_concurrent`
//! 5. Its accuracy meets the router's quality threshold (cold providers
//!    with no recorded requests are exempt, so a fresh registration is
//!    routable on its first request)
//! 6. Its estimated cost fits the request's cost cap
//! 7. Its estimated latency fits the request's latency cap and the
//!    router's hard latency threshold
//! 8. It declares every required capability
//! 9. It serves the request's region, or serves `"global"`
//!
//! ## Strategies
//!
//! - **Priority**: highest configured priority; ties by accuracy, then load
//! - **RoundRobin**: cycle through viable providers in name order
//! - **Weighted**: random selection proportional to configured weights,
//!   deterministic first-by-name fallback when all weights are zero
//! - **CostOptimal**: lowest estimated cost; ties by accuracy
//! - **QualityFirst**: highest accuracy; ties by latency
//! - **LatencyFirst**: lowest load-adjusted latency; ties by accuracy
//! - **Intelligent**: composite of accuracy, reliability, cost and load
//!   scores; the weights are tunable via [`IntelligentWeights`]

use crate::error::{ProviderError, RouterError};
use crate::metrics::RequestOutcome;
use crate::models::{
    CompressedContext, ErrorInterpretation, ExpectedValue, ParsedInstruction, RequestContext,
    RequestType, ResponseMeta, ValidationOutcome,
};
use crate::monitor::QualityMonitor;
use crate::providers::Provider;
use crate::registry::{HealthState, ProviderRegistry};
use crate::retry::execute_with_retry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Strategy used to pick one provider from the viable set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Highest configured priority wins
    Priority,
    /// Cycle through viable providers
    RoundRobin,
    /// Random selection proportional to configured weights
    Weighted,
    /// Lowest estimated cost wins
    CostOptimal,
    /// Highest accuracy wins
    QualityFirst,
    /// Lowest load-adjusted latency wins
    LatencyFirst,
    /// Composite quality/cost/load score wins
    Intelligent,
}

/// Tunable weights for the intelligent composite score.
///
/// The defaults mirror the heuristics this scoring grew up with; they are
/// parameters, not contracts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelligentWeights {
    /// Weight of the accuracy score
    pub accuracy: f64,
    /// Weight of the reliability blend (success rate + latency score)
    pub reliability: f64,
    /// Weight of the cost score
    pub cost: f64,
    /// Weight of the load score
    pub load: f64,
    /// Latency normalization denominator in milliseconds
    pub latency_norm_ms: f64,
    /// Cost normalization denominator in USD
    pub cost_norm: f64,
}

impl Default for IntelligentWeights {
    fn default() -> Self {
        Self {
            accuracy: 0.40,
            reliability: 0.30,
            cost: 0.20,
            load: 0.10,
            latency_norm_ms: 10_000.0,
            cost_norm: 0.01,
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Strategy applied when a request does not override it
    pub default_strategy: RoutingStrategy,
    /// Provider names tried, in order, when routing or execution fails
    pub fallback_chain: Vec<String>,
    /// Minimum accuracy for a provider to stay viable
    pub quality_threshold: f64,
    /// Hard viability bound on estimated latency in milliseconds;
    /// 0 disables the check
    pub latency_threshold_ms: f64,
    /// Extra full request attempts on provider-level failure, spent
    /// walking the fallback chain
    pub max_retries: u32,
    /// Prefer cheaper providers when a strategy's primary criteria tie
    pub cost_optimization: bool,
    /// Intelligent-strategy tunables
    pub intelligent: IntelligentWeights,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_strategy: RoutingStrategy::Intelligent,
            fallback_chain: Vec::new(),
            quality_threshold: 0.0,
            latency_threshold_ms: 0.0,
            max_retries: 2,
            cost_optimization: false,
            intelligent: IntelligentWeights::default(),
        }
    }
}

/// One routing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRequest {
    /// Kind of work being routed
    pub request_type: RequestType,
    /// Caller-assigned priority, informational
    pub priority: i32,
    /// Cost cap in USD; 0 disables the check
    pub max_cost: f64,
    /// Latency cap in milliseconds; 0 disables the check
    pub max_latency_ms: f64,
    /// Capabilities the provider must declare
    pub required_capabilities: Vec<String>,
    /// Region the provider must serve; empty matches anywhere
    pub region: String,
    /// Strategy override for this request
    pub strategy: Option<RoutingStrategy>,
    /// Opaque caller context carried through for observability
    pub context: HashMap<String, String>,
}

impl RoutingRequest {
    /// A request of the given type with no constraints.
    pub fn new(request_type: RequestType) -> Self {
        Self {
            request_type,
            priority: 0,
            max_cost: 0.0,
            max_latency_ms: 0.0,
            required_capabilities: Vec::new(),
            region: String::new(),
            strategy: None,
            context: HashMap::new(),
        }
    }

    /// Set the cost cap.
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = max_cost;
        self
    }

    /// Set the latency cap.
    pub fn with_max_latency_ms(mut self, max_latency_ms: f64) -> Self {
        self.max_latency_ms = max_latency_ms;
        self
    }

    /// Set the required capabilities.
    pub fn with_required_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Set the region constraint.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Override the strategy for this request.
    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Same request re-typed, keeping every constraint.
    pub fn retyped(&self, request_type: RequestType) -> Self {
        let mut request = self.clone();
        request.request_type = request_type;
        request
    }
}

/// A routing decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingResult {
    /// Selected provider name
    pub provider: String,
    /// Why it was selected
    pub reason: String,
    /// Remaining viable providers, best first
    pub alternatives: Vec<String>,
    /// Estimated cost of the request in USD
    pub estimated_cost: f64,
    /// Estimated load-adjusted latency in milliseconds
    pub estimated_latency_ms: f64,
    /// Accuracy score of the selected provider at decision time
    pub quality_score: f64,
    /// Wall time spent deciding
    pub routing_duration: Duration,
}

/// Cost multiplier applied to a provider's average cost per request type.
pub fn cost_multiplier(request_type: RequestType) -> f64 {
    match request_type {
        RequestType::ParseInstruction => 1.5,
        RequestType::ValidateExpectation => 0.8,
        RequestType::CompressContext => 0.5,
        RequestType::InterpretError => 1.2,
        RequestType::HealthCheck | RequestType::Other => 1.0,
    }
}

/// Everything a strategy needs to know about one viable provider.
#[derive(Debug, Clone)]
struct Candidate {
    name: String,
    priority: i32,
    weight: f64,
    accuracy: f64,
    success_rate: f64,
    avg_latency_ms: f64,
    avg_cost: f64,
    current_load: u32,
    max_concurrent: u32,
    estimated_cost: f64,
    estimated_latency_ms: f64,
}

impl Candidate {
    fn load_score(&self) -> f64 {
        if self.max_concurrent == 0 {
            0.0
        } else {
            1.0 - self.current_load as f64 / self.max_concurrent as f64
        }
    }
}

/// Selects viable providers and executes routed requests.
pub struct Router {
    registry: Arc<ProviderRegistry>,
    monitor: Arc<QualityMonitor>,
    config: RouterConfig,
    round_robin: AtomicUsize,
}

impl Router {
    /// Create a router over the given registry and monitor.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        monitor: Arc<QualityMonitor>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            monitor,
            config,
            round_robin: AtomicUsize::new(0),
        }
    }

    /// The registry this router selects from.
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Pick a viable provider for the request.
    pub async fn route(&self, request: &RoutingRequest) -> Result<RoutingResult, RouterError> {
        self.route_excluding(request, &HashSet::new()).await
    }

    async fn route_excluding(
        &self,
        request: &RoutingRequest,
        exclude: &HashSet<String>,
    ) -> Result<RoutingResult, RouterError> {
        let started = Instant::now();
        let now = Utc::now();

        let mut candidates = self.viable_candidates(request, now, exclude).await;
        if candidates.is_empty() {
            // Consult the fallback chain in order before giving up; chain
            // members may have become viable since the scan
            for name in &self.config.fallback_chain {
                if exclude.contains(name) {
                    continue;
                }
                let mut chained = self
                    .viable_candidates_named(request, now, std::slice::from_ref(name))
                    .await;
                if let Some(candidate) = chained.pop() {
                    candidates.push(candidate);
                    break;
                }
            }
        }
        if candidates.is_empty() {
            return Err(RouterError::NoViableProvider {
                reason: format!(
                    "0 of {} registered providers pass viability for {:?}",
                    self.registry.len().await,
                    request.request_type
                ),
            });
        }

        let strategy = request.strategy.unwrap_or(self.config.default_strategy);
        let (index, reason) = self.select(strategy, &candidates);
        let chosen = candidates[index].clone();
        let alternatives = candidates
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, c)| c.name.clone())
            .collect();

        Ok(RoutingResult {
            provider: chosen.name,
            reason,
            alternatives,
            estimated_cost: chosen.estimated_cost,
            estimated_latency_ms: chosen.estimated_latency_ms,
            quality_score: chosen.accuracy,
            routing_duration: started.elapsed(),
        })
    }

    async fn viable_candidates(
        &self,
        request: &RoutingRequest,
        now: DateTime<Utc>,
        exclude: &HashSet<String>,
    ) -> Vec<Candidate> {
        let snapshots = self.registry.snapshot_all().await;
        let mut candidates = Vec::new();
        for snapshot in &snapshots {
            if exclude.contains(&snapshot.name) {
                continue;
            }
            // Breaker availability lives outside the snapshot; check it
            // without mutating
            let breaker_ok = self
                .registry
                .apply(&snapshot.name, |entry| entry.breaker.available())
                .await
                .unwrap_or(false);
            if let Some(candidate) = self.viability(request, now, snapshot, breaker_ok) {
                candidates.push(candidate);
            }
        }
        // Stable name order keeps round-robin and deterministic fallbacks
        // reproducible
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        candidates
    }

    async fn viable_candidates_named(
        &self,
        request: &RoutingRequest,
        now: DateTime<Utc>,
        names: &[String],
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for name in names {
            if let Some(snapshot) = self.registry.snapshot(name).await {
                let breaker_ok = self
                    .registry
                    .apply(name, |entry| entry.breaker.available())
                    .await
                    .unwrap_or(false);
                if let Some(candidate) = self.viability(request, now, &snapshot, breaker_ok) {
                    candidates.push(candidate);
                }
            }
        }
        candidates
    }

    fn viability(
        &self,
        request: &RoutingRequest,
        now: DateTime<Utc>,
        snapshot: &crate::registry::ProviderSnapshot,
        breaker_ok: bool,
    ) -> Option<Candidate> {
        let status = &snapshot.status;
        let metrics = &snapshot.metrics;
        let config = &snapshot.config;

        // 1. availability and health
        if !status.available || status.health_state == HealthState::Unhealthy {
            return None;
        }
        // 2. circuit breaker
        if !breaker_ok {
            return None;
        }
        // 3. rate limiting, honoring the reported reset time
        if status.rate_limited && !status.rate_limit_expired(now) {
            return None;
        }
        // 4. concurrency headroom
        if status.current_load >= config.max_concurrent {
            return None;
        }
        // 5. quality threshold; cold providers are exempt
        if !metrics.is_cold() && metrics.accuracy_score < self.config.quality_threshold {
            return None;
        }

        let estimated_cost = metrics.avg_cost * cost_multiplier(request.request_type);
        // 6. cost cap
        if request.max_cost > 0.0 && estimated_cost > request.max_cost {
            return None;
        }

        let load_factor = if config.max_concurrent == 0 {
            1.0
        } else {
            1.0 + 0.5 * status.current_load as f64 / config.max_concurrent as f64
        };
        let estimated_latency_ms = metrics.avg_latency_ms * load_factor;
        // 7. latency caps (request-level and router-level); equality is
        // viable
        if request.max_latency_ms > 0.0 && estimated_latency_ms > request.max_latency_ms {
            return None;
        }
        if self.config.latency_threshold_ms > 0.0
            && estimated_latency_ms > self.config.latency_threshold_ms
        {
            return None;
        }
        // 8. capabilities
        let declared: HashSet<&str> = config.capabilities.iter().map(String::as_str).collect();
        if !request
            .required_capabilities
            .iter()
            .all(|cap| declared.contains(cap.as_str()))
        {
            return None;
        }
        // 9. region
        if !request.region.is_empty()
            && !config.regions.iter().any(|r| r == &request.region)
            && !config.regions.iter().any(|r| r == "global")
        {
            return None;
        }

        Some(Candidate {
            name: snapshot.name.clone(),
            priority: config.priority,
            weight: config.weight,
            accuracy: metrics.accuracy_score,
            success_rate: metrics.success_rate,
            avg_latency_ms: metrics.avg_latency_ms,
            avg_cost: metrics.avg_cost,
            current_load: status.current_load,
            max_concurrent: config.max_concurrent,
            estimated_cost,
            estimated_latency_ms,
        })
    }

    fn select(&self, strategy: RoutingStrategy, candidates: &[Candidate]) -> (usize, String) {
        debug_assert!(!candidates.is_empty());
        match strategy {
            RoutingStrategy::Priority => {
                let index = self.best_by(candidates, |a, b| {
                    a.priority
                        .cmp(&b.priority)
                        .then(total_cmp(a.accuracy, b.accuracy))
                        .then(b.current_load.cmp(&a.current_load))
                });
                (
                    index,
                    format!("priority {} highest", candidates[index].priority),
                )
            }
            RoutingStrategy::RoundRobin => {
                let index = self.round_robin.fetch_add(1, Ordering::Relaxed) % candidates.len();
                (index, "round-robin".to_string())
            }
            RoutingStrategy::Weighted => self.select_weighted(candidates),
            RoutingStrategy::CostOptimal => {
                let index = self.best_by(candidates, |a, b| {
                    total_cmp(b.estimated_cost, a.estimated_cost)
                        .then(total_cmp(a.accuracy, b.accuracy))
                });
                (
                    index,
                    format!("lowest cost ${:.4}", candidates[index].estimated_cost),
                )
            }
            RoutingStrategy::QualityFirst => {
                let index = self.best_by(candidates, |a, b| {
                    total_cmp(a.accuracy, b.accuracy)
                        .then(total_cmp(b.avg_latency_ms, a.avg_latency_ms))
                });
                (
                    index,
                    format!("highest accuracy {:.2}", candidates[index].accuracy),
                )
            }
            RoutingStrategy::LatencyFirst => {
                let index = self.best_by(candidates, |a, b| {
                    total_cmp(b.estimated_latency_ms, a.estimated_latency_ms)
                        .then(total_cmp(a.accuracy, b.accuracy))
                });
                (
                    index,
                    format!(
                        "lowest latency {:.0}ms",
                        candidates[index].estimated_latency_ms
                    ),
                )
            }
            RoutingStrategy::Intelligent => {
                let index = self.best_by(candidates, |a, b| {
                    total_cmp(self.intelligent_score(a), self.intelligent_score(b))
                });
                (
                    index,
                    format!(
                        "composite score {:.3}",
                        self.intelligent_score(&candidates[index])
                    ),
                )
            }
        }
    }

    /// Index of the best candidate, where `cmp` orders worse before
    /// better. Cost-optimization bias breaks remaining ties toward the
    /// cheaper provider.
    fn best_by<F>(&self, candidates: &[Candidate], cmp: F) -> usize
    where
        F: Fn(&Candidate, &Candidate) -> std::cmp::Ordering,
    {
        let mut best = 0;
        for i in 1..candidates.len() {
            let mut ordering = cmp(&candidates[i], &candidates[best]);
            if ordering == std::cmp::Ordering::Equal && self.config.cost_optimization {
                ordering = total_cmp(
                    candidates[best].estimated_cost,
                    candidates[i].estimated_cost,
                );
            }
            if ordering == std::cmp::Ordering::Greater {
                best = i;
            }
        }
        best
    }

    fn select_weighted(&self, candidates: &[Candidate]) -> (usize, String) {
        use rand::Rng;
        let total: f64 = candidates.iter().map(|c| c.weight.max(0.0)).sum();
        if total <= 0.0 {
            // All weights zero: deterministic first-by-name fallback
            return (0, "weighted fallback (all weights zero)".to_string());
        }
        let mut roll = rand::thread_rng().gen_range(0.0..total);
        for (i, candidate) in candidates.iter().enumerate() {
            let w = candidate.weight.max(0.0);
            if roll < w {
                return (i, format!("weighted selection (weight {:.2})", w));
            }
            roll -= w;
        }
        (candidates.len() - 1, "weighted selection".to_string())
    }

    fn intelligent_score(&self, candidate: &Candidate) -> f64 {
        let w = &self.config.intelligent;
        let latency_score = (1.0 - candidate.avg_latency_ms / w.latency_norm_ms).max(0.0);
        let cost_score = (1.0 - candidate.avg_cost / w.cost_norm).max(0.0);
        let reliability = 0.7 * candidate.success_rate + 0.3 * latency_score;
        w.accuracy * candidate.accuracy
            + w.reliability * reliability
            + w.cost * cost_score
            + w.load * candidate.load_score()
    }

    /// Route the request and run `op` against the selected provider, with
    /// per-provider retries and fallback.
    ///
    /// Transient, timeout and rate-limit failures are retried under the
    /// provider's retry policy; once that is exhausted, the configured
    /// fallback chain is consulted in order (skipping providers already
    /// tried or not viable) before the strategy picks again from the
    /// remaining viable set. Permanent failures surface immediately. Each
    /// completed attempt is recorded with the monitor; cancelled attempts
    /// release their load slot and breaker trial without crediting either
    /// outcome.
    pub async fn execute<T, F, Fut>(
        &self,
        request: &RoutingRequest,
        op: F,
    ) -> Result<T, RouterError>
    where
        T: ResponseMeta,
        F: Fn(Arc<dyn Provider>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut tried: HashSet<String> = HashSet::new();
        let mut last_failure: Option<(String, ProviderError)> = None;
        let attempts_allowed = 1 + self.config.max_retries as usize;

        while tried.len() < attempts_allowed {
            let name = match self.next_target(request, &tried, last_failure.is_some()).await {
                Ok(name) => name,
                Err(route_err) => {
                    return Err(match last_failure {
                        Some((provider, source)) => RouterError::RetriesExhausted {
                            provider,
                            source,
                        },
                        None => route_err,
                    });
                }
            };
            tried.insert(name.clone());

            match self.attempt(&name, request, &op).await? {
                AttemptOutcome::Done(value) => return Ok(value),
                AttemptOutcome::NotAdmitted => continue,
                AttemptOutcome::Failed(err) => {
                    if !err.is_retryable() {
                        return Err(RouterError::Provider(err));
                    }
                    tracing::warn!(
                        provider = %name,
                        error = %err,
                        "provider failed after retries, consulting fallbacks"
                    );
                    last_failure = Some((name, err));
                }
            }
        }

        match last_failure {
            Some((provider, source)) => Err(RouterError::RetriesExhausted { provider, source }),
            None => Err(RouterError::NoViableProvider {
                reason: "no provider could be attempted".to_string(),
            }),
        }
    }

    /// The next provider to attempt: the strategy's pick on the first
    /// attempt, then viable untried fallback-chain members in chain
    /// order, then the strategy's pick from whatever viable providers
    /// remain.
    async fn next_target(
        &self,
        request: &RoutingRequest,
        tried: &HashSet<String>,
        falling_back: bool,
    ) -> Result<String, RouterError> {
        if falling_back {
            let now = Utc::now();
            let untried: Vec<String> = self
                .config
                .fallback_chain
                .iter()
                .filter(|name| !tried.contains(*name))
                .cloned()
                .collect();
            for name in &untried {
                let viable = self
                    .viable_candidates_named(request, now, std::slice::from_ref(name))
                    .await;
                if !viable.is_empty() {
                    return Ok(name.clone());
                }
            }
        }
        self.route_excluding(request, tried)
            .await
            .map(|routed| routed.provider)
    }

    async fn attempt<T, F, Fut>(
        &self,
        name: &str,
        request: &RoutingRequest,
        op: &F,
    ) -> Result<AttemptOutcome<T>, RouterError>
    where
        T: ResponseMeta,
        F: Fn(Arc<dyn Provider>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let admitted = self
            .registry
            .apply(name, |entry| entry.breaker.try_acquire())
            .await?;
        if !admitted {
            return Ok(AttemptOutcome::NotAdmitted);
        }
        let mut trial = BreakerTrial::new(Arc::clone(&self.registry), name.to_string());

        let permit = match self.registry.try_acquire_slot(name).await {
            Ok(permit) => permit,
            Err(RouterError::ProviderBusy { .. }) => {
                trial.drop_without_credit().await;
                return Ok(AttemptOutcome::NotAdmitted);
            }
            Err(other) => {
                trial.drop_without_credit().await;
                return Err(other);
            }
        };

        let (provider, timeout, retry_policy, estimated_cost) = {
            let snapshot =
                self.registry
                    .snapshot(name)
                    .await
                    .ok_or_else(|| RouterError::ProviderNotFound {
                        name: name.to_string(),
                    })?;
            let provider =
                self.registry
                    .provider(name)
                    .await
                    .ok_or_else(|| RouterError::ProviderNotFound {
                        name: name.to_string(),
                    })?;
            (
                provider,
                snapshot.config.timeout,
                snapshot.config.retry_policy,
                snapshot.metrics.avg_cost * cost_multiplier(request.request_type),
            )
        };

        let started = Instant::now();
        let result = execute_with_retry(&retry_policy, || {
            let provider = Arc::clone(&provider);
            async move {
                match tokio::time::timeout(timeout, op(provider)).await {
                    Ok(inner) => inner,
                    Err(_) => Err(ProviderError::Timeout),
                }
            }
        })
        .await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        permit.release().await;

        match result {
            Ok(value) => {
                trial.credit_success().await;
                let mut outcome = RequestOutcome::success(latency_ms).with_cost(estimated_cost);
                outcome.confidence = value.confidence();
                self.monitor.record_request(name, outcome).await;
                Ok(AttemptOutcome::Done(value))
            }
            Err(err) => {
                trial.credit_failure().await;
                let mut outcome = RequestOutcome::failure(latency_ms);
                outcome.rate_limited = err.is_rate_limited();
                outcome.rate_limit_reset = err.rate_limit_reset();
                self.monitor.record_request(name, outcome).await;
                Ok(AttemptOutcome::Failed(err))
            }
        }
    }

    /// Route and execute an instruction parse.
    pub async fn parse_instruction(
        &self,
        request: &RoutingRequest,
        instruction: &str,
        context: &RequestContext,
    ) -> Result<ParsedInstruction, RouterError> {
        let request = request.retyped(RequestType::ParseInstruction);
        let instruction = instruction.to_string();
        let context = context.clone();
        self.execute(&request, move |provider| {
            let instruction = instruction.clone();
            let context = context.clone();
            async move { provider.parse_instruction(&instruction, &context).await }
        })
        .await
    }

    /// Route and execute an expectation validation.
    pub async fn validate_expectation(
        &self,
        request: &RoutingRequest,
        expected: &ExpectedValue,
        actual: &str,
        context: &RequestContext,
    ) -> Result<ValidationOutcome, RouterError> {
        let request = request.retyped(RequestType::ValidateExpectation);
        let expected = expected.clone();
        let actual = actual.to_string();
        let context = context.clone();
        self.execute(&request, move |provider| {
            let expected = expected.clone();
            let actual = actual.clone();
            let context = context.clone();
            async move {
                provider
                    .validate_expectation(&expected, &actual, &context)
                    .await
            }
        })
        .await
    }

    /// Route and execute a context compression.
    pub async fn compress_context(
        &self,
        request: &RoutingRequest,
        full_context: &RequestContext,
    ) -> Result<CompressedContext, RouterError> {
        let request = request.retyped(RequestType::CompressContext);
        let full_context = full_context.clone();
        self.execute(&request, move |provider| {
            let full_context = full_context.clone();
            async move { provider.compress_context(&full_context).await }
        })
        .await
    }

    /// Route and execute an error interpretation.
    pub async fn interpret_error(
        &self,
        request: &RoutingRequest,
        error_message: &str,
        context: &RequestContext,
    ) -> Result<ErrorInterpretation, RouterError> {
        let request = request.retyped(RequestType::InterpretError);
        let error_message = error_message.to_string();
        let context = context.clone();
        self.execute(&request, move |provider| {
            let error_message = error_message.clone();
            let context = context.clone();
            async move { provider.interpret_error(&error_message, &context).await }
        })
        .await
    }
}

enum AttemptOutcome<T> {
    Done(T),
    Failed(ProviderError),
    NotAdmitted,
}

/// Tracks an admitted breaker attempt so that every exit path settles it
/// exactly once. Dropping without settling counts as a cancelled attempt.
struct BreakerTrial {
    registry: Arc<ProviderRegistry>,
    provider: String,
    settled: bool,
}

impl BreakerTrial {
    fn new(registry: Arc<ProviderRegistry>, provider: String) -> Self {
        Self {
            registry,
            provider,
            settled: false,
        }
    }

    async fn credit_success(&mut self) {
        self.settled = true;
        let _ = self
            .registry
            .apply(&self.provider, |entry| entry.breaker.on_success())
            .await;
    }

    async fn credit_failure(&mut self) {
        self.settled = true;
        let _ = self
            .registry
            .apply(&self.provider, |entry| entry.breaker.on_failure())
            .await;
    }

    async fn drop_without_credit(&mut self) {
        self.settled = true;
        let _ = self
            .registry
            .apply(&self.provider, |entry| entry.breaker.on_dropped())
            .await;
    }
}

impl Drop for BreakerTrial {
    fn drop(&mut self) {
        if !self.settled {
            let registry = Arc::clone(&self.registry);
            let provider = self.provider.clone();
            tokio::spawn(async move {
                let _ = registry
                    .apply(&provider, |entry| entry.breaker.on_dropped())
                    .await;
            });
        }
    }
}

fn total_cmp(a: f64, b: f64) -> std::cmp::Ordering {
    a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
}
