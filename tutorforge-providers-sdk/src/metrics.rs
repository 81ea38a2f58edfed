//! # Provider Metrics Module
//!
//! Streaming per-provider quality metrics, aggregated as exponentially
//! weighted moving averages. One [`ProviderMetrics`] value lives inside
//! each registry entry; the monitor folds every recorded request into it
//! under the registry's write lock, so updates for a single provider are
//! serialized and a reader that observes `request_count = k` sees the
//! outcomes of the first `k` completed requests incorporated.
//!
//! All rate-like metrics stay inside [0, 1]; `success_rate` and
//! `error_rate` are independent EWMAs and need not sum to 1.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// EWMA smoothing factor shared by every metric.
pub const EWMA_ALPHA: f64 = 0.1;

/// Aggregated quality metrics for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    /// Total requests recorded; monotonically non-decreasing
    pub request_count: u64,
    /// EWMA of request success, in [0, 1]
    pub success_rate: f64,
    /// EWMA of request failure, in [0, 1]
    pub error_rate: f64,
    /// EWMA of request latency in milliseconds
    pub avg_latency_ms: f64,
    /// EWMA of per-request cost in USD
    pub avg_cost: f64,
    /// EWMA of the confidence reported by responses, in [0, 1]
    pub confidence_score: f64,
    /// EWMA of observed answer accuracy, in [0, 1]
    pub accuracy_score: f64,
    /// EWMA of useful-output per token, in [0, 1]
    pub token_efficiency: f64,
    /// When the last request was folded in
    pub last_updated: Option<DateTime<Utc>>,
}

/// The observable outcome of one routed request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    /// Whether the request succeeded
    pub success: bool,
    /// Wall-clock latency in milliseconds
    pub latency_ms: f64,
    /// Cost of the request in USD
    pub cost: f64,
    /// Confidence the response carried, if any
    pub confidence: Option<f64>,
    /// Accuracy judgment for the response, if one was made
    pub accuracy: Option<f64>,
    /// Token-efficiency observation, if one was made
    pub token_efficiency: Option<f64>,
    /// Whether the provider reported throttling
    pub rate_limited: bool,
    /// Reset time reported alongside throttling
    pub rate_limit_reset: Option<DateTime<Utc>>,
}

impl RequestOutcome {
    /// A plain successful outcome with the given latency.
    pub fn success(latency_ms: f64) -> Self {
        Self {
            success: true,
            latency_ms,
            ..Self::default()
        }
    }

    /// A plain failed outcome with the given latency.
    pub fn failure(latency_ms: f64) -> Self {
        Self {
            success: false,
            latency_ms,
            ..Self::default()
        }
    }

    /// Attach a cost observation.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// Attach a confidence observation.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

impl ProviderMetrics {
    /// Fold one request outcome into the averages.
    pub fn record(&mut self, outcome: &RequestOutcome) {
        let alpha = EWMA_ALPHA;
        self.request_count += 1;

        let success = if outcome.success { 1.0 } else { 0.0 };
        self.success_rate = (1.0 - alpha) * self.success_rate + alpha * success;
        self.error_rate = (1.0 - alpha) * self.error_rate + alpha * (1.0 - success);

        if outcome.latency_ms > 0.0 {
            self.avg_latency_ms = (1.0 - alpha) * self.avg_latency_ms + alpha * outcome.latency_ms;
        }
        if outcome.cost > 0.0 {
            self.avg_cost = (1.0 - alpha) * self.avg_cost + alpha * outcome.cost;
        }
        if let Some(confidence) = outcome.confidence {
            self.confidence_score = (1.0 - alpha) * self.confidence_score + alpha * confidence;
        }
        if let Some(accuracy) = outcome.accuracy {
            self.accuracy_score = (1.0 - alpha) * self.accuracy_score + alpha * accuracy;
        }
        if let Some(efficiency) = outcome.token_efficiency {
            self.token_efficiency = (1.0 - alpha) * self.token_efficiency + alpha * efficiency;
        }

        self.last_updated = Some(Utc::now());
    }

    /// Whether this provider has ever served a request.
    ///
    /// Cold providers bypass quality-based viability checks so that a
    /// freshly registered provider is routable on its first request.
    pub fn is_cold(&self) -> bool {
        self.request_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewma_converges_on_steady_stream() {
        // 100 successful requests at 200ms, starting from zero
        let mut metrics = ProviderMetrics::default();
        for _ in 0..100 {
            metrics.record(&RequestOutcome::success(200.0));
        }
        assert!(metrics.success_rate > 0.99);
        assert!((metrics.avg_latency_ms - 200.0).abs() < 1.0);
        assert!(metrics.error_rate < 0.01);
        assert_eq!(metrics.request_count, 100);
    }

    #[test]
    fn rates_stay_in_unit_interval() {
        let mut metrics = ProviderMetrics::default();
        for i in 0..500 {
            let outcome = if i % 3 == 0 {
                RequestOutcome::failure(50.0)
            } else {
                RequestOutcome::success(50.0).with_confidence(0.8)
            };
            metrics.record(&outcome);
            assert!((0.0..=1.0).contains(&metrics.success_rate));
            assert!((0.0..=1.0).contains(&metrics.error_rate));
            assert!((0.0..=1.0).contains(&metrics.confidence_score));
            assert!(metrics.avg_latency_ms >= 0.0);
        }
    }

    #[test]
    fn request_count_is_monotonic() {
        let mut metrics = ProviderMetrics::default();
        let mut last = 0;
        for _ in 0..10 {
            metrics.record(&RequestOutcome::failure(0.0));
            assert!(metrics.request_count > last);
            last = metrics.request_count;
        }
    }

    #[test]
    fn zero_observations_do_not_drag_averages() {
        let mut metrics = ProviderMetrics::default();
        metrics.record(&RequestOutcome::success(100.0).with_cost(0.01));
        let latency = metrics.avg_latency_ms;
        let cost = metrics.avg_cost;

        // A zero-latency, zero-cost outcome leaves both averages alone
        metrics.record(&RequestOutcome::success(0.0));
        assert_eq!(metrics.avg_latency_ms, latency);
        assert_eq!(metrics.avg_cost, cost);
    }

    #[test]
    fn cold_start_detection() {
        let mut metrics = ProviderMetrics::default();
        assert!(metrics.is_cold());
        metrics.record(&RequestOutcome::success(10.0));
        assert!(!metrics.is_cold());
    }
}
