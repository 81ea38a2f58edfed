//! # Quality Monitor Module
//!
//! Continuous health probing and streaming metric aggregation for every
//! registered provider, plus an in-memory publish-subscribe bus for
//! threshold events.
//!
//! ## Task model
//!
//! The monitor runs two long-lived loops and one short-lived task per
//! probe:
//!
//! - the **health loop** wakes on `health_interval` and spawns one probe
//!   task per provider, so a slow probe of one provider never delays the
//!   others
//! - the **metrics loop** wakes on `metrics_interval`, compares each
//!   provider's metrics against the alert thresholds, and clears lapsed
//!   rate limits
//!
//! ## Health state machine
//!
//! Per provider: `Healthy` (0 consecutive probe errors) degrades to
//! `Degraded` (1–2) and then `Unhealthy` (≥3). A successful probe resets
//! the error count and refreshes `last_healthy`. `Unhealthy → Healthy`
//! emits `ProviderUp`; entering `Unhealthy` emits `ProviderDown`. Events
//! for a single provider are emitted in causal order; ordering across
//! providers is unspecified.
//!
//! ## Event delivery
//!
//! Subscribers are invoked on spawned tasks from a copy-on-read snapshot
//! of the subscriber list, so one slow or panicking subscriber cannot
//! block the others or stall the monitor. Events are also appended to a
//! per-day JSONL log when an event directory is configured.

use crate::metrics::RequestOutcome;
use crate::registry::{HealthState, ProviderRegistry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Metric thresholds that trigger alert events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Error-rate ceiling, in [0, 1]
    pub error_rate: f64,
    /// Latency ceiling in milliseconds
    pub latency_ms: f64,
    /// Rolling-window cost ceiling in USD
    pub cost: f64,
    /// Success-rate floor, in [0, 1]
    pub success_rate: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            error_rate: 0.25,
            latency_ms: 10_000.0,
            cost: 5.0,
            success_rate: 0.6,
        }
    }
}

/// Monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// How often every provider is probed
    #[serde(with = "crate::duration_serde")]
    pub health_interval: Duration,
    /// How often metrics are swept against the thresholds
    #[serde(with = "crate::duration_serde")]
    pub metrics_interval: Duration,
    /// Width of the rolling cost window
    #[serde(with = "crate::duration_serde")]
    pub cost_window: Duration,
    /// Alert thresholds
    pub thresholds: AlertThresholds,
    /// Directory for per-day JSONL event logs; `None` disables logging
    pub event_log_dir: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(30),
            metrics_interval: Duration::from_secs(60),
            cost_window: Duration::from_secs(60),
            thresholds: AlertThresholds::default(),
            event_log_dir: None,
        }
    }
}

/// Event severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Monitor-emitted events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A provider recovered from `Unhealthy`
    ProviderUp {
        /// Recovered provider
        provider: String,
    },
    /// A provider entered `Unhealthy`
    ProviderDown {
        /// Failing provider
        provider: String,
        /// Consecutive probe errors observed
        consecutive_errors: u32,
    },
    /// A provider reported throttling
    RateLimited {
        /// Throttled provider
        provider: String,
        /// Reset time, if the backend reported one
        reset_at: Option<DateTime<Utc>>,
    },
    /// Error-rate EWMA crossed its threshold
    HighErrorRate {
        /// Offending provider
        provider: String,
        /// Observed value
        value: f64,
        /// Configured threshold
        threshold: f64,
    },
    /// Latency EWMA crossed its threshold
    HighLatency {
        /// Offending provider
        provider: String,
        /// Observed value in milliseconds
        value: f64,
        /// Configured threshold in milliseconds
        threshold: f64,
    },
    /// Success-rate EWMA fell below its floor
    LowSuccessRate {
        /// Offending provider
        provider: String,
        /// Observed value
        value: f64,
        /// Configured floor
        threshold: f64,
    },
    /// Rolling-window cost crossed its ceiling
    HighCost {
        /// Offending provider
        provider: String,
        /// Window cost in USD
        value: f64,
        /// Configured ceiling in USD
        threshold: f64,
    },
}

impl MonitorEvent {
    /// Severity of this event.
    pub fn severity(&self) -> Severity {
        match self {
            MonitorEvent::ProviderUp { .. } => Severity::Info,
            MonitorEvent::ProviderDown { .. } => Severity::Critical,
            MonitorEvent::RateLimited { .. } => Severity::Warning,
            MonitorEvent::HighErrorRate { .. } => Severity::Error,
            MonitorEvent::HighLatency { .. } => Severity::Warning,
            MonitorEvent::LowSuccessRate { .. } => Severity::Error,
            MonitorEvent::HighCost { .. } => Severity::Warning,
        }
    }

    /// Provider the event concerns.
    pub fn provider(&self) -> &str {
        match self {
            MonitorEvent::ProviderUp { provider }
            | MonitorEvent::ProviderDown { provider, .. }
            | MonitorEvent::RateLimited { provider, .. }
            | MonitorEvent::HighErrorRate { provider, .. }
            | MonitorEvent::HighLatency { provider, .. }
            | MonitorEvent::LowSuccessRate { provider, .. }
            | MonitorEvent::HighCost { provider, .. } => provider,
        }
    }
}

/// An event with its emission time and severity, as delivered to
/// subscribers and the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Emission time
    pub at: DateTime<Utc>,
    /// Severity
    pub severity: Severity,
    /// The event
    #[serde(flatten)]
    pub event: MonitorEvent,
}

/// Subscriber callback invoked for every emitted event.
pub type EventSubscriber = Arc<dyn Fn(EventEnvelope) + Send + Sync>;

/// Periodic health probing, per-request recording, and threshold events.
pub struct QualityMonitor {
    registry: Arc<ProviderRegistry>,
    config: MonitorConfig,
    subscribers: RwLock<Vec<EventSubscriber>>,
    cost_windows: Mutex<HashMap<String, VecDeque<(Instant, f64)>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl QualityMonitor {
    /// Create a monitor over the given registry. Call
    /// [`QualityMonitor::start`] to launch the periodic loops; recording
    /// works without them.
    pub fn new(registry: Arc<ProviderRegistry>, config: MonitorConfig) -> Arc<Self> {
        Arc::new(Self {
            registry,
            config,
            subscribers: RwLock::new(Vec::new()),
            cost_windows: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// The registry this monitor observes.
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Launch the health and metrics loops.
    ///
    /// Call on a cloned handle: `Arc::clone(&monitor).start()`.
    pub fn start(self: Arc<Self>) {
        let health = {
            let monitor = Arc::clone(&self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(monitor.config.health_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    monitor.run_health_probes().await;
                }
            })
        };
        let metrics = {
            let monitor = Arc::clone(&self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(monitor.config.metrics_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    monitor.run_metrics_sweep().await;
                }
            })
        };
        let mut tasks = self.tasks.lock().expect("task list poisoned");
        tasks.push(health);
        tasks.push(metrics);
    }

    /// Stop the periodic loops.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().expect("task list poisoned");
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    /// Register a callback for every emitted event.
    pub fn subscribe(&self, subscriber: EventSubscriber) {
        self.subscribers
            .write()
            .expect("subscriber list poisoned")
            .push(subscriber);
    }

    /// Fold one request outcome into the provider's metrics and status.
    ///
    /// This is the single recording path for requests routed through the
    /// router; the registry write lock serializes updates per provider.
    pub async fn record_request(&self, name: &str, outcome: RequestOutcome) {
        let recorded = self
            .registry
            .apply(name, |entry| {
                entry.metrics.record(&outcome);
                if outcome.rate_limited {
                    entry.status.rate_limited = true;
                    entry.status.rate_limit_reset = outcome.rate_limit_reset;
                } else if outcome.success {
                    entry.status.rate_limited = false;
                    entry.status.rate_limit_reset = None;
                }
            })
            .await;
        if recorded.is_err() {
            tracing::debug!(provider = %name, "dropping outcome for unknown provider");
            return;
        }

        if outcome.cost > 0.0 {
            let mut windows = self.cost_windows.lock().expect("cost windows poisoned");
            windows
                .entry(name.to_string())
                .or_default()
                .push_back((Instant::now(), outcome.cost));
        }

        if outcome.rate_limited {
            self.emit(MonitorEvent::RateLimited {
                provider: name.to_string(),
                reset_at: outcome.rate_limit_reset,
            })
            .await;
        }
    }

    /// Probe every provider once, each on its own task, and wait for the
    /// round to finish.
    ///
    /// Probes of distinct providers run in parallel, so a slow probe of
    /// one provider never delays another; the transition events each
    /// probe produces are emitted here, in per-provider causal order.
    pub async fn run_health_probes(&self) {
        let names = self.registry.names().await;
        let mut probes = Vec::with_capacity(names.len());
        for name in names {
            let registry = Arc::clone(&self.registry);
            // A panicked probe is isolated to its task
            probes.push(tokio::spawn(probe_provider(registry, name)));
        }
        for probe in futures::future::join_all(probes).await {
            if let Ok(Some(event)) = probe {
                self.emit(event).await;
            }
        }
    }

    /// Sweep metrics against the thresholds and clear lapsed rate limits.
    pub async fn run_metrics_sweep(&self) {
        let now = Utc::now();
        let thresholds = self.config.thresholds.clone();
        let snapshots = self.registry.snapshot_all().await;
        let mut events = Vec::new();

        for snapshot in snapshots {
            let name = &snapshot.name;

            if snapshot.status.rate_limited && snapshot.status.rate_limit_expired(now) {
                let _ = self
                    .registry
                    .apply(name, |entry| {
                        entry.status.rate_limited = false;
                        entry.status.rate_limit_reset = None;
                    })
                    .await;
            }

            let metrics = &snapshot.metrics;
            if metrics.is_cold() {
                continue;
            }
            if metrics.error_rate > thresholds.error_rate {
                events.push(MonitorEvent::HighErrorRate {
                    provider: name.clone(),
                    value: metrics.error_rate,
                    threshold: thresholds.error_rate,
                });
            }
            if metrics.avg_latency_ms > thresholds.latency_ms {
                events.push(MonitorEvent::HighLatency {
                    provider: name.clone(),
                    value: metrics.avg_latency_ms,
                    threshold: thresholds.latency_ms,
                });
            }
            if metrics.success_rate < thresholds.success_rate {
                events.push(MonitorEvent::LowSuccessRate {
                    provider: name.clone(),
                    value: metrics.success_rate,
                    threshold: thresholds.success_rate,
                });
            }

            let window_cost = self.window_cost(name);
            if window_cost > thresholds.cost {
                events.push(MonitorEvent::HighCost {
                    provider: name.clone(),
                    value: window_cost,
                    threshold: thresholds.cost,
                });
            }
        }

        for event in events {
            self.emit(event).await;
        }
    }

    /// Cost accumulated for a provider within the rolling window.
    pub fn window_cost(&self, name: &str) -> f64 {
        let mut windows = self.cost_windows.lock().expect("cost windows poisoned");
        let Some(window) = windows.get_mut(name) else {
            return 0.0;
        };
        if let Some(horizon) = Instant::now().checked_sub(self.config.cost_window) {
            while window.front().is_some_and(|(at, _)| *at < horizon) {
                window.pop_front();
            }
        }
        window.iter().map(|(_, cost)| cost).sum()
    }

    async fn emit(&self, event: MonitorEvent) {
        let envelope = EventEnvelope {
            at: Utc::now(),
            severity: event.severity(),
            event,
        };
        tracing::info!(
            provider = %envelope.event.provider(),
            severity = ?envelope.severity,
            "monitor event: {:?}",
            envelope.event
        );

        // Copy-on-read snapshot: the lock is never held across a callback
        let snapshot: Vec<EventSubscriber> = {
            let subscribers = self.subscribers.read().expect("subscriber list poisoned");
            subscribers.clone()
        };
        for subscriber in snapshot {
            let envelope = envelope.clone();
            // One task per delivery: a slow or panicking subscriber is
            // isolated from the others and from the monitor itself
            tokio::spawn(async move {
                subscriber(envelope);
            });
        }

        if let Some(dir) = &self.config.event_log_dir {
            if let Err(err) = append_event_log(dir, &envelope).await {
                tracing::warn!(error = %err, "failed to append monitor event log");
            }
        }
    }
}

/// Probe one provider and fold the result into its health state.
///
/// Returns the transition event to emit, if the probe crossed an
/// up/down boundary.
async fn probe_provider(
    registry: Arc<ProviderRegistry>,
    name: String,
) -> Option<MonitorEvent> {
    let provider = registry.provider(&name).await?;
    let timeout = registry
        .snapshot(&name)
        .await
        .map(|s| s.config.timeout)
        .unwrap_or(Duration::from_secs(10));

    let result = match tokio::time::timeout(timeout, provider.health_check()).await {
        Ok(inner) => inner,
        Err(_) => Err(crate::error::ProviderError::Timeout),
    };
    let healthy = result.is_ok();
    let now = Utc::now();

    let transition = registry
        .apply(&name, |entry| {
            let previous = entry.status.health_state;
            entry.status.last_health_check = Some(now);
            if healthy {
                entry.status.consecutive_errors = 0;
                entry.status.health_state = HealthState::Healthy;
                entry.last_healthy = Some(now);
            } else {
                entry.status.consecutive_errors += 1;
                entry.status.health_state = if entry.status.consecutive_errors >= 3 {
                    HealthState::Unhealthy
                } else {
                    HealthState::Degraded
                };
            }
            (
                previous,
                entry.status.health_state,
                entry.status.consecutive_errors,
            )
        })
        .await;

    let (previous, current, consecutive_errors) = transition.ok()?;

    if let Err(err) = &result {
        tracing::debug!(provider = %name, error = %err, consecutive_errors, "health probe failed");
    }

    match (previous, current) {
        (HealthState::Unhealthy, HealthState::Healthy) => {
            Some(MonitorEvent::ProviderUp { provider: name })
        }
        (prev, HealthState::Unhealthy) if prev != HealthState::Unhealthy => {
            Some(MonitorEvent::ProviderDown {
                provider: name,
                consecutive_errors,
            })
        }
        _ => None,
    }
}

/// Append one envelope to the per-day JSONL log under `dir`.
async fn append_event_log(dir: &std::path::Path, envelope: &EventEnvelope) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    tokio::fs::create_dir_all(dir).await?;
    let file_name = format!("events-{}.jsonl", envelope.at.format("%Y-%m-%d"));
    let mut line = serde_json::to_string(envelope).map_err(std::io::Error::other)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(file_name))
        .await?;
    file.write_all(line.as_bytes()).await?;
    Ok(())
}
