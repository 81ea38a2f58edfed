//! # Error Handling Module
//!
//! Classified errors for provider adapters and the routing layer.
//!
//! ## Error classes
//!
//! Provider failures are classified at the adapter boundary so that the
//! router can decide, without inspecting backend details, whether an error
//! is worth retrying:
//!
//! - **RateLimited**: the backend throttled us; carries the reset time when
//!   the backend reported one
//! - **Timeout**: a deadline elapsed at any layer
//! - **Transient**: retry-eligible (network blip, 5xx)
//! - **Permanent**: do not retry (malformed request, 4xx other than 429)
//! - **Malformed**: the backend answered but the body was not decodable
//!
//! Router-level errors wrap provider errors and add routing-specific
//! conditions such as `NoViableProvider`.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Classified provider adapter errors.
///
/// Adapters map backend-specific failures onto these classes; everything
/// above the adapter relies only on the class, never on backend details.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The backend throttled the request
    #[error("rate limited{}", reset_hint(.reset_at))]
    RateLimited {
        /// When the backend said the limit resets, if reported
        reset_at: Option<DateTime<Utc>>,
    },

    /// A deadline elapsed before the backend answered
    #[error("request timed out")]
    Timeout,

    /// Retry-eligible failure (network blip, 5xx)
    #[error("transient error: {message}")]
    Transient {
        /// Backend or transport detail
        message: String,
    },

    /// Non-retriable failure (bad request, unsupported operation)
    #[error("permanent error: {message}")]
    Permanent {
        /// Backend or validation detail
        message: String,
    },

    /// The backend answered with an undecodable body
    #[error("malformed response: {message}")]
    Malformed {
        /// Decode failure detail
        message: String,
    },

    /// HTTP transport error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid or missing adapter configuration
    #[error("configuration error: {message}")]
    Configuration {
        /// What was wrong with the configuration
        message: String,
    },
}

impl ProviderError {
    /// Whether the router may retry this error under the provider's
    /// retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. }
            | ProviderError::Timeout
            | ProviderError::Transient { .. } => true,
            ProviderError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ProviderError::Serialization(_)
            | ProviderError::Malformed { .. }
            | ProviderError::Permanent { .. }
            | ProviderError::Configuration { .. } => false,
        }
    }

    /// The rate-limit reset time, if this error carries one.
    pub fn rate_limit_reset(&self) -> Option<DateTime<Utc>> {
        match self {
            ProviderError::RateLimited { reset_at } => *reset_at,
            _ => None,
        }
    }

    /// Whether this error is a rate-limit rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }
}

fn reset_hint(reset_at: &Option<DateTime<Utc>>) -> String {
    match reset_at {
        Some(at) => format!(" until {}", at.to_rfc3339()),
        None => String::new(),
    }
}

/// Routing and registry errors.
#[derive(Error, Debug)]
pub enum RouterError {
    /// No registered provider satisfied the request's constraints
    #[error("no viable provider: {reason}")]
    NoViableProvider {
        /// Why every candidate was rejected
        reason: String,
    },

    /// A provider name was not found in the registry
    #[error("provider not found: {name}")]
    ProviderNotFound {
        /// The missing name
        name: String,
    },

    /// A provider with the same name is already registered
    #[error("provider already registered: {name}")]
    DuplicateProvider {
        /// The conflicting name
        name: String,
    },

    /// Deregistration attempted while requests were in flight
    #[error("provider busy: {name} has {current_load} in-flight requests")]
    ProviderBusy {
        /// The busy provider
        name: String,
        /// In-flight request count at the time of the attempt
        current_load: u32,
    },

    /// The selected provider kept failing after retries and fallbacks
    #[error("retries exhausted on {provider}: {source}")]
    RetriesExhausted {
        /// Last provider tried
        provider: String,
        /// The final failure
        #[source]
        source: ProviderError,
    },

    /// A provider error surfaced without routing-level recovery
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Invariant violation or bug; always logged with context
    #[error("internal error: {message}")]
    Internal {
        /// What went wrong
        message: String,
    },
}

/// Certification errors.
#[derive(Error, Debug)]
pub enum CertificationError {
    /// A current certification was required but none exists
    #[error("no current certification for provider {provider}")]
    Expired {
        /// Provider whose certification lapsed or never existed
        provider: String,
    },

    /// The suite is too small to certify against
    #[error("suite {suite} has {actual} tests, minimum is {minimum}")]
    SuiteTooSmall {
        /// Suite name
        suite: String,
        /// Tests present
        actual: usize,
        /// Tests required
        minimum: usize,
    },

    /// The suite-wide deadline elapsed
    #[error("certification timed out after {elapsed_ms}ms")]
    Timeout {
        /// Wall time spent before giving up
        elapsed_ms: u64,
    },

    /// Persistence failure in the certification store
    #[error("certification store error: {0}")]
    Store(#[from] std::io::Error),

    /// Serialization failure in the certification store
    #[error("certification serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
