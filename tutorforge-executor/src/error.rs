//! Execution error taxonomy.
//!
//! Every error surfaced by the executor carries a kind, a human message,
//! the component it originated in, whether recovery is worth attempting,
//! and the causal chain. Reports keep a serializable flattening of the
//! same information.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tutorforge_providers_sdk::error::{ProviderError, RouterError};

/// Error kinds surfaced by the execution core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No registered provider met the request's constraints
    NoViableProvider,
    /// The selected provider was throttled
    RateLimited,
    /// Retriable failure
    Transient,
    /// Non-retriable failure
    Permanent,
    /// A deadline elapsed
    Timeout,
    /// A command was rejected by the safety gate
    Permission,
    /// An outcome did not match a validation rule
    Validation,
    /// A configured resource limit was exceeded
    Resource,
    /// A required certification was missing or expired
    CertificationExpired,
    /// Invariant violation or bug
    Internal,
}

impl ErrorKind {
    /// Stable lowercase name used in summaries and reports.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::NoViableProvider => "no_viable_provider",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Permission => "permission",
            ErrorKind::Validation => "validation",
            ErrorKind::Resource => "resource",
            ErrorKind::CertificationExpired => "certification_expired",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether errors of this kind abort the run regardless of the
    /// configured error-handling mode.
    pub fn is_critical(&self) -> bool {
        matches!(self, ErrorKind::Resource | ErrorKind::Internal)
    }
}

/// An execution failure with its origin and causal chain.
#[derive(Debug, Error)]
#[error("{component}: {message}")]
pub struct ExecutionError {
    /// Classified kind
    pub kind: ErrorKind,
    /// Human-readable description
    pub message: String,
    /// Component the error originated in
    pub component: &'static str,
    /// Whether a recovery attempt is worthwhile
    pub recoverable: bool,
    /// Causal chain
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ExecutionError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, component: &'static str, message: impl Into<String>) -> Self {
        let recoverable = matches!(
            kind,
            ErrorKind::Transient | ErrorKind::Timeout | ErrorKind::RateLimited | ErrorKind::Validation
        );
        Self {
            kind,
            message: message.into(),
            component,
            recoverable,
            source: None,
        }
    }

    /// Attach the causing error.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Override recoverability.
    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    /// Map a routing failure into the executor taxonomy.
    pub fn from_router(component: &'static str, err: RouterError) -> Self {
        let kind = match &err {
            RouterError::NoViableProvider { .. } => ErrorKind::NoViableProvider,
            RouterError::ProviderNotFound { .. } | RouterError::DuplicateProvider { .. } => {
                ErrorKind::Internal
            }
            RouterError::ProviderBusy { .. } => ErrorKind::Transient,
            RouterError::RetriesExhausted { source, .. } => provider_kind(source),
            RouterError::Provider(source) => provider_kind(source),
            RouterError::Internal { .. } => ErrorKind::Internal,
        };
        Self::new(kind, component, err.to_string()).with_source(err)
    }
}

fn provider_kind(err: &ProviderError) -> ErrorKind {
    match err {
        ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
        ProviderError::Timeout => ErrorKind::Timeout,
        ProviderError::Transient { .. } | ProviderError::Http(_) => ErrorKind::Transient,
        _ => ErrorKind::Permanent,
    }
}

/// Serializable flattening of an [`ExecutionError`] for reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Classified kind
    pub kind: ErrorKind,
    /// Human-readable description
    pub message: String,
    /// Component the error originated in
    pub component: String,
    /// Whether recovery was considered worthwhile
    pub recoverable: bool,
}

impl From<&ExecutionError> for ErrorRecord {
    fn from(err: &ExecutionError) -> Self {
        Self {
            kind: err.kind,
            message: err.message.clone(),
            component: err.component.to_string(),
            recoverable: err.recoverable,
        }
    }
}
