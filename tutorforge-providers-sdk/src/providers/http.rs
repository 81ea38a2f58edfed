//! Generic JSON-over-HTTP provider adapter.
//!
//! Talks to any backend exposing the four capability endpoints as JSON
//! POSTs (`/parse`, `/validate`, `/compress`, `/interpret`) plus a
//! `GET /health` probe. HTTP failures are classified into the shared
//! error classes; backend details never leak past this file.

use crate::error::ProviderError;
use crate::models::{
    CompressedContext, ErrorInterpretation, ExpectedValue, ParsedInstruction, RequestContext,
    RequestType, ValidationOutcome,
};
use crate::providers::{CostModel, Provider, ProviderConfig};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{header::HeaderMap, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ParseRequest<'a> {
    instruction: &'a str,
    context: &'a RequestContext,
}

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    expected: &'a ExpectedValue,
    actual: &'a str,
    context: &'a RequestContext,
}

#[derive(Debug, Serialize)]
struct CompressRequest<'a> {
    context: &'a RequestContext,
}

#[derive(Debug, Serialize)]
struct InterpretRequest<'a> {
    error_message: &'a str,
    context: &'a RequestContext,
}

/// Provider adapter over a JSON HTTP backend.
pub struct HttpProvider {
    config: ProviderConfig,
    http: Client,
    base_url: String,
    cost_model: CostModel,
}

impl HttpProvider {
    /// Build an adapter for the backend at `base_url`.
    ///
    /// A non-empty `api_key` is sent as a bearer token on every request.
    pub fn new(
        config: ProviderConfig,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let mut default_headers = HeaderMap::new();
        let api_key = api_key.into();
        if !api_key.is_empty() {
            let value = format!("Bearer {api_key}").parse().map_err(|_| {
                ProviderError::Configuration {
                    message: "api key contains invalid header characters".to_string(),
                }
            })?;
            default_headers.insert("Authorization", value);
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|e| ProviderError::Configuration {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            config,
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cost_model: CostModel::default(),
        })
    }

    /// Override the default pricing table.
    pub fn with_cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = cost_model;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TResp, ProviderError> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        if !resp.status().is_success() {
            return Err(classify_error_response(resp).await);
        }
        resp.json::<TResp>()
            .await
            .map_err(|e| ProviderError::Malformed {
                message: format!("undecodable response body: {e}"),
            })
    }
}

#[async_trait::async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn capabilities(&self) -> Vec<String> {
        self.config.capabilities.clone()
    }

    fn regions(&self) -> Vec<String> {
        self.config.regions.clone()
    }

    async fn parse_instruction(
        &self,
        instruction: &str,
        context: &RequestContext,
    ) -> Result<ParsedInstruction, ProviderError> {
        self.post_json(
            "/parse",
            &ParseRequest {
                instruction,
                context,
            },
        )
        .await
    }

    async fn validate_expectation(
        &self,
        expected: &ExpectedValue,
        actual: &str,
        context: &RequestContext,
    ) -> Result<ValidationOutcome, ProviderError> {
        self.post_json(
            "/validate",
            &ValidateRequest {
                expected,
                actual,
                context,
            },
        )
        .await
    }

    async fn compress_context(
        &self,
        full_context: &RequestContext,
    ) -> Result<CompressedContext, ProviderError> {
        self.post_json(
            "/compress",
            &CompressRequest {
                context: full_context,
            },
        )
        .await
    }

    async fn interpret_error(
        &self,
        error_message: &str,
        context: &RequestContext,
    ) -> Result<ErrorInterpretation, ProviderError> {
        self.post_json(
            "/interpret",
            &InterpretRequest {
                error_message,
                context,
            },
        )
        .await
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let resp = self
            .http
            .get(self.url("/health"))
            .send()
            .await
            .map_err(classify_transport_error)?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(classify_error_response(resp).await)
        }
    }

    fn estimate_cost(&self, request_type: RequestType) -> f64 {
        self.cost_model.per_request(request_type)
    }
}

fn classify_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transient {
            message: e.to_string(),
        }
    }
}

async fn classify_error_response(resp: Response) -> ProviderError {
    let status = resp.status();
    let reset_at = parse_rate_limit_reset(resp.headers());
    let body = resp.text().await.unwrap_or_default();

    // Pull a message from common JSON error shapes before falling back to
    // the raw body
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").cloned())
        .and_then(|e| e.get("message").cloned())
        .and_then(|m| m.as_str().map(str::to_string))
        .unwrap_or(body);

    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { reset_at },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout,
        s if s.is_server_error() => ProviderError::Transient {
            message: format!("{}: {message}", s.as_u16()),
        },
        s => ProviderError::Permanent {
            message: format!("{}: {message}", s.as_u16()),
        },
    }
}

/// Reset time from `Retry-After` (delta seconds) or `X-RateLimit-Reset`
/// (unix timestamp), whichever the backend sent.
fn parse_rate_limit_reset(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    if let Some(retry_after) = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
    {
        return Some(Utc::now() + chrono::Duration::seconds(retry_after));
    }
    headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> HttpProvider {
        let config = ProviderConfig::new("backend")
            .with_timeout(std::time::Duration::from_secs(2))
            .with_capabilities(["parse_instruction"]);
        HttpProvider::new(config, server.uri(), "test-key").unwrap()
    }

    #[tokio::test]
    async fn parse_instruction_decodes_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/parse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "intent": "create a directory",
                "actions": [{
                    "kind": {"type": "command", "shell": "mkdir demo"},
                    "description": "create demo directory"
                }],
                "prerequisites": [],
                "expected_outcomes": ["directory demo exists"],
                "confidence": 0.92
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let parsed = provider
            .parse_instruction("Create a directory called demo", &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(parsed.intent, "create a directory");
        assert_eq!(parsed.actions[0].shell(), Some("mkdir demo"));
        assert!((parsed.confidence - 0.92).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn rate_limit_carries_reset_from_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/parse"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .parse_instruction("anything", &RequestContext::default())
            .await
            .unwrap_err();
        let reset = err.rate_limit_reset().expect("reset time");
        let delta = (reset - Utc::now()).num_seconds();
        assert!((25..=35).contains(&delta), "unexpected reset delta {delta}");
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/interpret"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .interpret_error("boom", &RequestContext::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, ProviderError::Transient { .. }));
    }

    #[tokio::test]
    async fn client_errors_are_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/validate"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "expected value missing"}
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .validate_expectation(
                &ExpectedValue::Text("ok".into()),
                "actual",
                &RequestContext::default(),
            )
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("expected value missing"));
    }

    #[tokio::test]
    async fn undecodable_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/compress"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .compress_context(&RequestContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Malformed { .. }));
    }

    #[tokio::test]
    async fn health_check_passes_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        assert!(provider.health_check().await.is_ok());
    }
}
