//! Usage API fetcher
//!
//! Performs one authenticated request against the usage endpoint and
//! classifies the result. The classification is what the rest of the engine
//! relies on:
//!
//! - **Transient** - the request never produced a usable response (DNS, TLS,
//!   timeout, malformed body). Nothing changes; the next cycle retries.
//! - **NotEligible** - HTTP 401/403, or no credential at all. The account
//!   cannot see usage data, which is an expected outcome rather than an error.
//!   A credential that exists but cannot be read right now is Transient.
//! - **Failed** - any other non-success status. Logged, state preserved.
//! - **Updated** - success, payload normalized into a [`UsageSnapshot`].
//!
//! The physical request is delegated to a [`UsageTransport`], so the fetcher
//! does not care whether it goes straight to the network or through a host
//! process.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::credentials::TokenProvider;
use crate::error::{Result, UsageError};
use crate::models::{UsageAvailability, UsageSnapshot};
use crate::normalizer::normalize_usage;

/// API endpoint for usage limits
pub const USAGE_API_URL: &str = "https://api.anthropic.com/api/oauth/usage";

/// Beta header required for OAuth API
pub const ANTHROPIC_BETA_HEADER: &str = "anthropic-beta";
pub const ANTHROPIC_BETA_VALUE: &str = "oauth-2025-04-20";

/// User agent to match Claude Code
pub const CLAUDE_CODE_USER_AGENT: &str = "claude-code/2.0.31";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoint and fixed header values for the usage request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiSettings {
    pub endpoint: String,
    pub beta_value: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            endpoint: USAGE_API_URL.to_string(),
            beta_value: ANTHROPIC_BETA_VALUE.to_string(),
            user_agent: CLAUDE_CODE_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// A fully prepared GET request.
#[derive(Clone, PartialEq)]
pub struct UsageRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl UsageRequest {
    pub fn new(settings: &ApiSettings, token: &str) -> Self {
        Self {
            url: settings.endpoint.clone(),
            headers: vec![
                ("Accept".to_string(), "application/json".to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Authorization".to_string(), format!("Bearer {token}")),
                (ANTHROPIC_BETA_HEADER.to_string(), settings.beta_value.clone()),
                ("User-Agent".to_string(), settings.user_agent.clone()),
            ],
            timeout: settings.timeout,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

// Keeps the bearer token out of logs.
impl fmt::Debug for UsageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(key, value)| {
                if key.eq_ignore_ascii_case("authorization") {
                    (key.as_str(), "Bearer <redacted>")
                } else {
                    (key.as_str(), value.as_str())
                }
            })
            .collect();

        f.debug_struct("UsageRequest")
            .field("url", &self.url)
            .field("headers", &headers)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Raw HTTP response as seen by the fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Carries a prepared request to the network.
///
/// An `Err` means no HTTP response was obtained at all.
#[async_trait]
pub trait UsageTransport: Send + Sync {
    async fn get(&self, request: &UsageRequest) -> Result<TransportResponse>;
}

#[async_trait]
impl<T: UsageTransport + ?Sized> UsageTransport for Arc<T> {
    async fn get(&self, request: &UsageRequest) -> Result<TransportResponse> {
        (**self).get(request).await
    }
}

/// Direct HTTPS transport backed by reqwest.
#[cfg(feature = "http")]
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl UsageTransport for HttpTransport {
    async fn get(&self, request: &UsageRequest) -> Result<TransportResponse> {
        use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let invalid = || UsageError::InvalidHeader { name: name.clone() };
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?,
                HeaderValue::from_str(value).map_err(|_| invalid())?,
            );
        }

        let response = self
            .client
            .get(&request.url)
            .headers(headers)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UsageError::Timeout(request.timeout.as_secs())
                } else {
                    UsageError::Transport(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| UsageError::Transport(format!("Failed to read response body: {e}")))?;

        Ok(TransportResponse { status, body })
    }
}

/// Result of one fetch cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Fresh snapshot from a successful response
    Updated(UsageSnapshot),
    /// 401/403, or `None` when no credential was available
    NotEligible { status: Option<u16> },
    /// No usable response this cycle
    Transient { reason: String },
    /// Unexpected non-success status
    Failed { status: u16, message: String },
}

impl FetchOutcome {
    pub fn snapshot(&self) -> Option<&UsageSnapshot> {
        match self {
            FetchOutcome::Updated(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    /// Whether this outcome leaves stored state untouched.
    pub fn is_no_change(&self) -> bool {
        matches!(
            self,
            FetchOutcome::Transient { .. } | FetchOutcome::Failed { .. }
        )
    }
}

impl UsageAvailability {
    /// Availability after `outcome` is applied on top of `current`.
    pub fn from_outcome(current: UsageAvailability, outcome: &FetchOutcome) -> UsageAvailability {
        match outcome {
            FetchOutcome::Updated(_) => UsageAvailability::Available,
            FetchOutcome::NotEligible { .. } => UsageAvailability::Unavailable,
            FetchOutcome::Transient { .. } | FetchOutcome::Failed { .. } => current,
        }
    }
}

/// The abstract "fetch usage" capability the poller depends on.
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn fetch_usage(&self) -> FetchOutcome;
}

#[async_trait]
impl<S: UsageSource + ?Sized> UsageSource for Arc<S> {
    async fn fetch_usage(&self) -> FetchOutcome {
        (**self).fetch_usage().await
    }
}

/// Builds the request, sends it and classifies the response.
pub struct UsageFetcher<T> {
    transport: T,
    tokens: Arc<dyn TokenProvider>,
    settings: ApiSettings,
}

impl<T: UsageTransport> UsageFetcher<T> {
    pub fn new(transport: T, tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_settings(transport, tokens, ApiSettings::default())
    }

    pub fn with_settings(transport: T, tokens: Arc<dyn TokenProvider>, settings: ApiSettings) -> Self {
        Self {
            transport,
            tokens,
            settings,
        }
    }

    pub fn settings(&self) -> &ApiSettings {
        &self.settings
    }

    /// Run one request and classify it. Never fails.
    pub async fn fetch(&self) -> FetchOutcome {
        let token = match self.tokens.token().await {
            Ok(token) => token,
            Err(e) if e.is_missing_credential() => {
                debug!(error = %e, "No usage API credential available");
                return FetchOutcome::NotEligible { status: None };
            }
            Err(e) => {
                warn!(error = %e, "Could not load usage API credential, keeping previous state");
                return FetchOutcome::Transient {
                    reason: e.to_string(),
                };
            }
        };

        let request = UsageRequest::new(&self.settings, &token);
        debug!(url = %request.url, "Fetching subscription usage");

        match self.transport.get(&request).await {
            Ok(response) => classify_response(response),
            Err(e) => {
                warn!(error = %e, "Usage fetch failed, keeping previous state");
                FetchOutcome::Transient {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl<T: UsageTransport> UsageSource for UsageFetcher<T> {
    async fn fetch_usage(&self) -> FetchOutcome {
        self.fetch().await
    }
}

/// Map an HTTP response onto a [`FetchOutcome`].
pub fn classify_response(response: TransportResponse) -> FetchOutcome {
    match response.status {
        401 | 403 => {
            debug!(status = response.status, "Account not eligible for usage data");
            FetchOutcome::NotEligible {
                status: Some(response.status),
            }
        }
        status if !response.is_success() => {
            error!(status, body = %response.body, "Usage API returned an error");
            FetchOutcome::Failed {
                status,
                message: response.body,
            }
        }
        _ => match serde_json::from_str::<serde_json::Value>(&response.body) {
            Ok(payload) => FetchOutcome::Updated(normalize_usage(&payload)),
            Err(e) => {
                let e = UsageError::from(e);
                warn!(error = %e, "Usage response was not valid JSON");
                FetchOutcome::Transient {
                    reason: e.to_string(),
                }
            }
        },
    }
}
