//! GitLab API client implementation.

use crate::auth::AuthMethod;
use crate::config::{GitLabConfig, GitLabConfigBuilder};
use crate::errors::{GitLabError, GitLabErrorKind, GitLabResult};
use crate::hierarchy::GroupEnumerator;
use crate::observability::{redact_headers, Metrics, MetricsSnapshot, RequestTimer};
use crate::pagination::PaginatedFetcher;
use crate::resilience::{retry_after, FetchContext, RateLimitController, RetryExecutor};
use crate::services::{HooksService, ResourceService};
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// GitLab API client.
///
/// Cloning is cheap; clones share the transport, the rate-limit controller,
/// and the metrics.
#[derive(Clone)]
pub struct GitLabClient {
    config: Arc<GitLabConfig>,
    requester: ApiRequester,
}

impl GitLabClient {
    /// Creates a new client backed by reqwest.
    pub fn new(config: GitLabConfig) -> GitLabResult<Self> {
        config.validate()?;

        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool.max_idle_per_host)
            .pool_idle_timeout(config.pool.idle_timeout)
            .build()
            .map_err(|e| {
                GitLabError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Self::with_transport(config, Arc::new(ReqwestTransport::new(http)))
    }

    /// Creates a client over a custom transport.
    pub fn with_transport(
        config: GitLabConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> GitLabResult<Self> {
        config.validate()?;

        let auth = config.auth.as_ref().ok_or_else(|| {
            GitLabError::new(GitLabErrorKind::MissingAuth, "Authentication required")
        })?;

        let requester = ApiRequester::new(&config, auth, transport)?;

        Ok(Self {
            config: Arc::new(config),
            requester,
        })
    }

    /// Creates a new client builder.
    pub fn builder() -> GitLabClientBuilder {
        GitLabClientBuilder::new()
    }

    /// Gets the configuration.
    pub fn config(&self) -> &GitLabConfig {
        &self.config
    }

    /// Gets the base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Gets the shared rate-limit controller.
    pub fn rate_limit(&self) -> &Arc<RateLimitController> {
        &self.requester.rate_limit
    }

    /// Gets a snapshot of request metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.requester.metrics.snapshot()
    }

    /// Gets the paginated fetcher.
    pub fn fetcher(&self) -> PaginatedFetcher {
        PaginatedFetcher::new(self.requester.clone(), self.config.pagination.clone())
    }

    /// Gets the group hierarchy enumerator.
    pub fn group_enumerator(&self) -> GroupEnumerator {
        GroupEnumerator::new(self.fetcher(), self.config.traversal.clone())
    }

    // Service accessors

    /// Gets the resource service.
    pub fn resources(&self) -> ResourceService<'_> {
        ResourceService::new(self)
    }

    /// Gets the webhooks service.
    pub fn hooks(&self) -> HooksService<'_> {
        HooksService::new(self)
    }

    pub(crate) fn requester(&self) -> &ApiRequester {
        &self.requester
    }
}

impl std::fmt::Debug for GitLabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitLabClient")
            .field("config", &self.config)
            .finish()
    }
}

/// Issues single API requests under the shared rate limit.
///
/// Handles authentication headers, per-request timeouts with retry, and
/// 429 cooldowns. Every other status is returned to the caller.
#[derive(Clone)]
pub struct ApiRequester {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    headers: HeaderMap,
    timeout: Duration,
    retry: RetryExecutor,
    rate_limit: Arc<RateLimitController>,
    metrics: Arc<Metrics>,
}

impl ApiRequester {
    fn new(
        config: &GitLabConfig,
        auth: &AuthMethod,
        transport: Arc<dyn HttpTransport>,
    ) -> GitLabResult<Self> {
        let mut headers = HeaderMap::new();
        let (name, value) = auth.header()?;
        headers.insert(name, value);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|_| GitLabError::configuration("User-Agent is not a valid header"))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        Ok(Self {
            transport,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            headers,
            timeout: config.timeout,
            retry: RetryExecutor::from_config(&config.retry),
            rate_limit: Arc::new(RateLimitController::new(&config.rate_limit)),
            metrics: Arc::new(Metrics::new()),
        })
    }

    /// Builds the absolute URL of `endpoint` with query parameters.
    pub fn url(&self, endpoint: &str, params: &[(&str, String)]) -> GitLabResult<Url> {
        let raw = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        let mut url = Url::parse(&raw).map_err(|e| {
            GitLabError::configuration(format!("Invalid endpoint URL {}: {}", raw, e))
                .with_endpoint(endpoint)
        })?;

        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        }

        Ok(url)
    }

    /// Gets the metrics collector.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Sends one logical request, absorbing 429 responses.
    ///
    /// Timeouts and connection failures are retried only for idempotent
    /// methods. Returns any non-429 response, successful or not.
    pub async fn execute(
        &self,
        endpoint: &str,
        method: HttpMethod,
        url: &Url,
        body: Option<Bytes>,
        ctx: &FetchContext,
    ) -> GitLabResult<HttpResponse> {
        let mut throttled: u32 = 0;

        loop {
            let sent = if method.is_idempotent() {
                self.retry
                    .execute(ctx, |attempt| {
                        self.send_once(method, url, body.clone(), attempt, ctx)
                    })
                    .await
            } else {
                self.send_once(method, url, body.clone(), 1, ctx).await
            };
            let response = sent.map_err(|e| e.with_endpoint(endpoint))?;

            if response.status != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            self.metrics.record_throttled();
            if let Some(max) = self.rate_limit.max_retries() {
                if throttled >= max {
                    return Err(
                        GitLabError::rate_limit_exhausted(throttled).with_endpoint(endpoint)
                    );
                }
            }
            throttled += 1;

            let wait = self
                .rate_limit
                .record_rate_limited(retry_after(&response.headers))
                .await;

            tracing::warn!(
                endpoint = %endpoint,
                attempt = throttled,
                cooldown_ms = wait.as_millis() as u64,
                "Rate limit reached; retrying after cooldown"
            );
        }
    }

    async fn send_once(
        &self,
        method: HttpMethod,
        url: &Url,
        body: Option<Bytes>,
        attempt: u32,
        ctx: &FetchContext,
    ) -> GitLabResult<HttpResponse> {
        let _permit = self.rate_limit.acquire(ctx).await?;

        if attempt > 1 {
            self.metrics.record_retry();
        }

        let request = match method {
            HttpMethod::Get => HttpRequest::get(url.clone()),
            HttpMethod::Post => HttpRequest::post(url.clone(), body.unwrap_or_default()),
        }
        .with_headers(self.headers.clone())
        .with_timeout(self.timeout);

        tracing::trace!(
            method = %method,
            url = %url,
            headers = ?redact_headers(&request.headers),
            "Sending GitLab API request"
        );

        let timer = RequestTimer::new(self.metrics.clone());
        let outcome = ctx
            .guard(tokio::time::timeout(self.timeout, self.transport.send(request)))
            .await?;

        match outcome {
            Err(_) => {
                timer.failure();
                Err(GitLabError::timeout(format!(
                    "Request exceeded {} ms",
                    self.timeout.as_millis()
                )))
            }
            Ok(Err(e)) => {
                timer.failure();
                Err(e.into())
            }
            Ok(Ok(response)) => {
                timer.response();
                self.rate_limit.observe(&response.headers);
                tracing::debug!(
                    method = %method,
                    url = %url,
                    status = response.status.as_u16(),
                    "GitLab API request completed"
                );
                Ok(response)
            }
        }
    }
}

/// Builder for GitLabClient.
pub struct GitLabClientBuilder {
    config_builder: GitLabConfigBuilder,
    transport: Option<Arc<dyn HttpTransport>>,
}

impl GitLabClientBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            config_builder: GitLabConfig::builder(),
            transport: None,
        }
    }

    /// Sets the base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.base_url(url);
        self
    }

    /// Sets the authentication method.
    pub fn auth(mut self, auth: AuthMethod) -> Self {
        self.config_builder = self.config_builder.auth(auth);
        self
    }

    /// Sets a bearer token.
    pub fn token(self, token: impl Into<String>) -> Self {
        self.auth(AuthMethod::bearer(token))
    }

    /// Sets the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config_builder = self.config_builder.timeout(timeout);
        self
    }

    /// Sets the User-Agent.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.user_agent(ua);
        self
    }

    /// Disables retries of timed out requests.
    pub fn no_retry(mut self) -> Self {
        self.config_builder = self.config_builder.no_retry();
        self
    }

    /// Uses a custom transport instead of reqwest.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the client.
    pub fn build(self) -> GitLabResult<GitLabClient> {
        let config = self.config_builder.build()?;
        match self.transport {
            Some(transport) => GitLabClient::with_transport(config, transport),
            None => GitLabClient::new(config),
        }
    }
}

impl Default for GitLabClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockResponse, MockTransport};
    use serde_json::json;

    fn client(mock: &MockTransport) -> GitLabClient {
        GitLabClient::builder()
            .base_url("https://gitlab.example.com/api/v4")
            .token("glpat-test")
            .transport(Arc::new(mock.clone()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_url() {
        let mock = MockTransport::new();
        let client = client(&mock);

        let url = client
            .requester()
            .url("/groups/5/subgroups", &[("per_page", "10".to_string())])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://gitlab.example.com/api/v4/groups/5/subgroups?per_page=10"
        );

        let url = client.requester().url("projects", &[]).unwrap();
        assert_eq!(url.as_str(), "https://gitlab.example.com/api/v4/projects");
    }

    #[test]
    fn test_client_requires_auth() {
        let err = GitLabClient::builder().build().unwrap_err();
        assert_eq!(err.kind(), GitLabErrorKind::MissingAuth);
    }

    #[test]
    fn test_client_builder_with_reqwest() {
        let result = GitLabClient::builder()
            .token("glpat-xxxx")
            .user_agent("test-client/1.0")
            .build();

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_execute_sends_auth_headers() {
        let mock = MockTransport::new();
        mock.on_get("/projects", MockResponse::ok(&json!([])));
        let client = client(&mock);

        let url = client.requester().url("/projects", &[]).unwrap();
        let response = client
            .requester()
            .execute("/projects", HttpMethod::Get, &url, None, &FetchContext::new())
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].headers.get("authorization").unwrap(),
            "Bearer glpat-test"
        );
        assert_eq!(requests[0].headers.get("accept").unwrap(), "application/json");
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_returns_upstream_errors_unchanged() {
        let mock = MockTransport::new();
        mock.on_get("/projects", MockResponse::status(500, "boom"));
        let client = client(&mock);

        let url = client.requester().url("/projects", &[]).unwrap();
        let response = client
            .requester()
            .execute("/projects", HttpMethod::Get, &url, None, &FetchContext::new())
            .await
            .unwrap();
        assert_eq!(response.status.as_u16(), 500);
        assert_eq!(mock.request_count(), 1);
    }
}
