//! Configuration types for the GitLab client.

use crate::auth::AuthMethod;
use crate::errors::{GitLabError, GitLabErrorKind, GitLabResult};
use std::time::Duration;

/// Default GitLab API base URL.
pub const DEFAULT_BASE_URL: &str = "https://gitlab.com/api/v4";

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default User-Agent header.
pub const DEFAULT_USER_AGENT: &str = "integrations-gitlab/0.1.0";

/// Default rate-limit capacity, used as the page size.
pub const DEFAULT_RATE_LIMIT_CAPACITY: u32 = 10;

/// Default cooldown after a 429 response.
pub const DEFAULT_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// Largest page size GitLab accepts.
pub const MAX_PER_PAGE: u32 = 100;

/// Retry configuration for timeouts and connection failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts per page request, first attempt included.
    pub max_attempts: u32,
    /// Initial backoff delay.
    pub initial_backoff: Duration,
    /// Maximum backoff delay.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Rate limit configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Request capacity per period. Also the page size for list endpoints.
    pub capacity: u32,
    /// How long every fetch against the host pauses after a 429.
    pub cooldown: Duration,
    /// Prefer the upstream `Retry-After` header over `cooldown` when present.
    pub honor_retry_after: bool,
    /// Give up after this many consecutive 429s on one request. `None` retries forever.
    pub max_retries: Option<u32>,
    /// Maximum in-flight requests across all concurrent fetches.
    pub max_concurrent_requests: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RATE_LIMIT_CAPACITY,
            cooldown: DEFAULT_RATE_LIMIT_COOLDOWN,
            honor_retry_after: true,
            max_retries: None,
            max_concurrent_requests: 4,
        }
    }
}

impl RateLimitConfig {
    /// Page size derived from the rate-limit capacity.
    pub fn page_size(&self) -> u32 {
        self.capacity.clamp(1, MAX_PER_PAGE)
    }
}

/// What a follow-up page request carries besides the page token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContinuationMode {
    /// Resend the caller's query parameters with the page token.
    #[default]
    CarryParams,
    /// Send only the page token.
    PageOnly,
}

/// Pagination configuration.
#[derive(Debug, Clone)]
pub struct PaginationConfig {
    /// Query parameters on follow-up pages.
    pub continuation: ContinuationMode,
    /// Pages fetched for one endpoint before failing with a protocol error.
    pub max_pages: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            continuation: ContinuationMode::default(),
            max_pages: 10_000,
        }
    }
}

/// Group hierarchy traversal configuration.
#[derive(Debug, Clone)]
pub struct TraversalConfig {
    /// Deepest subgroup level accepted below a top-level group.
    pub max_depth: usize,
    /// Subgroup listings fetched concurrently.
    pub subgroup_concurrency: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: 50,
            subgroup_concurrency: 4,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum idle connections per host.
    pub max_idle_per_host: usize,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 20,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// GitLab client configuration.
#[derive(Clone)]
pub struct GitLabConfig {
    /// API base URL, including the `/api/v4` prefix.
    pub base_url: String,
    /// Authentication method.
    pub auth: Option<AuthMethod>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// User-Agent header.
    pub user_agent: String,
    /// Target URL for instance webhooks.
    pub webhook_url: Option<String>,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Rate limit configuration.
    pub rate_limit: RateLimitConfig,
    /// Pagination configuration.
    pub pagination: PaginationConfig,
    /// Group traversal configuration.
    pub traversal: TraversalConfig,
    /// Connection pool configuration.
    pub pool: PoolConfig,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth: None,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            webhook_url: None,
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            pagination: PaginationConfig::default(),
            traversal: TraversalConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl std::fmt::Debug for GitLabConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitLabConfig")
            .field("base_url", &self.base_url)
            .field("auth", &self.auth.as_ref().map(|a| a.token_prefix()))
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .field("webhook_url", &self.webhook_url)
            .field("retry", &self.retry)
            .field("rate_limit", &self.rate_limit)
            .field("pagination", &self.pagination)
            .field("traversal", &self.traversal)
            .finish()
    }
}

impl GitLabConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> GitLabConfigBuilder {
        GitLabConfigBuilder::new()
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `GITLAB_TOKEN` (required): bearer token
    /// - `GITLAB_API_URL` (optional): API base URL
    /// - `GITLAB_RATE_LIMIT` (optional): rate-limit capacity, used as page size
    /// - `GITLAB_RATE_LIMIT_PERIOD` (optional): cooldown after a 429, in seconds
    /// - `GITLAB_TIMEOUT` (optional): request timeout in seconds
    /// - `GITLAB_WEBHOOK_URL` (optional): target URL for the instance webhook
    pub fn from_env() -> GitLabResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> GitLabResult<Self> {
        let token = lookup("GITLAB_TOKEN").ok_or_else(|| {
            GitLabError::new(
                GitLabErrorKind::MissingAuth,
                "GITLAB_TOKEN environment variable not set",
            )
        })?;

        let mut builder = GitLabConfigBuilder::new().auth(AuthMethod::bearer(token));

        if let Some(base_url) = lookup("GITLAB_API_URL") {
            builder = builder.base_url(base_url);
        }

        let mut rate_limit = RateLimitConfig::default();
        if let Some(capacity) = lookup("GITLAB_RATE_LIMIT") {
            rate_limit.capacity = parse_env("GITLAB_RATE_LIMIT", &capacity)?;
        }
        if let Some(period) = lookup("GITLAB_RATE_LIMIT_PERIOD") {
            rate_limit.cooldown =
                Duration::from_secs(parse_env("GITLAB_RATE_LIMIT_PERIOD", &period)?);
        }
        builder = builder.rate_limit(rate_limit);

        if let Some(timeout) = lookup("GITLAB_TIMEOUT") {
            builder = builder.timeout(Duration::from_secs(parse_env("GITLAB_TIMEOUT", &timeout)?));
        }

        if let Some(url) = lookup("GITLAB_WEBHOOK_URL") {
            builder = builder.webhook_url(url);
        }

        builder.build()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> GitLabResult<()> {
        if self.base_url.is_empty() {
            return Err(GitLabError::configuration("Base URL cannot be empty"));
        }

        if url::Url::parse(&self.base_url).is_err()
            || (!self.base_url.starts_with("http://") && !self.base_url.starts_with("https://"))
        {
            return Err(GitLabError::configuration(
                "Base URL must be an absolute http:// or https:// URL",
            ));
        }

        if let Some(ref auth) = self.auth {
            if auth.is_empty() {
                return Err(GitLabError::new(
                    GitLabErrorKind::MissingAuth,
                    "GitLab token is empty",
                ));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(GitLabError::configuration("retry.max_attempts must be at least 1"));
        }

        if self.rate_limit.max_concurrent_requests == 0 {
            return Err(GitLabError::configuration(
                "rate_limit.max_concurrent_requests must be at least 1",
            ));
        }

        if self.traversal.subgroup_concurrency == 0 {
            return Err(GitLabError::configuration(
                "traversal.subgroup_concurrency must be at least 1",
            ));
        }

        if self.pagination.max_pages == 0 {
            return Err(GitLabError::configuration("pagination.max_pages must be at least 1"));
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> GitLabResult<T> {
    value.trim().parse().map_err(|_| {
        GitLabError::configuration(format!("{} has an invalid value: {:?}", key, value))
    })
}

/// Builder for GitLabConfig.
#[derive(Debug, Default)]
pub struct GitLabConfigBuilder {
    base_url: Option<String>,
    auth: Option<AuthMethod>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
    webhook_url: Option<String>,
    retry: Option<RetryConfig>,
    rate_limit: Option<RateLimitConfig>,
    pagination: Option<PaginationConfig>,
    traversal: Option<TraversalConfig>,
    pool: Option<PoolConfig>,
}

impl GitLabConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the authentication method.
    pub fn auth(mut self, auth: AuthMethod) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Sets a bearer token.
    pub fn token(self, token: impl Into<String>) -> Self {
        self.auth(AuthMethod::bearer(token))
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the User-Agent header.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Sets the webhook target URL.
    pub fn webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    /// Sets the retry configuration.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Disables retries of timed out requests.
    pub fn no_retry(mut self) -> Self {
        self.retry = Some(RetryConfig {
            max_attempts: 1,
            ..Default::default()
        });
        self
    }

    /// Sets the rate limit configuration.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    /// Sets the pagination configuration.
    pub fn pagination(mut self, config: PaginationConfig) -> Self {
        self.pagination = Some(config);
        self
    }

    /// Sets the traversal configuration.
    pub fn traversal(mut self, config: TraversalConfig) -> Self {
        self.traversal = Some(config);
        self
    }

    /// Sets the connection pool configuration.
    pub fn pool(mut self, config: PoolConfig) -> Self {
        self.pool = Some(config);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> GitLabResult<GitLabConfig> {
        let config = GitLabConfig {
            base_url: self
                .base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            auth: self.auth,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            user_agent: self.user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            webhook_url: self.webhook_url,
            retry: self.retry.unwrap_or_default(),
            rate_limit: self.rate_limit.unwrap_or_default(),
            pagination: self.pagination.unwrap_or_default(),
            traversal: self.traversal.unwrap_or_default(),
            pool: self.pool.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}
