//! Error types for the GitLab client.

use std::fmt;
use thiserror::Error;

/// Result type alias for GitLab operations.
pub type GitLabResult<T> = Result<T, GitLabError>;

/// Error kinds for categorizing GitLab errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GitLabErrorKind {
    // Configuration errors
    /// Missing authentication token.
    MissingAuth,
    /// Invalid configuration.
    InvalidConfiguration,

    // Upstream errors
    /// Non-2xx, non-429 response or a body that is not a record list.
    Upstream,
    /// Upstream kept answering 429 past the configured retry ceiling.
    RateLimitExhausted,

    // Network errors
    /// Connection failed.
    ConnectionFailed,
    /// A single request exceeded its timeout.
    Timeout,

    // Traversal and pagination errors
    /// Malformed pagination, such as a repeating continuation token.
    Protocol,
    /// Group hierarchy deeper than the configured maximum.
    DepthExceeded,

    // Normalization errors
    /// A record is missing a required field or has a field of the wrong type.
    MalformedRecord,

    // Caller-initiated
    /// Cancelled by the caller or past the caller's deadline.
    Cancelled,

    // Request errors
    /// Request body could not be encoded.
    Serialization,
}

impl fmt::Display for GitLabErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAuth => write!(f, "missing_auth"),
            Self::InvalidConfiguration => write!(f, "invalid_configuration"),
            Self::Upstream => write!(f, "upstream"),
            Self::RateLimitExhausted => write!(f, "rate_limit_exhausted"),
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::Protocol => write!(f, "protocol"),
            Self::DepthExceeded => write!(f, "depth_exceeded"),
            Self::MalformedRecord => write!(f, "malformed_record"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Serialization => write!(f, "serialization"),
        }
    }
}

/// GitLab API error with context about where it happened.
#[derive(Error, Debug)]
pub struct GitLabError {
    /// Error kind.
    kind: GitLabErrorKind,
    /// Error message.
    message: String,
    /// HTTP status code.
    status_code: Option<u16>,
    /// Endpoint being fetched when the error occurred.
    endpoint: Option<String>,
    /// Response body, for upstream failures.
    body: Option<String>,
    /// Underlying cause.
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for GitLabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(code) = self.status_code {
            write!(f, " (HTTP {})", code)?;
        }
        if let Some(ref endpoint) = self.endpoint {
            write!(f, " [endpoint: {}]", endpoint)?;
        }
        Ok(())
    }
}

impl GitLabError {
    /// Creates a new GitLab error.
    pub fn new(kind: GitLabErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            endpoint: None,
            body: None,
            cause: None,
        }
    }

    /// Sets the HTTP status code.
    pub fn with_status(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Sets the endpoint. An endpoint already recorded is kept.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        if self.endpoint.is_none() {
            self.endpoint = Some(endpoint.into());
        }
        self
    }

    /// Sets the response body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Gets the error kind.
    pub fn kind(&self) -> GitLabErrorKind {
        self.kind
    }

    /// Gets the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Gets the HTTP status code.
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Gets the endpoint.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Gets the response body.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Returns true if the failed request may be retried.
    ///
    /// Rate limiting is absorbed by the fetcher and never reaches this check.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            GitLabErrorKind::Timeout | GitLabErrorKind::ConnectionFailed
        )
    }

    /// Returns true if the caller cancelled the operation.
    pub fn is_cancelled(&self) -> bool {
        self.kind == GitLabErrorKind::Cancelled
    }

    // Convenience constructors

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(GitLabErrorKind::InvalidConfiguration, message)
    }

    /// Creates an upstream error from a non-success response.
    pub fn upstream(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let mut message = format!("Upstream responded with HTTP {}", status);
        if !body.is_empty() {
            message.push_str(": ");
            message.push_str(truncate(&body, 256));
        }
        Self::new(GitLabErrorKind::Upstream, message)
            .with_status(status)
            .with_body(body)
    }

    /// Creates an error for a response body that is not a list of records.
    pub fn malformed_body(message: impl Into<String>) -> Self {
        Self::new(GitLabErrorKind::Upstream, message)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(GitLabErrorKind::Timeout, message)
    }

    /// Creates a pagination protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(GitLabErrorKind::Protocol, message)
    }

    /// Creates a normalization error for one record of a batch.
    pub fn malformed_record(kind: &str, index: usize, field: &str, problem: &str) -> Self {
        Self::new(
            GitLabErrorKind::MalformedRecord,
            format!("{} record #{}: field `{}` {}", kind, index, field, problem),
        )
    }

    /// Creates a depth guard error.
    pub fn depth_exceeded(max_depth: usize, group_id: &str) -> Self {
        Self::new(
            GitLabErrorKind::DepthExceeded,
            format!(
                "Group hierarchy below group {} exceeds maximum depth {}",
                group_id, max_depth
            ),
        )
    }

    /// Creates a cancellation error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(GitLabErrorKind::Cancelled, message)
    }

    /// Creates an error for a 429 that outlasted the retry ceiling.
    pub fn rate_limit_exhausted(attempts: u32) -> Self {
        Self::new(
            GitLabErrorKind::RateLimitExhausted,
            format!("Still rate limited after {} retries", attempts),
        )
        .with_status(429)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Errors raised by an [`HttpTransport`](crate::transport::HttpTransport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Network error.
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout error.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Network(err.to_string())
        } else {
            TransportError::Http(err.to_string())
        }
    }
}

impl From<TransportError> for GitLabError {
    fn from(err: TransportError) -> Self {
        let kind = match &err {
            TransportError::Timeout(_) => GitLabErrorKind::Timeout,
            TransportError::Network(_) => GitLabErrorKind::ConnectionFailed,
            TransportError::Http(_) => GitLabErrorKind::Upstream,
        };
        GitLabError::new(kind, err.to_string()).with_cause(err)
    }
}
