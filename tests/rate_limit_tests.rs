//! Rate limiting, timeouts, and retries against a mock transport.

mod common;

use common::{client, client_with, config};
use integrations_gitlab::config::RateLimitConfig;
use integrations_gitlab::errors::TransportError;
use integrations_gitlab::mocks::{fixtures, MockResponse, MockTransport};
use integrations_gitlab::resilience::MAX_RETRY_AFTER_SECS;
use integrations_gitlab::{FetchContext, GitLabErrorKind};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

fn cooldown(seconds: u64) -> RateLimitConfig {
    RateLimitConfig {
        cooldown: Duration::from_secs(seconds),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_is_absorbed() {
    let mock = MockTransport::new();
    mock.on_get("/projects", MockResponse::rate_limited());
    mock.on_get(
        "/projects",
        MockResponse::page(&json!([fixtures::project(1, "api")]), None),
    );
    let client = client_with(&mock, config().rate_limit(cooldown(60)));

    let start = Instant::now();
    let projects = assert_ok!(client.resources().list_projects().await);
    assert_eq!(projects.len(), 1);
    assert!(start.elapsed() >= Duration::from_secs(60));

    let requests = mock.requests_to("/projects");
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].url, requests[1].url);
    assert_eq!(client.metrics().throttled, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_header_overrides_cooldown() {
    let mock = MockTransport::new();
    mock.on_get(
        "/issues",
        MockResponse::rate_limited().with_header("Retry-After", "5"),
    );
    mock.on_get("/issues", MockResponse::page(&json!([]), None));
    let client = client_with(&mock, config().rate_limit(cooldown(60)));

    let start = Instant::now();
    assert_ok!(client.resources().list_issues().await);
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(5));
    assert!(waited < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_oversized_retry_after_is_clamped() {
    let mock = MockTransport::new();
    mock.on_get(
        "/projects",
        MockResponse::rate_limited().with_header("Retry-After", "18446744073709551615"),
    );
    mock.on_get(
        "/projects",
        MockResponse::page(&json!([fixtures::project(1, "api")]), None),
    );
    let client = client_with(&mock, config().rate_limit(cooldown(60)));

    let start = Instant::now();
    let projects = assert_ok!(client.resources().list_projects().await);
    assert_eq!(projects.len(), 1);
    assert!(start.elapsed() >= Duration::from_secs(MAX_RETRY_AFTER_SECS));
    assert_eq!(mock.request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_is_shared_across_fetches() {
    let mock = MockTransport::new();
    mock.on_get("/projects", MockResponse::rate_limited());
    mock.on_get("/projects", MockResponse::page(&json!([]), None));
    mock.on_get("/issues", MockResponse::page(&json!([]), None));
    let client = client_with(&mock, config().rate_limit(cooldown(30)));

    let start = Instant::now();
    let projects = client.resources();
    let issues = client.resources();
    let (p, i) = tokio::join!(projects.list_projects(), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        issues.list_issues().await
    });
    assert_ok!(p);
    assert_ok!(i);

    let issue_request = &mock.requests_to("/issues")[0];
    assert!(issue_request.sent_at.duration_since(start) >= Duration::from_secs(30));
    assert_eq!(mock.request_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_ceiling_surfaces_exhaustion() {
    let mock = MockTransport::new();
    mock.always_get("/projects", MockResponse::rate_limited());
    let client = client_with(
        &mock,
        config().rate_limit(RateLimitConfig {
            cooldown: Duration::from_secs(1),
            max_retries: Some(2),
            ..Default::default()
        }),
    );

    let err = assert_err!(client.resources().list_projects().await);
    assert_eq!(err.kind(), GitLabErrorKind::RateLimitExhausted);
    assert_eq!(err.endpoint(), Some("/projects"));
    assert_eq!(mock.request_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_remaining_budget_is_tracked() {
    let mock = MockTransport::new();
    mock.on_get(
        "/projects",
        MockResponse::page(&json!([]), None).with_header("RateLimit-Remaining", "42"),
    );
    let client = client(&mock);
    assert_eq!(client.rate_limit().remaining(), None);

    assert_ok!(client.resources().list_projects().await);
    assert_eq!(client.rate_limit().remaining(), Some(42));
}

#[tokio::test(start_paused = true)]
async fn test_slow_page_times_out() {
    let mock = MockTransport::new();
    mock.on_get(
        "/projects",
        MockResponse::page(&json!([]), None).with_delay(Duration::from_secs(5)),
    );
    let client = client_with(&mock, config().timeout(Duration::from_secs(1)).no_retry());

    let err = assert_err!(client.resources().list_projects().await);
    assert_eq!(err.kind(), GitLabErrorKind::Timeout);
    assert_eq!(err.endpoint(), Some("/projects"));
    assert_eq!(mock.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_page_is_retried() {
    let mock = MockTransport::new();
    mock.on_get(
        "/projects",
        MockResponse::page(&json!([]), None).with_delay(Duration::from_secs(5)),
    );
    mock.on_get(
        "/projects",
        MockResponse::page(&json!([fixtures::project(1, "api")]), None),
    );
    let client = client_with(&mock, config().timeout(Duration::from_secs(1)));

    let projects = assert_ok!(client.resources().list_projects().await);
    assert_eq!(projects.len(), 1);
    assert_eq!(client.metrics().retries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_failure_after_retries() {
    let mock = MockTransport::new();
    mock.always_get(
        "/issues",
        MockResponse::transport_error(TransportError::Network("connection refused".to_string())),
    );
    let client = client(&mock);

    let err = assert_err!(
        client
            .fetcher()
            .fetch("/issues", &[], &FetchContext::new())
            .await
    );
    assert_eq!(err.kind(), GitLabErrorKind::ConnectionFailed);
    assert_eq!(mock.request_count(), 3);
}
