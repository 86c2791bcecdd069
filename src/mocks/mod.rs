//! Mock implementations for testing GitLab API clients.

use crate::errors::TransportError;
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Path prefix stripped from request URLs before matching.
pub const API_PREFIX: &str = "/api/v4";

/// A mock response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: String,
    /// Headers.
    pub headers: HashMap<String, String>,
    /// Delay before responding.
    pub delay: Option<Duration>,
    /// Transport failure returned instead of a response.
    pub error: Option<TransportError>,
}

impl MockResponse {
    /// Creates a 200 response with the given JSON body.
    pub fn ok<T: Serialize>(body: &T) -> Self {
        Self::status(200, &serde_json::to_string(body).unwrap_or_default())
    }

    /// Creates a 200 list page, with `next` in the `X-Next-Page` header.
    ///
    /// The header is sent empty on the last page, as GitLab does.
    pub fn page<T: Serialize>(body: &T, next: Option<&str>) -> Self {
        Self::ok(body).with_header("x-next-page", next.unwrap_or(""))
    }

    /// Creates a 201 Created response.
    pub fn created<T: Serialize>(body: &T) -> Self {
        Self::status(201, &serde_json::to_string(body).unwrap_or_default())
    }

    /// Creates a response with an arbitrary status and raw body.
    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            headers: HashMap::new(),
            delay: None,
            error: None,
        }
    }

    /// Creates a 404 Not Found response.
    pub fn not_found(resource: &str) -> Self {
        Self::status(
            404,
            &serde_json::json!({ "message": format!("404 {} Not Found", resource) }).to_string(),
        )
    }

    /// Creates a 429 Too Many Requests response.
    pub fn rate_limited() -> Self {
        Self::status(429, "Retry later").with_header("ratelimit-remaining", "0")
    }

    /// Fails the request at the transport instead of responding.
    pub fn transport_error(error: TransportError) -> Self {
        Self {
            error: Some(error),
            ..Self::status(0, "")
        }
    }

    /// Adds a delay to the response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Adds a header to the response.
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_lowercase(), value.to_string());
        self
    }

    fn into_http(self) -> HttpResponse {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut headers = HeaderMap::new();
        for (key, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }

        HttpResponse::new(status, headers, Bytes::from(self.body))
    }
}

/// A recorded mock request.
#[derive(Debug, Clone)]
pub struct MockRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Request path, without the API prefix.
    pub path: String,
    /// Query parameters, in order.
    pub query: Vec<(String, String)>,
    /// Full request URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Option<String>,
    /// When the transport received the request.
    pub sent_at: Instant,
}

impl MockRequest {
    /// Gets the first value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default)]
struct MockState {
    queued: HashMap<String, VecDeque<MockResponse>>,
    repeated: HashMap<String, MockResponse>,
    requests: Vec<MockRequest>,
}

/// In-memory transport answering requests from registered responses.
///
/// Responses registered for one method and path are served in FIFO order.
/// Unmatched requests get a 404.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn key(method: HttpMethod, path: &str) -> String {
    format!("{}:{}", method, path)
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues a response for a given method and path.
    pub fn register(&self, method: HttpMethod, path: &str, response: MockResponse) {
        self.state()
            .queued
            .entry(key(method, path))
            .or_default()
            .push_back(response);
    }

    /// Queues a GET response.
    pub fn on_get(&self, path: &str, response: MockResponse) {
        self.register(HttpMethod::Get, path, response);
    }

    /// Queues a POST response.
    pub fn on_post(&self, path: &str, response: MockResponse) {
        self.register(HttpMethod::Post, path, response);
    }

    /// Serves `response` for every GET of `path` once its queue is empty.
    pub fn always_get(&self, path: &str, response: MockResponse) {
        self.state()
            .repeated
            .insert(key(HttpMethod::Get, path), response);
    }

    /// Gets all recorded requests.
    pub fn requests(&self) -> Vec<MockRequest> {
        self.state().requests.clone()
    }

    /// Gets the recorded requests to `path`.
    pub fn requests_to(&self, path: &str) -> Vec<MockRequest> {
        self.state()
            .requests
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    /// Gets the number of recorded requests.
    pub fn request_count(&self) -> usize {
        self.state().requests.len()
    }

    /// Gets the highest number of requests observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Clears recorded requests and registered responses.
    pub fn reset(&self) {
        *self.state() = MockState::default();
        self.max_in_flight.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let path = request
            .url
            .path()
            .strip_prefix(API_PREFIX)
            .unwrap_or(request.url.path())
            .to_string();

        let response = {
            let mut state = self.state();
            state.requests.push(MockRequest {
                method: request.method,
                path: path.clone(),
                query: request
                    .url
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect(),
                url: request.url.clone(),
                headers: request.headers.clone(),
                body: request
                    .body
                    .as_ref()
                    .map(|b| String::from_utf8_lossy(b).into_owned()),
                sent_at: Instant::now(),
            });

            let key = key(request.method, &path);
            let queued = state.queued.get_mut(&key).and_then(VecDeque::pop_front);
            match queued {
                Some(response) => Some(response),
                None => state.repeated.get(&key).cloned(),
            }
        };

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let response = match response {
            Some(response) => response,
            None => MockResponse::not_found(&format!("{} {}", request.method, path)),
        };

        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }

        match response.error {
            Some(error) => Err(error),
            None => Ok(response.into_http()),
        }
    }
}

/// Raw GitLab records as the API returns them.
pub mod fixtures {
    use serde_json::{json, Value};

    /// A group record.
    pub fn group(id: u64, name: &str, subgroup_count: u64) -> Value {
        json!({
            "id": id,
            "name": name,
            "path": name,
            "full_path": name,
            "description": format!("{} group", name),
            "visibility": "private",
            "web_url": format!("https://gitlab.example.com/groups/{}", name),
            "parent_id": null,
            "subgroup_count": subgroup_count
        })
    }

    /// A project record in the `platform/backend` namespace.
    pub fn project(id: u64, name: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "path": name,
            "description": null,
            "web_url": format!("https://gitlab.example.com/platform/backend/{}", name),
            "namespace": {
                "id": 4,
                "name": "backend",
                "path": "backend",
                "kind": "group",
                "full_path": "platform/backend"
            }
        })
    }

    /// A merged merge request reviewed by bob and carol.
    pub fn merge_request(id: u64, author: &str) -> Value {
        json!({
            "id": id,
            "iid": id,
            "project_id": 17,
            "title": format!("Merge request {}", id),
            "state": "merged",
            "author": {"id": 100, "username": author, "name": author},
            "created_at": "2024-01-02T08:30:00Z",
            "updated_at": "2024-01-03T12:00:00Z",
            "merged_at": "2024-01-03T12:00:00Z",
            "web_url": format!(
                "https://gitlab.example.com/platform/backend/api/-/merge_requests/{}",
                id
            ),
            "reviewers": [
                {"id": 101, "username": "bob"},
                {"id": 102, "username": "carol"}
            ]
        })
    }

    /// An open issue labelled `bug`.
    pub fn issue(id: u64, author: &str) -> Value {
        json!({
            "id": id,
            "iid": id,
            "project_id": 17,
            "title": format!("Issue {}", id),
            "state": "opened",
            "author": {"id": 100, "username": author, "name": author},
            "created_at": "2024-02-01T09:00:00Z",
            "updated_at": "2024-02-02T09:00:00Z",
            "closed_at": null,
            "web_url": format!("https://gitlab.example.com/platform/backend/api/-/issues/{}", id),
            "labels": ["bug"]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn get(url: &str) -> HttpRequest {
        HttpRequest::get(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_responses_served_in_order() {
        let mock = MockTransport::new();
        mock.on_get("/groups", MockResponse::page(&json!([1]), Some("2")));
        mock.on_get("/groups", MockResponse::page(&json!([2]), None));

        let first = mock
            .send(get("https://gitlab.example.com/api/v4/groups"))
            .await
            .unwrap();
        assert_eq!(first.header("x-next-page"), Some("2"));

        let second = mock
            .send(get("https://gitlab.example.com/api/v4/groups?page=2"))
            .await
            .unwrap();
        assert_eq!(second.header("x-next-page"), Some(""));

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].path, "/groups");
        assert_eq!(requests[1].query_param("page"), Some("2"));
    }

    #[tokio::test]
    async fn test_unmatched_request_is_not_found() {
        let mock = MockTransport::new();
        let response = mock
            .send(get("https://gitlab.example.com/api/v4/projects"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_always_get_repeats() {
        let mock = MockTransport::new();
        mock.always_get("/groups/1/subgroups", MockResponse::ok(&json!([])));

        for _ in 0..3 {
            let response = mock
                .send(get("https://gitlab.example.com/api/v4/groups/1/subgroups"))
                .await
                .unwrap();
            assert!(response.status.is_success());
        }
        assert_eq!(mock.requests_to("/groups/1/subgroups").len(), 3);
    }

    #[tokio::test]
    async fn test_transport_error() {
        let mock = MockTransport::new();
        mock.on_get(
            "/issues",
            MockResponse::transport_error(TransportError::Network("reset".to_string())),
        );

        let err = mock
            .send(get("https://gitlab.example.com/api/v4/issues"))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Network("reset".to_string()));
    }
}
