//! Pagination handling for GitLab API.
//!
//! GitLab signals a further page with the `X-Next-Page` header. The header is
//! absent or empty on the last page.

use crate::client::ApiRequester;
use crate::config::{ContinuationMode, PaginationConfig};
use crate::errors::{GitLabError, GitLabResult};
use crate::resilience::FetchContext;
use crate::transport::{HttpMethod, HttpResponse};
use crate::types::RawRecord;
use reqwest::header::HeaderMap;
use std::collections::HashSet;

/// Header carrying the next page number.
pub const NEXT_PAGE_HEADER: &str = "x-next-page";

/// Query parameter selecting the page.
pub const PAGE_PARAM: &str = "page";

/// Query parameter selecting the page size.
pub const PER_PAGE_PARAM: &str = "per_page";

/// Reads the continuation token from response headers.
pub fn next_page_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(NEXT_PAGE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// A single page of raw records.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// The records in this page, in upstream order.
    pub records: Vec<RawRecord>,
    /// Token of the next page. Present iff a further page exists.
    pub next_page: Option<String>,
}

impl Page {
    /// Creates a new page.
    pub fn new(records: Vec<RawRecord>, next_page: Option<String>) -> Self {
        Self { records, next_page }
    }

    /// Parses a successful list response.
    pub fn from_response(response: &HttpResponse) -> GitLabResult<Self> {
        let records: Vec<RawRecord> = serde_json::from_slice(&response.body).map_err(|e| {
            GitLabError::malformed_body(format!("Response body is not a list of records: {}", e))
                .with_status(response.status.as_u16())
        })?;

        Ok(Self::new(records, next_page_token(&response.headers)))
    }

    /// Returns true if there is a next page.
    pub fn has_next(&self) -> bool {
        self.next_page.is_some()
    }

    /// Returns the number of records in this page.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the page is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consumes the page and returns the records.
    pub fn into_records(self) -> Vec<RawRecord> {
        self.records
    }
}

/// Drives one endpoint across all of its pages.
#[derive(Clone)]
pub struct PaginatedFetcher {
    requester: ApiRequester,
    config: PaginationConfig,
}

impl PaginatedFetcher {
    /// Creates a new fetcher.
    pub fn new(requester: ApiRequester, config: PaginationConfig) -> Self {
        Self { requester, config }
    }

    /// Fetches every page of `endpoint` and concatenates the records.
    ///
    /// Records keep page order, and pages keep continuation order. Rate
    /// limiting is absorbed; any other failure discards what was gathered.
    pub async fn fetch(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        ctx: &FetchContext,
    ) -> GitLabResult<Vec<RawRecord>> {
        let mut records = Vec::new();
        let mut current = params
            .iter()
            .find(|(k, _)| *k == PAGE_PARAM)
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| "1".to_string());
        let mut visited = HashSet::from([current.clone()]);
        let mut url = self.requester.url(endpoint, params)?;
        let mut pages = 0usize;

        loop {
            ctx.check().map_err(|e| e.with_endpoint(endpoint))?;

            let response = self
                .requester
                .execute(endpoint, HttpMethod::Get, &url, None, ctx)
                .await?;

            if !response.status.is_success() {
                return Err(GitLabError::upstream(response.status.as_u16(), response.text())
                    .with_endpoint(endpoint));
            }

            let page = Page::from_response(&response).map_err(|e| e.with_endpoint(endpoint))?;
            pages += 1;
            self.requester.metrics().record_page(page.len());

            tracing::debug!(
                endpoint = %endpoint,
                page = %current,
                records = page.len(),
                next_page = page.next_page.as_deref().unwrap_or(""),
                "Fetched page"
            );

            let next = page.next_page.clone();
            records.extend(page.into_records());

            let Some(token) = next else {
                break;
            };

            if !visited.insert(token.clone()) {
                return Err(GitLabError::protocol(format!(
                    "Continuation token {} repeats an already fetched page after page {}",
                    token, current
                ))
                .with_endpoint(endpoint));
            }

            if pages >= self.config.max_pages {
                return Err(GitLabError::protocol(format!(
                    "Pagination exceeded {} pages",
                    self.config.max_pages
                ))
                .with_endpoint(endpoint));
            }

            let next_params = continuation_params(self.config.continuation, params, &token);
            url = self.requester.url(endpoint, &next_params)?;
            current = token;
        }

        tracing::info!(
            endpoint = %endpoint,
            pages = pages,
            records = records.len(),
            "Fetched all pages"
        );

        Ok(records)
    }
}

/// Query parameters of a follow-up page request.
fn continuation_params<'a>(
    mode: ContinuationMode,
    params: &[(&'a str, String)],
    token: &str,
) -> Vec<(&'a str, String)> {
    let mut next: Vec<(&'a str, String)> = match mode {
        ContinuationMode::CarryParams => params
            .iter()
            .filter(|(k, _)| *k != PAGE_PARAM)
            .cloned()
            .collect(),
        ContinuationMode::PageOnly => Vec::new(),
    };
    next.push((PAGE_PARAM, token.to_string()));
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::StatusCode;

    #[test]
    fn test_next_page_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(next_page_token(&headers), None);

        headers.insert(NEXT_PAGE_HEADER, "".parse().unwrap());
        assert_eq!(next_page_token(&headers), None);

        headers.insert(NEXT_PAGE_HEADER, " 3 ".parse().unwrap());
        assert_eq!(next_page_token(&headers).as_deref(), Some("3"));
    }

    #[test]
    fn test_page_from_response() {
        let mut headers = HeaderMap::new();
        headers.insert(NEXT_PAGE_HEADER, "2".parse().unwrap());
        let response = HttpResponse::new(
            StatusCode::OK,
            headers,
            Bytes::from_static(br#"[{"id": 1}, {"id": 2}]"#),
        );

        let page = Page::from_response(&response).unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.has_next());
        assert_eq!(page.next_page.as_deref(), Some("2"));
    }

    #[test]
    fn test_page_rejects_non_list_body() {
        let response = HttpResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(br#"{"message": "not a list"}"#),
        );
        let err = Page::from_response(&response).unwrap_err();
        assert_eq!(err.kind(), crate::errors::GitLabErrorKind::Upstream);
    }

    #[test]
    fn test_page_rejects_list_of_scalars() {
        let response =
            HttpResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"[1, 2]"));
        assert!(Page::from_response(&response).is_err());
    }

    #[test]
    fn test_empty_page() {
        let response =
            HttpResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"[]"));
        let page = Page::from_response(&response).unwrap();
        assert!(page.is_empty());
        assert!(!page.has_next());
    }

    #[test]
    fn test_continuation_carries_params() {
        let params = [("scope", "all".to_string()), ("per_page", "10".to_string())];
        let next = continuation_params(ContinuationMode::CarryParams, &params, "2");
        assert_eq!(
            next,
            vec![
                ("scope", "all".to_string()),
                ("per_page", "10".to_string()),
                ("page", "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_continuation_replaces_page() {
        let params = [("page", "1".to_string()), ("per_page", "10".to_string())];
        let next = continuation_params(ContinuationMode::CarryParams, &params, "2");
        assert_eq!(next, vec![("per_page", "10".to_string()), ("page", "2".to_string())]);
    }

    #[test]
    fn test_continuation_page_only() {
        let params = [("scope", "all".to_string())];
        let next = continuation_params(ContinuationMode::PageOnly, &params, "4");
        assert_eq!(next, vec![("page", "4".to_string())]);
    }
}
