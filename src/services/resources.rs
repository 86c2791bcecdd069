//! Listing of groups, projects, merge requests, and issues.

use crate::client::GitLabClient;
use crate::errors::{GitLabError, GitLabResult};
use crate::normalize;
use crate::pagination::PER_PAGE_PARAM;
use crate::resilience::FetchContext;
use crate::types::{CanonicalEntity, Group, Issue, MergeRequest, Project};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Projects endpoint.
pub const PROJECTS_ENDPOINT: &str = "/projects";

/// Merge requests endpoint.
pub const MERGE_REQUESTS_ENDPOINT: &str = "/merge_requests";

/// Issues endpoint.
pub const ISSUES_ENDPOINT: &str = "/issues";

/// Service listing canonical entities.
///
/// Every operation observes the service's cancellation token and deadline.
pub struct ResourceService<'a> {
    client: &'a GitLabClient,
    ctx: FetchContext,
}

impl<'a> ResourceService<'a> {
    /// Creates a new resource service.
    pub fn new(client: &'a GitLabClient) -> Self {
        Self {
            client,
            ctx: FetchContext::new(),
        }
    }

    /// Observes the given cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx = self.ctx.with_token(token);
        self
    }

    /// Fails operations still running at `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.ctx = self.ctx.with_deadline(deadline);
        self
    }

    /// Fails operations still running after `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.ctx = self.ctx.with_timeout(timeout);
        self
    }

    /// Replaces the fetch context.
    pub fn with_context(mut self, ctx: FetchContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Lists every group, parents before their subgroups.
    #[instrument(skip(self))]
    pub async fn list_groups(&self) -> GitLabResult<Vec<Group>> {
        let groups = self
            .client
            .group_enumerator()
            .enumerate_groups(None, &self.ctx)
            .await?;
        ensure_unique(&groups, "/groups")?;
        Ok(groups)
    }

    /// Lists every group below `parent_id`, parents before their subgroups.
    #[instrument(skip(self))]
    pub async fn list_subgroups(&self, parent_id: u64) -> GitLabResult<Vec<Group>> {
        let groups = self
            .client
            .group_enumerator()
            .enumerate_groups(Some(parent_id), &self.ctx)
            .await?;
        ensure_unique(&groups, "/groups")?;
        Ok(groups)
    }

    /// Lists projects.
    #[instrument(skip(self))]
    pub async fn list_projects(&self) -> GitLabResult<Vec<Project>> {
        let records = self
            .client
            .fetcher()
            .fetch(PROJECTS_ENDPOINT, &[self.per_page()], &self.ctx)
            .await?;
        let projects = normalize::projects(&records)
            .map_err(|e| e.with_endpoint(PROJECTS_ENDPOINT))?;
        ensure_unique(&projects, PROJECTS_ENDPOINT)?;
        Ok(projects)
    }

    /// Lists merge requests of every scope.
    #[instrument(skip(self))]
    pub async fn list_merge_requests(&self) -> GitLabResult<Vec<MergeRequest>> {
        let records = self
            .client
            .fetcher()
            .fetch(
                MERGE_REQUESTS_ENDPOINT,
                &[scope_all(), self.per_page()],
                &self.ctx,
            )
            .await?;
        let merge_requests = normalize::merge_requests(&records)
            .map_err(|e| e.with_endpoint(MERGE_REQUESTS_ENDPOINT))?;
        ensure_unique(&merge_requests, MERGE_REQUESTS_ENDPOINT)?;
        Ok(merge_requests)
    }

    /// Lists issues of every scope.
    #[instrument(skip(self))]
    pub async fn list_issues(&self) -> GitLabResult<Vec<Issue>> {
        let records = self
            .client
            .fetcher()
            .fetch(ISSUES_ENDPOINT, &[scope_all(), self.per_page()], &self.ctx)
            .await?;
        let issues =
            normalize::issues(&records).map_err(|e| e.with_endpoint(ISSUES_ENDPOINT))?;
        ensure_unique(&issues, ISSUES_ENDPOINT)?;
        Ok(issues)
    }

    fn per_page(&self) -> (&'static str, String) {
        (
            PER_PAGE_PARAM,
            self.client.config().rate_limit.page_size().to_string(),
        )
    }
}

fn scope_all() -> (&'static str, String) {
    ("scope", "all".to_string())
}

/// Fails if two entities of one result set share an identifier.
fn ensure_unique<T: CanonicalEntity>(entities: &[T], endpoint: &str) -> GitLabResult<()> {
    let mut seen = HashSet::with_capacity(entities.len());
    for entity in entities {
        if !seen.insert(entity.identifier()) {
            return Err(GitLabError::protocol(format!(
                "Duplicate {} identifier {}",
                T::KIND,
                entity.identifier()
            ))
            .with_endpoint(endpoint));
        }
    }
    Ok(())
}
