//! Instance webhook registration.

use crate::client::GitLabClient;
use crate::errors::{GitLabError, GitLabErrorKind, GitLabResult};
use crate::resilience::FetchContext;
use crate::transport::HttpMethod;
use crate::types::{CreateHookRequest, Hook};
use bytes::Bytes;
use tracing::instrument;

/// System hooks endpoint.
pub const HOOKS_ENDPOINT: &str = "/hooks";

/// Service for webhook operations.
pub struct HooksService<'a> {
    client: &'a GitLabClient,
}

impl<'a> HooksService<'a> {
    /// Creates a new hooks service.
    pub fn new(client: &'a GitLabClient) -> Self {
        Self { client }
    }

    /// Registers a webhook.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn create(&self, request: &CreateHookRequest) -> GitLabResult<Hook> {
        let body = serde_json::to_vec(request).map_err(|e| {
            GitLabError::new(
                GitLabErrorKind::Serialization,
                format!("Failed to serialize hook request: {}", e),
            )
        })?;

        let requester = self.client.requester();
        let url = requester.url(HOOKS_ENDPOINT, &[])?;
        let response = requester
            .execute(
                HOOKS_ENDPOINT,
                HttpMethod::Post,
                &url,
                Some(Bytes::from(body)),
                &FetchContext::new(),
            )
            .await?;

        if !response.status.is_success() {
            return Err(GitLabError::upstream(response.status.as_u16(), response.text())
                .with_endpoint(HOOKS_ENDPOINT));
        }

        serde_json::from_slice(&response.body).map_err(|e| {
            GitLabError::malformed_body(format!("Invalid hook response: {}", e))
                .with_status(response.status.as_u16())
                .with_endpoint(HOOKS_ENDPOINT)
        })
    }

    /// Registers the configured webhook URL for every event.
    ///
    /// Failures are logged and never returned. Returns `None` when no URL is
    /// configured or registration failed.
    pub async fn setup_instance_webhook(&self) -> Option<Hook> {
        let Some(url) = self.client.config().webhook_url.clone() else {
            tracing::debug!("No webhook URL configured; skipping registration");
            return None;
        };

        match self.create(&CreateHookRequest::all_events(url)).await {
            Ok(hook) => {
                tracing::info!(hook_id = hook.id, url = %hook.url, "Registered instance webhook");
                Some(hook)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to register instance webhook");
                None
            }
        }
    }
}
