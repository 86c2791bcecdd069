#![allow(dead_code)]

use integrations_gitlab::config::GitLabConfigBuilder;
use integrations_gitlab::mocks::MockTransport;
use integrations_gitlab::{GitLabClient, GitLabConfig};
use std::sync::Arc;

pub const BASE_URL: &str = "https://gitlab.example.com/api/v4";

pub fn config() -> GitLabConfigBuilder {
    GitLabConfig::builder().base_url(BASE_URL).token("glpat-test")
}

pub fn client(mock: &MockTransport) -> GitLabClient {
    client_with(mock, config())
}

pub fn client_with(mock: &MockTransport, builder: GitLabConfigBuilder) -> GitLabClient {
    GitLabClient::with_transport(builder.build().unwrap(), Arc::new(mock.clone())).unwrap()
}
