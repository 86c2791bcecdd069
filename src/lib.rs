//! # GitLab Integration Library
//!
//! A rate-limit aware GitLab API client with:
//! - Paginated fetching driven by the `X-Next-Page` header
//! - Shared 429 cooldowns across concurrent fetches
//! - Depth-first enumeration of nested groups
//! - Normalization of groups, projects, merge requests, and issues
//! - Cancellation and deadlines observed at every request
//! - Instance webhook registration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_gitlab::{GitLabClient, GitLabConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads GITLAB_TOKEN, GITLAB_API_URL, ...
//!     let config = GitLabConfig::from_env()?;
//!     let client = GitLabClient::new(config)?;
//!
//!     for group in client.resources().list_groups().await? {
//!         println!("{} {}", group.identifier, group.name);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Authentication
pub mod auth;

// HTTP client and transport
pub mod client;
pub mod transport;

// Pagination and traversal
pub mod hierarchy;
pub mod pagination;

// Record mapping
pub mod normalize;

// API Services
pub mod services;

// Resilience patterns
pub mod resilience;

// Observability
pub mod observability;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use auth::AuthMethod;
pub use client::{GitLabClient, GitLabClientBuilder};
pub use config::{GitLabConfig, GitLabConfigBuilder};
pub use errors::{GitLabError, GitLabErrorKind, GitLabResult};
pub use hierarchy::GroupEnumerator;
pub use pagination::{Page, PaginatedFetcher};
pub use resilience::FetchContext;
pub use services::{HooksService, ResourceService};
pub use types::*;
