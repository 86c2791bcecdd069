//! Canonical entity types produced from GitLab records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One item of one page, exactly as the upstream returned it.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Resource kinds the client enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Group or subgroup.
    Group,
    /// Project.
    Project,
    /// Merge request.
    MergeRequest,
    /// Issue.
    Issue,
}

impl EntityKind {
    /// Returns the snake_case name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Project => "project",
            Self::MergeRequest => "merge_request",
            Self::Issue => "issue",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behaviour shared by every canonical entity.
pub trait CanonicalEntity {
    /// Kind of the entity.
    const KIND: EntityKind;

    /// Opaque key, unique per upstream resource.
    fn identifier(&self) -> &str;

    /// Canonical web URL.
    fn link(&self) -> &str;
}

/// GitLab group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Group ID.
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Web URL.
    pub url: String,
    /// Description.
    pub description: Option<String>,
    /// Visibility (`public`, `internal`, `private`).
    pub visibility: Option<String>,
}

impl CanonicalEntity for Group {
    const KIND: EntityKind = EntityKind::Group;

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn link(&self) -> &str {
        &self.url
    }
}

/// GitLab project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Project ID.
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Web URL.
    pub url: String,
    /// Description.
    pub description: Option<String>,
    /// Full path of the owning namespace.
    pub namespace: Option<String>,
}

impl CanonicalEntity for Project {
    const KIND: EntityKind = EntityKind::Project;

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn link(&self) -> &str {
        &self.url
    }
}

/// GitLab merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    /// Merge request ID (global, not the project-scoped IID).
    pub identifier: String,
    /// Title.
    pub title: String,
    /// State (`opened`, `closed`, `merged`, `locked`).
    pub status: String,
    /// Author username.
    pub author: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Merge time.
    pub merged_at: Option<DateTime<Utc>>,
    /// Web URL.
    pub link: String,
    /// Reviewer usernames.
    pub reviewers: Vec<String>,
}

impl CanonicalEntity for MergeRequest {
    const KIND: EntityKind = EntityKind::MergeRequest;

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn link(&self) -> &str {
        &self.link
    }
}

/// GitLab issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// Issue ID (global, not the project-scoped IID).
    pub identifier: String,
    /// Title.
    pub title: String,
    /// State (`opened`, `closed`).
    pub status: String,
    /// Author username.
    pub author: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Close time.
    pub closed_at: Option<DateTime<Utc>>,
    /// Web URL.
    pub link: String,
    /// Label names.
    pub labels: Vec<String>,
}

impl CanonicalEntity for Issue {
    const KIND: EntityKind = EntityKind::Issue;

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn link(&self) -> &str {
        &self.link
    }
}

/// Instance webhook registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateHookRequest {
    /// Target URL.
    pub url: String,
    /// Verify the target's TLS certificate.
    pub enable_ssl_verification: bool,
    /// Push events.
    pub push_events: bool,
    /// Merge request events.
    pub merge_requests_events: bool,
    /// Issue events.
    pub issues_events: bool,
    /// Comment events.
    pub note_events: bool,
    /// Tag push events.
    pub tag_push_events: bool,
    /// Wiki page events.
    pub wiki_page_events: bool,
    /// Pipeline events.
    pub pipeline_events: bool,
    /// Job events.
    pub job_events: bool,
    /// Deployment events.
    pub deployment_events: bool,
}

impl CreateHookRequest {
    /// Subscribes `url` to every supported event, with TLS verification.
    pub fn all_events(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            enable_ssl_verification: true,
            push_events: true,
            merge_requests_events: true,
            issues_events: true,
            note_events: true,
            tag_push_events: true,
            wiki_page_events: true,
            pipeline_events: true,
            job_events: true,
            deployment_events: true,
        }
    }
}

/// Registered webhook.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Hook {
    /// Hook ID.
    pub id: u64,
    /// Target URL.
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_fields_serialize_as_null() {
        let group = Group {
            identifier: "9".to_string(),
            name: "infra".to_string(),
            url: "https://gitlab.example.com/groups/infra".to_string(),
            description: None,
            visibility: None,
        };

        let value = serde_json::to_value(&group).unwrap();
        assert_eq!(value["description"], json!(null));
        assert_eq!(value["visibility"], json!(null));
        assert_eq!(group.link(), "https://gitlab.example.com/groups/infra");
    }

    #[test]
    fn test_merge_request_field_names() {
        let ts = "2024-03-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let mr = MergeRequest {
            identifier: "1".to_string(),
            title: "Fix".to_string(),
            status: "merged".to_string(),
            author: "alice".to_string(),
            created_at: ts,
            updated_at: ts,
            merged_at: None,
            link: "https://gitlab.example.com/a/b/-/merge_requests/1".to_string(),
            reviewers: vec![],
        };

        let value = serde_json::to_value(&mr).unwrap();
        assert!(value.get("createdAt").is_some());
        assert!(value.get("updatedAt").is_some());
        assert_eq!(value["mergedAt"], json!(null));
        assert_eq!(MergeRequest::KIND, EntityKind::MergeRequest);
    }

    #[test]
    fn test_hook_request_enables_all_events() {
        let request = CreateHookRequest::all_events("https://hooks.example.com");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["enable_ssl_verification"], json!(true));
        assert_eq!(value["deployment_events"], json!(true));
        assert_eq!(value["merge_requests_events"], json!(true));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(EntityKind::MergeRequest.to_string(), "merge_request");
    }
}
