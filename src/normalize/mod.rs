//! Mapping of raw GitLab records into canonical entities.
//!
//! Every function here is pure. A batch is either mapped in full or rejected
//! with the first [`MalformedRecord`](crate::errors::GitLabErrorKind::MalformedRecord)
//! error; no partial output is produced.

use crate::errors::{GitLabError, GitLabResult};
use crate::types::{EntityKind, Group, Issue, MergeRequest, Project, RawRecord};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Reads fields of one record, attributing failures to its batch position.
struct Fields<'a> {
    kind: EntityKind,
    index: usize,
    record: &'a RawRecord,
}

impl<'a> Fields<'a> {
    fn new(kind: EntityKind, index: usize, record: &'a RawRecord) -> Self {
        Self {
            kind,
            index,
            record,
        }
    }

    fn error(&self, field: &str, problem: &str) -> GitLabError {
        GitLabError::malformed_record(self.kind.as_str(), self.index, field, problem)
    }

    /// Present, non-null value of a required field.
    fn required(&self, field: &str) -> GitLabResult<&'a Value> {
        match self.record.get(field) {
            None => Err(self.error(field, "is missing")),
            Some(Value::Null) => Err(self.error(field, "is null")),
            Some(value) => Ok(value),
        }
    }

    /// Present, non-null value of an optional field.
    fn optional(&self, field: &str) -> Option<&'a Value> {
        match self.record.get(field) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value),
        }
    }

    fn identifier(&self) -> GitLabResult<String> {
        match self.required("id")? {
            Value::Number(n) if n.is_u64() || n.is_i64() => Ok(n.to_string()),
            Value::String(s) if !s.is_empty() => Ok(s.clone()),
            _ => Err(self.error("id", "is not an integer or non-empty string")),
        }
    }

    fn required_str(&self, field: &str) -> GitLabResult<String> {
        self.required(field)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.error(field, "is not a string"))
    }

    fn optional_str(&self, field: &str) -> GitLabResult<Option<String>> {
        self.optional(field)
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.error(field, "is not a string"))
            })
            .transpose()
    }

    fn required_timestamp(&self, field: &str) -> GitLabResult<DateTime<Utc>> {
        let raw = self.required_str(field)?;
        self.parse_timestamp(field, &raw)
    }

    fn optional_timestamp(&self, field: &str) -> GitLabResult<Option<DateTime<Utc>>> {
        self.optional_str(field)?
            .map(|raw| self.parse_timestamp(field, &raw))
            .transpose()
    }

    fn parse_timestamp(&self, field: &str, raw: &str) -> GitLabResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|_| self.error(field, "is not an RFC 3339 timestamp"))
    }

    /// `object.field` where the object itself is required.
    fn required_nested_str(&self, object: &str, field: &str) -> GitLabResult<String> {
        let path = format!("{}.{}", object, field);
        let inner = self
            .required(object)?
            .as_object()
            .ok_or_else(|| self.error(object, "is not an object"))?;

        match inner.get(field) {
            None => Err(self.error(&path, "is missing")),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Null) => Err(self.error(&path, "is null")),
            Some(_) => Err(self.error(&path, "is not a string")),
        }
    }

    /// `object.field` where both levels are optional.
    fn optional_nested_str(&self, object: &str, field: &str) -> GitLabResult<Option<String>> {
        let Some(value) = self.optional(object) else {
            return Ok(None);
        };
        let inner = value
            .as_object()
            .ok_or_else(|| self.error(object, "is not an object"))?;

        match inner.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.error(&format!("{}.{}", object, field), "is not a string")),
        }
    }

    fn optional_array(&self, field: &str) -> GitLabResult<&'a [Value]> {
        match self.optional(field) {
            None => Ok(&[]),
            Some(Value::Array(items)) => Ok(items.as_slice()),
            Some(_) => Err(self.error(field, "is not an array")),
        }
    }

    /// Label names, given either as plain strings or as label objects.
    fn labels(&self) -> GitLabResult<Vec<String>> {
        self.optional_array("labels")?
            .iter()
            .enumerate()
            .map(|(i, label)| match label {
                Value::String(s) => Ok(s.clone()),
                Value::Object(obj) => obj
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| self.error(&format!("labels[{}].name", i), "is missing")),
                _ => Err(self.error(&format!("labels[{}]", i), "is not a string")),
            })
            .collect()
    }

    /// Usernames from a list of user objects.
    fn usernames(&self, field: &str) -> GitLabResult<Vec<String>> {
        self.optional_array(field)?
            .iter()
            .enumerate()
            .map(|(i, user)| {
                user.get("username")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        self.error(&format!("{}[{}].username", field, i), "is missing")
                    })
            })
            .collect()
    }
}

/// Maps one raw group record.
pub fn group(record: &RawRecord, index: usize) -> GitLabResult<Group> {
    let f = Fields::new(EntityKind::Group, index, record);
    Ok(Group {
        identifier: f.identifier()?,
        name: f.required_str("name")?,
        url: f.required_str("web_url")?,
        description: f.optional_str("description")?,
        visibility: f.optional_str("visibility")?,
    })
}

/// Maps one raw project record.
pub fn project(record: &RawRecord, index: usize) -> GitLabResult<Project> {
    let f = Fields::new(EntityKind::Project, index, record);
    Ok(Project {
        identifier: f.identifier()?,
        name: f.required_str("name")?,
        url: f.required_str("web_url")?,
        description: f.optional_str("description")?,
        namespace: f.optional_nested_str("namespace", "full_path")?,
    })
}

/// Maps one raw merge request record.
pub fn merge_request(record: &RawRecord, index: usize) -> GitLabResult<MergeRequest> {
    let f = Fields::new(EntityKind::MergeRequest, index, record);
    Ok(MergeRequest {
        identifier: f.identifier()?,
        title: f.required_str("title")?,
        status: f.required_str("state")?,
        author: f.required_nested_str("author", "username")?,
        created_at: f.required_timestamp("created_at")?,
        updated_at: f.required_timestamp("updated_at")?,
        merged_at: f.optional_timestamp("merged_at")?,
        link: f.required_str("web_url")?,
        reviewers: f.usernames("reviewers")?,
    })
}

/// Maps one raw issue record.
pub fn issue(record: &RawRecord, index: usize) -> GitLabResult<Issue> {
    let f = Fields::new(EntityKind::Issue, index, record);
    Ok(Issue {
        identifier: f.identifier()?,
        title: f.required_str("title")?,
        status: f.required_str("state")?,
        author: f.required_nested_str("author", "username")?,
        created_at: f.required_timestamp("created_at")?,
        updated_at: f.required_timestamp("updated_at")?,
        closed_at: f.optional_timestamp("closed_at")?,
        link: f.required_str("web_url")?,
        labels: f.labels()?,
    })
}

/// Subgroup-count hint of a raw group record. Missing or non-numeric is zero.
pub fn subgroup_count(record: &RawRecord) -> u64 {
    record
        .get("subgroup_count")
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

/// Maps a whole batch, failing on the first malformed record.
pub fn batch<T, F>(records: &[RawRecord], map: F) -> GitLabResult<Vec<T>>
where
    F: Fn(&RawRecord, usize) -> GitLabResult<T>,
{
    records
        .iter()
        .enumerate()
        .map(|(index, record)| map(record, index))
        .collect()
}

/// Maps a batch of group records.
pub fn groups(records: &[RawRecord]) -> GitLabResult<Vec<Group>> {
    batch(records, group)
}

/// Maps a batch of project records.
pub fn projects(records: &[RawRecord]) -> GitLabResult<Vec<Project>> {
    batch(records, project)
}

/// Maps a batch of merge request records.
pub fn merge_requests(records: &[RawRecord]) -> GitLabResult<Vec<MergeRequest>> {
    batch(records, merge_request)
}

/// Maps a batch of issue records.
pub fn issues(records: &[RawRecord]) -> GitLabResult<Vec<Issue>> {
    batch(records, issue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GitLabErrorKind;
    use crate::mocks::fixtures;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;

    fn record(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    #[test]
    fn test_group_mapping() {
        let raw = record(fixtures::group(4, "platform", 2));
        let group = group(&raw, 0).unwrap();

        assert_eq!(group.identifier, "4");
        assert_eq!(group.name, "platform");
        assert_eq!(group.url, "https://gitlab.example.com/groups/platform");
        assert_eq!(group.visibility.as_deref(), Some("private"));
        assert_eq!(subgroup_count(&raw), 2);
    }

    #[test]
    fn test_project_mapping_with_namespace() {
        let raw = record(fixtures::project(17, "api"));
        let project = project(&raw, 0).unwrap();

        assert_eq!(project.identifier, "17");
        assert_eq!(project.namespace.as_deref(), Some("platform/backend"));
    }

    #[test]
    fn test_project_without_namespace_or_description() {
        let raw = record(json!({
            "id": 3,
            "name": "tools",
            "web_url": "https://gitlab.example.com/tools",
            "description": null
        }));
        let project = project(&raw, 0).unwrap();

        assert_eq!(project.description, None);
        assert_eq!(project.namespace, None);
    }

    #[test]
    fn test_merge_request_mapping() {
        let raw = record(fixtures::merge_request(501, "alice"));
        let mr = merge_request(&raw, 0).unwrap();

        assert_eq!(mr.identifier, "501");
        assert_eq!(mr.author, "alice");
        assert_eq!(mr.status, "merged");
        assert_eq!(mr.reviewers, vec!["bob".to_string(), "carol".to_string()]);
        assert!(mr.merged_at.is_some());
        assert_eq!(mr.created_at.to_rfc3339(), "2024-01-02T08:30:00+00:00");
    }

    #[test]
    fn test_issue_mapping_defaults() {
        let raw = record(json!({
            "id": 88,
            "title": "Crash on start",
            "state": "opened",
            "author": {"username": "dave"},
            "created_at": "2024-02-01T00:00:00Z",
            "updated_at": "2024-02-02T00:00:00.000Z",
            "web_url": "https://gitlab.example.com/a/b/-/issues/1"
        }));
        let issue = issue(&raw, 0).unwrap();

        assert_eq!(issue.closed_at, None);
        assert!(issue.labels.is_empty());
    }

    #[test]
    fn test_issue_labels_as_objects() {
        let mut raw = record(fixtures::issue(9, "erin"));
        raw.insert(
            "labels".to_string(),
            json!([{"id": 1, "name": "bug"}, {"id": 2, "name": "p1"}]),
        );
        let issue = issue(&raw, 0).unwrap();
        assert_eq!(issue.labels, vec!["bug".to_string(), "p1".to_string()]);
    }

    #[test]
    fn test_string_identifier_is_accepted() {
        let mut raw = record(fixtures::group(1, "g", 0));
        raw.insert("id".to_string(), json!("gid://gitlab/Group/1"));
        assert_eq!(group(&raw, 0).unwrap().identifier, "gid://gitlab/Group/1");
    }

    #[test_case("id" ; "identifier")]
    #[test_case("title" ; "title")]
    #[test_case("state" ; "state")]
    #[test_case("author" ; "author")]
    #[test_case("created_at" ; "created at")]
    #[test_case("updated_at" ; "updated at")]
    #[test_case("web_url" ; "link")]
    fn test_merge_request_required_field(field: &str) {
        let mut raw = record(fixtures::merge_request(1, "alice"));
        raw.remove(field);

        let err = merge_request(&raw, 0).unwrap_err();
        assert_eq!(err.kind(), GitLabErrorKind::MalformedRecord);
        assert!(err.message().contains(field), "{}", err);
    }

    #[test_case("id" ; "identifier")]
    #[test_case("name" ; "name")]
    #[test_case("web_url" ; "url")]
    fn test_group_required_field(field: &str) {
        let mut raw = record(fixtures::group(1, "g", 0));
        raw.remove(field);
        assert_eq!(
            group(&raw, 0).unwrap_err().kind(),
            GitLabErrorKind::MalformedRecord
        );
    }

    #[test_case(json!(null) ; "null author")]
    #[test_case(json!({}) ; "author without username")]
    #[test_case(json!("alice") ; "author not an object")]
    fn test_issue_author_shapes(author: Value) {
        let mut raw = record(fixtures::issue(1, "alice"));
        raw.insert("author".to_string(), author);
        assert_eq!(
            issue(&raw, 0).unwrap_err().kind(),
            GitLabErrorKind::MalformedRecord
        );
    }

    #[test]
    fn test_wrongly_typed_optional_field_is_rejected() {
        let mut raw = record(fixtures::group(1, "g", 0));
        raw.insert("description".to_string(), json!(42));
        assert_eq!(
            group(&raw, 0).unwrap_err().kind(),
            GitLabErrorKind::MalformedRecord
        );
    }

    #[test]
    fn test_bad_timestamp_is_rejected() {
        let mut raw = record(fixtures::merge_request(1, "alice"));
        raw.insert("created_at".to_string(), json!("yesterday"));
        let err = merge_request(&raw, 0).unwrap_err();
        assert!(err.message().contains("created_at"));
    }

    #[test]
    fn test_batch_fails_whole_batch() {
        let good = record(fixtures::merge_request(1, "alice"));
        let mut bad = record(fixtures::merge_request(2, "bob"));
        bad.remove("author");

        let err = merge_requests(&[good.clone(), bad, good]).unwrap_err();
        assert_eq!(err.kind(), GitLabErrorKind::MalformedRecord);
        assert!(err.message().contains("#1"));
    }

    #[test]
    fn test_batch_maps_every_record_in_order() {
        let raws: Vec<RawRecord> = (1..=3)
            .map(|id| record(fixtures::project(id, &format!("p{}", id))))
            .collect();
        let ids: Vec<String> = projects(&raws)
            .unwrap()
            .into_iter()
            .map(|p| p.identifier)
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_empty_batch() {
        assert!(issues(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_subgroup_count_defaults_to_zero() {
        assert_eq!(subgroup_count(&RawRecord::new()), 0);
    }
}
