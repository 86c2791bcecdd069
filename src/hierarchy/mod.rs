//! Enumeration of nested GitLab groups.

use crate::config::TraversalConfig;
use crate::errors::{GitLabError, GitLabResult};
use crate::normalize;
use crate::pagination::PaginatedFetcher;
use crate::resilience::FetchContext;
use crate::types::{Group, RawRecord};
use futures::stream::{self, StreamExt, TryStreamExt};

/// Endpoint listing top-level groups.
pub const GROUPS_ENDPOINT: &str = "/groups";

/// Endpoint listing the direct subgroups of a group.
pub fn subgroups_endpoint(group_id: &str) -> String {
    format!("/groups/{}/subgroups", group_id)
}

/// Groups collected so far, as a forest with parent-to-child links.
#[derive(Default)]
struct Forest {
    groups: Vec<Group>,
    children: Vec<Vec<usize>>,
}

impl Forest {
    /// Normalizes a listing and appends its groups. Returns `(index, subgroup_count)` per group.
    fn attach(
        &mut self,
        records: &[RawRecord],
        endpoint: &str,
    ) -> GitLabResult<Vec<(usize, u64)>> {
        let groups = normalize::groups(records).map_err(|e| e.with_endpoint(endpoint))?;
        let mut added = Vec::with_capacity(groups.len());

        for (group, record) in groups.into_iter().zip(records) {
            let index = self.groups.len();
            self.groups.push(group);
            self.children.push(Vec::new());
            added.push((index, normalize::subgroup_count(record)));
        }

        Ok(added)
    }

    /// Depth-first pre-order walk from `roots`, siblings in listing order.
    fn into_preorder(self, roots: &[usize]) -> Vec<Group> {
        let mut order = Vec::with_capacity(self.groups.len());
        let mut stack: Vec<usize> = roots.iter().rev().copied().collect();

        while let Some(index) = stack.pop() {
            order.push(index);
            stack.extend(self.children[index].iter().rev().copied());
        }

        let mut slots: Vec<Option<Group>> = self.groups.into_iter().map(Some).collect();
        order
            .into_iter()
            .filter_map(|index| slots[index].take())
            .collect()
    }
}

/// Walks a group hierarchy and flattens it parent-first.
#[derive(Clone)]
pub struct GroupEnumerator {
    fetcher: PaginatedFetcher,
    config: TraversalConfig,
}

impl GroupEnumerator {
    /// Creates a new enumerator.
    pub fn new(fetcher: PaginatedFetcher, config: TraversalConfig) -> Self {
        Self { fetcher, config }
    }

    /// Enumerates all groups, or all groups below `parent_id`.
    ///
    /// Each group precedes its descendants in the output. Subgroup listings of
    /// one level are fetched concurrently, bounded by `subgroup_concurrency`.
    pub async fn enumerate_groups(
        &self,
        parent_id: Option<u64>,
        ctx: &FetchContext,
    ) -> GitLabResult<Vec<Group>> {
        tracing::info!(parent_id = ?parent_id, "Fetching groups");

        let mut forest = Forest::default();

        let (endpoint, params, root_depth) = match parent_id {
            None => (
                GROUPS_ENDPOINT.to_string(),
                vec![("top_level_only", "true".to_string())],
                0,
            ),
            Some(id) => (subgroups_endpoint(&id.to_string()), Vec::new(), 1),
        };
        let records = self.fetcher.fetch(&endpoint, &params, ctx).await?;

        let top = forest.attach(&records, &endpoint)?;
        let roots: Vec<usize> = top.iter().map(|(index, _)| *index).collect();
        let mut pending: Vec<(usize, usize)> = top
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(index, _)| (index, root_depth))
            .collect();

        while !pending.is_empty() {
            for &(index, depth) in &pending {
                if depth + 1 > self.config.max_depth {
                    let id = &forest.groups[index].identifier;
                    return Err(GitLabError::depth_exceeded(self.config.max_depth, id)
                        .with_endpoint(subgroups_endpoint(id)));
                }
            }

            let level: Vec<(usize, usize, String)> = pending
                .drain(..)
                .map(|(index, depth)| (index, depth, forest.groups[index].identifier.clone()))
                .collect();

            let listings: Vec<(usize, usize, Vec<RawRecord>)> = stream::iter(level)
                .map(|(index, depth, id)| async move {
                    let endpoint = subgroups_endpoint(&id);
                    ctx.check().map_err(|e| e.with_endpoint(endpoint.as_str()))?;
                    let records = self.fetcher.fetch(&endpoint, &[], ctx).await?;
                    Ok::<_, GitLabError>((index, depth, records))
                })
                .buffered(self.config.subgroup_concurrency.max(1))
                .try_collect()
                .await?;

            for (parent, depth, records) in listings {
                let endpoint = subgroups_endpoint(&forest.groups[parent].identifier);
                let added = forest.attach(&records, &endpoint)?;
                forest.children[parent] = added.iter().map(|(index, _)| *index).collect();
                pending.extend(
                    added
                        .into_iter()
                        .filter(|(_, count)| *count > 0)
                        .map(|(index, _)| (index, depth + 1)),
                );
            }
        }

        let groups = forest.into_preorder(&roots);
        tracing::info!(
            parent_id = ?parent_id,
            groups = groups.len(),
            "Fetched groups"
        );
        Ok(groups)
    }
}
