use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{ToolError, ToolResult};
use crate::file::access::{format_size, matches_file_types, to_utc};
use crate::file::hasher;
use crate::file::walk::WalkEntry;
use crate::security::PathValidator;

fn default_true() -> bool {
    true
}

fn default_min_size() -> u64 {
    1024
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum CompareBy {
    /// SHA-256 of the full content.
    #[default]
    Hash,
    /// Bare file name.
    Name,
    /// File size and name together.
    SizeName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DuplicateQuery {
    /// Directory to search, relative to the workspace root.
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub compare_by: CompareBy,
    /// Files smaller than this many bytes are ignored.
    #[serde(default = "default_min_size")]
    pub min_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateFile {
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Set on the earliest modified member of the group.
    pub original: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub files: Vec<DuplicateFile>,
    pub count: usize,
    pub size: u64,
    pub size_formatted: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub total_wasted: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateSearchResult {
    pub duplicate_groups: Vec<DuplicateGroup>,
    pub total_duplicates: usize,
    pub total_groups: usize,
    pub wasted_space: u64,
    pub wasted_space_formatted: String,
    pub files_scanned: usize,
    pub search_time_ms: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub path: PathBuf,
    pub relative: String,
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

impl Candidate {
    pub fn from_entry(entry: WalkEntry, validator: &PathValidator) -> Self {
        Self {
            relative: validator.relative(&entry.path),
            name: entry
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: entry.metadata.len(),
            modified: entry
                .metadata
                .modified()
                .map(to_utc)
                .unwrap_or_default(),
            path: entry.path,
        }
    }
}

/// Applies the size and file type filters of `query`.
pub(crate) fn is_candidate(entry: &WalkEntry, query: &DuplicateQuery) -> bool {
    let size = entry.metadata.len();
    size >= query.min_size
        && query.max_size.map_or(true, |max| size <= max)
        && matches_file_types(&entry.path, &query.file_types)
}

/// Groups candidates under `compare_by` and drops keys with a single member.
///
/// Content hashing only reads files that share their size with another
/// candidate, and runs at most `max_concurrency` hashes at once. Files that
/// cannot be read are left out of every group.
pub(crate) async fn group_candidates(
    candidates: Vec<Candidate>,
    compare_by: CompareBy,
    max_concurrency: usize,
    cancel: &CancellationToken,
) -> ToolResult<Vec<(Option<String>, Vec<Candidate>)>> {
    let grouped: Vec<(Option<String>, Vec<Candidate>)> = match compare_by {
        CompareBy::Name => group_by(candidates, |c| c.name.clone())
            .into_values()
            .map(|members| (None, members))
            .collect(),
        CompareBy::SizeName => group_by(candidates, |c| format!("{}_{}", c.size, c.name))
            .into_values()
            .map(|members| (None, members))
            .collect(),
        CompareBy::Hash => {
            let same_size: Vec<Candidate> = group_by(candidates, |c| c.size)
                .into_values()
                .filter(|members| members.len() > 1)
                .flatten()
                .collect();
            let hashed = hash_all(same_size, max_concurrency, cancel).await?;
            group_by(hashed, |(hash, _)| hash.clone())
                .into_iter()
                .map(|(hash, members)| {
                    (Some(hash), members.into_iter().map(|(_, c)| c).collect())
                })
                .collect()
        }
    };

    Ok(grouped
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .collect())
}

async fn hash_all(
    candidates: Vec<Candidate>,
    max_concurrency: usize,
    cancel: &CancellationToken,
) -> ToolResult<Vec<(String, Candidate)>> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for candidate in candidates {
        if cancel.is_cancelled() {
            tasks.abort_all();
            return Err(ToolError::Cancelled);
        }
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ToolError::Cancelled)?;
        tasks.spawn(async move {
            let _permit = permit;
            let hash = hasher::hash_file(candidate.path.clone()).await;
            (hash, candidate)
        });
    }

    let mut hashed = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        if cancel.is_cancelled() {
            tasks.abort_all();
            return Err(ToolError::Cancelled);
        }
        match joined? {
            (Ok(hash), candidate) => hashed.push((hash, candidate)),
            (Err(e), candidate) => {
                tracing::warn!(path = %candidate.relative, ?e, "Skipping file that could not be hashed");
            }
        }
    }
    Ok(hashed)
}

fn group_by<T, K, F>(items: Vec<T>, key: F) -> HashMap<K, Vec<T>>
where
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut groups: HashMap<K, Vec<T>> = HashMap::new();
    for item in items {
        groups.entry(key(&item)).or_default().push(item);
    }
    groups
}

/// Orders members oldest first, flags the original and totals the wasted
/// space. Groups come out largest waste first so results are stable across
/// runs.
pub(crate) fn summarize(
    groups: Vec<(Option<String>, Vec<Candidate>)>,
    files_scanned: usize,
) -> DuplicateSearchResult {
    let mut duplicate_groups: Vec<DuplicateGroup> = groups
        .into_iter()
        .map(|(hash, mut members)| {
            members.sort_by(|a, b| {
                a.modified
                    .cmp(&b.modified)
                    .then_with(|| a.relative.cmp(&b.relative))
            });
            let size = members[0].size;
            let count = members.len();
            DuplicateGroup {
                files: members
                    .into_iter()
                    .enumerate()
                    .map(|(index, member)| DuplicateFile {
                        path: member.relative,
                        size: member.size,
                        modified: member.modified,
                        original: index == 0,
                    })
                    .collect(),
                count,
                size,
                size_formatted: format_size(size),
                hash,
                total_wasted: size * (count as u64 - 1),
            }
        })
        .collect();

    duplicate_groups.sort_by(|a, b| {
        b.total_wasted
            .cmp(&a.total_wasted)
            .then_with(|| a.files[0].path.cmp(&b.files[0].path))
    });

    let total_duplicates = duplicate_groups.iter().map(|g| g.count - 1).sum();
    let wasted_space = duplicate_groups.iter().map(|g| g.total_wasted).sum();
    DuplicateSearchResult {
        total_groups: duplicate_groups.len(),
        duplicate_groups,
        total_duplicates,
        wasted_space,
        wasted_space_formatted: format_size(wasted_space),
        files_scanned,
        search_time_ms: 0,
    }
}
