pub mod cache;
pub mod content;
pub mod duplicates;
pub mod files;

use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{ToolError, ToolResult};
use crate::file::walk::{WalkOptions, Walker};
use crate::security::PathValidator;
use crate::settings::SearchSettings;

pub use cache::{generate_key, ResultCache};
pub use content::{ContentMatch, ContentSearchQuery, ContentSearchResult, LineMatch};
pub use duplicates::{
    CompareBy, DuplicateFile, DuplicateGroup, DuplicateQuery, DuplicateSearchResult,
};
pub use files::{FileMatch, FileSearchQuery, FileSearchResult, MatchType};

/// Name search, content search and duplicate detection over the workspace.
///
/// Enumeration and file reads run on the blocking pool; results are memoized
/// per request signature for the configured TTL.
#[derive(Debug)]
pub struct SearchEngine {
    validator: PathValidator,
    default_excludes: Vec<String>,
    max_file_size: u64,
    max_results: usize,
    max_concurrency: usize,
    cache_enabled: bool,
    files_cache: ResultCache<FileSearchResult>,
    content_cache: ResultCache<ContentSearchResult>,
    duplicates_cache: ResultCache<DuplicateSearchResult>,
}

impl SearchEngine {
    pub fn new(validator: PathValidator, settings: &SearchSettings) -> Self {
        let ttl = Duration::from_millis(settings.cache_ttl_ms);
        Self {
            validator,
            default_excludes: settings.default_excludes.clone(),
            max_file_size: settings.max_file_size,
            max_results: settings.max_results,
            max_concurrency: settings.max_concurrency,
            cache_enabled: settings.cache_enabled,
            files_cache: ResultCache::new(ttl),
            content_cache: ResultCache::new(ttl),
            duplicates_cache: ResultCache::new(ttl),
        }
    }

    pub async fn search_files(
        &self,
        query: &FileSearchQuery,
        cancel: &CancellationToken,
    ) -> ToolResult<FileSearchResult> {
        self.cached(&self.files_cache, "search_files", query, || async {
            let started = Instant::now();
            let walker = self.walker(
                &query.path,
                WalkOptions {
                    recursive: query.recursive,
                    max_depth: None,
                    include_hidden: query.include_hidden,
                    excludes: self.excludes(&query.exclude_patterns),
                },
            )?;
            let max_results = query.max_results.unwrap_or(self.max_results);

            let validator = self.validator.clone();
            let owned = query.clone();
            let cancel = cancel.clone();
            let (results, total_found) = tokio::task::spawn_blocking(move || {
                files::search_files_blocking(&walker, &validator, &owned, max_results, &cancel)
            })
            .await??;

            Ok::<_, ToolError>(FileSearchResult {
                query: query.pattern.clone(),
                total_returned: results.len(),
                truncated: total_found > results.len(),
                total_found,
                results,
                search_time_ms: elapsed_ms(started),
            })
        })
        .await
    }

    pub async fn search_content(
        &self,
        query: &ContentSearchQuery,
        cancel: &CancellationToken,
    ) -> ToolResult<ContentSearchResult> {
        self.cached(&self.content_cache, "search_content", query, || async {
            let started = Instant::now();
            let regex = content::build_matcher(query)?;
            let walker = self.walker(
                &query.path,
                WalkOptions {
                    recursive: query.recursive,
                    max_depth: None,
                    include_hidden: false,
                    excludes: self.excludes(&query.exclude_patterns),
                },
            )?;
            let max_results = query
                .max_results
                .unwrap_or(content::DEFAULT_CONTENT_RESULTS);
            let max_file_size = query
                .max_file_size
                .unwrap_or(content::DEFAULT_CONTENT_FILE_SIZE)
                .min(self.max_file_size);

            let validator = self.validator.clone();
            let owned = query.clone();
            let cancel = cancel.clone();
            let scan = tokio::task::spawn_blocking(move || {
                content::search_content_blocking(
                    &walker,
                    &validator,
                    &owned,
                    &regex,
                    max_results,
                    max_file_size,
                    &cancel,
                )
            })
            .await??;

            Ok::<_, ToolError>(ContentSearchResult {
                query: query.query.clone(),
                total_files: scan.files_scanned,
                total_matches: scan.results.iter().map(|r| r.match_count).sum(),
                files_with_matches: scan.results.len(),
                results: scan.results,
                search_time_ms: elapsed_ms(started),
                truncated: scan.truncated,
            })
        })
        .await
    }

    pub async fn find_duplicates(
        &self,
        query: &DuplicateQuery,
        cancel: &CancellationToken,
    ) -> ToolResult<DuplicateSearchResult> {
        self.cached(&self.duplicates_cache, "find_duplicates", query, || async {
            let started = Instant::now();
            if query.max_size.is_some_and(|max| max < query.min_size) {
                return Err(ToolError::InvalidInput(format!(
                    "max_size must not be smaller than min_size ({})",
                    query.min_size
                )));
            }
            let walker = self.walker(
                &query.path,
                WalkOptions {
                    recursive: query.recursive,
                    max_depth: None,
                    include_hidden: false,
                    excludes: self.excludes(&query.exclude_patterns),
                },
            )?;

            let validator = self.validator.clone();
            let owned = query.clone();
            let walk_cancel = cancel.clone();
            let (candidates, files_scanned) = tokio::task::spawn_blocking(move || {
                let files = walker.files(&walk_cancel)?;
                let scanned = files.len();
                let candidates: Vec<_> = files
                    .into_iter()
                    .filter(|entry| duplicates::is_candidate(entry, &owned))
                    .map(|entry| duplicates::Candidate::from_entry(entry, &validator))
                    .collect();
                Ok::<_, ToolError>((candidates, scanned))
            })
            .await??;

            let groups = duplicates::group_candidates(
                candidates,
                query.compare_by,
                self.max_concurrency,
                cancel,
            )
            .await?;

            let mut result = duplicates::summarize(groups, files_scanned);
            result.search_time_ms = elapsed_ms(started);
            Ok::<_, ToolError>(result)
        })
        .await
    }

    /// Evicts expired cache entries from every search cache.
    pub fn cleanup_cache(&self) -> usize {
        self.files_cache.cleanup() + self.content_cache.cleanup() + self.duplicates_cache.cleanup()
    }

    pub fn clear_cache(&self) {
        self.files_cache.clear();
        self.content_cache.clear();
        self.duplicates_cache.clear();
    }

    async fn cached<V, Q, F, Fut>(
        &self,
        cache: &ResultCache<V>,
        operation: &str,
        query: &Q,
        compute: F,
    ) -> ToolResult<V>
    where
        V: Clone,
        Q: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ToolResult<V>>,
    {
        let key = if self.cache_enabled {
            serde_json::to_value(query)
                .ok()
                .map(|params| generate_key(operation, &params))
        } else {
            None
        };

        if let Some(key) = &key {
            if let Some(hit) = cache.get(key) {
                tracing::debug!(operation, "Search cache hit");
                return Ok(hit);
            }
        }

        // Failed and cancelled runs are never stored.
        let value = compute().await?;
        if let Some(key) = key {
            cache.set(key, value.clone());
        }
        Ok(value)
    }

    fn walker(&self, path: &str, mut options: WalkOptions) -> ToolResult<Walker> {
        let root = self.search_root(path)?;
        options
            .excludes
            .extend(self.validator.boundary().protected_excludes(&root));
        Walker::new(root, &options)
    }

    fn search_root(&self, path: &str) -> ToolResult<PathBuf> {
        let root = self.validator.resolve(path)?;
        if !root.exists() {
            return Err(ToolError::NotFound(format!("Directory not found: {path}")));
        }
        if !root.is_dir() {
            return Err(ToolError::InvalidInput(format!(
                "Path is not a directory: {path}"
            )));
        }
        Ok(root)
    }

    fn excludes(&self, extra: &[String]) -> Vec<String> {
        self.default_excludes
            .iter()
            .chain(extra)
            .cloned()
            .collect()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
