use std::cmp::Ordering;
use std::ops::ControlFlow;
use std::path::Path;

use chrono::{DateTime, Utc};
use globset::{GlobBuilder, GlobMatcher};
use regex::{Regex, RegexBuilder};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ToolError, ToolResult};
use crate::file::access::{extension_of, format_size, matches_file_types, to_utc, EntryKind};
use crate::file::walk::Walker;
use crate::security::PathValidator;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FileSearchQuery {
    /// Text to look for in file names. A pattern containing `*` or `?` is a
    /// glob; with `use_regex` it is a regular expression.
    pub pattern: String,
    /// Directory to search, relative to the workspace root.
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub use_regex: bool,
    /// Extensions to keep, e.g. `[".rs", "toml"]`.
    #[serde(default)]
    pub file_types: Vec<String>,
    /// Extra globs to skip, on top of the configured defaults.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Partial,
    Pattern,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMatch {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub size_formatted: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    pub extension: String,
    pub relevance_score: f64,
    pub match_type: MatchType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSearchResult {
    pub query: String,
    pub results: Vec<FileMatch>,
    pub total_found: usize,
    pub total_returned: usize,
    pub search_time_ms: u64,
    pub truncated: bool,
}

enum NameMatcher {
    Substring { needle: String, case_sensitive: bool },
    Glob { matcher: GlobMatcher, full_path: bool },
    Regex(Regex),
}

impl NameMatcher {
    fn new(query: &FileSearchQuery) -> ToolResult<Self> {
        let pattern = &query.pattern;
        if query.use_regex {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(!query.case_sensitive)
                .build()
                .map_err(|e| ToolError::InvalidInput(format!("Invalid regex {pattern}: {e}")))?;
            return Ok(Self::Regex(regex));
        }
        if is_glob(pattern) {
            let matcher = GlobBuilder::new(pattern)
                .literal_separator(true)
                .case_insensitive(!query.case_sensitive)
                .build()
                .map_err(|e| ToolError::InvalidInput(format!("Invalid glob {pattern}: {e}")))?
                .compile_matcher();
            return Ok(Self::Glob {
                matcher,
                full_path: pattern.contains('/'),
            });
        }
        Ok(Self::Substring {
            needle: fold(pattern, query.case_sensitive),
            case_sensitive: query.case_sensitive,
        })
    }

    /// `relative` is the path below the search root, `name` its last segment.
    fn is_match(&self, relative: &str, name: &str) -> bool {
        match self {
            Self::Substring {
                needle,
                case_sensitive,
            } => fold(name, *case_sensitive).contains(needle.as_str()),
            Self::Glob { matcher, full_path } => {
                if *full_path {
                    matcher.is_match(relative)
                } else {
                    matcher.is_match(name)
                }
            }
            Self::Regex(regex) => regex.is_match(name),
        }
    }
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

fn fold(text: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        text.to_string()
    } else {
        text.to_lowercase()
    }
}

/// Scores a name against the query: exact 100, prefix 80, substring 60, and
/// otherwise up to 40 for the share of query characters found in the name.
pub fn relevance(name: &str, pattern: &str, case_sensitive: bool) -> f64 {
    let name = fold(name, case_sensitive);
    let search = fold(pattern, case_sensitive);

    if name == search {
        return 100.0;
    }
    if name.starts_with(&search) {
        return 80.0;
    }
    if name.contains(&search) {
        return 60.0;
    }
    let total = search.chars().count();
    if total == 0 {
        return 0.0;
    }
    let matched = search.chars().filter(|c| name.contains(*c)).count();
    matched as f64 / total as f64 * 40.0
}

pub fn match_type(name: &str, query: &FileSearchQuery) -> MatchType {
    if query.use_regex || is_glob(&query.pattern) {
        MatchType::Pattern
    } else if name == query.pattern {
        MatchType::Exact
    } else {
        MatchType::Partial
    }
}

/// Enumerates `walker` and ranks every file whose name matches the query.
/// Returns the best `max_results` matches and how many matched in total.
pub(crate) fn search_files_blocking(
    walker: &Walker,
    validator: &PathValidator,
    query: &FileSearchQuery,
    max_results: usize,
    cancel: &CancellationToken,
) -> ToolResult<(Vec<FileMatch>, usize)> {
    if query.pattern.is_empty() {
        return Err(ToolError::InvalidInput(
            "Pattern parameter is required".to_string(),
        ));
    }
    let matcher = NameMatcher::new(query)?;

    let mut results = Vec::new();
    walker.walk(cancel, |entry| {
        if entry.kind != EntryKind::File {
            return ControlFlow::Continue(());
        }
        let name = file_name(&entry.path);
        if !matches_file_types(&entry.path, &query.file_types)
            || !matcher.is_match(&entry.relative, &name)
        {
            return ControlFlow::Continue(());
        }

        results.push(FileMatch {
            path: validator.relative(&entry.path),
            size: entry.metadata.len(),
            size_formatted: format_size(entry.metadata.len()),
            modified: entry.metadata.modified().ok().map(to_utc),
            extension: extension_of(&entry.path),
            relevance_score: relevance(&name, &query.pattern, query.case_sensitive),
            match_type: match_type(&name, query),
            name,
        });
        ControlFlow::Continue(())
    })?;

    // Stable sort: equal scores keep enumeration order.
    results.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(Ordering::Equal)
    });
    let total_found = results.len();
    results.truncate(max_results);
    Ok((results, total_found))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
