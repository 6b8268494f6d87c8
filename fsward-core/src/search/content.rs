use std::ops::ControlFlow;

use regex::{Regex, RegexBuilder};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ToolError, ToolResult};
use crate::file::access::{looks_binary, matches_file_types, EntryKind};
use crate::file::walk::Walker;
use crate::security::PathValidator;

pub const DEFAULT_CONTENT_RESULTS: usize = 50;
pub const DEFAULT_CONTENT_FILE_SIZE: u64 = 1024 * 1024;

fn default_true() -> bool {
    true
}

fn default_context() -> usize {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContentSearchQuery {
    /// Text to find. Taken literally unless `use_regex` is set.
    pub query: String,
    /// Directory to search, relative to the workspace root.
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub use_regex: bool,
    #[serde(default)]
    pub whole_word: bool,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Maximum number of files with matches to report. Defaults to 50.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    /// Files larger than this many bytes are skipped. Defaults to 1 MiB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
    /// Lines of context reported before and after each match.
    #[serde(default = "default_context")]
    pub context: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineMatch {
    /// 1-based.
    pub line: usize,
    /// 1-based, in characters.
    pub column: usize,
    pub text: String,
    pub matched_text: String,
    pub before: Vec<String>,
    pub after: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentMatch {
    pub file: String,
    pub matches: Vec<LineMatch>,
    pub match_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSearchResult {
    pub query: String,
    pub results: Vec<ContentMatch>,
    pub total_files: usize,
    pub total_matches: usize,
    pub files_with_matches: usize,
    pub search_time_ms: u64,
    pub truncated: bool,
}

pub fn build_matcher(query: &ContentSearchQuery) -> ToolResult<Regex> {
    if query.query.is_empty() {
        return Err(ToolError::InvalidInput(
            "Query parameter is required".to_string(),
        ));
    }
    let mut pattern = if query.use_regex {
        query.query.clone()
    } else {
        regex::escape(&query.query)
    };
    if query.whole_word {
        pattern = format!(r"\b(?:{pattern})\b");
    }
    RegexBuilder::new(&pattern)
        .case_insensitive(!query.case_sensitive)
        .build()
        .map_err(|e| ToolError::InvalidInput(format!("Invalid regex {}: {e}", query.query)))
}

/// Every matching line of `content`, with up to `context` surrounding lines
/// clipped at the start and end of the file.
pub fn find_matches(content: &str, regex: &Regex, context: usize) -> Vec<LineMatch> {
    let lines: Vec<&str> = content.lines().collect();
    let mut matches = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let Some(found) = regex.find(line) else {
            continue;
        };
        let start = i.saturating_sub(context);
        let end = (i + 1 + context).min(lines.len());

        matches.push(LineMatch {
            line: i + 1,
            column: line[..found.start()].chars().count() + 1,
            text: line.to_string(),
            matched_text: found.as_str().to_string(),
            before: lines[start..i].iter().map(|s| s.to_string()).collect(),
            after: lines[i + 1..end].iter().map(|s| s.to_string()).collect(),
        });
    }

    matches
}

pub(crate) struct ContentScan {
    pub results: Vec<ContentMatch>,
    pub files_scanned: usize,
    pub truncated: bool,
}

/// Scans files in enumeration order until `max_results` files have matched.
/// Oversized, binary and unreadable files are skipped.
pub(crate) fn search_content_blocking(
    walker: &Walker,
    validator: &PathValidator,
    query: &ContentSearchQuery,
    regex: &Regex,
    max_results: usize,
    max_file_size: u64,
    cancel: &CancellationToken,
) -> ToolResult<ContentScan> {
    let mut scan = ContentScan {
        results: Vec::new(),
        files_scanned: 0,
        truncated: false,
    };

    walker.walk(cancel, |entry| {
        if entry.kind != EntryKind::File || !matches_file_types(&entry.path, &query.file_types) {
            return ControlFlow::Continue(());
        }
        if scan.results.len() >= max_results {
            scan.truncated = true;
            return ControlFlow::Break(());
        }

        scan.files_scanned += 1;
        if entry.metadata.len() > max_file_size || looks_binary(&entry.path) {
            return ControlFlow::Continue(());
        }
        let bytes = match std::fs::read(&entry.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %entry.path.display(), ?e, "Skipping unreadable file");
                return ControlFlow::Continue(());
            }
        };

        let content = String::from_utf8_lossy(&bytes);
        let matches = find_matches(&content, regex, query.context);
        if !matches.is_empty() {
            scan.results.push(ContentMatch {
                file: validator.relative(&entry.path),
                match_count: matches.len(),
                matches,
            });
        }
        ControlFlow::Continue(())
    })?;

    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(text: &str) -> ContentSearchQuery {
        ContentSearchQuery {
            query: text.to_string(),
            path: String::new(),
            recursive: true,
            case_sensitive: false,
            use_regex: false,
            whole_word: false,
            file_types: Vec::new(),
            exclude_patterns: Vec::new(),
            max_results: None,
            max_file_size: None,
            context: 2,
        }
    }

    fn numbered(count: usize) -> String {
        (1..=count)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_context_window_in_the_middle() {
        let content = numbered(20).replace("line 10", "line 10 TARGET");
        let regex = build_matcher(&query("target")).unwrap();

        let matches = find_matches(&content, &regex, 2);
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.line, 10);
        assert_eq!(m.column, 9);
        assert_eq!(m.matched_text, "TARGET");
        assert_eq!(m.before, vec!["line 8", "line 9"]);
        assert_eq!(m.after, vec!["line 11", "line 12"]);
    }

    #[test]
    fn test_context_window_is_clipped_at_file_edges() {
        let content = numbered(20)
            .replace("line 1\n", "line 1 TARGET\n")
            .replace("line 20", "line 20 TARGET");
        let regex = build_matcher(&query("TARGET")).unwrap();

        let matches = find_matches(&content, &regex, 2);
        assert_eq!(matches.len(), 2);
        assert!(matches[0].before.is_empty());
        assert_eq!(matches[0].after, vec!["line 2", "line 3"]);
        assert_eq!(matches[1].line, 20);
        assert_eq!(matches[1].before, vec!["line 18", "line 19"]);
        assert!(matches[1].after.is_empty());
    }

    #[test]
    fn test_literal_queries_are_escaped() {
        let regex = build_matcher(&query("a.b(")).unwrap();
        assert!(regex.is_match("call a.b(1)"));
        assert!(!regex.is_match("axb("));
    }

    #[test]
    fn test_whole_word_and_case() {
        let mut q = query("cat");
        q.whole_word = true;
        let regex = build_matcher(&q).unwrap();
        assert!(regex.is_match("the Cat sat"));
        assert!(!regex.is_match("concatenate"));

        q.case_sensitive = true;
        let regex = build_matcher(&q).unwrap();
        assert!(!regex.is_match("the Cat sat"));
    }

    #[test]
    fn test_regex_alternation_stays_inside_word_boundaries() {
        let mut q = query("cat|dog");
        q.use_regex = true;
        q.whole_word = true;
        let regex = build_matcher(&q).unwrap();
        assert!(regex.is_match("a dog barks"));
        assert!(!regex.is_match("dogma"));
    }

    #[test]
    fn test_column_counts_characters() {
        let regex = build_matcher(&query("x")).unwrap();
        let matches = find_matches("ééx", &regex, 0);
        assert_eq!(matches[0].column, 3);
    }

    #[test]
    fn test_empty_and_invalid_queries() {
        assert!(matches!(
            build_matcher(&query("")),
            Err(ToolError::InvalidInput(_))
        ));
        let mut q = query("[unclosed");
        q.use_regex = true;
        assert!(matches!(build_matcher(&q), Err(ToolError::InvalidInput(_))));
    }
}
