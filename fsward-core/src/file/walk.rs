use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tokio_util::sync::CancellationToken;
use walkdir::{DirEntry, WalkDir};

use crate::error::{ToolError, ToolResult};
use crate::file::access::EntryKind;

/// Compiles glob patterns with `/` treated literally, so `*` stays within a
/// single path segment and only `**` crosses directories.
pub fn build_glob_set(patterns: &[String], case_insensitive: bool) -> ToolResult<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| ToolError::InvalidInput(format!("Invalid glob {pattern}: {e}")))?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|e| ToolError::InvalidInput(format!("Invalid glob set: {e}")))?;
    Ok(Some(set))
}

/// Exclusion globs matched against paths relative to the walk root.
///
/// A pattern such as `**/node_modules/**` only matches the contents of the
/// directory, so its `/**`-less form is also kept to prune the directory
/// itself before it is ever descended into.
#[derive(Debug, Clone, Default)]
pub struct ExcludeRules {
    entries: Option<GlobSet>,
    dirs: Option<GlobSet>,
}

impl ExcludeRules {
    pub fn new(patterns: &[String]) -> ToolResult<Self> {
        let dir_patterns: Vec<String> = patterns
            .iter()
            .filter_map(|p| p.strip_suffix("/**"))
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            entries: build_glob_set(patterns, false)?,
            dirs: build_glob_set(&dir_patterns, false)?,
        })
    }

    pub fn excludes_dir(&self, relative: &str) -> bool {
        matches(&self.dirs, relative) || matches(&self.entries, relative)
    }

    pub fn excludes_file(&self, relative: &str) -> bool {
        matches(&self.entries, relative)
    }
}

fn matches(set: &Option<GlobSet>, relative: &str) -> bool {
    set.as_ref().is_some_and(|set| set.is_match(relative))
}

#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub recursive: bool,
    pub max_depth: Option<usize>,
    pub include_hidden: bool,
    pub excludes: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            max_depth: None,
            include_hidden: false,
            excludes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub path: PathBuf,
    /// Relative to the walk root, `/` separated.
    pub relative: String,
    pub kind: EntryKind,
    pub depth: usize,
    pub metadata: std::fs::Metadata,
}

/// Depth first enumeration below a directory, in file name order. Symlinks
/// are reported but never followed.
#[derive(Debug, Clone)]
pub struct Walker {
    root: PathBuf,
    max_depth: usize,
    include_hidden: bool,
    excludes: ExcludeRules,
}

impl Walker {
    pub fn new(root: PathBuf, options: &WalkOptions) -> ToolResult<Self> {
        let max_depth = if options.recursive {
            options.max_depth.unwrap_or(usize::MAX).max(1)
        } else {
            1
        };
        Ok(Self {
            root,
            max_depth,
            include_hidden: options.include_hidden,
            excludes: ExcludeRules::new(&options.excludes)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Visits every entry that survives the hidden and exclusion rules. The
    /// cancellation token is checked before each entry; unreadable entries
    /// are skipped.
    pub fn walk<F>(&self, cancel: &CancellationToken, mut visit: F) -> ToolResult<()>
    where
        F: FnMut(WalkEntry) -> ControlFlow<()>,
    {
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(self.max_depth)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| self.keep(entry));

        for entry in walker {
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled);
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(?e, "Skipping unreadable entry");
                    continue;
                }
            };
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::debug!(path = %entry.path().display(), ?e, "Skipping entry without metadata");
                    continue;
                }
            };

            let walk_entry = WalkEntry {
                relative: self.relative(entry.path()),
                kind: EntryKind::of(entry.file_type()),
                depth: entry.depth(),
                path: entry.into_path(),
                metadata,
            };
            if visit(walk_entry).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Collects the regular files of the walk.
    pub fn files(&self, cancel: &CancellationToken) -> ToolResult<Vec<WalkEntry>> {
        let mut files = Vec::new();
        self.walk(cancel, |entry| {
            if entry.kind == EntryKind::File {
                files.push(entry);
            }
            ControlFlow::Continue(())
        })?;
        Ok(files)
    }

    fn keep(&self, entry: &DirEntry) -> bool {
        if !self.include_hidden && entry.file_name().to_string_lossy().starts_with('.') {
            return false;
        }
        let relative = self.relative(entry.path());
        if entry.file_type().is_dir() {
            !self.excludes.excludes_dir(&relative)
        } else {
            !self.excludes.excludes_file(&relative)
        }
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}
