use std::fs as std_fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use walkdir::WalkDir;

use crate::error::{IoContext, ToolError, ToolResult};

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Bytes read from the head of a file when deciding whether it is binary.
pub const BINARY_PROBE_LEN: usize = 512;

/// Human readable size with two decimals, e.g. `1.50 KB`.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", SIZE_UNITS[unit])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

impl EntryKind {
    pub fn of(file_type: std_fs::FileType) -> Self {
        if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else {
            Self::Other
        }
    }
}

/// Metadata snapshot reported by `get_file_info` and directory listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub size_formatted: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessed: Option<DateTime<Utc>>,
    pub extension: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
}

impl EntryInfo {
    pub fn from_metadata(path: &Path, relative: String, metadata: &std_fs::Metadata) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| relative.clone());
        Self {
            extension: extension_of(path),
            name,
            path: relative,
            kind: EntryKind::of(metadata.file_type()),
            size: metadata.len(),
            size_formatted: format_size(metadata.len()),
            created: metadata.created().ok().map(to_utc),
            modified: metadata.modified().ok().map(to_utc),
            accessed: metadata.accessed().ok().map(to_utc),
            permissions: permissions_of(metadata),
        }
    }
}

pub fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Extension including the leading dot, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// True when `path`'s extension is one of `file_types`. Entries may be written
/// with or without the leading dot; an empty list matches everything.
pub fn matches_file_types(path: &Path, file_types: &[String]) -> bool {
    if file_types.is_empty() {
        return true;
    }
    let Some(ext) = path.extension().map(|e| e.to_string_lossy()) else {
        return false;
    };
    file_types
        .iter()
        .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(&ext))
}

#[cfg(unix)]
fn permissions_of(metadata: &std_fs::Metadata) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;
    Some(format!("{:o}", metadata.permissions().mode() & 0o777))
}

#[cfg(not(unix))]
fn permissions_of(metadata: &std_fs::Metadata) -> Option<String> {
    Some(if metadata.permissions().readonly() {
        "readonly".to_string()
    } else {
        "readwrite".to_string()
    })
}

/// Metadata without following a trailing symlink; `None` when nothing exists.
pub async fn metadata_of(path: &Path) -> ToolResult<Option<std_fs::Metadata>> {
    match fs::symlink_metadata(path).await {
        Ok(metadata) => Ok(Some(metadata)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ToolError::io(
            format!("Failed to read metadata for {}", path.display()),
            e,
        )),
    }
}

pub async fn ensure_parent(path: &Path) -> ToolResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .io_context(|| format!("Failed to create parent directories for {}", path.display()))?;
    }
    Ok(())
}

/// Removes a file, symlink or whole directory tree.
pub async fn remove_any(path: &Path) -> ToolResult<()> {
    let metadata = fs::symlink_metadata(path)
        .await
        .io_context(|| format!("Failed to read metadata for {}", path.display()))?;
    let removed = if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };
    removed.io_context(|| format!("Failed to remove {}", path.display()))
}

/// Reads up to [`BINARY_PROBE_LEN`] bytes and reports whether a null byte is
/// among them. Unreadable files count as binary.
pub fn looks_binary(path: &Path) -> bool {
    let Ok(file) = std_fs::File::open(path) else {
        return true;
    };
    let mut head = Vec::with_capacity(BINARY_PROBE_LEN);
    if file
        .take(BINARY_PROBE_LEN as u64)
        .read_to_end(&mut head)
        .is_err()
    {
        return true;
    }
    head.contains(&0)
}

/// Copies a directory tree into `dest`, creating it if needed and overwriting
/// files that already exist there. Symlinks in the source are skipped. A
/// symlink already in `dest` where the copy would write is never written
/// through; the copy is refused before anything changes. Returns the number
/// of bytes copied.
pub async fn copy_dir_recursive(source: &Path, dest: &Path) -> ToolResult<u64> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        refuse_linked_targets(&source, &dest)?;
        copy_dir_blocking(&source, &dest)
    })
    .await?
}

/// Entries of `source` paired with their path relative to it.
fn source_entries(
    source: &Path,
) -> impl Iterator<Item = ToolResult<(walkdir::DirEntry, PathBuf)>> + '_ {
    let walker = WalkDir::new(source).follow_links(false).into_iter();
    walker.filter_map(move |entry| {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                return Some(Err(ToolError::io(
                    format!("Failed to walk {}", source.display()),
                    e.into(),
                )))
            }
        };
        let relative = entry.path().strip_prefix(source).ok()?.to_path_buf();
        Some(Ok((entry, relative)))
    })
}

fn refuse_linked_targets(source: &Path, dest: &Path) -> ToolResult<()> {
    for entry in source_entries(source) {
        let (entry, relative) = entry?;
        let file_type = entry.file_type();
        if !file_type.is_dir() && !file_type.is_file() {
            continue;
        }
        let target = dest.join(&relative);
        let linked = std_fs::symlink_metadata(&target)
            .is_ok_and(|metadata| metadata.file_type().is_symlink());
        if linked {
            return Err(ToolError::PathRejected(format!(
                "{} is a symbolic link and will not be written through",
                target.display()
            )));
        }
    }
    Ok(())
}

fn copy_dir_blocking(source: &Path, dest: &Path) -> ToolResult<u64> {
    let mut copied = 0;
    for entry in source_entries(source) {
        let (entry, relative) = entry?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std_fs::create_dir_all(&target)
                .io_context(|| format!("Failed to create {}", target.display()))?;
        } else if file_type.is_file() {
            copied += std_fs::copy(entry.path(), &target)
                .io_context(|| format!("Failed to copy {}", entry.path().display()))?;
        } else {
            tracing::debug!(path = %entry.path().display(), "Skipping non-regular entry");
        }
    }
    Ok(copied)
}

/// Counts below a directory, excluding the directory itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub files: u64,
    pub directories: u64,
    pub size: u64,
    /// Symlinks and other non-regular entries, also counted in `files`.
    pub special: u64,
}

impl TreeStats {
    pub fn is_empty(&self) -> bool {
        self.files == 0 && self.directories == 0
    }
}

/// Walks `path` without following links. Anything that is not a directory
/// counts as a file; only regular files contribute to `size`.
pub async fn tree_stats(path: &Path) -> ToolResult<TreeStats> {
    let path = path.to_path_buf();
    let stats = tokio::task::spawn_blocking(move || {
        let mut stats = TreeStats::default();
        for entry in WalkDir::new(&path)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.file_type().is_dir() {
                stats.directories += 1;
                continue;
            }
            stats.files += 1;
            if entry.file_type().is_file() {
                stats.size += entry.metadata().map(|m| m.len()).unwrap_or(0);
            } else {
                stats.special += 1;
            }
        }
        stats
    })
    .await?;
    Ok(stats)
}

/// Total size of the regular files below `path` (or of `path` itself).
pub async fn total_size(path: &Path) -> ToolResult<u64> {
    let metadata = fs::symlink_metadata(path)
        .await
        .io_context(|| format!("Failed to read metadata for {}", path.display()))?;
    if metadata.is_file() {
        return Ok(metadata.len());
    }
    Ok(tree_stats(path).await?.size)
}

/// Directories of `path` that do not exist yet, outermost first.
pub fn missing_ancestors(path: &Path) -> Vec<PathBuf> {
    let mut missing: Vec<PathBuf> = path
        .ancestors()
        .take_while(|p| !p.exists())
        .map(Path::to_path_buf)
        .collect();
    missing.reverse();
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, "0.00 B")]
    #[case(1023, "1023.00 B")]
    #[case(1024, "1.00 KB")]
    #[case(1536, "1.50 KB")]
    #[case(10 * 1024 * 1024, "10.00 MB")]
    #[case(3 * 1024 * 1024 * 1024, "3.00 GB")]
    #[case(5 * 1024u64.pow(4), "5.00 TB")]
    #[case(2048 * 1024u64.pow(4), "2048.00 TB")]
    fn test_format_size(#[case] bytes: u64, #[case] expected: &str) {
        assert_eq!(format_size(bytes), expected);
    }

    #[rstest]
    #[case("main.rs", &[".rs"], true)]
    #[case("main.rs", &["rs"], true)]
    #[case("main.RS", &["rs"], true)]
    #[case("main.rs", &[".ts", ".js"], false)]
    #[case("Makefile", &[".rs"], false)]
    #[case("Makefile", &[], true)]
    fn test_matches_file_types(
        #[case] name: &str,
        #[case] types: &[&str],
        #[case] expected: bool,
    ) {
        let types: Vec<String> = types.iter().map(|t| t.to_string()).collect();
        assert_eq!(matches_file_types(Path::new(name), &types), expected);
    }

    #[test]
    fn test_binary_probe() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let text = temp.path().join("small.txt");
        let binary = temp.path().join("blob.bin");
        let late_null = temp.path().join("late.txt");
        std_fs::write(&text, "short text")?;
        std_fs::write(&binary, [0x89, b'P', b'N', b'G', 0, 0])?;
        let mut content = vec![b'a'; BINARY_PROBE_LEN];
        content.push(0);
        std_fs::write(&late_null, content)?;

        assert!(!looks_binary(&text));
        assert!(looks_binary(&binary));
        // Only the head is probed.
        assert!(!looks_binary(&late_null));
        assert!(looks_binary(&temp.path().join("missing")));
        Ok(())
    }

    #[tokio::test]
    async fn test_copy_dir_recursive_merges() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = temp.path().join("source");
        let dest = temp.path().join("dest");
        std_fs::create_dir_all(source.join("nested"))?;
        std_fs::create_dir_all(&dest)?;
        std_fs::write(source.join("a.txt"), "new")?;
        std_fs::write(source.join("nested").join("b.txt"), "bb")?;
        std_fs::write(dest.join("a.txt"), "old")?;
        std_fs::write(dest.join("keep.txt"), "keep")?;

        let copied = copy_dir_recursive(&source, &dest).await?;
        assert_eq!(copied, 5);
        assert_eq!(std_fs::read_to_string(dest.join("a.txt"))?, "new");
        assert_eq!(std_fs::read_to_string(dest.join("nested").join("b.txt"))?, "bb");
        assert_eq!(std_fs::read_to_string(dest.join("keep.txt"))?, "keep");
        assert_eq!(total_size(&dest).await?, 9);

        let stats = tree_stats(&dest).await?;
        assert_eq!(
            stats,
            TreeStats {
                files: 3,
                directories: 1,
                size: 9,
                special: 0,
            }
        );
        assert!(tree_stats(&dest.join("nested")).await.is_ok_and(|s| !s.is_empty()));
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_copy_dir_recursive_refuses_symlinked_targets() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = temp.path().join("source");
        let dest = temp.path().join("dest");
        let outside = temp.path().join("outside.txt");
        std_fs::create_dir_all(&source)?;
        std_fs::create_dir_all(&dest)?;
        std_fs::write(source.join("a.txt"), "first")?;
        std_fs::write(source.join("link.txt"), "changed")?;
        std_fs::write(&outside, "original")?;
        std::os::unix::fs::symlink(&outside, dest.join("link.txt"))?;

        let err = copy_dir_recursive(&source, &dest).await.unwrap_err();
        assert!(matches!(err, ToolError::PathRejected(_)));
        assert_eq!(std_fs::read_to_string(&outside)?, "original");
        // Refused before anything was copied.
        assert!(!dest.join("a.txt").exists());
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tree_stats_counts_special_entries() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        std_fs::write(temp.path().join("a.txt"), "abc")?;
        std::os::unix::fs::symlink(temp.path().join("a.txt"), temp.path().join("link"))?;

        let stats = tree_stats(temp.path()).await?;
        assert_eq!(stats.files, 2);
        assert_eq!(stats.special, 1);
        assert_eq!(stats.size, 3);
        Ok(())
    }

    #[test]
    fn test_missing_ancestors_outermost_first() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let target = temp.path().join("a").join("b").join("c");
        assert_eq!(
            missing_ancestors(&target),
            vec![
                temp.path().join("a"),
                temp.path().join("a").join("b"),
                target.clone()
            ]
        );
        Ok(())
    }
}
