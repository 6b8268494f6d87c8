use std::ops::ControlFlow;
use std::path::Path;

use serde::Serialize;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::error::{IoContext, ToolError, ToolResult};
use crate::file::access::{self, format_size, matches_file_types, EntryInfo, EntryKind};
use crate::file::walk::{build_glob_set, WalkOptions, Walker};
use crate::file::BackupManager;
use crate::security::PathValidator;
use crate::tools::file::require;
use crate::tools::types::{
    BackupNote, CreateDirectoryParams, DeleteDirectoryParams, ListDirectoryParams,
    MoveDirectoryParams, SortBy, SortOrder,
};

#[derive(Debug, Clone, Serialize)]
pub struct ListDirectoryResult {
    pub path: String,
    pub entries: Vec<EntryInfo>,
    pub total_files: usize,
    pub total_directories: usize,
    pub total_size: u64,
    pub total_size_formatted: String,
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateDirectoryResult {
    pub path: String,
    /// Every directory that did not exist before, outermost first.
    pub created: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteDirectoryResult {
    pub path: String,
    pub files_deleted: u64,
    pub directories_deleted: u64,
    pub total_size: u64,
    pub total_size_formatted: String,
    #[serde(flatten)]
    pub backup: BackupNote,
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveDirectoryResult {
    pub source_path: String,
    pub dest_path: String,
    pub files_moved: u64,
    pub directories_moved: u64,
    pub total_size: u64,
    pub merged: bool,
    #[serde(flatten)]
    pub backup: BackupNote,
}

#[derive(Debug, Clone)]
pub struct DirectoryOperations {
    validator: PathValidator,
    backups: BackupManager,
}

impl DirectoryOperations {
    pub fn new(validator: PathValidator, backups: BackupManager) -> Self {
        Self { validator, backups }
    }

    /// Lists a directory with directories first, then files ordered by the
    /// requested key. Protected paths are never listed.
    pub async fn list_directory(
        &self,
        params: &ListDirectoryParams,
        cancel: &CancellationToken,
    ) -> ToolResult<ListDirectoryResult> {
        let root = self.validator.resolve(&params.path)?;
        self.require_directory(&root, &params.path, "Directory not found")
            .await?;

        let depth = if params.recursive { params.max_depth.max(1) } else { 1 };
        let walker = Walker::new(
            root.clone(),
            &WalkOptions {
                recursive: params.recursive,
                max_depth: Some(depth),
                include_hidden: params.include_hidden,
                excludes: self.validator.boundary().protected_excludes(&root),
            },
        )?;
        let pattern = match &params.pattern {
            Some(pattern) if !pattern.is_empty() => build_glob_set(&[pattern.clone()], false)?,
            _ => None,
        };
        let glob_on_path = params.pattern.as_deref().is_some_and(|p| p.contains('/'));

        let validator = self.validator.clone();
        let file_types = params.file_types.clone();
        let cancel = cancel.clone();
        let mut entries = tokio::task::spawn_blocking(move || {
            let mut entries = Vec::new();
            walker.walk(&cancel, |entry| {
                let subject = if glob_on_path {
                    entry.relative.as_str()
                } else {
                    entry.relative.rsplit('/').next().unwrap_or_default()
                };
                if pattern.as_ref().is_some_and(|set| !set.is_match(subject)) {
                    return ControlFlow::Continue(());
                }
                if entry.kind != EntryKind::Directory
                    && !matches_file_types(&entry.path, &file_types)
                {
                    return ControlFlow::Continue(());
                }
                entries.push(EntryInfo::from_metadata(
                    &entry.path,
                    validator.relative(&entry.path),
                    &entry.metadata,
                ));
                ControlFlow::Continue(())
            })?;
            Ok::<_, ToolError>(entries)
        })
        .await??;

        sort_entries(&mut entries, params.sort_by, params.sort_order);

        let total_directories = entries
            .iter()
            .filter(|e| e.kind == EntryKind::Directory)
            .count();
        let total_size = entries
            .iter()
            .filter(|e| e.kind == EntryKind::File)
            .map(|e| e.size)
            .sum();
        Ok(ListDirectoryResult {
            path: self.validator.relative(&root),
            total_files: entries.len() - total_directories,
            total_directories,
            total_size,
            total_size_formatted: format_size(total_size),
            entries,
            depth,
        })
    }

    pub async fn create_directory(
        &self,
        params: &CreateDirectoryParams,
    ) -> ToolResult<CreateDirectoryResult> {
        require(&params.path, "path")?;
        let target = self.validator.resolve_target(&params.path)?;
        let mode = params.mode.as_deref().map(parse_mode).transpose()?;

        if access::metadata_of(&target).await?.is_some() {
            return Err(ToolError::Conflict(format!(
                "Path already exists: {}",
                params.path
            )));
        }
        let missing = access::missing_ancestors(&target);
        if !params.recursive && missing.len() > 1 {
            return Err(ToolError::NotFound(format!(
                "Parent directory not found for {}. Use recursive: true to create it",
                params.path
            )));
        }

        fs::create_dir_all(&target)
            .await
            .io_context(|| format!("Failed to create directory {}", params.path))?;
        if let Some(mode) = mode {
            for dir in &missing {
                set_mode(dir, mode).await?;
            }
        }

        let permissions = fs::metadata(&target)
            .await
            .ok()
            .and_then(|metadata| {
                EntryInfo::from_metadata(&target, String::new(), &metadata).permissions
            });
        Ok(CreateDirectoryResult {
            path: params.path.clone(),
            created: missing.iter().map(|dir| self.validator.relative(dir)).collect(),
            permissions,
        })
    }

    pub async fn delete_directory(
        &self,
        params: &DeleteDirectoryParams,
    ) -> ToolResult<DeleteDirectoryResult> {
        require(&params.path, "path")?;
        if !params.confirm {
            return Err(ToolError::ConfirmationRequired(
                "confirm parameter must be explicitly set to true to delete a directory"
                    .to_string(),
            ));
        }
        let target = self.validator.resolve_subtree_target(&params.path)?;
        self.require_directory(&target, &params.path, "Directory not found")
            .await?;

        let stats = access::tree_stats(&target).await?;
        if !stats.is_empty() {
            if !params.recursive {
                return Err(ToolError::Conflict(format!(
                    "Directory is not empty: {}. Use recursive: true to delete contents",
                    params.path
                )));
            }
            if !params.force {
                return Err(ToolError::ConfirmationRequired(format!(
                    "Directory contains {} items. Use force: true to confirm deletion",
                    stats.files + stats.directories
                )));
            }
        }

        let backup = if params.create_backup && !stats.is_empty() {
            self.backups.create_backup(&target).await.into()
        } else {
            BackupNote::default()
        };

        fs::remove_dir_all(&target)
            .await
            .io_context(|| format!("Failed to delete directory {}", params.path))?;

        Ok(DeleteDirectoryResult {
            path: params.path.clone(),
            files_deleted: stats.files,
            directories_deleted: stats.directories,
            total_size: stats.size,
            total_size_formatted: format_size(stats.size),
            backup,
        })
    }

    pub async fn move_directory(
        &self,
        params: &MoveDirectoryParams,
    ) -> ToolResult<MoveDirectoryResult> {
        require(&params.source_path, "source_path")?;
        require(&params.dest_path, "dest_path")?;
        let source = self.validator.resolve_subtree_target(&params.source_path)?;
        let dest = self.validator.resolve_subtree_target(&params.dest_path)?;
        if source == dest {
            return Err(ToolError::InvalidInput(
                "Source and destination paths are identical".to_string(),
            ));
        }
        self.require_directory(&source, &params.source_path, "Source directory not found")
            .await?;
        if dest.starts_with(&source) {
            return Err(ToolError::InvalidInput(format!(
                "Cannot move {} into itself",
                params.source_path
            )));
        }

        let stats = access::tree_stats(&source).await?;
        let mut backup = BackupNote::default();
        let mut merged = false;

        match access::metadata_of(&dest).await? {
            None => {
                access::ensure_parent(&dest).await?;
                rename(&source, &dest, params).await?;
            }
            Some(_) if !params.overwrite && !params.merge => {
                return Err(ToolError::Conflict(format!(
                    "Destination already exists: {}. Use overwrite or merge",
                    params.dest_path
                )));
            }
            Some(existing) => {
                if params.merge && !existing.is_dir() {
                    return Err(ToolError::Conflict(format!(
                        "Cannot merge into {}: it is not a directory",
                        params.dest_path
                    )));
                }
                // A merge copies regular files only and then removes the source.
                if params.merge && stats.special > 0 {
                    return Err(ToolError::Conflict(format!(
                        "Cannot merge {}: it contains {} symbolic links or special files \
                         that would be lost. Move them first or use overwrite",
                        params.source_path, stats.special
                    )));
                }
                if params.create_backup {
                    backup = self.backups.create_backup(&dest).await.into();
                }
                if params.merge {
                    access::copy_dir_recursive(&source, &dest).await?;
                    fs::remove_dir_all(&source).await.io_context(|| {
                        format!("Failed to remove {} after merging", params.source_path)
                    })?;
                    merged = true;
                } else {
                    access::remove_any(&dest).await?;
                    rename(&source, &dest, params).await?;
                }
            }
        }

        Ok(MoveDirectoryResult {
            source_path: params.source_path.clone(),
            dest_path: params.dest_path.clone(),
            files_moved: stats.files,
            directories_moved: stats.directories,
            total_size: stats.size,
            merged,
            backup,
        })
    }

    async fn require_directory(&self, path: &Path, display: &str, missing: &str) -> ToolResult<()> {
        match access::metadata_of(path).await? {
            None => Err(ToolError::NotFound(format!("{missing}: {display}"))),
            Some(metadata) if !metadata.is_dir() => Err(ToolError::InvalidInput(format!(
                "Path is not a directory: {display}"
            ))),
            Some(_) => Ok(()),
        }
    }
}

async fn rename(source: &Path, dest: &Path, params: &MoveDirectoryParams) -> ToolResult<()> {
    fs::rename(source, dest).await.io_context(|| {
        format!(
            "Failed to move {} to {}",
            params.source_path, params.dest_path
        )
    })
}

fn sort_entries(entries: &mut [EntryInfo], sort_by: SortBy, order: SortOrder) {
    entries.sort_by(|a, b| {
        let a_dir = a.kind == EntryKind::Directory;
        let b_dir = b.kind == EntryKind::Directory;
        if a_dir != b_dir {
            return b_dir.cmp(&a_dir);
        }
        let ordering = match sort_by {
            SortBy::Name => a
                .name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name)),
            SortBy::Size => a.size.cmp(&b.size),
            SortBy::Modified => a.modified.cmp(&b.modified),
        };
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
        .then_with(|| a.path.cmp(&b.path))
    });
}

fn parse_mode(mode: &str) -> ToolResult<u32> {
    let digits = mode.trim_start_matches("0o");
    match u32::from_str_radix(digits, 8) {
        Ok(bits) if bits <= 0o7777 => Ok(bits),
        _ => Err(ToolError::InvalidInput(format!(
            "Invalid mode {mode}: expected octal permission bits such as 755"
        ))),
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> ToolResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .io_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> ToolResult<()> {
    Ok(())
}
