use std::fs::FileTimes;
use std::path::Path;

use base64::Engine;
use serde::Serialize;
use tokio::fs;

use crate::error::{IoContext, ToolError, ToolResult};
use crate::file::access::{self, EntryInfo};
use crate::file::BackupManager;
use crate::security::PathValidator;
use crate::tools::types::{
    BackupNote, CopyFileParams, DeleteFileParams, Encoding, PathParams, ReadFileParams,
    RenameFileParams, WriteFileParams,
};

#[derive(Debug, Clone, Serialize)]
pub struct RenameFileResult {
    pub old_path: String,
    pub new_path: String,
    #[serde(flatten)]
    pub backup: BackupNote,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyFileResult {
    pub source_path: String,
    pub dest_path: String,
    pub size: u64,
    #[serde(flatten)]
    pub backup: BackupNote,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteFileResult {
    pub path: String,
    pub size: u64,
    #[serde(flatten)]
    pub backup: BackupNote,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileExistsResult {
    pub path: String,
    pub exists: bool,
    pub is_file: bool,
    pub is_directory: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileInfoResult {
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<EntryInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadFileResult {
    pub path: String,
    pub content: String,
    pub encoding: Encoding,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteFileResult {
    pub path: String,
    pub size: u64,
    /// False when an existing file was overwritten.
    pub created: bool,
    #[serde(flatten)]
    pub backup: BackupNote,
}

pub(crate) fn require(value: &str, name: &str) -> ToolResult<()> {
    if value.trim().is_empty() {
        return Err(ToolError::InvalidInput(format!(
            "{name} parameter is required"
        )));
    }
    Ok(())
}

/// Single file operations. Every path goes through the validator and every
/// mutation of an existing file can be preceded by a backup.
#[derive(Debug, Clone)]
pub struct FileOperations {
    validator: PathValidator,
    backups: BackupManager,
    max_file_size: u64,
}

impl FileOperations {
    pub fn new(validator: PathValidator, backups: BackupManager, max_file_size: u64) -> Self {
        Self {
            validator,
            backups,
            max_file_size,
        }
    }

    pub async fn rename_file(&self, params: &RenameFileParams) -> ToolResult<RenameFileResult> {
        require(&params.old_path, "old_path")?;
        require(&params.new_path, "new_path")?;
        if params.old_path == params.new_path {
            return Err(ToolError::InvalidInput(
                "Source and destination paths are identical".to_string(),
            ));
        }
        let source = self.validator.resolve_target(&params.old_path)?;
        let dest = self.validator.resolve_target(&params.new_path)?;
        if source == dest {
            return Err(ToolError::InvalidInput(
                "Source and destination paths are identical".to_string(),
            ));
        }

        self.require_file(&source, &params.old_path, "Source file not found")
            .await?;
        let backup = self
            .prepare_destination(&dest, &params.new_path, params.overwrite, params.create_backup)
            .await?;

        access::ensure_parent(&dest).await?;
        fs::rename(&source, &dest)
            .await
            .io_context(|| format!("Failed to rename {} to {}", params.old_path, params.new_path))?;

        Ok(RenameFileResult {
            old_path: params.old_path.clone(),
            new_path: params.new_path.clone(),
            backup,
        })
    }

    pub async fn copy_file(&self, params: &CopyFileParams) -> ToolResult<CopyFileResult> {
        require(&params.source_path, "source_path")?;
        require(&params.dest_path, "dest_path")?;
        if params.source_path == params.dest_path {
            return Err(ToolError::InvalidInput(
                "Source and destination paths are identical".to_string(),
            ));
        }
        let source = self.validator.resolve(&params.source_path)?;
        let dest = self.validator.resolve_target(&params.dest_path)?;
        if source == dest {
            return Err(ToolError::InvalidInput(
                "Source and destination paths are identical".to_string(),
            ));
        }

        self.require_file(&source, &params.source_path, "Source file not found")
            .await?;
        let backup = self
            .prepare_destination(&dest, &params.dest_path, params.overwrite, params.create_backup)
            .await?;

        access::ensure_parent(&dest).await?;
        let size = fs::copy(&source, &dest)
            .await
            .io_context(|| format!("Failed to copy {} to {}", params.source_path, params.dest_path))?;
        if params.preserve_timestamps {
            copy_times(&source, &dest).await?;
        }

        Ok(CopyFileResult {
            source_path: params.source_path.clone(),
            dest_path: params.dest_path.clone(),
            size,
            backup,
        })
    }

    pub async fn delete_file(&self, params: &DeleteFileParams) -> ToolResult<DeleteFileResult> {
        require(&params.path, "path")?;
        if !params.confirm {
            return Err(ToolError::ConfirmationRequired(
                "confirm parameter must be explicitly set to true to delete a file".to_string(),
            ));
        }
        let target = self.validator.resolve_target(&params.path)?;
        let metadata = self
            .require_file(&target, &params.path, "File not found")
            .await?;

        let backup = if params.create_backup {
            self.backups.create_backup(&target).await.into()
        } else {
            BackupNote::default()
        };

        fs::remove_file(&target)
            .await
            .io_context(|| format!("Failed to delete {}", params.path))?;

        Ok(DeleteFileResult {
            path: params.path.clone(),
            size: metadata.len(),
            backup,
        })
    }

    pub async fn file_exists(&self, params: &PathParams) -> ToolResult<FileExistsResult> {
        let target = self.validator.resolve(&params.path)?;
        let metadata = fs::metadata(&target).await.ok();
        Ok(FileExistsResult {
            path: params.path.clone(),
            exists: metadata.is_some(),
            is_file: metadata.as_ref().is_some_and(|m| m.is_file()),
            is_directory: metadata.as_ref().is_some_and(|m| m.is_dir()),
        })
    }

    pub async fn get_file_info(&self, params: &PathParams) -> ToolResult<FileInfoResult> {
        let target = self.validator.resolve(&params.path)?;
        let info = access::metadata_of(&target)
            .await?
            .map(|metadata| EntryInfo::from_metadata(&target, self.validator.relative(&target), &metadata));
        Ok(FileInfoResult {
            path: params.path.clone(),
            exists: info.is_some(),
            info,
        })
    }

    pub async fn read_file(&self, params: &ReadFileParams) -> ToolResult<ReadFileResult> {
        require(&params.path, "path")?;
        let target = self.validator.resolve(&params.path)?;
        let metadata = self
            .require_file(&target, &params.path, "File not found")
            .await?;
        if metadata.len() > self.max_file_size {
            return Err(ToolError::InvalidInput(format!(
                "File too large: {} is {} bytes, the limit is {}",
                params.path,
                metadata.len(),
                self.max_file_size
            )));
        }

        let bytes = fs::read(&target)
            .await
            .io_context(|| format!("Failed to read {}", params.path))?;
        let content = match params.encoding {
            Encoding::Utf8 => String::from_utf8(bytes).map_err(|_| {
                ToolError::InvalidInput(format!(
                    "{} is not valid UTF-8. Use encoding: base64",
                    params.path
                ))
            })?,
            Encoding::Base64 => base64::engine::general_purpose::STANDARD.encode(bytes),
        };

        Ok(ReadFileResult {
            path: params.path.clone(),
            content,
            encoding: params.encoding,
            size: metadata.len(),
        })
    }

    pub async fn write_file(&self, params: &WriteFileParams) -> ToolResult<WriteFileResult> {
        require(&params.path, "path")?;
        let target = self.validator.resolve_target(&params.path)?;
        let bytes = match params.encoding {
            Encoding::Utf8 => params.content.as_bytes().to_vec(),
            Encoding::Base64 => base64::engine::general_purpose::STANDARD
                .decode(&params.content)
                .map_err(|e| ToolError::InvalidInput(format!("Invalid base64 content: {e}")))?,
        };
        if bytes.len() as u64 > self.max_file_size {
            return Err(ToolError::InvalidInput(format!(
                "Content too large: {} bytes, the limit is {}",
                bytes.len(),
                self.max_file_size
            )));
        }

        let existed = access::metadata_of(&target).await?.is_some();
        let backup = self
            .prepare_destination(&target, &params.path, params.overwrite, params.create_backup)
            .await?;

        access::ensure_parent(&target).await?;
        fs::write(&target, &bytes)
            .await
            .io_context(|| format!("Failed to write {}", params.path))?;

        Ok(WriteFileResult {
            path: params.path.clone(),
            size: bytes.len() as u64,
            created: !existed,
            backup,
        })
    }

    async fn require_file(
        &self,
        path: &Path,
        display: &str,
        missing: &str,
    ) -> ToolResult<std::fs::Metadata> {
        match access::metadata_of(path).await? {
            None => Err(ToolError::NotFound(format!("{missing}: {display}"))),
            Some(metadata) if metadata.is_dir() => Err(ToolError::InvalidInput(format!(
                "{display} is a directory"
            ))),
            Some(metadata) => Ok(metadata),
        }
    }

    /// Checks an existing destination against `overwrite` and backs it up
    /// when it is about to be replaced.
    async fn prepare_destination(
        &self,
        dest: &Path,
        display: &str,
        overwrite: bool,
        create_backup: bool,
    ) -> ToolResult<BackupNote> {
        let Some(existing) = access::metadata_of(dest).await? else {
            return Ok(BackupNote::default());
        };
        if !overwrite {
            return Err(ToolError::Conflict(format!(
                "Destination file already exists: {display}. Use overwrite: true to replace it"
            )));
        }
        if existing.is_dir() {
            return Err(ToolError::Conflict(format!(
                "Destination is a directory: {display}"
            )));
        }
        if !create_backup {
            return Ok(BackupNote::default());
        }
        Ok(self.backups.create_backup(dest).await.into())
    }
}

async fn copy_times(source: &Path, dest: &Path) -> ToolResult<()> {
    let metadata = fs::metadata(source)
        .await
        .io_context(|| format!("Failed to read metadata for {}", source.display()))?;
    let mut times = FileTimes::new();
    if let Ok(modified) = metadata.modified() {
        times = times.set_modified(modified);
    }
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }

    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .write(true)
            .open(&dest)
            .and_then(|file| file.set_times(times))
            .io_context(|| format!("Failed to set timestamps on {}", dest.display()))
    })
    .await?
}
