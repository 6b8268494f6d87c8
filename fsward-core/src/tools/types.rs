use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ToolResult};
use crate::file::BackupOutcome;
use crate::search::{ContentSearchQuery, DuplicateQuery, FileSearchQuery};

fn default_true() -> bool {
    true
}

fn default_max_depth() -> usize {
    10
}

/// Every operation the toolbox exposes. The snake_case name doubles as the
/// rate limit key and the `tool` tag of a call.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::VariantArray,
)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    RenameFile,
    CopyFile,
    DeleteFile,
    FileExists,
    GetFileInfo,
    ReadFile,
    WriteFile,
    ListDirectory,
    CreateDirectory,
    DeleteDirectory,
    MoveDirectory,
    SearchFiles,
    SearchContent,
    FindDuplicates,
    ListBackups,
    RestoreBackup,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RenameFile => "rename_file",
            Self::CopyFile => "copy_file",
            Self::DeleteFile => "delete_file",
            Self::FileExists => "file_exists",
            Self::GetFileInfo => "get_file_info",
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::ListDirectory => "list_directory",
            Self::CreateDirectory => "create_directory",
            Self::DeleteDirectory => "delete_directory",
            Self::MoveDirectory => "move_directory",
            Self::SearchFiles => "search_files",
            Self::SearchContent => "search_content",
            Self::FindDuplicates => "find_duplicates",
            Self::ListBackups => "list_backups",
            Self::RestoreBackup => "restore_backup",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::RenameFile => "Rename or move a file inside the workspace",
            Self::CopyFile => "Copy a file to a new location inside the workspace",
            Self::DeleteFile => "Delete a file. Requires confirm: true; a backup is kept by default",
            Self::FileExists => "Check whether a path exists and whether it is a file or directory",
            Self::GetFileInfo => "Size, timestamps, extension and permissions of a path",
            Self::ReadFile => "Read a file as UTF-8 text or base64",
            Self::WriteFile => "Create a file or overwrite an existing one",
            Self::ListDirectory => {
                "List directory entries, directories first, optionally recursive and filtered"
            }
            Self::CreateDirectory => "Create a directory and, by default, its missing parents",
            Self::DeleteDirectory => {
                "Delete a directory. Non-empty directories need recursive and force"
            }
            Self::MoveDirectory => "Move a directory, optionally merging into an existing one",
            Self::SearchFiles => "Find files by name, glob or regular expression, ranked by relevance",
            Self::SearchContent => "Search file contents and return matching lines with context",
            Self::FindDuplicates => "Group files with identical content, name, or size and name",
            Self::ListBackups => "List the backups kept for a file name, newest first",
            Self::RestoreBackup => "Restore a backup to a path inside the workspace",
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenameFileParams {
    /// Identifier of the calling agent.
    #[serde(default)]
    pub agent: String,
    pub old_path: String,
    pub new_path: String,
    #[serde(default)]
    pub overwrite: bool,
    /// Back up an existing destination before replacing it.
    #[serde(default = "default_true")]
    pub create_backup: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CopyFileParams {
    #[serde(default)]
    pub agent: String,
    pub source_path: String,
    pub dest_path: String,
    #[serde(default)]
    pub overwrite: bool,
    /// Carry the source modification time over to the copy.
    #[serde(default = "default_true")]
    pub preserve_timestamps: bool,
    #[serde(default = "default_true")]
    pub create_backup: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DeleteFileParams {
    #[serde(default)]
    pub agent: String,
    pub path: String,
    /// Must be true for the file to be deleted.
    #[serde(default)]
    pub confirm: bool,
    #[serde(default = "default_true")]
    pub create_backup: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PathParams {
    #[serde(default)]
    pub agent: String,
    pub path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Utf8,
    Base64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReadFileParams {
    #[serde(default)]
    pub agent: String,
    pub path: String,
    #[serde(default)]
    pub encoding: Encoding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WriteFileParams {
    #[serde(default)]
    pub agent: String,
    pub path: String,
    pub content: String,
    /// How `content` is encoded.
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default = "default_true")]
    pub create_backup: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Name,
    Size,
    Modified,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ListDirectoryParams {
    #[serde(default)]
    pub agent: String,
    /// Directory to list; the workspace root when empty.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Glob matched against entry names, e.g. `*.rs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CreateDirectoryParams {
    #[serde(default)]
    pub agent: String,
    pub path: String,
    /// Create missing parent directories too.
    #[serde(default = "default_true")]
    pub recursive: bool,
    /// Octal permission bits such as `755`. Ignored off unix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DeleteDirectoryParams {
    #[serde(default)]
    pub agent: String,
    pub path: String,
    #[serde(default)]
    pub confirm: bool,
    #[serde(default)]
    pub recursive: bool,
    /// Required together with `recursive` to delete a non-empty directory.
    #[serde(default)]
    pub force: bool,
    #[serde(default = "default_true")]
    pub create_backup: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MoveDirectoryParams {
    #[serde(default)]
    pub agent: String,
    pub source_path: String,
    pub dest_path: String,
    #[serde(default)]
    pub overwrite: bool,
    /// Copy the source tree over an existing destination instead of replacing it.
    #[serde(default)]
    pub merge: bool,
    #[serde(default = "default_true")]
    pub create_backup: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchFilesParams {
    #[serde(default)]
    pub agent: String,
    #[serde(flatten)]
    pub query: FileSearchQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchContentParams {
    #[serde(default)]
    pub agent: String,
    #[serde(flatten)]
    pub query: ContentSearchQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FindDuplicatesParams {
    #[serde(default)]
    pub agent: String,
    #[serde(flatten)]
    pub query: DuplicateQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ListBackupsParams {
    #[serde(default)]
    pub agent: String,
    /// Name of the original file, e.g. `notes.txt`. Directories are ignored.
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RestoreBackupParams {
    #[serde(default)]
    pub agent: String,
    /// Backup name as reported by `list_backups`.
    pub backup_name: String,
    pub target_path: String,
    /// Back up whatever currently sits at the target first.
    #[serde(default = "default_true")]
    pub create_backup: bool,
}

/// Response envelope shared by every operation. The payload is flattened
/// beside the status fields.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome<T> {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(flatten)]
    pub data: Option<T>,
}

impl<T> Outcome<T> {
    pub fn from_result(result: ToolResult<T>) -> Self {
        let timestamp = Utc::now();
        match result {
            Ok(data) => Self {
                success: true,
                timestamp,
                error: None,
                error_kind: None,
                data: Some(data),
            },
            Err(e) => Self {
                success: false,
                timestamp,
                error: Some(e.to_string()),
                error_kind: Some(e.kind()),
                data: None,
            },
        }
    }
}

/// Where the safety copy of a destructive operation went, or why there is
/// none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupNote {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_warning: Option<String>,
}

impl From<BackupOutcome> for BackupNote {
    fn from(outcome: BackupOutcome) -> Self {
        if outcome.success {
            Self {
                backup_path: outcome.backup_path.map(|p| p.display().to_string()),
                backup_warning: None,
            }
        } else {
            Self {
                backup_path: None,
                backup_warning: Some(
                    outcome
                        .reason
                        .unwrap_or_else(|| "Backup was not created".to_string()),
                ),
            }
        }
    }
}
