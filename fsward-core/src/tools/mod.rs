pub mod backup;
pub mod directory;
pub mod file;
pub mod registry;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

use anyhow::bail;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit;
use crate::error::{ToolError, ToolResult};
use crate::file::BackupManager;
use crate::search::SearchEngine;
use crate::security::{PathValidator, RateLimiter, WorkspaceBoundary};
use crate::settings::Settings;

pub use backup::BackupOperations;
pub use directory::DirectoryOperations;
pub use file::FileOperations;
pub use registry::{ToolDefinition, ToolRegistry};
pub use types::*;

/// One typed request, tagged by tool name:
/// `{"tool": "read_file", "arguments": {"agent": "a", "path": "x"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum ToolCall {
    RenameFile(RenameFileParams),
    CopyFile(CopyFileParams),
    DeleteFile(DeleteFileParams),
    FileExists(PathParams),
    GetFileInfo(PathParams),
    ReadFile(ReadFileParams),
    WriteFile(WriteFileParams),
    ListDirectory(ListDirectoryParams),
    CreateDirectory(CreateDirectoryParams),
    DeleteDirectory(DeleteDirectoryParams),
    MoveDirectory(MoveDirectoryParams),
    SearchFiles(SearchFilesParams),
    SearchContent(SearchContentParams),
    FindDuplicates(FindDuplicatesParams),
    ListBackups(ListBackupsParams),
    RestoreBackup(RestoreBackupParams),
}

impl ToolCall {
    pub fn name(&self) -> ToolName {
        match self {
            Self::RenameFile(_) => ToolName::RenameFile,
            Self::CopyFile(_) => ToolName::CopyFile,
            Self::DeleteFile(_) => ToolName::DeleteFile,
            Self::FileExists(_) => ToolName::FileExists,
            Self::GetFileInfo(_) => ToolName::GetFileInfo,
            Self::ReadFile(_) => ToolName::ReadFile,
            Self::WriteFile(_) => ToolName::WriteFile,
            Self::ListDirectory(_) => ToolName::ListDirectory,
            Self::CreateDirectory(_) => ToolName::CreateDirectory,
            Self::DeleteDirectory(_) => ToolName::DeleteDirectory,
            Self::MoveDirectory(_) => ToolName::MoveDirectory,
            Self::SearchFiles(_) => ToolName::SearchFiles,
            Self::SearchContent(_) => ToolName::SearchContent,
            Self::FindDuplicates(_) => ToolName::FindDuplicates,
            Self::ListBackups(_) => ToolName::ListBackups,
            Self::RestoreBackup(_) => ToolName::RestoreBackup,
        }
    }

    pub fn agent(&self) -> &str {
        match self {
            Self::RenameFile(p) => &p.agent,
            Self::CopyFile(p) => &p.agent,
            Self::DeleteFile(p) => &p.agent,
            Self::FileExists(p) | Self::GetFileInfo(p) => &p.agent,
            Self::ReadFile(p) => &p.agent,
            Self::WriteFile(p) => &p.agent,
            Self::ListDirectory(p) => &p.agent,
            Self::CreateDirectory(p) => &p.agent,
            Self::DeleteDirectory(p) => &p.agent,
            Self::MoveDirectory(p) => &p.agent,
            Self::SearchFiles(p) => &p.agent,
            Self::SearchContent(p) => &p.agent,
            Self::FindDuplicates(p) => &p.agent,
            Self::ListBackups(p) => &p.agent,
            Self::RestoreBackup(p) => &p.agent,
        }
    }

    /// The argument object of the call, as it would appear on the wire.
    pub fn arguments(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut value| value.get_mut("arguments").map(Value::take))
            .unwrap_or(Value::Null)
    }
}

/// What a maintenance pass cleaned up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub rate_windows_removed: usize,
    pub cache_entries_removed: usize,
    pub backups_removed: usize,
}

/// Every operation wired to one workspace, sharing a rate limiter, a backup
/// root and the search caches.
#[derive(Debug)]
pub struct Toolbox {
    validator: PathValidator,
    rate_limiter: RateLimiter,
    backups: BackupManager,
    files: FileOperations,
    directories: DirectoryOperations,
    backup_ops: BackupOperations,
    search: SearchEngine,
    registry: ToolRegistry,
}

impl Toolbox {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let problems = settings.validate();
        if !problems.is_empty() {
            bail!("Invalid settings: {}", problems.join("; "));
        }

        let boundary = WorkspaceBoundary::new(
            &settings.workspace.dir,
            &settings.workspace.protected_paths,
        )?;
        let validator = PathValidator::new(Arc::new(boundary));
        let backups = BackupManager::new(&settings.files);

        info!(
            workspace = %validator.boundary().root().display(),
            backup_dir = %backups.root().display(),
            backups_enabled = backups.enabled(),
            rate_limits_enabled = settings.rate_limits.enabled,
            "Toolbox initialized"
        );

        Ok(Self {
            rate_limiter: RateLimiter::new(&settings.rate_limits),
            files: FileOperations::new(
                validator.clone(),
                backups.clone(),
                settings.files.max_file_size,
            ),
            directories: DirectoryOperations::new(validator.clone(), backups.clone()),
            backup_ops: BackupOperations::new(validator.clone(), backups.clone()),
            search: SearchEngine::new(validator.clone(), &settings.search),
            registry: ToolRegistry::new(),
            validator,
            backups,
        })
    }

    /// Runs one call and returns its outcome envelope. Never fails: every
    /// error becomes `success: false` with a message and an error kind.
    pub async fn call(&self, call: ToolCall, cancel: &CancellationToken) -> Value {
        let started = Instant::now();
        let operation = call.name();
        let agent = call.agent().to_string();
        let arguments = call.arguments();

        let result = self.execute(call, cancel).await;
        self.finish(&agent, operation.as_str(), &arguments, started, result)
    }

    /// Like [`call`](Self::call) for a tool name and untyped arguments.
    pub async fn call_raw(&self, tool: &str, arguments: Value, cancel: &CancellationToken) -> Value {
        match self.registry.parse_call(tool, arguments.clone()) {
            Ok(call) => self.call(call, cancel).await,
            Err(e) => {
                let agent = arguments
                    .get("agent")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.finish(&agent, tool, &arguments, Instant::now(), Err(e))
            }
        }
    }

    async fn execute(&self, call: ToolCall, cancel: &CancellationToken) -> ToolResult<Value> {
        if call.agent().trim().is_empty() {
            return Err(ToolError::InvalidInput(
                "Agent parameter is required".to_string(),
            ));
        }
        self.rate_limiter
            .enforce(call.name().as_str(), call.agent())?;

        match call {
            ToolCall::RenameFile(p) => payload(self.files.rename_file(&p).await),
            ToolCall::CopyFile(p) => payload(self.files.copy_file(&p).await),
            ToolCall::DeleteFile(p) => payload(self.files.delete_file(&p).await),
            ToolCall::FileExists(p) => payload(self.files.file_exists(&p).await),
            ToolCall::GetFileInfo(p) => payload(self.files.get_file_info(&p).await),
            ToolCall::ReadFile(p) => payload(self.files.read_file(&p).await),
            ToolCall::WriteFile(p) => payload(self.files.write_file(&p).await),
            ToolCall::ListDirectory(p) => {
                payload(self.directories.list_directory(&p, cancel).await)
            }
            ToolCall::CreateDirectory(p) => payload(self.directories.create_directory(&p).await),
            ToolCall::DeleteDirectory(p) => payload(self.directories.delete_directory(&p).await),
            ToolCall::MoveDirectory(p) => payload(self.directories.move_directory(&p).await),
            ToolCall::SearchFiles(p) => payload(self.search.search_files(&p.query, cancel).await),
            ToolCall::SearchContent(p) => {
                payload(self.search.search_content(&p.query, cancel).await)
            }
            ToolCall::FindDuplicates(p) => {
                payload(self.search.find_duplicates(&p.query, cancel).await)
            }
            ToolCall::ListBackups(p) => payload(self.backup_ops.list_backups(&p).await),
            ToolCall::RestoreBackup(p) => payload(self.backup_ops.restore_backup(&p).await),
        }
    }

    fn finish(
        &self,
        agent: &str,
        operation: &str,
        arguments: &Value,
        started: Instant,
        result: ToolResult<Value>,
    ) -> Value {
        let failure = result.as_ref().err().map(|e| e.to_string());
        audit::record_outcome(
            agent,
            operation,
            arguments,
            result.is_ok(),
            started.elapsed(),
            failure.as_deref(),
        );

        serde_json::to_value(Outcome::from_result(result)).unwrap_or_else(|e| {
            json!({
                "success": false,
                "timestamp": Utc::now(),
                "error": format!("Failed to serialize outcome: {e}"),
                "error_kind": "io",
            })
        })
    }

    /// Periodic housekeeping: drops idle rate windows, expired cache entries
    /// and backups past retention.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let backups_removed = match self.backups.clean_all_old_backups().await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(?e, "Backup retention sweep failed");
                0
            }
        };
        MaintenanceReport {
            rate_windows_removed: self.rate_limiter.cleanup(),
            cache_entries_removed: self.search.cleanup_cache(),
            backups_removed,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn validator(&self) -> &PathValidator {
        &self.validator
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn search(&self) -> &SearchEngine {
        &self.search
    }
}

fn payload<T: Serialize>(result: ToolResult<T>) -> ToolResult<Value> {
    let value = result?;
    serde_json::to_value(value)
        .map_err(|e| ToolError::io("Failed to serialize result", std::io::Error::from(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_round_trips_through_tagged_json() {
        let value = json!({
            "tool": "search_files",
            "arguments": {"agent": "a", "pattern": "main", "recursive": false}
        });
        let call: ToolCall = serde_json::from_value(value).unwrap();
        assert_eq!(call.name(), ToolName::SearchFiles);
        assert_eq!(call.agent(), "a");
        let arguments = call.arguments();
        assert_eq!(arguments["pattern"], json!("main"));
        assert_eq!(arguments["recursive"], json!(false));
    }

    #[test]
    fn test_unknown_tool_tag_is_rejected() {
        let value = json!({"tool": "format_disk", "arguments": {}});
        assert!(serde_json::from_value::<ToolCall>(value).is_err());
    }
}
