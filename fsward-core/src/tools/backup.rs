use serde::Serialize;

use crate::error::{ToolError, ToolResult};
use crate::file::access::{self, format_size};
use crate::file::{BackupManager, BackupRecord};
use crate::security::PathValidator;
use crate::tools::file::require;
use crate::tools::types::{BackupNote, ListBackupsParams, RestoreBackupParams};

#[derive(Debug, Clone, Serialize)]
pub struct ListBackupsResult {
    pub file_name: String,
    pub backups: Vec<BackupRecord>,
    pub total_size: u64,
    pub total_size_formatted: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreBackupResult {
    pub backup_name: String,
    pub target_path: String,
    pub size: u64,
    pub is_directory: bool,
    /// Safety copy of whatever the restore replaced.
    #[serde(flatten)]
    pub backup: BackupNote,
}

#[derive(Debug, Clone)]
pub struct BackupOperations {
    validator: PathValidator,
    backups: BackupManager,
}

impl BackupOperations {
    pub fn new(validator: PathValidator, backups: BackupManager) -> Self {
        Self { validator, backups }
    }

    pub async fn list_backups(&self, params: &ListBackupsParams) -> ToolResult<ListBackupsResult> {
        require(&params.file_name, "file_name")?;
        let backups = self.backups.list_backups(&params.file_name).await?;
        let total_size = backups.iter().map(|b| b.size).sum();
        Ok(ListBackupsResult {
            file_name: params.file_name.clone(),
            backups,
            total_size,
            total_size_formatted: format_size(total_size),
        })
    }

    pub async fn restore_backup(
        &self,
        params: &RestoreBackupParams,
    ) -> ToolResult<RestoreBackupResult> {
        require(&params.backup_name, "backup_name")?;
        require(&params.target_path, "target_path")?;
        let record = self.backups.find_backup(&params.backup_name).await?;
        let target = self.validator.resolve_subtree_target(&params.target_path)?;

        let mut backup = BackupNote::default();
        if let Some(existing) = access::metadata_of(&target).await? {
            if existing.is_dir() != record.is_directory {
                return Err(ToolError::Conflict(format!(
                    "Cannot restore {} over {}: one is a directory and the other is not",
                    params.backup_name, params.target_path
                )));
            }
            if params.create_backup {
                backup = self.backups.create_backup(&target).await.into();
            }
        }

        let size = self
            .backups
            .restore_backup(&record.backup_path, &target)
            .await?;

        Ok(RestoreBackupResult {
            backup_name: record.name,
            target_path: params.target_path.clone(),
            size,
            is_directory: record.is_directory,
            backup,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::WorkspaceBoundary;
    use crate::settings::FileSettings;
    use std::fs as std_fs;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_restore_by_name_and_list() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let workspace = temp.path().join("workspace");
        std_fs::create_dir(&workspace)?;
        let validator = PathValidator::new(Arc::new(WorkspaceBoundary::new(&workspace, &[])?));
        let workspace = validator.boundary().root().to_path_buf();
        let manager = BackupManager::new(&FileSettings {
            backup_dir: Some(temp.path().join("backups")),
            ..Default::default()
        });
        let ops = BackupOperations::new(validator, manager.clone());

        std_fs::write(workspace.join("notes.txt"), "first")?;
        let created = manager.create_backup(&workspace.join("notes.txt")).await;
        let name = created
            .backup_path
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .expect("backup written");
        std_fs::write(workspace.join("notes.txt"), "second")?;

        let listed = ops
            .list_backups(&ListBackupsParams {
                agent: "test".into(),
                file_name: "notes.txt".into(),
            })
            .await?;
        assert_eq!(listed.backups.len(), 1);
        assert_eq!(listed.total_size, 5);

        let restored = ops
            .restore_backup(&RestoreBackupParams {
                agent: "test".into(),
                backup_name: name,
                target_path: "notes.txt".into(),
                create_backup: true,
            })
            .await?;
        assert_eq!(restored.size, 5);
        assert!(restored.backup.backup_path.is_some());
        assert_eq!(std_fs::read_to_string(workspace.join("notes.txt"))?, "first");
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_names_cannot_be_paths() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let validator = PathValidator::new(Arc::new(WorkspaceBoundary::new(temp.path(), &[])?));
        let manager = BackupManager::new(&FileSettings {
            backup_dir: Some(temp.path().join("backups")),
            ..Default::default()
        });
        let ops = BackupOperations::new(validator, manager);

        let err = ops
            .restore_backup(&RestoreBackupParams {
                agent: "test".into(),
                backup_name: "../notes.txt.1700000000000.backup".into(),
                target_path: "notes.txt".into(),
                create_backup: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
        Ok(())
    }
}
