use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use tokio::fs;

use crate::error::{IoContext, ToolError, ToolResult};
use crate::file::access::{self, format_size};
use crate::settings::FileSettings;

const BACKUP_SUFFIX: &str = ".backup";

/// One point-in-time copy of a file or directory tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupRecord {
    /// File name inside the backup root, e.g. `notes.txt.1718000000000.backup`.
    pub name: String,
    pub original_name: String,
    pub backup_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size: u64,
    pub size_formatted: String,
    pub is_directory: bool,
}

/// Result of a backup attempt. A disabled or failed backup is reported here
/// rather than as an error so callers can proceed without it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BackupOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            backup_path: None,
            timestamp: None,
            reason: Some(reason.into()),
        }
    }
}

/// Writes timestamped copies into a dedicated backup root and sweeps them once
/// they outlive the retention period.
///
/// Backups are named `<original name>.<unix millis>.backup`. The timestamp in
/// the name is the only clock used for retention, so copying or touching a
/// backup never changes when it expires.
#[derive(Debug, Clone)]
pub struct BackupManager {
    enabled: bool,
    root: PathBuf,
    retention: Duration,
}

impl BackupManager {
    pub fn new(settings: &FileSettings) -> Self {
        Self {
            enabled: settings.backup_enabled,
            root: settings.resolved_backup_dir(),
            retention: Duration::days(settings.backup_retention_days as i64),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn create_backup(&self, path: &Path) -> BackupOutcome {
        self.create_backup_at(path, Utc::now()).await
    }

    pub async fn create_backup_at(&self, path: &Path, now: DateTime<Utc>) -> BackupOutcome {
        if !self.enabled {
            return BackupOutcome::skipped("Backups are disabled");
        }
        match self.write_backup(path, now).await {
            Ok((backup_path, timestamp)) => {
                tracing::debug!(
                    source = %path.display(),
                    backup = %backup_path.display(),
                    "Created backup"
                );
                BackupOutcome {
                    success: true,
                    backup_path: Some(backup_path),
                    timestamp: Some(timestamp),
                    reason: None,
                }
            }
            Err(e) => {
                tracing::warn!(source = %path.display(), ?e, "Backup failed");
                BackupOutcome::skipped(e.to_string())
            }
        }
    }

    async fn write_backup(
        &self,
        path: &Path,
        now: DateTime<Utc>,
    ) -> ToolResult<(PathBuf, DateTime<Utc>)> {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Err(ToolError::InvalidInput(format!(
                "Cannot back up {}",
                path.display()
            )));
        };
        let metadata = fs::metadata(path)
            .await
            .io_context(|| format!("Failed to read {}", path.display()))?;

        fs::create_dir_all(&self.root)
            .await
            .io_context(|| format!("Failed to create backup directory {}", self.root.display()))?;

        // Two backups of one file within the same millisecond get distinct names.
        let mut millis = now.timestamp_millis();
        let mut backup_path = self.root.join(backup_name(&name, millis));
        while access::metadata_of(&backup_path).await?.is_some() {
            millis += 1;
            backup_path = self.root.join(backup_name(&name, millis));
        }

        if metadata.is_dir() {
            access::copy_dir_recursive(path, &backup_path).await?;
        } else {
            fs::copy(path, &backup_path)
                .await
                .io_context(|| format!("Failed to copy {}", path.display()))?;
        }

        Ok((backup_path, timestamp_from_millis(millis)))
    }

    /// Copies a backup back to `target`, replacing a file already there or
    /// merging a directory backup over an existing directory.
    pub async fn restore_backup(&self, backup_path: &Path, target: &Path) -> ToolResult<u64> {
        if !backup_path.starts_with(&self.root) {
            return Err(ToolError::PathRejected(format!(
                "{} is not inside the backup directory",
                backup_path.display()
            )));
        }
        let Some(metadata) = access::metadata_of(backup_path).await? else {
            return Err(ToolError::NotFound(format!(
                "Backup not found: {}",
                backup_path.display()
            )));
        };

        access::ensure_parent(target).await?;
        let restored = if metadata.is_dir() {
            access::copy_dir_recursive(backup_path, target).await?
        } else {
            fs::copy(backup_path, target)
                .await
                .io_context(|| format!("Failed to restore to {}", target.display()))?
        };

        tracing::info!(
            backup = %backup_path.display(),
            target = %target.display(),
            "Restored backup"
        );
        Ok(restored)
    }

    /// Looks up a backup by its name inside the backup root. Names that could
    /// address anything else are rejected.
    pub async fn find_backup(&self, backup_name: &str) -> ToolResult<BackupRecord> {
        let is_plain_name = !backup_name.is_empty()
            && !backup_name.contains(['/', '\\', '\0'])
            && backup_name != "."
            && backup_name != "..";
        if !is_plain_name || parse_backup_name(backup_name).is_none() {
            return Err(ToolError::InvalidInput(format!(
                "Not a backup name: {backup_name}"
            )));
        }

        let path = self.root.join(backup_name);
        if access::metadata_of(&path).await?.is_none() {
            return Err(ToolError::NotFound(format!("Backup not found: {backup_name}")));
        }
        self.record(&path)
            .await
            .ok_or_else(|| ToolError::NotFound(format!("Backup not found: {backup_name}")))
    }

    /// Backups of files called `file_name`, newest first.
    pub async fn list_backups(&self, file_name: &str) -> ToolResult<Vec<BackupRecord>> {
        let wanted = Path::new(file_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut records: Vec<BackupRecord> = self
            .all_backups()
            .await?
            .into_iter()
            .filter(|record| record.original_name == wanted)
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.name.cmp(&a.name)));
        Ok(records)
    }

    pub async fn delete_backup(&self, backup_path: &Path) -> ToolResult<()> {
        if !backup_path.starts_with(&self.root) || backup_path == self.root {
            return Err(ToolError::PathRejected(format!(
                "{} is not inside the backup directory",
                backup_path.display()
            )));
        }
        access::remove_any(backup_path).await
    }

    /// Removes the expired backups of one file. Returns how many were removed.
    pub async fn clean_old_backups(&self, file_name: &str) -> ToolResult<usize> {
        self.clean_old_backups_at(file_name, Utc::now()).await
    }

    pub async fn clean_old_backups_at(
        &self,
        file_name: &str,
        now: DateTime<Utc>,
    ) -> ToolResult<usize> {
        let records = self.list_backups(file_name).await?;
        self.remove_expired(records, now).await
    }

    /// Removes every expired backup under the root.
    pub async fn clean_all_old_backups(&self) -> ToolResult<usize> {
        self.clean_all_old_backups_at(Utc::now()).await
    }

    pub async fn clean_all_old_backups_at(&self, now: DateTime<Utc>) -> ToolResult<usize> {
        let records = self.all_backups().await?;
        self.remove_expired(records, now).await
    }

    pub async fn total_size(&self) -> ToolResult<u64> {
        Ok(self.all_backups().await?.iter().map(|r| r.size).sum())
    }

    async fn remove_expired(
        &self,
        records: Vec<BackupRecord>,
        now: DateTime<Utc>,
    ) -> ToolResult<usize> {
        let mut removed = 0;
        for record in records {
            if now - record.created_at <= self.retention {
                continue;
            }
            match self.delete_backup(&record.backup_path).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(backup = %record.name, ?e, "Failed to remove old backup"),
            }
        }
        if removed > 0 {
            tracing::info!(removed, "Removed expired backups");
        }
        Ok(removed)
    }

    async fn all_backups(&self) -> ToolResult<Vec<BackupRecord>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ToolError::io(
                    format!("Failed to read backup directory {}", self.root.display()),
                    e,
                ))
            }
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .io_context(|| format!("Failed to read backup directory {}", self.root.display()))?
        {
            if let Some(record) = self.record(&entry.path()).await {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn record(&self, path: &Path) -> Option<BackupRecord> {
        let name = path.file_name()?.to_string_lossy().into_owned();
        let (original_name, created_at) = parse_backup_name(&name)?;
        let metadata = fs::symlink_metadata(path).await.ok()?;
        let size = if metadata.is_dir() {
            access::total_size(path).await.ok()?
        } else {
            metadata.len()
        };

        Some(BackupRecord {
            original_name,
            backup_path: path.to_path_buf(),
            created_at,
            size,
            size_formatted: format_size(size),
            is_directory: metadata.is_dir(),
            name,
        })
    }
}

fn backup_name(original: &str, millis: i64) -> String {
    format!("{original}.{millis}{BACKUP_SUFFIX}")
}

/// Splits `<original>.<millis>.backup` into its parts.
pub fn parse_backup_name(name: &str) -> Option<(String, DateTime<Utc>)> {
    let stem = name.strip_suffix(BACKUP_SUFFIX)?;
    let (original, millis) = stem.rsplit_once('.')?;
    if original.is_empty() || millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let millis: i64 = millis.parse().ok()?;
    Some((original.to_string(), timestamp_from_millis(millis)))
}

fn timestamp_from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as std_fs;

    struct Setup {
        _temp: tempfile::TempDir,
        workspace: PathBuf,
        manager: BackupManager,
    }

    fn setup(enabled: bool) -> Setup {
        let temp = tempfile::tempdir().unwrap();
        let workspace = temp.path().join("workspace");
        std_fs::create_dir(&workspace).unwrap();
        let manager = BackupManager::new(&FileSettings {
            backup_enabled: enabled,
            backup_dir: Some(temp.path().join("backups")),
            backup_retention_days: 7,
            ..Default::default()
        });
        Setup {
            _temp: temp,
            workspace,
            manager,
        }
    }

    fn at(millis: i64) -> DateTime<Utc> {
        timestamp_from_millis(millis)
    }

    #[test]
    fn test_parse_backup_name() {
        let (original, created) = parse_backup_name("notes.v2.txt.1700000000000.backup").unwrap();
        assert_eq!(original, "notes.v2.txt");
        assert_eq!(created.timestamp_millis(), 1_700_000_000_000);

        assert!(parse_backup_name("notes.txt.backup").is_none());
        assert!(parse_backup_name("notes.txt.12ab.backup").is_none());
        assert!(parse_backup_name(".1700000000000.backup").is_none());
        assert!(parse_backup_name("notes.txt.1700000000000").is_none());
    }

    #[tokio::test]
    async fn test_round_trip_restores_exact_content() -> anyhow::Result<()> {
        let setup = setup(true);
        let original = setup.workspace.join("data.bin");
        let content: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        std_fs::write(&original, &content)?;

        let outcome = setup.manager.create_backup(&original).await;
        assert!(outcome.success, "{outcome:?}");
        let backup_path = outcome.backup_path.unwrap();
        assert_ne!(backup_path, original);
        assert!(backup_path.starts_with(setup.manager.root()));

        let target = setup.workspace.join("restored").join("data.bin");
        let restored = setup.manager.restore_backup(&backup_path, &target).await?;
        assert_eq!(restored, 5000);
        assert_eq!(std_fs::read(&target)?, content);
        Ok(())
    }

    #[tokio::test]
    async fn test_disabled_backup_is_not_an_error() -> anyhow::Result<()> {
        let setup = setup(false);
        let original = setup.workspace.join("a.txt");
        std_fs::write(&original, "a")?;

        let outcome = setup.manager.create_backup(&original).await;
        assert!(!outcome.success);
        assert!(outcome.backup_path.is_none());
        assert!(!setup.manager.root().exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_source_degrades_to_unsuccessful_outcome() {
        let setup = setup(true);
        let outcome = setup
            .manager
            .create_backup(&setup.workspace.join("missing.txt"))
            .await;
        assert!(!outcome.success);
        assert!(outcome.reason.unwrap().contains("missing.txt"));
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_filtered_by_name() -> anyhow::Result<()> {
        let setup = setup(true);
        let notes = setup.workspace.join("notes.txt");
        let other = setup.workspace.join("other.txt");
        std_fs::write(&notes, "n")?;
        std_fs::write(&other, "o")?;

        for millis in [1_000, 3_000, 2_000] {
            assert!(setup.manager.create_backup_at(&notes, at(millis)).await.success);
        }
        assert!(setup.manager.create_backup_at(&other, at(5_000)).await.success);

        let listed: Vec<i64> = setup
            .manager
            .list_backups("notes.txt")
            .await?
            .iter()
            .map(|r| r.created_at.timestamp_millis())
            .collect();
        assert_eq!(listed, vec![3_000, 2_000, 1_000]);

        // A path is reduced to its file name.
        assert_eq!(setup.manager.list_backups("sub/dir/other.txt").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_same_millisecond_backups_do_not_collide() -> anyhow::Result<()> {
        let setup = setup(true);
        let file = setup.workspace.join("a.txt");
        std_fs::write(&file, "first")?;
        let first = setup.manager.create_backup_at(&file, at(10)).await;
        std_fs::write(&file, "second")?;
        let second = setup.manager.create_backup_at(&file, at(10)).await;

        assert_ne!(first.backup_path, second.backup_path);
        assert_eq!(std_fs::read_to_string(first.backup_path.unwrap())?, "first");
        assert_eq!(std_fs::read_to_string(second.backup_path.unwrap())?, "second");
        Ok(())
    }

    #[tokio::test]
    async fn test_retention_uses_name_timestamp_for_both_sweeps() -> anyhow::Result<()> {
        let setup = setup(true);
        let day = Duration::days(1).num_milliseconds();
        let now = at(100 * day);
        let a = setup.workspace.join("a.txt");
        let b = setup.workspace.join("b.txt");
        std_fs::write(&a, "a")?;
        std_fs::write(&b, "b")?;

        setup.manager.create_backup_at(&a, at(100 * day - 8 * day)).await;
        setup.manager.create_backup_at(&a, at(100 * day - day)).await;
        setup.manager.create_backup_at(&b, at(100 * day - 30 * day)).await;
        setup.manager.create_backup_at(&b, at(100 * day - 7 * day)).await;

        assert_eq!(setup.manager.clean_old_backups_at("a.txt", now).await?, 1);
        assert_eq!(setup.manager.list_backups("a.txt").await?.len(), 1);
        assert_eq!(setup.manager.list_backups("b.txt").await?.len(), 2);

        // Exactly at the retention boundary is kept.
        assert_eq!(setup.manager.clean_all_old_backups_at(now).await?, 1);
        assert_eq!(setup.manager.list_backups("b.txt").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unrelated_files_in_backup_root_are_ignored() -> anyhow::Result<()> {
        let setup = setup(true);
        std_fs::create_dir_all(setup.manager.root())?;
        std_fs::write(setup.manager.root().join("README"), "not a backup")?;

        assert_eq!(setup.manager.clean_all_old_backups().await?, 0);
        assert!(setup.manager.root().join("README").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_directory_backup_and_restore() -> anyhow::Result<()> {
        let setup = setup(true);
        let dir = setup.workspace.join("project");
        std_fs::create_dir_all(dir.join("src"))?;
        std_fs::write(dir.join("src").join("main.rs"), "fn main() {}")?;
        std_fs::write(dir.join("Cargo.toml"), "[package]")?;

        let outcome = setup.manager.create_backup(&dir).await;
        assert!(outcome.success);
        let records = setup.manager.list_backups("project").await?;
        assert_eq!(records.len(), 1);
        assert!(records[0].is_directory);
        assert_eq!(records[0].size, 21);

        std_fs::remove_dir_all(&dir)?;
        setup
            .manager
            .restore_backup(&records[0].backup_path, &dir)
            .await?;
        assert_eq!(
            std_fs::read_to_string(dir.join("src").join("main.rs"))?,
            "fn main() {}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_find_backup_rejects_paths() -> anyhow::Result<()> {
        let setup = setup(true);
        let file = setup.workspace.join("a.txt");
        std_fs::write(&file, "a")?;
        let outcome = setup.manager.create_backup_at(&file, at(42)).await;
        assert!(outcome.success);

        let record = setup.manager.find_backup("a.txt.42.backup").await?;
        assert_eq!(record.original_name, "a.txt");

        for bad in ["../a.txt.42.backup", "a.txt", "/etc/passwd", ".."] {
            assert!(
                matches!(
                    setup.manager.find_backup(bad).await,
                    Err(ToolError::InvalidInput(_))
                ),
                "{bad}"
            );
        }
        assert!(matches!(
            setup.manager.find_backup("a.txt.43.backup").await,
            Err(ToolError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_outside_backup_root_is_rejected() -> anyhow::Result<()> {
        let setup = setup(true);
        let file = setup.workspace.join("a.txt");
        std_fs::write(&file, "a")?;
        let err = setup
            .manager
            .restore_backup(&file, &setup.workspace.join("b.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PathRejected(_)));
        Ok(())
    }
}
