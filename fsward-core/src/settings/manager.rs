use crate::settings::config::{fsward_home, Settings};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Loads settings once at startup. The resulting [`Settings`] value is
/// immutable and handed to each component's constructor by reference.
#[derive(Debug, Clone)]
pub struct SettingsManager {
    settings_path: PathBuf,
    settings: Settings,
}

impl SettingsManager {
    /// Create a settings manager using the default location
    /// (`~/.fsward/settings.toml`).
    pub fn new() -> Result<Self> {
        Self::from_path(fsward_home().join("settings.toml"))
    }

    /// Create a settings manager from a specific path, writing defaults there
    /// when the file does not exist yet.
    pub fn from_path(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {parent:?}"))?;
            }
            let contents = toml::to_string_pretty(&Settings::default())
                .context("Failed to serialize default settings")?;
            fs::write(&path, contents)
                .with_context(|| format!("Failed to write default settings to {path:?}"))?;
        }

        let settings = Self::load_from_file_with_backup(&path)?;
        Ok(Self {
            settings_path: path,
            settings,
        })
    }

    /// Load settings from a TOML file, moving an unparsable file aside and
    /// starting over from defaults.
    fn load_from_file_with_backup(path: &Path) -> Result<Settings> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {path:?}"))?;

        match toml::from_str(&contents) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                let backup_path = path.with_extension("toml.backup");
                tracing::warn!(
                    ?e,
                    "Settings file is corrupted, moving it to {}",
                    backup_path.display()
                );
                fs::rename(path, &backup_path).with_context(|| {
                    format!("Failed to backup corrupted settings to {backup_path:?}")
                })?;

                let default_settings = Settings::default();
                let contents = toml::to_string_pretty(&default_settings)
                    .context("Failed to serialize default settings")?;
                fs::write(path, contents)
                    .with_context(|| format!("Failed to write default settings to {path:?}"))?;

                Ok(default_settings)
            }
        }
    }

    /// Applies process environment overrides, then validates.
    pub fn resolve(self) -> Result<Settings> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup` (highest priority), then validates the
    /// merged result.
    pub fn resolve_with<F>(self, lookup: F) -> Result<Settings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = self.settings;
        apply_overrides(&mut settings, lookup)?;

        let errors = settings.validate();
        if !errors.is_empty() {
            bail!("Invalid settings: {}", errors.join("; "));
        }
        Ok(settings)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}

fn apply_overrides<F>(settings: &mut Settings, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup("WORKSPACE_DIR") {
        settings.workspace.dir = PathBuf::from(dir);
    }
    if lookup("BACKUP_ENABLED").as_deref() == Some("false") {
        settings.files.backup_enabled = false;
    }
    if let Some(dir) = lookup("BACKUP_DIR") {
        settings.files.backup_dir = Some(PathBuf::from(dir));
    }
    if let Some(days) = lookup("BACKUP_RETENTION") {
        settings.files.backup_retention_days = days
            .parse()
            .with_context(|| format!("BACKUP_RETENTION is not a number of days: {days}"))?;
    }
    if lookup("RATE_LIMIT_ENABLED").as_deref() == Some("false") {
        settings.rate_limits.enabled = false;
    }
    if let Some(level) = lookup("LOG_LEVEL") {
        let level = level.to_lowercase();
        if matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
            settings.logging.level = level;
        }
    }
    if let Some(dir) = lookup("LOG_DIR") {
        settings.logging.log_dir = Some(PathBuf::from(dir));
    }
    if let Some(days) = lookup("LOG_RETENTION") {
        settings.logging.retention_days = days
            .parse()
            .with_context(|| format!("LOG_RETENTION is not a number of days: {days}"))?;
    }
    Ok(())
}
