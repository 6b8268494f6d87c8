use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

const MIB: u64 = 1024 * 1024;
const MINUTE_MS: u64 = 60_000;

fn default_true() -> bool {
    true
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_protected_paths() -> Vec<String> {
    ["node_modules", ".git", "dist", ".env", "build", "coverage"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_file_size() -> u64 {
    10 * MIB
}

fn default_max_results() -> usize {
    100
}

fn default_excludes() -> Vec<String> {
    [
        "**/node_modules/**",
        "**/.git/**",
        "**/dist/**",
        "**/build/**",
        "**/.next/**",
        "**/coverage/**",
        "**/.cache/**",
        "**/target/**",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_cache_ttl_ms() -> u64 {
    5 * MINUTE_MS
}

fn default_max_concurrency() -> usize {
    8
}

fn default_backup_retention_days() -> u64 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_retention_days() -> u64 {
    30
}

fn default_limits() -> BTreeMap<String, RateLimit> {
    [
        ("rename_file", 50),
        ("delete_file", 20),
        ("copy_file", 50),
        ("get_file_info", 200),
        ("read_file", 200),
        ("write_file", 50),
        ("list_directory", 100),
        ("create_directory", 50),
        ("delete_directory", 10),
        ("move_directory", 20),
        ("search_files", 100),
        ("search_content", 50),
        ("find_duplicates", 20),
        ("restore_backup", 20),
    ]
    .into_iter()
    .map(|(operation, max)| {
        (
            operation.to_string(),
            RateLimit {
                max,
                per_ms: MINUTE_MS,
            },
        )
    })
    .collect()
}

/// Top level configuration. Every field carries a serde default so a partial
/// settings file only needs to mention what it changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Settings {
    #[serde(default)]
    pub workspace: WorkspaceSettings,

    #[serde(default)]
    pub search: SearchSettings,

    #[serde(default)]
    pub files: FileSettings,

    #[serde(default)]
    pub rate_limits: RateLimitSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceSettings {
    /// Root of the tree every operation is confined to.
    #[serde(default = "default_workspace_dir")]
    pub dir: PathBuf,

    /// Workspace relative paths (and everything beneath them) that may never be
    /// touched by an operation.
    #[serde(default = "default_protected_paths")]
    pub protected_paths: Vec<String>,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            dir: default_workspace_dir(),
            protected_paths: default_protected_paths(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchSettings {
    /// Files larger than this are skipped by content search unless a request
    /// asks for a smaller bound.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Globs excluded from every enumeration, in addition to the patterns a
    /// request supplies.
    #[serde(default = "default_excludes")]
    pub default_excludes: Vec<String>,

    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Upper bound on files hashed at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_results: default_max_results(),
            default_excludes: default_excludes(),
            cache_enabled: true,
            cache_ttl_ms: default_cache_ttl_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileSettings {
    #[serde(default = "default_true")]
    pub backup_enabled: bool,

    /// Where backups are written. Defaults to `~/.fsward/backups`; must not
    /// live inside the workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,

    #[serde(default = "default_backup_retention_days")]
    pub backup_retention_days: u64,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            backup_enabled: true,
            backup_dir: None,
            backup_retention_days: default_backup_retention_days(),
            max_file_size: default_max_file_size(),
        }
    }
}

impl FileSettings {
    pub fn resolved_backup_dir(&self) -> PathBuf {
        match &self.backup_dir {
            Some(dir) => absolutize(dir),
            None => fsward_home().join("backups"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimit {
    pub max: u32,
    pub per_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Operation name to limit. Operations missing from this table are never
    /// limited.
    #[serde(default = "default_limits")]
    pub limits: BTreeMap<String, RateLimit>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            limits: default_limits(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_log_retention_days")]
    pub retention_days: u64,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
            retention_days: default_log_retention_days(),
        }
    }
}

impl LoggingSettings {
    pub fn resolved_log_dir(&self) -> PathBuf {
        match &self.log_dir {
            Some(dir) => absolutize(dir),
            None => fsward_home().join("logs"),
        }
    }
}

impl Settings {
    /// Collects every configuration problem instead of stopping at the first
    /// one so a broken settings file can be fixed in a single pass.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.workspace.dir.as_os_str().is_empty() {
            errors.push("Workspace directory is required".to_string());
        }
        if self.search.max_file_size == 0 {
            errors.push("Search max_file_size must be positive".to_string());
        }
        if self.search.max_results == 0 {
            errors.push("Search max_results must be at least 1".to_string());
        }
        if self.search.max_concurrency == 0 {
            errors.push("Search max_concurrency must be at least 1".to_string());
        }
        if self.files.max_file_size == 0 {
            errors.push("Files max_file_size must be positive".to_string());
        }
        if self.files.backup_retention_days < 1 {
            errors.push("Backup retention must be at least 1 day".to_string());
        }
        if self.logging.retention_days < 1 {
            errors.push("Log retention must be at least 1 day".to_string());
        }
        for (operation, limit) in &self.rate_limits.limits {
            if limit.max == 0 || limit.per_ms == 0 {
                errors.push(format!(
                    "Rate limit for {operation} must allow at least 1 request in a non-empty window"
                ));
            }
        }

        let workspace = lexical_normalize(&absolutize(&self.workspace.dir));
        let backups = lexical_normalize(&self.files.resolved_backup_dir());
        if backups.starts_with(&workspace) {
            errors.push(format!(
                "Backup directory {} must not be inside the workspace {}",
                backups.display(),
                workspace.display()
            ));
        }

        errors
    }
}

pub(crate) fn fsward_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".fsward")
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
