pub mod config;
pub mod manager;

pub use config::{
    FileSettings, LoggingSettings, RateLimit, RateLimitSettings, SearchSettings, Settings,
    WorkspaceSettings,
};
pub use manager::SettingsManager;
