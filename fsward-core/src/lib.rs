pub mod audit;
pub mod error;
pub mod file;
pub mod search;
pub mod security;
pub mod settings;
pub mod tools;

pub use error::{ErrorKind, ToolError, ToolResult};
pub use search::SearchEngine;
pub use security::{PathValidator, RateLimiter, WorkspaceBoundary};
pub use settings::{Settings, SettingsManager};
pub use tools::{ToolCall, ToolName, ToolRegistry, Toolbox};
