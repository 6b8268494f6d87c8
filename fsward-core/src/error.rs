use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a failure, reported to callers beside the message
/// so they can decide whether a retry makes sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Policy,
    NotFound,
    Conflict,
    Io,
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Invalid path: {0}")]
    PathRejected(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("{0}")]
    ConfirmationRequired(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ToolError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::Input,
            Self::PathRejected(_) | Self::RateLimited(_) | Self::ConfirmationRequired(_) => {
                ErrorKind::Policy
            }
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Io { .. } | Self::Join(_) => ErrorKind::Io,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Attaches a human readable context to raw io errors, mirroring
/// `anyhow::Context` for the typed error.
pub trait IoContext<T> {
    fn io_context<F, S>(self, f: F) -> ToolResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F, S>(self, f: F) -> ToolResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| ToolError::io(f(), source))
    }
}
