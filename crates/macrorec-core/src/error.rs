//! Structured errors for the recorder, the replayer and the macro file codec

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MacroError>;

#[derive(Debug, Error)]
pub enum MacroError {
    /// The capture facility refused to install its hooks
    #[error("input capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// The macro file is corrupt or written by an unsupported version
    #[error("invalid macro file: {0}")]
    Format(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The injection facility failed to perform a synthetic action
    #[error("input injection failed: {0}")]
    Injection(String),

    /// The command is not allowed in the current phase
    #[error("{0}")]
    Busy(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    CaptureUnavailable,
    FormatError,
    IoError,
    InjectionFailed,
    Busy,
}

impl MacroError {
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::CaptureUnavailable(_) => ErrorCode::CaptureUnavailable,
            Self::Format(_) => ErrorCode::FormatError,
            Self::Io { .. } => ErrorCode::IoError,
            Self::Injection(_) => ErrorCode::InjectionFailed,
            Self::Busy(_) => ErrorCode::Busy,
        }
    }
}

/// Serializable view of an error, for tools that parse command output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&MacroError> for ErrorReport {
    fn from(e: &MacroError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
        }
    }
}
