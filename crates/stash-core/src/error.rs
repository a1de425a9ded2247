//! Error types for stash.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Validation errors
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    // Filesystem errors
    #[error("Archive I/O failed at {}: {}", .path.display(), .source)]
    Archive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Storage errors
    #[error("Storage request for {key} failed: {message}")]
    Transport { key: String, message: String },

    #[error("Refusing to replace existing entry at {}", .0.display())]
    Conflict(PathBuf),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used by callers deciding how to report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Io,
    Transport,
    Conflict,
    Internal,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn archive(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Archive {
            path: path.into(),
            source,
        }
    }

    pub fn transport(key: impl Into<String>, message: impl ToString) -> Self {
        Error::Transport {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidKey(_) | Error::UnsupportedFormat(_) | Error::InvalidSettings(_) => {
                ErrorKind::Validation
            }
            Error::Archive { .. } | Error::Io(_) => ErrorKind::Io,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True when the failure was caused by the other end of a stream going away.
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            Error::Archive { source, .. } | Error::Io(source) => {
                source.kind() == io::ErrorKind::BrokenPipe
            }
            _ => false,
        }
    }
}
