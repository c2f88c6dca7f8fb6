//! Error types for SenseIndex.
//!
//! Library crates use [`SenseIndexError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all SenseIndex operations.
#[derive(Debug, thiserror::Error)]
pub enum SenseIndexError {
    /// Configuration loading or validation error, including an unusable
    /// matrix directory. Fatal at startup.
    #[error("config error: {message}")]
    Config { message: String },

    /// A worker could not obtain its engine handle.
    #[error("resource error: {0}")]
    Resource(String),

    /// A field value could not be percent-decoded as UTF-8.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// The disambiguation engine failed on a specific text value.
    #[error("engine error: {0}")]
    Engine(String),

    /// Malformed document JSON or engine bridge message.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Malformed configuration value (field lists, limits).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SenseIndexError>;

impl SenseIndexError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a resource error from any displayable message.
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    /// Create an engine error from any displayable message.
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error leaves the process unable to process any document.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Validation { .. })
    }
}
