//! Error types for Stowaway
//!
//! All modules use `StowawayResult<T>` as their return type. Template and
//! remote-store failures have their own enums so callers can match on them
//! without string inspection. A cache miss is never an error.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Stowaway operations
pub type StowawayResult<T> = Result<T, StowawayError>;

/// Result type alias for remote store operations
pub type RemoteResult<T> = Result<T, RemoteError>;

/// All errors that can occur in Stowaway
#[derive(Error, Debug)]
pub enum StowawayError {
    // Key resolution errors
    #[error("Invalid cache key: {0}")]
    Template(#[from] TemplateError),

    // Archive errors
    #[error("Archive error: {context}")]
    Archive {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid path to cache: {path}: {reason}")]
    PathInvalid { path: PathBuf, reason: String },

    // Remote store errors
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    // Extraction errors
    #[error("Extraction failed: {context}")]
    Extraction {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt cache archive: {0}")]
    CorruptArchive(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

/// Errors raised while parsing or evaluating a cache key template
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("wrong number of arguments for {function}: want {expected}, got {actual}")]
    Arity {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("error calling {function}: {reason}")]
    Function { function: String, reason: String },
}

impl TemplateError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn function(function: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Function {
            function: function.into(),
            reason: reason.into(),
        }
    }
}

/// Backing store failures. "Not found" is deliberately absent: lookups
/// report absence as `Ok(false)` or `Ok(None)`.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("{operation} {key} failed: {source}")]
    Io {
        operation: &'static str,
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("content digest mismatch for {key}: expected {expected}, got {actual}")]
    Integrity {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("invalid bucket name {0:?}")]
    InvalidBucket(String),

    #[error("{0}")]
    Backend(String),
}

impl RemoteError {
    pub(crate) fn io(operation: &'static str, key: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            key: key.into(),
            source,
        }
    }
}

impl StowawayError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an archive error with context
    pub fn archive(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Archive {
            context: context.into(),
            source,
        }
    }

    /// Create an extraction error with context
    pub fn extraction(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Extraction {
            context: context.into(),
            source,
        }
    }

    /// Whether the error came from the backing store
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Template(TemplateError::Syntax { .. }) => {
                Some("Template actions look like {{ checksum \"Cargo.lock\" }} or {{ .Environment.NAME }}")
            }
            Self::Template(TemplateError::Function { .. }) => {
                Some("Check that files passed to checksum exist relative to the working directory")
            }
            Self::Remote(RemoteError::InvalidBucket(_)) => {
                Some("Bucket names must be a single path component, e.g. --bucket=ci-cache")
            }
            Self::Remote(RemoteError::Integrity { .. }) => Some("The upload was corrupted in transit; retry the store"),
            Self::ConfigInvalid { .. } => Some("Run: stowaway config init --force"),
            _ => None,
        }
    }
}
