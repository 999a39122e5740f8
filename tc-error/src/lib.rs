//! Unified error handling for tunectl
//!
//! Every crate in the workspace returns [`TunectlError`]. The first three
//! variant groups are the caller-facing taxonomy (validation, not found,
//! unsupported); the rest describe hardware and persistence failures.

use std::io;
use std::path::PathBuf;

/// Result type alias using TunectlError
pub type Result<T> = std::result::Result<T, TunectlError>;

/// Coarse classification used by the boundary layer to pick a status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Unsupported,
    Hardware,
    Internal,
}

/// Unified error type for all tunectl operations
#[derive(thiserror::Error, Debug)]
pub enum TunectlError {
    // ============================================================================
    // Caller Errors
    // ============================================================================
    #[error("Invalid {field}: {reason}")]
    Validation {
        field: String,
        reason: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Hardware Access Errors
    // ============================================================================
    #[error("Failed to read PWM from {path}: {reason}")]
    PwmRead {
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to write PWM to {path}: {reason}")]
    PwmWrite {
        path: PathBuf,
        reason: String,
    },

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Generic(String),
}

impl TunectlError {
    /// Create a validation error for a named field
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::PwmRead { .. }
            | Self::PwmWrite { .. }
            | Self::Gpu(_)
            | Self::PermissionDenied(_) => ErrorKind::Hardware,
            Self::Io(_)
            | Self::FileRead { .. }
            | Self::FileWrite { .. }
            | Self::JsonParse(_)
            | Self::Config(_)
            | Self::Generic(_) => ErrorKind::Internal,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<String> for TunectlError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

impl From<&str> for TunectlError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
