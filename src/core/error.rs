//! Error type system for the plugin runtime
//!
//! Errors are grouped the way callers need to react to them:
//! - repository errors are collected per repository and never abort a fetch
//! - sandbox errors are logged and turned into "no instance"
//! - unknown-plugin and capability errors are surfaced to façade callers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Main error type for the runtime
#[derive(Debug, thiserror::Error)]
pub enum FolioError {
    // System-level errors
    #[error("System initialization failed: {0}")]
    InitializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Repository errors
    #[error("Repository error: {0}")]
    RepositoryError(String),

    #[error("Invalid repository format: {0}")]
    InvalidRepositoryFormat(String),

    // Plugin-related errors
    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Invalid plugin id: {0:?}")]
    InvalidPluginId(String),

    #[error("Plugin load failed: {0}")]
    PluginLoadError(String),

    #[error("Plugin execution error: {0}")]
    PluginExecutionError(String),

    #[error("Plugin {0} does not support pagination")]
    PaginationUnsupported(String),

    #[error("Plugin {plugin} does not provide {capability}")]
    CapabilityMissing { plugin: String, capability: String },

    // Storage errors
    #[error("Storage error: {0}")]
    StorageError(String),

    // I/O errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl FolioError {
    /// Get the error type name used in reports and structured logs
    pub fn error_type(&self) -> &'static str {
        match self {
            FolioError::InitializationError(_) => "InitializationError",
            FolioError::ConfigError(_) => "ConfigError",
            FolioError::RepositoryError(_) => "RepositoryError",
            FolioError::InvalidRepositoryFormat(_) => "InvalidRepositoryFormat",
            FolioError::UnknownPlugin(_) => "UnknownPlugin",
            FolioError::InvalidPluginId(_) => "InvalidPluginId",
            FolioError::PluginLoadError(_) => "PluginLoadError",
            FolioError::PluginExecutionError(_) => "PluginExecutionError",
            FolioError::PaginationUnsupported(_) => "PaginationUnsupported",
            FolioError::CapabilityMissing { .. } => "CapabilityMissing",
            FolioError::StorageError(_) => "StorageError",
            FolioError::IoError(_) => "IoError",
            FolioError::NetworkError(_) => "NetworkError",
            FolioError::Timeout(_) => "Timeout",
            FolioError::SerializationError(_) => "SerializationError",
            FolioError::DeserializationError(_) => "DeserializationError",
        }
    }
}

impl From<serde_json::Error> for FolioError {
    fn from(err: serde_json::Error) -> Self {
        FolioError::DeserializationError(err.to_string())
    }
}

impl From<reqwest::Error> for FolioError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FolioError::Timeout(err.to_string())
        } else {
            FolioError::NetworkError(err.to_string())
        }
    }
}

/// Serializable error summary for aggregate reports (per repository or per source)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorReport {
    pub fn from_error(error: &FolioError) -> Self {
        Self {
            error: error.error_type().to_string(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error, self.message)
    }
}

/// Result type alias for operations that can fail with FolioError
pub type Result<T> = std::result::Result<T, FolioError>;

/// Context extension trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context to an error using a closure
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let context_str = context.into();
            FolioError::StorageError(format!("{}: {}", context_str, e))
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let context_str = f();
            FolioError::StorageError(format!("{}: {}", context_str, e))
        })
    }
}
