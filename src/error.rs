//! Error types for bulkflow-core

use thiserror::Error;

/// Result type for bulkflow operations
pub type Result<T> = std::result::Result<T, BulkError>;

/// Errors that can occur across the bulk pipeline
#[derive(Error, Debug)]
pub enum BulkError {
    /// JSON serialization/deserialization errors on wire messages
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Log transport failures (unknown stream, closed partition, ...)
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Key-value store failures
    #[error("Key-value store error: {message}")]
    KvStore { message: String },

    /// Scroll cursor failures other than invalid queries
    #[error("Scroll error: {message}")]
    Scroll { message: String },

    /// Command references an action with no registered configuration
    #[error("Unknown action: {action}")]
    UnknownAction { action: String },

    /// Status lookup for a command id the store has never seen
    #[error("Unknown command: {command_id}")]
    UnknownCommand { command_id: String },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic error for compatibility
    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl BulkError {
    /// Create a transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a key-value store error
    pub fn kv<S: Into<String>>(message: S) -> Self {
        Self::KvStore {
            message: message.into(),
        }
    }

    /// Create a scroll error
    pub fn scroll<S: Into<String>>(message: S) -> Self {
        Self::Scroll {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
