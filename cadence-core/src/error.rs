//! Error types for Cadence operations

use crate::store::StoreError;

/// Result type for Cadence operations
pub type Result<T> = std::result::Result<T, CadenceError>;

/// Error types for copy and replay
#[derive(Debug, thiserror::Error)]
pub enum CadenceError {
    /// Invalid or unsupported configuration, raised before any store is touched
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Could not open a store connection
    #[error("Connection error: {0}")]
    Connection(#[source] StoreError),

    /// Fetching a session from the source failed; nothing has been written
    #[error("Failed to fetch session '{session}' from {collection}: {source}")]
    Fetch {
        session: String,
        collection: String,
        #[source]
        source: StoreError,
    },

    /// A write failed after all retry attempts; replay stopped at `index`
    #[error("Failed to write event #{index} of session '{session}' into {collection}: {source}")]
    Write {
        session: String,
        collection: String,
        index: usize,
        #[source]
        source: StoreError,
    },

    /// Session catalog read or update failed
    #[error("Catalog error: {0}")]
    Catalog(#[source] StoreError),

    /// The operation was cancelled before finishing
    #[error("Cancelled after writing {written} event(s)")]
    Cancelled { written: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CadenceError {
    /// True when the error came from the cancellation signal rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CadenceError::Cancelled { .. })
    }
}

impl From<figment::Error> for CadenceError {
    fn from(err: figment::Error) -> Self {
        CadenceError::Configuration(format!("Failed to load configuration: {}", err))
    }
}
