//! Event store trait for pluggable document stores
//!
//! This module defines the `EventStore` trait that the copy and replay
//! operations depend on. Implementations:
//!
//! - `SurrealStore`: SurrealDB over WebSocket/HTTP, or in-process (`mem://`)
//! - `InMemoryStore`: process-local maps, for tests
//!
//! Stores are opened through a `StoreConnector` so callers never hold a
//! global connection handle.

mod memory;
mod path;
mod surreal;

pub use memory::{InMemoryConnector, InMemoryStore};
pub use path::{CollectionPath, SESSIONS_COLLECTION, SUPPORTED_REPORT_COLLECTIONS};
pub use surreal::{SurrealConnector, SurrealStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::catalog::SessionDocument;
use crate::config::StoreConfig;
use crate::event::TelemetryEvent;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by a store implementation
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Connecting or authenticating failed
    #[error("cannot connect to {url}: {message}")]
    Connection { url: String, message: String },

    /// A read query failed
    #[error("query on {collection} failed: {message}")]
    Query { collection: String, message: String },

    /// A write failed
    #[error("write to {collection} failed: {message}")]
    Write { collection: String, message: String },

    /// A stored document did not match the expected shape
    #[error("cannot decode document in {collection}: {message}")]
    Decode { collection: String, message: String },
}

/// How a store treats an event's recording time on write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingStamp {
    /// Keep the recording time carried by the event
    Preserve,
    /// Replace it with the store's own write time
    AssignOnWrite,
}

/// The document store seam used by copy, replay, list and tags
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Every event of a collection, ascending by recording time.
    /// Ties keep arrival order.
    async fn fetch_ordered(&self, collection: &CollectionPath) -> StoreResult<Vec<TelemetryEvent>>;

    /// Events whose measurement time lies strictly between `start` and `end`,
    /// ascending by recording time
    async fn fetch_window(
        &self,
        collection: &CollectionPath,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<TelemetryEvent>>;

    /// Create a new document and return its generated key
    async fn write_new(
        &self,
        collection: &CollectionPath,
        event: &TelemetryEvent,
        stamp: RecordingStamp,
    ) -> StoreResult<String>;

    /// Create or replace a session document, keyed by its name
    async fn put_session(&self, session: &SessionDocument) -> StoreResult<()>;

    /// Delete a session document, returns true if it existed
    async fn delete_session(&self, name: &str) -> StoreResult<bool>;

    /// Sessions tagged with `tag`, at most `limit`
    async fn sessions_with_tag(&self, tag: &str, limit: usize) -> StoreResult<Vec<SessionDocument>>;

    /// Up to `limit` session documents in store order
    async fn sessions(&self, limit: usize) -> StoreResult<Vec<SessionDocument>>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// Opens stores from configuration
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Open a connection. The store is released when the last handle drops.
    async fn connect(&self, config: &StoreConfig) -> StoreResult<Arc<dyn EventStore>>;
}
