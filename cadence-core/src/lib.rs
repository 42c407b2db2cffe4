//! # Cadence - Telemetry Session Capture and Replay
//!
//! Cadence captures a unit's telemetry reports into named sessions and
//! replays them later against a test store with their original timing:
//! - Events are replayed in original recording order
//! - The gap between consecutive recordings is reproduced as a real wait
//! - Each replayed event keeps its original reporting lag, anchored to now
//! - Replayed events are attributed to an operator-chosen unit
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cadence_core::prelude::*;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = CadenceConfig::load()?;
//!     let args = ReplayArgs {
//!         session: "brake-check".to_string(),
//!         account: 200,
//!         transponder: 1337,
//!         ..Default::default()
//!     };
//!
//!     let outcomes = run_replay(
//!         &SurrealConnector,
//!         &config,
//!         &args,
//!         Arc::new(LogProgress::new(25)),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **store**: the `EventStore` seam, with SurrealDB and in-memory backends
//! - **replay**: ordering, pacing and timestamp rewriting
//! - **copy**: capturing a time window into a session
//! - **catalog**: session documents, listing by tag and tag frequencies
//! - **ops**: validated entry points used by the CLI

pub mod catalog;
pub mod clock;
pub mod config;
pub mod copy;
pub mod error;
pub mod event;
pub mod ops;
pub mod progress;
pub mod replay;
pub mod request;
pub mod retry;
pub mod store;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::catalog::SessionDocument;
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::{CadenceConfig, ReplayConfig, StoreConfig};
    pub use crate::copy::{CopyOutcome, copy_session};
    pub use crate::error::{CadenceError, Result};
    pub use crate::event::{Identity, TelemetryEvent};
    pub use crate::ops::{CopyArgs, ListArgs, ReplayArgs, TagsArgs, run_copy, run_list, run_replay, run_tags};
    pub use crate::progress::{LogProgress, NoProgress, ProgressReporter};
    pub use crate::replay::{ReplayOutcome, Replayer};
    pub use crate::request::{CopyRequest, ListRequest, ReplayRequest, TagsRequest};
    pub use crate::retry::RetryConfig;
    pub use crate::store::{CollectionPath, EventStore, InMemoryStore, StoreConnector, SurrealConnector};
}
