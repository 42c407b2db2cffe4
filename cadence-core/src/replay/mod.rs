//! Cadence-preserving replay
//!
//! Replays a captured session onto a unit's live collection:
//!
//! 1. Fetch every event of the session, ascending by original recording time
//! 2. Before each event, wait out the gap to the previous recording time
//! 3. Rewrite the copy: clear `eventStart`, set the target identity, and
//!    re-anchor the measurement time so the reporting lag is unchanged
//! 4. Write it as a new document; the target stamps its own recording time
//!
//! Events are processed strictly one at a time; the sequential loop is what
//! reproduces the original cadence. A write that still fails after the
//! configured retries aborts the replay (fail-fast), reporting the index of
//! the event that could not be written. The cancellation token interrupts a
//! wait or a retry backoff promptly.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cadence_core::config::StoreConfig;
//! use cadence_core::replay::Replayer;
//! use cadence_core::request::ReplayRequest;
//! use cadence_core::store::InMemoryStore;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> cadence_core::error::Result<()> {
//! let source = Arc::new(InMemoryStore::new("captures"));
//! let target = Arc::new(InMemoryStore::new("emulator"));
//! let request = ReplayRequest::new("brake-check", 200, 1337, &StoreConfig::new("mem://"), false)?;
//!
//! let replayer = Replayer::builder().source(source).target(target).build()?;
//! let outcomes = replayer.run(&request, &CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

mod pacing;
mod rewrite;

pub use pacing::{Pacer, WaitOutcome, pause};
pub use rewrite::rewrite_for_replay;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::error::{CadenceError, Result};
use crate::event::{Identity, TelemetryEvent};
use crate::progress::{NoProgress, ProgressReporter};
use crate::request::ReplayRequest;
use crate::retry::{RetryConfig, RetryError, with_retry};
use crate::store::{
    CollectionPath, EventStore, RecordingStamp, StoreError, SUPPORTED_REPORT_COLLECTIONS,
};

/// Result of replaying one collection of a session
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOutcome {
    /// Session that was replayed
    pub session: String,
    /// Collection read from
    pub source: CollectionPath,
    /// Collection written to
    pub target: CollectionPath,
    /// Events fetched
    pub fetched: usize,
    /// Events written
    pub written: usize,
    /// Keys generated by the target, in write order
    pub keys: Vec<String>,
}

impl ReplayOutcome {
    /// True when the session had no events for this collection
    pub fn is_empty(&self) -> bool {
        self.fetched == 0
    }
}

/// Replays sessions from a source store into a target store
pub struct Replayer {
    source: Arc<dyn EventStore>,
    target: Arc<dyn EventStore>,
    progress: Arc<dyn ProgressReporter>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

impl std::fmt::Debug for Replayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replayer")
            .field("source", &self.source.describe())
            .field("target", &self.target.describe())
            .field("retry", &self.retry)
            .finish()
    }
}

impl Replayer {
    /// Create a builder
    pub fn builder() -> ReplayerBuilder {
        ReplayerBuilder::default()
    }

    /// Replay every supported collection of the session
    pub async fn run(&self, request: &ReplayRequest, cancel: &CancellationToken) -> Result<Vec<ReplayOutcome>> {
        let mut outcomes = Vec::with_capacity(SUPPORTED_REPORT_COLLECTIONS.len());
        for kind in SUPPORTED_REPORT_COLLECTIONS {
            outcomes.push(self.replay_collection(request, kind, cancel).await?);
        }
        Ok(outcomes)
    }

    /// Replay one collection of the session
    pub async fn replay_collection(
        &self,
        request: &ReplayRequest,
        kind: &str,
        cancel: &CancellationToken,
    ) -> Result<ReplayOutcome> {
        let source = request.source_collection(kind);
        let target = request.target_collection(kind);

        if cancel.is_cancelled() {
            return Err(CadenceError::Cancelled { written: 0 });
        }

        let events = self
            .source
            .fetch_ordered(&source)
            .await
            .map_err(|e| CadenceError::Fetch {
                session: request.session.clone(),
                collection: source.to_string(),
                source: e,
            })?;

        let mut outcome = ReplayOutcome {
            session: request.session.clone(),
            source: source.clone(),
            target: target.clone(),
            fetched: events.len(),
            written: 0,
            keys: Vec::with_capacity(events.len()),
        };

        if events.is_empty() {
            tracing::warn!(
                session = %request.session,
                collection = %source,
                "No reports found for session"
            );
            return Ok(outcome);
        }

        tracing::info!(
            session = %request.session,
            source = %source,
            target = %target,
            events = events.len(),
            span_ms = replay_span(&events).as_millis() as u64,
            "Replaying session"
        );

        let identity = request.identity();
        let mut pacer = Pacer::new();

        self.progress.start(source.as_str(), events.len());
        let result: Result<()> = async {
            for (index, original) in events.iter().enumerate() {
                let wait = pacer.gap_before(original.recording_time);
                if pause(wait, cancel).await == WaitOutcome::Cancelled {
                    return Err(CadenceError::Cancelled { written: outcome.written });
                }
                pacer.advance(original.recording_time);

                tracing::debug!(
                    index,
                    wait_ms = wait.as_millis() as u64,
                    lag_ms = original.lag().num_milliseconds(),
                    "Writing replayed event"
                );

                let key = self
                    .write(&target, original, &identity, cancel)
                    .await
                    .map_err(|e| match e {
                        RetryError::Cancelled => CadenceError::Cancelled { written: outcome.written },
                        RetryError::Exhausted { attempts, last } => {
                            tracing::error!(
                                session = %request.session,
                                collection = %target,
                                index,
                                attempts,
                                error = %last,
                                "Write failed, aborting replay"
                            );
                            CadenceError::Write {
                                session: request.session.clone(),
                                collection: target.to_string(),
                                index,
                                source: last,
                            }
                        }
                    })?;

                outcome.keys.push(key);
                outcome.written += 1;
                self.progress.tick();
            }
            Ok(())
        }
        .await;
        self.progress.finish();
        result?;

        tracing::info!(
            session = %request.session,
            target = %target,
            written = outcome.written,
            "Replay complete"
        );
        Ok(outcome)
    }

    /// Rewrite and write one event. Every attempt re-reads the clock, so a
    /// retry after a backoff still carries the original lag.
    async fn write(
        &self,
        target: &CollectionPath,
        original: &TelemetryEvent,
        identity: &Identity,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, RetryError<StoreError>> {
        let store = &self.target;
        let clock = self.clock.as_ref();
        with_retry(&self.retry, cancel, move || {
            let replayed = rewrite_for_replay(original, identity, clock);
            async move {
                store
                    .write_new(target, &replayed, RecordingStamp::AssignOnWrite)
                    .await
            }
        })
        .await
    }
}

/// Builder for [`Replayer`]
#[derive(Default)]
pub struct ReplayerBuilder {
    source: Option<Arc<dyn EventStore>>,
    target: Option<Arc<dyn EventStore>>,
    progress: Option<Arc<dyn ProgressReporter>>,
    clock: Option<Arc<dyn Clock>>,
    retry: Option<RetryConfig>,
}

impl ReplayerBuilder {
    /// Store sessions are read from
    pub fn source(mut self, store: Arc<dyn EventStore>) -> Self {
        self.source = Some(store);
        self
    }

    /// Store replayed events are written to
    pub fn target(mut self, store: Arc<dyn EventStore>) -> Self {
        self.target = Some(store);
        self
    }

    /// Progress reporter (default: none)
    pub fn progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Clock used to anchor rewritten timestamps (default: system clock)
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Retry policy for writes (default: [`RetryConfig::default`])
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Build the replayer
    pub fn build(self) -> Result<Replayer> {
        let source = self
            .source
            .ok_or_else(|| CadenceError::Configuration("replay source store not set".to_string()))?;
        let target = self
            .target
            .ok_or_else(|| CadenceError::Configuration("replay target store not set".to_string()))?;

        Ok(Replayer {
            source,
            target,
            progress: self.progress.unwrap_or_else(|| Arc::new(NoProgress)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            retry: self.retry.unwrap_or_default(),
        })
    }
}

/// Total original duration of a replay, first to last recording time
pub fn replay_span(events: &[TelemetryEvent]) -> Duration {
    Pacer::schedule(events).into_iter().sum()
}
