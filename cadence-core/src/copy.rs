//! Session capture
//!
//! Copies a unit's reports from a time window into a named session so the
//! session can be replayed later. Documents are written verbatim, including
//! their recording time. A capture that matches nothing leaves no session
//! document behind.

use tokio_util::sync::CancellationToken;

use crate::catalog::SessionDocument;
use crate::error::{CadenceError, Result};
use crate::event::TelemetryEvent;
use crate::progress::ProgressReporter;
use crate::request::CopyRequest;
use crate::retry::{RetryConfig, RetryError, with_retry};
use crate::store::{CollectionPath, EventStore, RecordingStamp, SUPPORTED_REPORT_COLLECTIONS, StoreError};

/// One collection copied into the session
#[derive(Debug, Clone, PartialEq)]
pub struct CopiedCollection {
    pub source: CollectionPath,
    pub target: CollectionPath,
    pub copied: usize,
}

/// Result of a capture
#[derive(Debug, Clone, PartialEq)]
pub struct CopyOutcome {
    pub session: String,
    pub collections: Vec<CopiedCollection>,
}

impl CopyOutcome {
    /// Documents copied across all collections
    pub fn total(&self) -> usize {
        self.collections.iter().map(|c| c.copied).sum()
    }
}

/// Capture the request's window from `source` into a session on `target`
pub async fn copy_session(
    source: &dyn EventStore,
    target: &dyn EventStore,
    request: &CopyRequest,
    retry: &RetryConfig,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<CopyOutcome> {
    if cancel.is_cancelled() {
        return Err(CadenceError::Cancelled { written: 0 });
    }

    let session = session_document(request);
    target.put_session(&session).await.map_err(CadenceError::Catalog)?;
    tracing::info!(
        session = %request.name,
        tags = ?request.tags,
        start = %request.start,
        end = %request.end,
        "Created session document"
    );

    let mut outcome = CopyOutcome {
        session: request.name.clone(),
        collections: Vec::with_capacity(SUPPORTED_REPORT_COLLECTIONS.len()),
    };

    for kind in SUPPORTED_REPORT_COLLECTIONS {
        let copied = copy_collection(source, target, request, kind, retry, progress, cancel, outcome.total()).await?;
        outcome.collections.push(copied);
    }

    if outcome.total() == 0 {
        tracing::warn!(
            session = %request.name,
            account = request.account,
            transponder = request.transponder,
            "No reports found in window, removing session document"
        );
        target
            .delete_session(&request.name)
            .await
            .map_err(CadenceError::Catalog)?;
    } else {
        tracing::info!(session = %request.name, copied = outcome.total(), "Copy complete");
    }

    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
async fn copy_collection(
    source: &dyn EventStore,
    target: &dyn EventStore,
    request: &CopyRequest,
    kind: &str,
    retry: &RetryConfig,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
    written_before: usize,
) -> Result<CopiedCollection> {
    let from = request.source_collection(kind);
    let to = request.target_collection(kind);

    let events = source
        .fetch_window(&from, request.start, request.end)
        .await
        .map_err(|e| CadenceError::Fetch {
            session: request.name.clone(),
            collection: from.to_string(),
            source: e,
        })?;

    tracing::debug!(collection = %from, matched = events.len(), "Fetched capture window");

    let mut copied = 0;
    if !events.is_empty() {
        progress.start(from.as_str(), events.len());
        let result: Result<()> = async {
            for (index, event) in events.iter().enumerate() {
                write_verbatim(target, &to, event, retry, cancel)
                    .await
                    .map_err(|e| match e {
                        RetryError::Cancelled => CadenceError::Cancelled {
                            written: written_before + copied,
                        },
                        RetryError::Exhausted { last, .. } => CadenceError::Write {
                            session: request.name.clone(),
                            collection: to.to_string(),
                            index,
                            source: last,
                        },
                    })?;
                copied += 1;
                progress.tick();
            }
            Ok(())
        }
        .await;
        progress.finish();
        result?;
    }

    Ok(CopiedCollection {
        source: from,
        target: to,
        copied,
    })
}

async fn write_verbatim(
    target: &dyn EventStore,
    collection: &CollectionPath,
    event: &TelemetryEvent,
    retry: &RetryConfig,
    cancel: &CancellationToken,
) -> std::result::Result<String, RetryError<StoreError>> {
    with_retry(retry, cancel, move || {
        target.write_new(collection, event, RecordingStamp::Preserve)
    })
    .await
}

fn session_document(request: &CopyRequest) -> SessionDocument {
    SessionDocument {
        name: request.name.clone(),
        description: request.description.clone(),
        tags: request.tags.clone(),
        account: request.account,
        transponder: request.transponder,
        start_time: request.start,
        end_time: request.end,
        created: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{CountingProgress, NoProgress};
    use crate::store::InMemoryStore;
    use chrono::{DateTime, TimeZone, Utc};

    fn ms(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn request() -> CopyRequest {
        CopyRequest::new(
            "brake-check",
            "hard braking on the ring road",
            vec!["e2e".to_string()],
            200,
            83,
            1_000,
            10_000,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_copy_window_preserves_documents() {
        let source = InMemoryStore::new("production");
        let target = InMemoryStore::new("captures");
        let request = request();
        let live = request.source_collection("report_data");

        source
            .seed(
                &live,
                vec![
                    TelemetryEvent::new(ms(900), ms(500)).with_field("n", 0),
                    TelemetryEvent::new(ms(2_000), ms(1_500)).with_identity(83).with_field("n", 1),
                    TelemetryEvent::new(ms(6_000), ms(5_000)).with_event_start(ms(4_900)).with_field("n", 2),
                    TelemetryEvent::new(ms(12_000), ms(11_000)).with_field("n", 3),
                ],
            )
            .await;

        let progress = CountingProgress::new();
        let outcome = copy_session(
            &source,
            &target,
            &request,
            &RetryConfig::no_retry(),
            &progress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.total(), 2);
        assert_eq!(progress.ticks(), 2);

        let captured = target.events(&request.target_collection("report_data")).await;
        let originals = source.events(&live).await;
        assert_eq!(captured, originals[1..3].to_vec());

        let session = target.session("brake-check").await.unwrap();
        assert_eq!(session.tags, vec!["e2e"]);
        assert_eq!(session.transponder, 83);
        assert_eq!(session.start_time, ms(1_000));
        assert_eq!(session.end_time, ms(10_000));
    }

    #[tokio::test]
    async fn test_empty_window_removes_session() {
        let source = InMemoryStore::new("production");
        let target = InMemoryStore::new("captures");

        let outcome = copy_session(
            &source,
            &target,
            &request(),
            &RetryConfig::no_retry(),
            &NoProgress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.total(), 0);
        assert!(target.session("brake-check").await.is_none());
        assert_eq!(target.write_count(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_reports_index() {
        let source = InMemoryStore::new("production");
        let target = InMemoryStore::new("captures");
        let request = request();
        source
            .seed(
                &request.source_collection("report_data"),
                vec![
                    TelemetryEvent::new(ms(2_000), ms(1_500)),
                    TelemetryEvent::new(ms(3_000), ms(2_500)),
                    TelemetryEvent::new(ms(4_000), ms(3_500)),
                ],
            )
            .await;

        // the store goes down after accepting two documents
        target.fail_writes_after(2);
        let err = copy_session(
            &source,
            &target,
            &request,
            &RetryConfig::no_retry(),
            &NoProgress,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(!err.is_cancelled());
        match err {
            CadenceError::Write { index, collection, .. } => {
                assert_eq!(index, 2);
                assert_eq!(collection, "Tests/brake-check/report_data");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(target.write_count(), 2);
        assert_eq!(target.events(&request.target_collection("report_data")).await.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_copy_writes_nothing() {
        let source = InMemoryStore::new("production");
        let target = InMemoryStore::new("captures");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = copy_session(
            &source,
            &target,
            &request(),
            &RetryConfig::no_retry(),
            &NoProgress,
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert!(target.session("brake-check").await.is_none());
    }
}
