//! In-memory store for tests and dry runs
//!
//! Keeps every collection as an append-only vector, so insertion order is
//! the arrival order used to break recording-time ties. Failure injection
//! hooks let tests exercise the fetch and write error paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use super::{CollectionPath, EventStore, RecordingStamp, StoreConnector, StoreError, StoreResult};
use crate::catalog::SessionDocument;
use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::event::TelemetryEvent;

#[derive(Debug, Clone)]
struct StoredEvent {
    key: String,
    event: TelemetryEvent,
    written_at: Instant,
}

/// In-memory event store
pub struct InMemoryStore {
    name: String,
    collections: RwLock<HashMap<CollectionPath, Vec<StoredEvent>>>,
    sessions: RwLock<BTreeMap<String, SessionDocument>>,
    clock: Arc<dyn Clock>,
    fetches: AtomicUsize,
    writes: AtomicUsize,
    failing_writes: AtomicUsize,
    failing_fetches: AtomicUsize,
    writes_before_outage: AtomicUsize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: RwLock::new(HashMap::new()),
            sessions: RwLock::new(BTreeMap::new()),
            clock: Arc::new(SystemClock),
            fetches: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            failing_writes: AtomicUsize::new(0),
            failing_fetches: AtomicUsize::new(0),
            writes_before_outage: AtomicUsize::new(usize::MAX),
        }
    }

    /// Use `clock` for write stamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Seed events into a collection, as if they arrived in this order
    pub async fn seed(&self, collection: &CollectionPath, events: impl IntoIterator<Item = TelemetryEvent>) {
        let mut collections = self.collections.write().await;
        let stored = collections.entry(collection.clone()).or_default();
        for event in events {
            stored.push(StoredEvent {
                key: Uuid::new_v4().to_string(),
                event,
                written_at: Instant::now(),
            });
        }
    }

    /// Events of a collection in arrival order
    pub async fn events(&self, collection: &CollectionPath) -> Vec<TelemetryEvent> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|stored| stored.iter().map(|s| s.event.clone()).collect())
            .unwrap_or_default()
    }

    /// Generated keys of a collection in arrival order
    pub async fn keys(&self, collection: &CollectionPath) -> Vec<String> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|stored| stored.iter().map(|s| s.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Tokio instants at which each document of a collection was written
    pub async fn write_instants(&self, collection: &CollectionPath) -> Vec<Instant> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|stored| stored.iter().map(|s| s.written_at).collect())
            .unwrap_or_default()
    }

    /// Session document by name
    pub async fn session(&self, name: &str) -> Option<SessionDocument> {
        self.sessions.read().await.get(name).cloned()
    }

    /// Number of fetch calls served
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of successful writes
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make the next `count` writes fail
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Accept `count` more writes, then fail every write after them
    pub fn fail_writes_after(&self, count: usize) {
        self.writes_before_outage.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` fetches fail
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn in_outage(&self) -> bool {
        self.writes_before_outage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                usize::MAX => Some(n),
                0 => None,
                n => Some(n - 1),
            })
            .is_err()
    }

    async fn select<F>(&self, collection: &CollectionPath, keep: F) -> StoreResult<Vec<TelemetryEvent>>
    where
        F: Fn(&TelemetryEvent) -> bool,
    {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_fetches) {
            return Err(StoreError::Query {
                collection: collection.to_string(),
                message: "injected fetch failure".to_string(),
            });
        }

        let collections = self.collections.read().await;
        let mut events: Vec<TelemetryEvent> = collections
            .get(collection)
            .map(|stored| stored.iter().map(|s| s.event.clone()).filter(|e| keep(e)).collect())
            .unwrap_or_default();

        // stable: equal recording times keep arrival order
        events.sort_by_key(|e| e.recording_time);
        Ok(events)
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn fetch_ordered(&self, collection: &CollectionPath) -> StoreResult<Vec<TelemetryEvent>> {
        self.select(collection, |_| true).await
    }

    async fn fetch_window(
        &self,
        collection: &CollectionPath,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<TelemetryEvent>> {
        self.select(collection, |e| e.measurement_time > start && e.measurement_time < end)
            .await
    }

    async fn write_new(
        &self,
        collection: &CollectionPath,
        event: &TelemetryEvent,
        stamp: RecordingStamp,
    ) -> StoreResult<String> {
        if Self::take_failure(&self.failing_writes) || self.in_outage() {
            return Err(StoreError::Write {
                collection: collection.to_string(),
                message: "injected write failure".to_string(),
            });
        }

        let mut event = event.clone();
        if stamp == RecordingStamp::AssignOnWrite {
            event.recording_time = self.clock.now();
        }

        let key = Uuid::new_v4().to_string();
        let mut collections = self.collections.write().await;
        collections.entry(collection.clone()).or_default().push(StoredEvent {
            key: key.clone(),
            event,
            written_at: Instant::now(),
        });
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(key)
    }

    async fn put_session(&self, session: &SessionDocument) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.name.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, name: &str) -> StoreResult<bool> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(name).is_some())
    }

    async fn sessions_with_tag(&self, tag: &str, limit: usize) -> StoreResult<Vec<SessionDocument>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn sessions(&self, limit: usize) -> StoreResult<Vec<SessionDocument>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.values().take(limit).cloned().collect())
    }

    fn describe(&self) -> String {
        format!("memory://{}", self.name)
    }
}

/// Hands out shared in-memory stores keyed by URL
#[derive(Default)]
pub struct InMemoryConnector {
    stores: std::sync::Mutex<HashMap<String, Arc<InMemoryStore>>>,
    connects: AtomicUsize,
}

impl InMemoryConnector {
    /// Create a connector with no stores registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `store` to be returned for `url`
    pub fn register(&self, url: impl Into<String>, store: Arc<InMemoryStore>) {
        if let Ok(mut stores) = self.stores.lock() {
            stores.insert(url.into(), store);
        }
    }

    /// Number of connections opened
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreConnector for InMemoryConnector {
    async fn connect(&self, config: &StoreConfig) -> StoreResult<Arc<dyn EventStore>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mut stores = self.stores.lock().map_err(|_| StoreError::Connection {
            url: config.url.clone(),
            message: "connector state poisoned".to_string(),
        })?;
        let store = stores
            .entry(config.url.clone())
            .or_insert_with(|| Arc::new(InMemoryStore::new(config.url.clone())))
            .clone();
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ms(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_ordered_is_stable_on_ties() {
        let store = InMemoryStore::default();
        let path = CollectionPath::session("ties", "report_data");
        store
            .seed(
                &path,
                vec![
                    TelemetryEvent::new(ms(2_000), ms(1_900)).with_field("n", 0),
                    TelemetryEvent::new(ms(1_000), ms(900)).with_field("n", 1),
                    TelemetryEvent::new(ms(2_000), ms(1_950)).with_field("n", 2),
                ],
            )
            .await;

        let events = store.fetch_ordered(&path).await.unwrap();
        let order: Vec<i64> = events.iter().map(|e| e.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![1, 0, 2]);
        assert_eq!(store.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_window_is_exclusive() {
        let store = InMemoryStore::default();
        let path = CollectionPath::unit(18, 83, "report_data");
        store
            .seed(
                &path,
                vec![
                    TelemetryEvent::new(ms(1_100), ms(1_000)),
                    TelemetryEvent::new(ms(1_600), ms(1_500)),
                    TelemetryEvent::new(ms(2_100), ms(2_000)),
                ],
            )
            .await;

        let events = store.fetch_window(&path, ms(1_000), ms(2_000)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].measurement_time, ms(1_500));
    }

    #[tokio::test]
    async fn test_write_stamps() {
        let store = InMemoryStore::default();
        let path = CollectionPath::unit(1, 2, "report_data");
        let event = TelemetryEvent::new(ms(5_000), ms(4_000));

        store.write_new(&path, &event, RecordingStamp::Preserve).await.unwrap();
        store.write_new(&path, &event, RecordingStamp::AssignOnWrite).await.unwrap();

        let stored = store.events(&path).await;
        assert_eq!(stored[0].recording_time, ms(5_000));
        assert!(stored[1].recording_time > ms(5_000));
        assert_eq!(store.keys(&path).await.len(), 2);
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let store = InMemoryStore::default();
        let path = CollectionPath::unit(1, 2, "report_data");
        let event = TelemetryEvent::new(ms(5_000), ms(4_000));

        store.fail_next_writes(1);
        assert!(store.write_new(&path, &event, RecordingStamp::Preserve).await.is_err());
        assert!(store.write_new(&path, &event, RecordingStamp::Preserve).await.is_ok());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_outage_after_accepted_writes() {
        let store = InMemoryStore::default();
        let path = CollectionPath::unit(1, 2, "report_data");
        let event = TelemetryEvent::new(ms(5_000), ms(4_000));

        store.fail_writes_after(2);
        for _ in 0..2 {
            assert!(store.write_new(&path, &event, RecordingStamp::Preserve).await.is_ok());
        }
        assert!(store.write_new(&path, &event, RecordingStamp::Preserve).await.is_err());
        assert!(store.write_new(&path, &event, RecordingStamp::Preserve).await.is_err());
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_connector_shares_registered_store() {
        let connector = InMemoryConnector::new();
        let store = Arc::new(InMemoryStore::new("source"));
        connector.register("mem://source", store.clone());

        let config = StoreConfig::new("mem://source");
        let handle = connector.connect(&config).await.unwrap();
        handle
            .put_session(&SessionDocument::named("shared"))
            .await
            .unwrap();

        assert!(store.session("shared").await.is_some());
        assert_eq!(connector.connect_count(), 1);
    }
}
