//! SurrealDB-backed event store
//!
//! Connects through the `any` engine, so the same code serves remote
//! (`ws://`, `wss://`, `http://`, `https://`) and in-process (`mem://`)
//! stores. A bare `host:port` is treated as `ws://host:port`.
//!
//! Layout:
//! - `reports`: one record per event with `collection`, `recorded`,
//!   `measured`, `arrival` (for ordering and filtering) and `data` (the
//!   serialized event)
//! - `tests`: one record per session keyed by name, with `name`, `tags` and
//!   `data`

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::Surreal;
use surrealdb::engine::any::{self, Any};
use surrealdb::opt::auth::Root;
use uuid::Uuid;

use super::{CollectionPath, EventStore, RecordingStamp, SESSIONS_COLLECTION, StoreConnector, StoreError, StoreResult};
use crate::catalog::SessionDocument;
use crate::config::StoreConfig;
use crate::event::{TelemetryEvent, timestamp};

const REPORTS_TABLE: &str = "reports";
const SESSIONS_TABLE: &str = "tests";

#[derive(Debug, Serialize)]
struct ReportRecord {
    collection: String,
    recorded: String,
    measured: String,
    arrival: i64,
    data: String,
}

#[derive(Debug, Deserialize)]
struct DataRow {
    data: String,
}

#[derive(Debug, Serialize)]
struct SessionRecord {
    name: String,
    tags: Vec<String>,
    data: String,
}

/// SurrealDB event store
pub struct SurrealStore {
    db: Surreal<Any>,
    url: String,
    namespace: String,
    database: String,
    last_arrival: AtomicI64,
}

impl std::fmt::Debug for SurrealStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealStore")
            .field("url", &self.url)
            .field("namespace", &self.namespace)
            .field("database", &self.database)
            .finish()
    }
}

impl SurrealStore {
    /// Connect, sign in when credentials are configured, and select the
    /// namespace and database
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let url = endpoint(&config.url);
        let connection_error = |e: surrealdb::Error| StoreError::Connection {
            url: url.clone(),
            message: e.to_string(),
        };

        let db = any::connect(url.as_str()).await.map_err(connection_error)?;

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            db.signin(Root {
                username: username.as_str(),
                password: password.as_str(),
            })
            .await
            .map_err(connection_error)?;
        }

        db.use_ns(config.namespace.clone())
            .use_db(config.database.clone())
            .await
            .map_err(connection_error)?;

        tracing::debug!(
            url = %url,
            namespace = %config.namespace,
            database = %config.database,
            "Connected to SurrealDB"
        );

        Ok(Self {
            db,
            url,
            namespace: config.namespace.clone(),
            database: config.database.clone(),
            last_arrival: AtomicI64::new(0),
        })
    }

    /// Strictly increasing arrival stamp, used to break recording-time ties
    fn next_arrival(&self) -> i64 {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let previous = self
            .last_arrival
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or(now);
        now.max(previous + 1)
    }

    async fn select_events(
        &self,
        collection: &CollectionPath,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> StoreResult<Vec<TelemetryEvent>> {
        let query_error = |e: surrealdb::Error| StoreError::Query {
            collection: collection.to_string(),
            message: e.to_string(),
        };

        let sql = match window {
            None => {
                "SELECT data, recorded, arrival FROM type::table($table) \
                 WHERE collection = $collection \
                 ORDER BY recorded ASC, arrival ASC"
            }
            Some(_) => {
                "SELECT data, recorded, arrival FROM type::table($table) \
                 WHERE collection = $collection AND measured > $start AND measured < $end \
                 ORDER BY recorded ASC, arrival ASC"
            }
        };

        let mut query = self
            .db
            .query(sql)
            .bind(("table", REPORTS_TABLE))
            .bind(("collection", collection.to_string()));
        if let Some((start, end)) = window {
            query = query
                .bind(("start", timestamp::format(&start)))
                .bind(("end", timestamp::format(&end)));
        }

        let mut response = query.await.map_err(query_error)?;
        let rows: Vec<DataRow> = response.take(0).map_err(query_error)?;

        rows.into_iter()
            .map(|row| {
                serde_json::from_str(&row.data).map_err(|e| StoreError::Decode {
                    collection: collection.to_string(),
                    message: e.to_string(),
                })
            })
            .collect()
    }

    async fn select_sessions(&self, tag: Option<&str>, limit: usize) -> StoreResult<Vec<SessionDocument>> {
        let query_error = |e: surrealdb::Error| StoreError::Query {
            collection: SESSIONS_COLLECTION.to_string(),
            message: e.to_string(),
        };

        let sql = match tag {
            None => "SELECT data, name FROM type::table($table) ORDER BY name ASC LIMIT $limit",
            Some(_) => {
                "SELECT data, name FROM type::table($table) WHERE tags CONTAINS $tag \
                 ORDER BY name ASC LIMIT $limit"
            }
        };

        let mut query = self
            .db
            .query(sql)
            .bind(("table", SESSIONS_TABLE))
            .bind(("limit", limit as i64));
        if let Some(tag) = tag {
            query = query.bind(("tag", tag.to_string()));
        }

        let mut response = query.await.map_err(query_error)?;
        let rows: Vec<DataRow> = response.take(0).map_err(query_error)?;

        rows.into_iter()
            .map(|row| {
                serde_json::from_str(&row.data).map_err(|e| StoreError::Decode {
                    collection: SESSIONS_COLLECTION.to_string(),
                    message: e.to_string(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl EventStore for SurrealStore {
    async fn fetch_ordered(&self, collection: &CollectionPath) -> StoreResult<Vec<TelemetryEvent>> {
        self.select_events(collection, None).await
    }

    async fn fetch_window(
        &self,
        collection: &CollectionPath,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<TelemetryEvent>> {
        self.select_events(collection, Some((start, end))).await
    }

    async fn write_new(
        &self,
        collection: &CollectionPath,
        event: &TelemetryEvent,
        stamp: RecordingStamp,
    ) -> StoreResult<String> {
        let write_error = |message: String| StoreError::Write {
            collection: collection.to_string(),
            message,
        };

        let mut event = event.clone();
        if stamp == RecordingStamp::AssignOnWrite {
            event.recording_time = Utc::now();
        }

        let record = ReportRecord {
            collection: collection.to_string(),
            recorded: timestamp::format(&event.recording_time),
            measured: timestamp::format(&event.measurement_time),
            arrival: self.next_arrival(),
            data: serde_json::to_string(&event).map_err(|e| write_error(e.to_string()))?,
        };
        let key = Uuid::new_v4().simple().to_string();

        self.db
            .query("CREATE type::thing($table, $key) CONTENT $record RETURN NONE")
            .bind(("table", REPORTS_TABLE))
            .bind(("key", key.clone()))
            .bind(("record", record))
            .await
            .map_err(|e| write_error(e.to_string()))?
            .check()
            .map_err(|e| write_error(e.to_string()))?;

        Ok(key)
    }

    async fn put_session(&self, session: &SessionDocument) -> StoreResult<()> {
        let write_error = |message: String| StoreError::Write {
            collection: SESSIONS_COLLECTION.to_string(),
            message,
        };

        let record = SessionRecord {
            name: session.name.clone(),
            tags: session.tags.clone(),
            data: serde_json::to_string(session).map_err(|e| write_error(e.to_string()))?,
        };

        self.db
            .query("UPSERT type::thing($table, $name) CONTENT $record RETURN NONE")
            .bind(("table", SESSIONS_TABLE))
            .bind(("name", session.name.clone()))
            .bind(("record", record))
            .await
            .map_err(|e| write_error(e.to_string()))?
            .check()
            .map_err(|e| write_error(e.to_string()))?;

        Ok(())
    }

    async fn delete_session(&self, name: &str) -> StoreResult<bool> {
        let write_error = |e: surrealdb::Error| StoreError::Write {
            collection: SESSIONS_COLLECTION.to_string(),
            message: e.to_string(),
        };

        let mut response = self
            .db
            .query("SELECT name FROM type::thing($table, $name)")
            .query("DELETE type::thing($table, $name) RETURN NONE")
            .bind(("table", SESSIONS_TABLE))
            .bind(("name", name.to_string()))
            .await
            .map_err(write_error)?;

        let existing: Vec<serde_json::Value> = response.take(0).map_err(write_error)?;
        response.check().map_err(write_error)?;
        Ok(!existing.is_empty())
    }

    async fn sessions_with_tag(&self, tag: &str, limit: usize) -> StoreResult<Vec<SessionDocument>> {
        self.select_sessions(Some(tag), limit).await
    }

    async fn sessions(&self, limit: usize) -> StoreResult<Vec<SessionDocument>> {
        self.select_sessions(None, limit).await
    }

    fn describe(&self) -> String {
        format!("{} ({}/{})", self.url, self.namespace, self.database)
    }
}

/// Opens [`SurrealStore`] connections
#[derive(Debug, Default, Clone, Copy)]
pub struct SurrealConnector;

#[async_trait]
impl StoreConnector for SurrealConnector {
    async fn connect(&self, config: &StoreConfig) -> StoreResult<Arc<dyn EventStore>> {
        Ok(Arc::new(SurrealStore::connect(config).await?))
    }
}

fn endpoint(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("ws://{}", url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ms(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    async fn memory_store() -> SurrealStore {
        SurrealStore::connect(&StoreConfig::new("mem://")).await.unwrap()
    }

    #[test]
    fn test_endpoint_defaults_to_ws() {
        assert_eq!(endpoint("localhost:8070"), "ws://localhost:8070");
        assert_eq!(endpoint("mem://"), "mem://");
        assert_eq!(endpoint("https://db.example.com"), "https://db.example.com");
    }

    #[tokio::test]
    async fn test_write_then_fetch_ordered() {
        let store = memory_store().await;
        let path = CollectionPath::session("brake-check", "report_data");
        let other = CollectionPath::session("other", "report_data");

        for event in [
            TelemetryEvent::new(ms(4_000), ms(3_500)).with_field("n", 1),
            TelemetryEvent::new(ms(1_000), ms(900)).with_field("n", 0),
        ] {
            store.write_new(&path, &event, RecordingStamp::Preserve).await.unwrap();
        }
        store
            .write_new(&other, &TelemetryEvent::new(ms(500), ms(400)), RecordingStamp::Preserve)
            .await
            .unwrap();

        let events = store.fetch_ordered(&path).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload["n"], 0);
        assert_eq!(events[1].recording_time, ms(4_000));

        let window = store.fetch_window(&path, ms(1_000), ms(5_000)).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].measurement_time, ms(3_500));
    }

    #[tokio::test]
    async fn test_session_catalog() {
        let store = memory_store().await;
        store
            .put_session(&SessionDocument::named("brake-check").with_tags(["e2e", "smoke_test"]))
            .await
            .unwrap();
        store
            .put_session(&SessionDocument::named("night-run").with_tags(["soak"]))
            .await
            .unwrap();

        let tagged = store.sessions_with_tag("e2e", 10).await.unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].name, "brake-check");
        assert_eq!(store.sessions(10).await.unwrap().len(), 2);

        assert!(store.delete_session("night-run").await.unwrap());
        assert!(!store.delete_session("night-run").await.unwrap());
        assert_eq!(store.sessions(10).await.unwrap().len(), 1);
    }
}
