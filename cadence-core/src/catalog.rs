//! Session catalog: session documents, listing by tag, tag frequencies

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};
use crate::event::timestamp;
use crate::request::{ListRequest, TagsRequest};
use crate::store::EventStore;

/// Metadata document describing a captured session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionDocument {
    /// Session name, also the document key
    pub name: String,

    /// Free-text description
    #[serde(default)]
    pub description: String,

    /// Tags used to find the session later
    #[serde(rename = "Tag", default)]
    pub tags: Vec<String>,

    /// Account the captured unit belonged to
    #[serde(default)]
    pub account: u64,

    /// Transponder the events were captured from
    #[serde(default)]
    pub transponder: u64,

    /// Capture window start
    #[serde(with = "timestamp")]
    pub start_time: DateTime<Utc>,

    /// Capture window end
    #[serde(with = "timestamp")]
    pub end_time: DateTime<Utc>,

    /// When the session document was written
    #[serde(with = "timestamp")]
    pub created: DateTime<Utc>,
}

impl SessionDocument {
    /// A bare session with only a name, window and creation time set to now
    pub fn named(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            account: 0,
            transponder: 0,
            start_time: now,
            end_time: now,
            created: now,
        }
    }

    /// Set tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Names of sessions carrying the requested tag
pub async fn list_sessions(store: &dyn EventStore, request: &ListRequest) -> Result<Vec<String>> {
    let sessions = store
        .sessions_with_tag(&request.tag, request.limit)
        .await
        .map_err(CadenceError::Catalog)?;

    tracing::debug!(
        tag = %request.tag,
        found = sessions.len(),
        store = %store.describe(),
        "Listed sessions"
    );

    Ok(sessions.into_iter().map(|s| s.name).collect())
}

/// How many of the first `limit` sessions carry each tag, sorted by tag
pub async fn count_tags(store: &dyn EventStore, request: &TagsRequest) -> Result<BTreeMap<String, usize>> {
    let sessions = store
        .sessions(request.limit)
        .await
        .map_err(CadenceError::Catalog)?;

    if sessions.is_empty() {
        tracing::warn!(store = %store.describe(), "No session documents found");
    }

    Ok(tally_tags(&sessions))
}

fn tally_tags(sessions: &[SessionDocument]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for tag in sessions.iter().flat_map(|s| s.tags.iter()) {
        *counts.entry(tag.clone()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::default();
        for session in [
            SessionDocument::named("brake-check").with_tags(["e2e", "smoke_test"]),
            SessionDocument::named("cold-start").with_tags(["e2e"]),
            SessionDocument::named("night-run").with_tags(["soak"]),
        ] {
            store.put_session(&session).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_list_sessions_by_tag() {
        let store = seeded_store().await;
        let request = ListRequest::new("e2e", 10).unwrap();

        let names = list_sessions(&store, &request).await.unwrap();
        assert_eq!(names, vec!["brake-check", "cold-start"]);
    }

    #[tokio::test]
    async fn test_list_sessions_respects_limit() {
        let store = seeded_store().await;
        let request = ListRequest::new("e2e", 1).unwrap();

        let names = list_sessions(&store, &request).await.unwrap();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn test_count_tags() {
        let store = seeded_store().await;
        let request = TagsRequest::new(10).unwrap();

        let counts = count_tags(&store, &request).await.unwrap();
        assert_eq!(counts.get("e2e"), Some(&2));
        assert_eq!(counts.get("smoke_test"), Some(&1));
        assert_eq!(counts.get("soak"), Some(&1));
        assert_eq!(counts.keys().next().map(String::as_str), Some("e2e"));
    }

    #[test]
    fn test_session_document_wire_names() {
        let doc = SessionDocument::named("brake-check").with_tags(["e2e"]);
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["Name"], "brake-check");
        assert_eq!(value["Tag"], serde_json::json!(["e2e"]));
        assert!(value.get("StartTime").is_some());
    }
}
