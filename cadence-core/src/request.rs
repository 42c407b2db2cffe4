//! Validated operation requests
//!
//! Each request is built once from operator input. Construction is the only
//! place input is checked; the operations receive typed values.

use chrono::{DateTime, TimeZone, Utc};

use crate::config::StoreConfig;
use crate::error::{CadenceError, Result};
use crate::event::Identity;
use crate::store::CollectionPath;

/// Why a replay destination was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayTarget {
    /// In-process or loopback store
    Local,
    /// Remote store the operator explicitly marked as a test target
    MarkedLocal,
}

impl ReplayTarget {
    /// Classify a destination. Anything neither local nor marked is rejected.
    pub fn classify(target: &StoreConfig, marked_local: bool) -> Result<Self> {
        if target.is_local() {
            Ok(ReplayTarget::Local)
        } else if marked_local {
            Ok(ReplayTarget::MarkedLocal)
        } else {
            Err(CadenceError::Configuration(format!(
                "replay only supports a local test target, got '{}' (pass --local to mark it as one)",
                target.url
            )))
        }
    }
}

/// A replay of one session onto a unit
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayRequest {
    /// Session to replay
    pub session: String,
    /// Account receiving the events
    pub account: u64,
    /// Transponder the events are attributed to
    pub transponder: u64,
    /// How the destination was accepted
    pub target: ReplayTarget,
}

impl ReplayRequest {
    /// Validate a replay request against its destination
    pub fn new(
        session: impl Into<String>,
        account: u64,
        transponder: u64,
        target: &StoreConfig,
        marked_local: bool,
    ) -> Result<Self> {
        let session = validate_name("session name", session.into())?;
        let target = ReplayTarget::classify(target, marked_local)?;
        Ok(Self {
            session,
            account,
            transponder,
            target,
        })
    }

    /// Identity stamped on every replayed event
    pub fn identity(&self) -> Identity {
        Identity::Numeric(self.transponder)
    }

    /// Where the session's events of `kind` are read from
    pub fn source_collection(&self, kind: &str) -> CollectionPath {
        CollectionPath::session(&self.session, kind)
    }

    /// Where replayed events of `kind` are written
    pub fn target_collection(&self, kind: &str) -> CollectionPath {
        CollectionPath::unit(self.account, self.transponder, kind)
    }
}

/// A capture of a unit's reports into a named session
#[derive(Debug, Clone, PartialEq)]
pub struct CopyRequest {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub account: u64,
    pub transponder: u64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CopyRequest {
    /// Validate a copy request; `start_ms`/`end_ms` are Unix epoch millis
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        tags: Vec<String>,
        account: u64,
        transponder: u64,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Self> {
        let name = validate_name("session name", name.into())?;

        let tags: Vec<String> = tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if tags.is_empty() {
            return Err(CadenceError::Configuration(
                "at least one tag is required".to_string(),
            ));
        }

        let start = from_epoch_millis("start time", start_ms)?;
        let end = from_epoch_millis("end time", end_ms)?;
        if end <= start {
            return Err(CadenceError::Configuration(format!(
                "end time {} is not after start time {}",
                end, start
            )));
        }

        Ok(Self {
            name,
            description: description.into(),
            tags,
            account,
            transponder,
            start,
            end,
        })
    }

    /// Live collection of `kind` for the captured unit
    pub fn source_collection(&self, kind: &str) -> CollectionPath {
        CollectionPath::unit(self.account, self.transponder, kind)
    }

    /// Session collection of `kind` the capture is written to
    pub fn target_collection(&self, kind: &str) -> CollectionPath {
        CollectionPath::session(&self.name, kind)
    }
}

/// Sessions carrying a tag
#[derive(Debug, Clone, PartialEq)]
pub struct ListRequest {
    pub tag: String,
    pub limit: usize,
}

impl ListRequest {
    pub fn new(tag: impl Into<String>, limit: usize) -> Result<Self> {
        let tag = tag.into().trim().to_string();
        if tag.is_empty() {
            return Err(CadenceError::Configuration("tag must not be empty".to_string()));
        }
        Ok(Self {
            tag,
            limit: validate_limit(limit)?,
        })
    }
}

/// Tag frequencies over the first `limit` sessions
#[derive(Debug, Clone, PartialEq)]
pub struct TagsRequest {
    pub limit: usize,
}

impl TagsRequest {
    pub fn new(limit: usize) -> Result<Self> {
        Ok(Self {
            limit: validate_limit(limit)?,
        })
    }
}

fn validate_name(what: &str, name: String) -> Result<String> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(CadenceError::Configuration(format!("{} must not be empty", what)));
    }
    if name.contains('/') {
        return Err(CadenceError::Configuration(format!(
            "{} '{}' must not contain '/'",
            what, name
        )));
    }
    Ok(name)
}

fn validate_limit(limit: usize) -> Result<usize> {
    if limit == 0 {
        return Err(CadenceError::Configuration(
            "result limit must be at least 1".to_string(),
        ));
    }
    Ok(limit)
}

fn from_epoch_millis(what: &str, millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        CadenceError::Configuration(format!("{} {} is out of range", what, millis))
    })
}
