//! Collection paths
//!
//! Both stores address documents by a slash-separated collection path, the
//! same layout the live system writes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Report collections a unit writes and a session captures
pub const SUPPORTED_REPORT_COLLECTIONS: &[&str] = &["report_data"];

/// Collection holding session documents
pub const SESSIONS_COLLECTION: &str = "Tests";

/// A typed collection path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// `Tests/{name}/{kind}`: events captured under a named session
    pub fn session(name: &str, kind: &str) -> Self {
        Self(format!("{}/{}/{}", SESSIONS_COLLECTION, name, kind))
    }

    /// `account/{account}/vehicle/{transponder}/{kind}`: a unit's live reports
    pub fn unit(account: u64, transponder: u64, kind: &str) -> Self {
        Self(format!("account/{}/vehicle/{}/{}", account, transponder, kind))
    }

    /// The path as stored
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
