//! Operation entry points
//!
//! Each `run_*` function turns operator input into a validated request,
//! opens the stores it needs through a [`StoreConnector`], and runs the
//! operation. Validation happens before any connection is opened, so a bad
//! request never touches a store. Connections are dropped when the function
//! returns, on every path.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::catalog::{count_tags, list_sessions};
use crate::config::{CadenceConfig, StoreConfig};
use crate::copy::{CopyOutcome, copy_session};
use crate::error::{CadenceError, Result};
use crate::progress::ProgressReporter;
use crate::replay::{ReplayOutcome, Replayer};
use crate::request::{CopyRequest, ListRequest, ReplayRequest, TagsRequest};
use crate::store::{EventStore, StoreConnector};

/// Default number of sessions scanned by list and tags
pub const DEFAULT_RESULT_LIMIT: usize = 10;

/// Operator input for a replay
#[derive(Debug, Clone, Default)]
pub struct ReplayArgs {
    pub session: String,
    pub account: u64,
    pub transponder: u64,
    /// Overrides `[source] url`
    pub source_url: Option<String>,
    /// Overrides `[target] url`
    pub target_url: Option<String>,
    /// Accept a non-loopback target as a test target
    pub marked_local: bool,
}

/// Operator input for a capture
#[derive(Debug, Clone, Default)]
pub struct CopyArgs {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub account: u64,
    pub transponder: u64,
    /// Window start, Unix epoch millis
    pub start_ms: i64,
    /// Window end, Unix epoch millis
    pub end_ms: i64,
    pub source_url: Option<String>,
    pub target_url: Option<String>,
}

/// Operator input for listing sessions by tag
#[derive(Debug, Clone)]
pub struct ListArgs {
    pub tag: String,
    pub limit: usize,
    /// Store holding the session catalog; overrides `[source] url`
    pub url: Option<String>,
}

/// Operator input for tag frequencies
#[derive(Debug, Clone)]
pub struct TagsArgs {
    pub limit: usize,
    pub url: Option<String>,
}

/// Replay a session onto a unit
pub async fn run_replay(
    connector: &dyn StoreConnector,
    config: &CadenceConfig,
    args: &ReplayArgs,
    progress: Arc<dyn ProgressReporter>,
    cancel: &CancellationToken,
) -> Result<Vec<ReplayOutcome>> {
    let source_config = config.source_store(args.source_url.as_deref())?;
    let target_config = config.target_store(args.target_url.as_deref())?;
    let request = ReplayRequest::new(
        args.session.clone(),
        args.account,
        args.transponder,
        &target_config,
        args.marked_local,
    )?;

    tracing::info!(
        session = %request.session,
        source = %source_config.url,
        target = %target_config.url,
        accepted_as = ?request.target,
        "Starting replay"
    );

    let source = open(connector, &source_config).await?;
    let target = open(connector, &target_config).await?;

    let replayer = Replayer::builder()
        .source(source)
        .target(target)
        .progress(progress)
        .retry(config.replay.retry.clone())
        .build()?;

    replayer.run(&request, cancel).await
}

/// Capture a unit's reports into a named session
pub async fn run_copy(
    connector: &dyn StoreConnector,
    config: &CadenceConfig,
    args: &CopyArgs,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<CopyOutcome> {
    let source_config = config.source_store(args.source_url.as_deref())?;
    let target_config = config.target_store(args.target_url.as_deref())?;
    let request = CopyRequest::new(
        args.name.clone(),
        args.description.clone(),
        args.tags.clone(),
        args.account,
        args.transponder,
        args.start_ms,
        args.end_ms,
    )?;

    tracing::info!(
        session = %request.name,
        source = %source_config.url,
        target = %target_config.url,
        "Starting copy"
    );

    let source = open(connector, &source_config).await?;
    let target = open(connector, &target_config).await?;

    copy_session(
        source.as_ref(),
        target.as_ref(),
        &request,
        &config.replay.retry,
        progress,
        cancel,
    )
    .await
}

/// Names of sessions carrying a tag
pub async fn run_list(connector: &dyn StoreConnector, config: &CadenceConfig, args: &ListArgs) -> Result<Vec<String>> {
    let request = ListRequest::new(args.tag.clone(), args.limit)?;
    let store_config = config.source_store(args.url.as_deref())?;

    let store = open(connector, &store_config).await?;
    list_sessions(store.as_ref(), &request).await
}

/// Tag frequencies over the first sessions of the catalog
pub async fn run_tags(
    connector: &dyn StoreConnector,
    config: &CadenceConfig,
    args: &TagsArgs,
) -> Result<BTreeMap<String, usize>> {
    let request = TagsRequest::new(args.limit)?;
    let store_config = config.source_store(args.url.as_deref())?;

    let store = open(connector, &store_config).await?;
    count_tags(store.as_ref(), &request).await
}

async fn open(connector: &dyn StoreConnector, config: &StoreConfig) -> Result<Arc<dyn EventStore>> {
    let store = connector.connect(config).await.map_err(CadenceError::Connection)?;
    tracing::debug!(store = %store.describe(), "Opened store");
    Ok(store)
}
