//! Cadence CLI - capture telemetry sessions and replay them with their original timing

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cadence_core::config::CadenceConfig;
use cadence_core::ops::{
    CopyArgs, DEFAULT_RESULT_LIMIT, ListArgs, ReplayArgs, TagsArgs, run_copy, run_list, run_replay, run_tags,
};
use cadence_core::progress::LogProgress;
use cadence_core::store::SurrealConnector;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Capture telemetry sessions and replay them with their original cadence", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Extra configuration file, merged over ./cadence.toml
    #[arg(long, global = true, env = "CADENCE_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a session onto a unit of a local test store
    Replay {
        /// Session name
        #[arg(short = 'n', long = "name")]
        name: String,

        /// Account receiving the replayed reports
        #[arg(short = 'a', long = "account-id")]
        account: u64,

        /// Transponder the replayed reports are attributed to
        #[arg(short = 'x', long = "transponder-id")]
        transponder: u64,

        /// Store holding the session (overrides [source] url)
        #[arg(short = 'b', long = "source")]
        source: Option<String>,

        /// Store to replay into (overrides [target] url)
        #[arg(short = 'g', long = "target")]
        target: Option<String>,

        /// Accept a non-loopback target as a test store
        #[arg(long)]
        local: bool,
    },
    /// Capture a unit's reports from a time window into a session
    Copy {
        /// Session name
        #[arg(short = 'n', long = "name")]
        name: String,

        /// Session description
        #[arg(short = 'd', long = "description", default_value = "")]
        description: String,

        /// Session tag (repeatable)
        #[arg(short = 't', long = "tag", required = true)]
        tags: Vec<String>,

        /// Account of the captured unit
        #[arg(short = 'a', long = "account-id")]
        account: u64,

        /// Transponder of the captured unit
        #[arg(short = 'x', long = "transponder-id")]
        transponder: u64,

        /// Window start, Unix epoch millis
        #[arg(short = 's', long = "start-time")]
        start: i64,

        /// Window end, Unix epoch millis
        #[arg(short = 'e', long = "end-time")]
        end: i64,

        /// Store holding the unit's reports (overrides [source] url)
        #[arg(short = 'b', long = "source")]
        source: Option<String>,

        /// Store receiving the session (overrides [target] url)
        #[arg(short = 'g', long = "target")]
        target: Option<String>,
    },
    /// List sessions carrying a tag
    List {
        /// Tag to match
        #[arg(short = 't', long = "tag")]
        tag: String,

        /// Maximum number of sessions
        #[arg(short = 'r', long = "results", default_value_t = DEFAULT_RESULT_LIMIT)]
        results: usize,

        /// Store holding the session catalog (overrides [source] url)
        #[arg(short = 'b', long = "source")]
        source: Option<String>,
    },
    /// Count how many sessions carry each tag
    Tags {
        /// Maximum number of sessions scanned
        #[arg(short = 'r', long = "results", default_value_t = DEFAULT_RESULT_LIMIT)]
        results: usize,

        /// Store holding the session catalog (overrides [source] url)
        #[arg(short = 'b', long = "source")]
        source: Option<String>,
    },
    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    if let Commands::Version = cli.command {
        println!("cadence {}", env!("CARGO_PKG_VERSION"));
        println!("cadence-core {}", cadence_core::VERSION);
        return Ok(());
    }

    let config = CadenceConfig::load_with(cli.config.as_deref()).context("loading configuration")?;
    let connector = SurrealConnector;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Replay {
            name,
            account,
            transponder,
            source,
            target,
            local,
        } => {
            let args = ReplayArgs {
                session: name,
                account,
                transponder,
                source_url: source,
                target_url: target,
                marked_local: local,
            };
            let progress = Arc::new(LogProgress::new(config.replay.progress_every));
            let outcomes = run_replay(&connector, &config, &args, progress, &cancel).await?;
            for outcome in outcomes {
                tracing::info!(
                    session = %outcome.session,
                    source = %outcome.source,
                    target = %outcome.target,
                    fetched = outcome.fetched,
                    written = outcome.written,
                    "Replayed"
                );
            }
        }
        Commands::Copy {
            name,
            description,
            tags,
            account,
            transponder,
            start,
            end,
            source,
            target,
        } => {
            let args = CopyArgs {
                name,
                description,
                tags,
                account,
                transponder,
                start_ms: start,
                end_ms: end,
                source_url: source,
                target_url: target,
            };
            let progress = LogProgress::new(config.replay.progress_every);
            let outcome = run_copy(&connector, &config, &args, &progress, &cancel).await?;
            for collection in &outcome.collections {
                tracing::info!(
                    session = %outcome.session,
                    source = %collection.source,
                    target = %collection.target,
                    copied = collection.copied,
                    "Copied"
                );
            }
        }
        Commands::List { tag, results, source } => {
            let args = ListArgs {
                tag,
                limit: results,
                url: source,
            };
            for name in run_list(&connector, &config, &args).await? {
                println!("{}", name);
            }
        }
        Commands::Tags { results, source } => {
            let args = TagsArgs {
                limit: results,
                url: source,
            };
            for (tag, count) in run_tags(&connector, &config, &args).await? {
                println!("{}: {}", tag, count);
            }
        }
        Commands::Version => {}
    }

    Ok(())
}
