use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use pinned_sync::api::PinnedItemsClient;
use pinned_sync::config;
use pinned_sync::db;
use pinned_sync::gate::MainSyncGate;
use pinned_sync::model::PinnedVerse;
use pinned_sync::store::{PinnedAction, PinnedStore, SqliteStore};
use pinned_sync::sync::{PinnedSyncer, SyncOutcome};

#[derive(Debug, Parser)]
#[command(author, version, about = "Pin Quran verses locally and sync them with the server")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Pin a verse, e.g. `2:255`
    Pin { verse_key: String },
    /// Remove a pinned verse
    Unpin { verse_key: String },
    /// Print pinned verses in pin order
    List,
    /// Remove every pinned verse
    Clear,
    /// Record that the main (bookmarks / reading sessions) sync has completed
    MarkMainSync,
    /// Reconcile pinned verses with the server
    Sync {
        /// Override `app.mushaf_id` from the config
        #[arg(long)]
        mushaf_id: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));

    match args.command {
        Command::Pin { verse_key } => {
            let verse = PinnedVerse::now(&verse_key)?;
            store.dispatch(PinnedAction::PinVerse(verse)).await?;
            info!(%verse_key, "pinned");
        }
        Command::Unpin { verse_key } => {
            store.dispatch(PinnedAction::UnpinVerse(verse_key.clone())).await?;
            info!(%verse_key, "unpinned");
        }
        Command::List => {
            for v in store.snapshot().await? {
                println!(
                    "{}\t{}\t{}",
                    v.verse_key,
                    v.timestamp,
                    v.server_id.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Clear => {
            store.dispatch(PinnedAction::ClearPinnedVerses).await?;
            info!("cleared pinned verses");
        }
        Command::MarkMainSync => {
            let at = store.mark_main_sync_complete().await?;
            info!(%at, "main sync marked complete");
        }
        Command::Sync { mushaf_id } => {
            let mushaf_id = mushaf_id.unwrap_or(cfg.app.mushaf_id);
            let api = Arc::new(PinnedItemsClient::from_config(&cfg)?);
            let gate = cfg.sync.configure_gate(MainSyncGate::new(store.clone()));
            let syncer = PinnedSyncer::new(api, store.clone(), gate)
                .with_policy(cfg.sync.retry_policy());

            match syncer.perform_pinned_sync(mushaf_id).await {
                SyncOutcome::Succeeded => info!("pinned verses in sync"),
                SyncOutcome::Abandoned => {
                    warn!("main sync has not completed; run `mark-main-sync` first")
                }
                SyncOutcome::Cancelled => warn!("sync cancelled"),
                SyncOutcome::FailedPermanently { attempts } => {
                    bail!("pinned verse sync failed after {} attempts", attempts)
                }
            }
        }
    }

    Ok(())
}
