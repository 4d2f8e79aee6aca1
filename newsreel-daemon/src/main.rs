//! # Newsreel
//!
//! Pipeline binary: each subcommand runs one worker against the shared
//! PostgreSQL store, mirroring how the workers are scheduled in
//! production (cron-style invocations for the batch workers, a
//! long-running process for acquisition).

mod acquire;
mod inventory;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsreel_core::config::Config;
use newsreel_core::indexer::IndexerClient;
use newsreel_core::nzbget::NzbgetClient;
use newsreel_core::providers::tmdb::TmdbProvider;
use newsreel_core::store::{PostgresStore, RetryQueue};
use newsreel_core::workers::backfill::BackfillWorker;
use newsreel_core::workers::health::{HealthSampler, NntpSettings};
use newsreel_core::workers::identify::IdentifyWorker;
use newsreel_core::workers::ingest::Ingester;
use newsreel_model::AccountId;

use acquire::AcquireDaemon;

#[derive(Parser, Debug)]
#[command(name = "newsreel")]
#[command(about = "Usenet media automation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scrape the indexer feed for releases newer than the stored cursor
    Ingest,
    /// Drain queued identification work
    Identify {
        /// Stop after this many messages even if more are visible
        #[arg(long, default_value_t = 10)]
        max_messages: usize,
    },
    /// Work through historical releases on a bounded search budget
    Backfill,
    /// Verify article availability for unverified releases
    Health,
    /// Run the acquisition loop against the local NZBGet instance
    Acquire,
    /// Create tables and indexes, then exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsreel=info,newsreel_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;

    let store = PostgresStore::connect(&config.database_url)
        .await
        .context("connecting to PostgreSQL")?;
    store
        .initialize_schema()
        .await
        .context("initializing store schema")?;

    match cli.command {
        Command::Ingest => run_ingest(&config, &store).await,
        Command::Identify { max_messages } => run_identify(&config, &store, max_messages).await,
        Command::Backfill => run_backfill(&config, &store).await,
        Command::Health => run_health(&config, &store).await,
        Command::Acquire => run_acquire(&config, store).await,
        Command::Migrate => {
            info!("store schema is up to date");
            Ok(())
        }
    }
}

async fn run_ingest(config: &Config, store: &PostgresStore) -> anyhow::Result<()> {
    let queue = RetryQueue::new(store.pool().clone());
    let indexer = IndexerClient::new(&config.indexer_base_url, &config.indexer_api_key);
    let provider = TmdbProvider::new(&config.tmdb_api_key);

    let outcome = Ingester::new(store, &queue, &indexer, &provider)
        .run()
        .await
        .context("ingest run failed")?;
    info!(
        inserted = outcome.inserted,
        enqueued = outcome.enqueued,
        halted = outcome.halted,
        rate_limited = outcome.rate_limited,
        "ingest finished"
    );
    Ok(())
}

async fn run_identify(
    config: &Config,
    store: &PostgresStore,
    max_messages: usize,
) -> anyhow::Result<()> {
    let queue = RetryQueue::new(store.pool().clone());
    let provider = TmdbProvider::new(&config.tmdb_api_key);
    let worker = IdentifyWorker::new(store, &queue, &provider);

    let mut handled = 0;
    while handled < max_messages {
        let Some(message) = queue.receive().await? else {
            break;
        };
        // Permanent per-message failures are already settled (message
        // deleted); they should not stop the drain.
        match worker.handle(message).await {
            Ok(outcome) => info!(?outcome, "identification message handled"),
            Err(err) => tracing::error!(error = %err, "identification message failed"),
        }
        handled += 1;
    }
    info!(handled, "identify finished");
    Ok(())
}

async fn run_backfill(config: &Config, store: &PostgresStore) -> anyhow::Result<()> {
    let queue = RetryQueue::new(store.pool().clone());
    let provider = TmdbProvider::new(&config.tmdb_api_key);

    let outcome = BackfillWorker::new(store, &queue, &provider, config.backfill_search_budget)
        .run()
        .await
        .context("backfill run failed")?;
    info!(
        searches = outcome.searches,
        requeued = outcome.requeued,
        skipped = outcome.skipped,
        "backfill finished"
    );
    Ok(())
}

async fn run_health(config: &Config, store: &PostgresStore) -> anyhow::Result<()> {
    let indexer = IndexerClient::new(&config.indexer_base_url, &config.indexer_api_key);
    let settings = NntpSettings {
        host: config.nntp_host.clone(),
        port: config.nntp_port,
        username: config.nntp_username.clone(),
        password: config.nntp_password.clone(),
        connections: config.nntp_connections,
    };
    HealthSampler::new(store, &indexer, settings, config.health_interval)
        .run()
        .await
        .context("health sampling failed")?;
    Ok(())
}

async fn run_acquire(config: &Config, store: PostgresStore) -> anyhow::Result<()> {
    let indexer = IndexerClient::new(&config.indexer_base_url, &config.indexer_api_key);
    let nzbget = NzbgetClient::new(&config.nzbget_url);
    let daemon = AcquireDaemon::new(
        store,
        indexer,
        nzbget,
        AccountId::new(config.account_id.clone()),
        config.poll_interval,
        config.acquire_interval,
    );
    daemon.run().await
}
