//! Cohort Catalog - Federated Cohort Discovery
//!
//! Collects one metadata record per participating biobank, publishes the
//! result as nested JSON and flat CSV, and loads the flat export into a
//! search index.
//!
//! Commands:
//! - `discover`: run one collection round across the configured sites
//! - `import`: load a flat CSV export into the document store
//! - `serve`: read-only HTTP API over the nested export

mod catalog;
mod config;
mod discovery;
mod error;
mod importer;
mod routes;
mod state;

use crate::catalog::export::read_flat_file;
use crate::catalog::CatalogWriter;
use crate::config::Settings;
use crate::discovery::{
    BatchStatus, CollectCoordinator, CsvDatasetReader, DatasetReader, LocalDispatch, MetadataExtractor,
    ParticipantId, RoundPolicy, SiteDirectory, SiteTask, StatisticsSummarizer, TaskKind,
};
use crate::importer::{CatalogImporter, ElasticsearchStore, IndexPolicy};
use crate::routes::create_router;
use crate::state::AppState;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "cohort-catalog", version)]
#[command(about = "Federated cohort metadata discovery and catalog loading")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Collect one payload per site and export the batch
    Discover {
        /// Participant ids (comma-separated), overrides SITES
        #[arg(long, value_delimiter = ',')]
        sites: Vec<String>,
        /// Successful responses required before the round may close early
        #[arg(long)]
        min_responses: Option<usize>,
        /// Grace window after quorum, in milliseconds
        #[arg(long)]
        grace_ms: Option<u64>,
        /// Site task to run
        #[arg(long, value_enum)]
        task: Option<TaskKind>,
        /// Export base path without extension
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Load a flat CSV catalog into the document store
    Import {
        /// CSV produced by `discover`
        csv: PathBuf,
        /// Target index, overrides COHORT_INDEX_NAME
        #[arg(long)]
        index: Option<String>,
        /// Delete and recreate the index first
        #[arg(long)]
        force: bool,
    },
    /// Serve the nested catalog over HTTP
    Serve {
        /// Nested JSON export, overrides CATALOG_PATH
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    debug!("Configuration loaded: {:?}", settings);

    match cli.command {
        Commands::Discover {
            sites,
            min_responses,
            grace_ms,
            task,
            output,
        } => {
            if !sites.is_empty() {
                settings.discovery.sites = sites.into_iter().map(ParticipantId::new).collect();
            }
            if min_responses.is_some() {
                settings.discovery.min_responses = min_responses;
            }
            if let Some(ms) = grace_ms {
                settings.discovery.grace_period = std::time::Duration::from_millis(ms);
            }
            if let Some(task) = task {
                settings.discovery.task = task;
            }
            if let Some(output) = output {
                settings.discovery.output_path = output;
            }
            discover(&settings).await
        }
        Commands::Import { csv, index, force } => {
            let index = index.unwrap_or_else(|| settings.store.index_name.clone());
            let policy = if force {
                IndexPolicy::ForceRecreate
            } else {
                IndexPolicy::Reuse
            };
            import(&settings, &csv, index, policy).await
        }
        Commands::Serve { catalog } => {
            if let Some(catalog) = catalog {
                settings.catalog_path = catalog;
            }
            serve(&settings).await
        }
    }
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cohort_catalog=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

// ============================================================================
// discover
// ============================================================================

async fn discover(settings: &Settings) -> anyhow::Result<()> {
    let directory = match &settings.data.site_directory {
        Some(path) => SiteDirectory::from_json_file(path)?,
        None => SiteDirectory::builtin(),
    };
    let reader: Arc<dyn DatasetReader> = Arc::new(CsvDatasetReader::new(
        settings.data.root_dir.clone(),
        settings.data.filename.clone(),
    ));

    let config = &settings.discovery;
    let targets: BTreeSet<ParticipantId> = config.sites.iter().cloned().collect();
    let policy = RoundPolicy::new(config.quorum(), config.grace_period)
        .with_round_timeout(config.round_timeout);
    let writer = CatalogWriter::new(config.output_path.clone());

    let abort = CancellationToken::new();
    let trigger = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, closing the round with what has arrived");
            trigger.cancel();
        }
    });

    info!(
        "Discovering cohorts across {} sites ({} task, {} directory entries)",
        targets.len(),
        config.task,
        directory.len()
    );

    match config.task {
        TaskKind::Metadata => {
            let extractor = MetadataExtractor::new(directory, reader);
            let records = run_round(extractor, targets, &policy, abort).await?;
            writer.write_catalog(&records)?;
        }
        TaskKind::Statistics => {
            let summarizer = StatisticsSummarizer::new(reader);
            let statistics = run_round(summarizer, targets, &policy, abort).await?;
            writer.write_payloads(&statistics)?;
        }
    }

    Ok(())
}

/// Run one round of `task` and take ownership of the collected payloads
async fn run_round<S: SiteTask>(
    task: S,
    targets: BTreeSet<ParticipantId>,
    policy: &RoundPolicy,
    abort: CancellationToken,
) -> anyhow::Result<Vec<S::Output>> {
    let dispatch = LocalDispatch::new(task);
    let task_name = dispatch.task_name();
    let coordinator = CollectCoordinator::new(dispatch, task_name);

    let outcome = coordinator.start_round(targets, policy, abort).await?;

    for collected in outcome.batch.iter() {
        debug!(
            "#{} {} after {:?}",
            collected.arrival, collected.participant, collected.elapsed
        );
    }
    for (participant, reason) in &outcome.failed {
        warn!("{} failed: {}", participant, reason);
    }
    for participant in &outcome.missing {
        warn!("No response from {}", participant);
    }
    match outcome.status() {
        BatchStatus::Empty => warn!("Round {} collected nothing", outcome.round_id),
        BatchStatus::BelowQuorum => warn!(
            "Round {} closed below quorum with {} of {} required responses",
            outcome.round_id,
            outcome.batch.len(),
            policy.min_responses
        ),
        BatchStatus::QuorumMet => info!(
            "Round {} collected {} responses ({:?}) in {} ms",
            outcome.round_id,
            outcome.batch.len(),
            outcome.close_reason,
            (outcome.closed_at - outcome.started_at).num_milliseconds()
        ),
    }

    Ok(outcome.into_batch().into_payloads())
}

// ============================================================================
// import
// ============================================================================

async fn import(settings: &Settings, csv: &Path, index: String, policy: IndexPolicy) -> anyhow::Result<()> {
    let rows = read_flat_file(csv).with_context(|| format!("Failed to read {}", csv.display()))?;
    info!("Read {} rows from {}", rows.len(), csv.display());

    let host = settings.store.primary_host()?.clone();
    info!("Connecting to document store at {}", host);
    let importer = CatalogImporter::new(ElasticsearchStore::new(host)?, index);

    let report = importer.run(&rows, policy).await?;
    if report.failed > 0 {
        warn!(
            "{} of {} documents failed to load into '{}'",
            report.failed,
            report.success + report.failed,
            importer.index()
        );
    }
    info!("Import report: {}", serde_json::to_string(&report)?);
    Ok(())
}

// ============================================================================
// serve
// ============================================================================

async fn serve(settings: &Settings) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(settings.catalog_path.clone()));
    if let Err(e) = state.reload().await {
        warn!(
            "Starting with an empty catalog, {} could not be read: {}",
            state.catalog_path().display(),
            e
        );
    }

    let app = create_router(state);
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("Catalog API listening on http://{}", addr);
    info!("   GET  /health");
    info!("   GET  /api/cohorts?country=");
    info!("   GET  /api/cohorts/{{name}}");
    info!("   GET  /api/schema/mapping");
    info!("   POST /api/catalog/reload");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
