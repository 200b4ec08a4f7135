//! Flagfeed - Feature-Flag Usage Feedback Service
//!
//! Entry point for the feedback service: serves the ingestion API with a
//! background statistics flush, and offers one-shot ingest, migration and
//! inspection commands.

use clap::{Parser, Subcommand};
use flagfeed_core::{
    api::{ApiServer, ApiServerConfig},
    error::{FlagfeedError, Result},
    flush_all, EntityResolver, FeedbackBatch, FeedbackIngestor, FeedbackStorage, FlagId,
    FlagfeedConfig, FlushSchedulerConfig, FlushSchedulerHandle, IdentifierCache, LibsqlStorage,
    StatisticsAccumulator, StatisticsMerger,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flagfeed")]
#[command(about = "Feature-flag usage feedback ingestion service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, env = "FLAGFEED_CONFIG")]
    config: Option<PathBuf>,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Database path (overrides the configured database.path)
    #[arg(long)]
    db_path: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the ingestion API and run the periodic statistics flush
    Serve {
        /// API server address (overrides the configured api.addr)
        #[arg(long)]
        addr: Option<String>,
    },

    /// Ingest feedback batches from a JSON file and flush them immediately
    Ingest {
        /// File holding one batch or an array of batches
        file: PathBuf,
    },

    /// Create or upgrade the database schema
    Migrate,

    /// Print stored statistics for a flag
    Stats {
        /// Flag identifier
        flag_id: String,
    },
}

/// A feedback file holds one batch or a list of them
#[derive(Deserialize)]
#[serde(untagged)]
enum BatchFile {
    Many(Vec<FeedbackBatch>),
    One(FeedbackBatch),
}

impl BatchFile {
    fn into_batches(self) -> Vec<FeedbackBatch> {
        match self {
            BatchFile::Many(batches) => batches,
            BatchFile::One(batch) => vec![batch],
        }
    }
}

/// Wired pipeline components sharing one storage backend
struct Pipeline {
    ingestor: Arc<FeedbackIngestor>,
    accumulator: Arc<StatisticsAccumulator>,
    merger: Arc<StatisticsMerger>,
}

impl Pipeline {
    fn new(config: &FlagfeedConfig, storage: Arc<dyn FeedbackStorage>) -> Self {
        let timeout = config.database.storage_timeout();
        let resolver = Arc::new(
            EntityResolver::new(Arc::new(IdentifierCache::new()), storage.clone())
                .with_storage_timeout(timeout),
        );
        let accumulator = Arc::new(StatisticsAccumulator::new(config.statistics.bucket_width()));
        let merger = Arc::new(StatisticsMerger::new(storage).with_storage_timeout(timeout));
        let ingestor = Arc::new(FeedbackIngestor::new(resolver, accumulator.clone()));

        Self {
            ingestor,
            accumulator,
            merger,
        }
    }
}

async fn open_storage(config: &FlagfeedConfig) -> Result<Arc<LibsqlStorage>> {
    debug!("Using database: {}", config.database.path);
    Ok(Arc::new(LibsqlStorage::from_path(&config.database.path).await?))
}

async fn serve(config: FlagfeedConfig, addr: Option<String>) -> Result<()> {
    let storage = open_storage(&config).await?;
    let pipeline = Pipeline::new(&config, storage);

    let mut scheduler = FlushSchedulerHandle::spawn(
        pipeline.accumulator.clone(),
        pipeline.merger.clone(),
        FlushSchedulerConfig {
            period: config.statistics.flush_period(),
            cutoff_age: config.statistics.cutoff_age(),
            flush_on_shutdown: config.statistics.flush_on_shutdown,
        },
    );

    let addr = match addr {
        Some(addr) => addr
            .parse()
            .map_err(|e| FlagfeedError::Other(format!("Invalid address {:?}: {}", addr, e)))?,
        None => config.api.socket_addr()?,
    };
    let server = ApiServer::new(
        ApiServerConfig {
            addr,
            cutoff_age: config.statistics.cutoff_age(),
        },
        pipeline.ingestor.clone(),
        pipeline.merger.clone(),
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal, stopping gracefully...");
    };
    let served = server.serve(shutdown).await;

    let report = scheduler.stop().await?;
    info!(
        "Flushed {} buckets this session ({} merged, {} dropped)",
        report.drained, report.merged, report.failed
    );

    served.map_err(FlagfeedError::from)
}

async fn ingest_file(config: FlagfeedConfig, file: PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(&file)?;
    let batches = serde_json::from_str::<BatchFile>(&content)?.into_batches();

    let storage = open_storage(&config).await?;
    let pipeline = Pipeline::new(&config, storage);

    for batch in &batches {
        let summary = pipeline.ingestor.ingest(batch).await?;
        println!(
            "{}: project {} ({} variables, {} usage records)",
            batch.project, summary.project_id, summary.variables, summary.flag_updates
        );
    }

    let report = flush_all(&pipeline.accumulator, &pipeline.merger).await;
    println!(
        "Flushed {} buckets ({} merged, {} failed)",
        report.drained, report.merged, report.failed
    );

    if report.failed > 0 {
        return Err(FlagfeedError::Database(format!(
            "{} statistics buckets could not be stored",
            report.failed
        )));
    }
    Ok(())
}

async fn print_stats(config: FlagfeedConfig, flag_id: &str) -> Result<()> {
    let flag_id = FlagId::from_string(flag_id)
        .map_err(|e| FlagfeedError::Validation(format!("Invalid flag id {:?}: {}", flag_id, e)))?;

    let storage = open_storage(&config).await?;
    let rows = storage.list_statistics(flag_id).await?;

    if rows.is_empty() {
        println!("No statistics stored for flag {}", flag_id);
        return Ok(());
    }

    println!("{:<25} {:>12} {:>12}", "interval", "positive", "negative");
    for row in rows {
        println!(
            "{:<25} {:>12} {:>12}",
            row.interval.to_rfc3339(),
            row.positive_count,
            row.negative_count
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::new(format!(
        "flagfeed={level},flagfeed_core={level},tower_http={level},libsql=warn",
        level = level.to_string().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("Flagfeed v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = FlagfeedConfig::load(cli.config.as_deref())?;
    if let Some(db_path) = cli.db_path {
        config.database.path = db_path;
    }

    match cli.command {
        Commands::Serve { addr } => serve(config, addr).await,
        Commands::Ingest { file } => ingest_file(config, file).await,
        Commands::Migrate => {
            // Opening the storage applies pending migrations
            open_storage(&config).await?;
            info!("Database ready: {}", config.database.path);
            Ok(())
        }
        Commands::Stats { flag_id } => print_stats(config, &flag_id).await,
    }
}
