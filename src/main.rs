use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use earth_data::common::types::TimeRange;
use earth_data::config::Config;
use earth_data::observability::{heartbeat, init_logging, init_metrics};
use earth_data::pipeline::normalize::registry::LocationRegistry;
use earth_data::pipeline::{open_store, BatchRequest, BatchRunner};
use earth_data::server::{start_server, ServerState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "earth_data")]
#[command(about = "Tide and sunrise/sunset ingestion for the Under One Sky installation")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration (defaults to $EARTH_DATA_CONFIG, then ./earth-data.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, normalize and store one batch for every configured location
    Ingest {
        /// First UTC day of the batch (YYYY-MM-DD); defaults to today plus batch.start_offset_days
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Number of days; defaults to batch.days
        #[arg(long)]
        days: Option<u32>,
    },
    /// Print stored records for a location as JSON lines
    Query {
        #[arg(long)]
        location: String,
        /// Range start: RFC3339 instant or YYYY-MM-DD (UTC midnight)
        #[arg(long)]
        start: String,
        /// Range end (exclusive): RFC3339 instant or YYYY-MM-DD
        #[arg(long)]
        end: String,
    },
    /// Serve the read API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

fn parse_instant(text: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .with_context(|| format!("'{}' is neither RFC3339 nor YYYY-MM-DD", text))?;
    Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
}

async fn run_ingest(config: &Config, start: Option<NaiveDate>, days: Option<u32>) -> anyhow::Result<()> {
    let first_day = start.unwrap_or_else(|| {
        Utc::now().date_naive() + Duration::days(config.batch.start_offset_days)
    });
    let request = BatchRequest::new(first_day, days.unwrap_or(config.batch.days));
    let runner = BatchRunner::from_config(config)?;

    println!("🔄 Ingesting {} day(s) from {} for {} location(s)...", request.days, first_day, config.locations.len());
    let cancel = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler available; never cancel
            std::future::pending::<()>().await;
        }
    };

    match runner.run(request, cancel).await {
        Ok(summary) => {
            heartbeat();
            println!("\n📊 Batch {}:", summary.batch_id);
            println!("   Tide observations fetched: {}", summary.fetched_tide);
            println!("   Almanac days fetched: {}", summary.fetched_astro);
            println!("   Normalized: {}", summary.normalized);
            println!("   Rejected: {}", summary.rejected);
            println!(
                "   Stored: {} new, {} replaced, {} unchanged",
                summary.persisted.inserted, summary.persisted.replaced, summary.persisted.unchanged
            );
            if !summary.source_failures.is_empty() {
                warn!("{} source fetches failed", summary.source_failures.len());
                println!("\n⚠️  Source failures:");
                for failure in &summary.source_failures {
                    println!("   - {} / {}: {}", failure.location, failure.source, failure.message);
                }
            }
            Ok(())
        }
        Err(e) => {
            error!("Batch failed: {}", e);
            Err(e.into())
        }
    }
}

async fn run_query(config: &Config, location: &str, start: &str, end: &str) -> anyhow::Result<()> {
    let range = TimeRange::new(parse_instant(start)?, parse_instant(end)?)?;
    let registry = LocationRegistry::from_locations(&config.locations)?;
    let key = registry.resolve(location).key;
    let store = open_store(&config.store)?;
    let records = store.query(&key, &range).await?;
    for record in &records {
        println!("{}", serde_json::to_string(record)?);
    }
    info!(location = %key, count = records.len(), "Query complete");
    Ok(())
}

async fn run_serve(config: &Config, port: u16) -> anyhow::Result<()> {
    let state = ServerState {
        store: open_store(&config.store)?,
        registry: Arc::new(LocationRegistry::from_locations(&config.locations)?),
    };
    start_server(state, port).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let _guard = init_logging(&config.logging)?;
    init_metrics();

    match cli.command {
        Commands::Ingest { start, days } => run_ingest(&config, start, days).await,
        Commands::Query { location, start, end } => run_query(&config, &location, &start, &end).await,
        Commands::Serve { port } => run_serve(&config, port).await,
    }
}
