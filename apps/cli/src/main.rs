//! Amanah CLI: batched compliance screening of listed equities.
//!
//! Commands:
//! - `screen` - screen a universe CSV against Yahoo Finance, using the cache
//! - `cache-stats` - report cache size and expired entries
//! - `purge-expired` - delete expired cache entries
//! - `classify` - classify one company from attributes given on the command line

mod config;
mod main_lib;
mod universe;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use config::Config;
use main_lib::{init_tracing, OfflineAttributes, ScreenOptions};

#[derive(Parser)]
#[command(
    name = "amanah",
    version,
    about = "Amanah - batched compliance screening with caching and rate-limit protection"
)]
struct Cli {
    /// SQLite cache database. Overrides AMANAH_DB_PATH.
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Screen every entity of a universe CSV (symbol,name[,exchange]).
    Screen {
        /// Path to the universe CSV.
        #[arg(long)]
        universe: PathBuf,

        /// Ignore fresh cache entries and fetch everything again.
        #[arg(long, default_value_t = false)]
        force_refresh: bool,

        /// Write the JSON report here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Keep the cache in memory only (nothing is persisted).
        #[arg(long, default_value_t = false)]
        memory_cache: bool,

        /// Entities per batch. Overrides AMANAH_BATCH_SIZE.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Batches processed concurrently. Overrides AMANAH_MAX_CONCURRENT_BATCHES.
        #[arg(long)]
        max_concurrent_batches: Option<usize>,
    },
    /// Report cache size, payload bytes and expired entries.
    CacheStats,
    /// Delete expired cache entries.
    PurgeExpired,
    /// Classify one company offline from the given attributes.
    Classify {
        #[arg(long)]
        symbol: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        sector: Option<String>,

        #[arg(long)]
        industry: Option<String>,

        #[arg(long)]
        market_cap: Option<f64>,

        /// Debt-to-equity as a ratio (0.5 means debt is half of equity).
        #[arg(long)]
        debt_to_equity: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    init_tracing(config.log_format);

    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }

    match cli.command {
        Commands::Screen {
            universe,
            force_refresh,
            output,
            memory_cache,
            batch_size,
            max_concurrent_batches,
        } => {
            config.pipeline.force_refresh |= force_refresh;
            if let Some(batch_size) = batch_size {
                config.pipeline.batch_size = batch_size;
            }
            if let Some(max_concurrent_batches) = max_concurrent_batches {
                config.pipeline.max_concurrent_batches = max_concurrent_batches;
            }

            let options = ScreenOptions {
                universe,
                output,
                memory_cache,
            };
            main_lib::screen(&config, &options).await?;
        }
        Commands::CacheStats => {
            let stats = main_lib::cache_stats(&config)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::PurgeExpired => {
            let removed = main_lib::purge_expired(&config)?;
            println!("{}", removed);
        }
        Commands::Classify {
            symbol,
            name,
            sector,
            industry,
            market_cap,
            debt_to_equity,
        } => {
            let result = main_lib::classify_offline(
                &config.classifier,
                OfflineAttributes {
                    symbol,
                    name,
                    sector,
                    industry,
                    market_cap,
                    debt_to_equity,
                },
            )?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
