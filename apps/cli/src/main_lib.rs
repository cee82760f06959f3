use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use amanah_core::screening::{
    CacheStats, CacheStore, ClassificationResult, Classifier, ClassifierConfig, LogProgressReporter,
    MemoryCacheStore, ScreeningPipeline, ScreeningReport,
};
use amanah_market_data::{Entity, FetchedAttributes, YahooAttributeSource};
use amanah_storage_sqlite::{db, SqliteCacheStore};

use crate::config::{Config, LogFormat};

pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init(),
    }
}

/// Open the durable cache at `db_path`, creating and migrating it when needed.
pub fn open_sqlite_cache(db_path: &str) -> Result<Arc<SqliteCacheStore>> {
    let pool = db::open(db_path)
        .with_context(|| format!("Failed to open cache database {}", db_path))?;
    Ok(Arc::new(SqliteCacheStore::new(pool)))
}

/// Arguments of one `screen` invocation.
#[derive(Debug, Clone)]
pub struct ScreenOptions {
    pub universe: PathBuf,
    pub output: Option<PathBuf>,
    pub memory_cache: bool,
}

pub async fn screen(config: &Config, options: &ScreenOptions) -> Result<ScreeningReport> {
    let entities = crate::universe::load_universe(&options.universe)?;

    let cache: Arc<dyn CacheStore> = if options.memory_cache {
        tracing::info!("Using in-memory cache; results will not be persisted");
        Arc::new(MemoryCacheStore::new())
    } else {
        open_sqlite_cache(&config.db_path)?
    };
    let source = Arc::new(YahooAttributeSource::new()?);

    let pipeline = ScreeningPipeline::builder(source, cache)
        .config(config.pipeline.clone())
        .classifier_config(config.classifier.clone())
        .progress_reporter(Arc::new(LogProgressReporter))
        .build()?;

    let cancel = CancellationToken::new();
    let ctrl_c = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
    let outcome = pipeline.run(&entities, &cancel).await;
    ctrl_c.abort();

    let report = outcome?;
    write_report(&report, options.output.as_deref())?;
    Ok(report)
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("Interrupt received, stopping after the current entity");
        cancel.cancel();
    }
}

/// Write the report as pretty JSON to `output`, or to stdout.
pub fn write_report(report: &ScreeningReport, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            tracing::info!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

pub fn cache_stats(config: &Config) -> Result<CacheStats> {
    Ok(open_sqlite_cache(&config.db_path)?.stats()?)
}

pub fn purge_expired(config: &Config) -> Result<usize> {
    let removed = open_sqlite_cache(&config.db_path)?.purge_expired()?;
    tracing::info!("Removed {} expired cache entries", removed);
    Ok(removed)
}

/// Attributes supplied on the command line for an offline classification.
#[derive(Debug, Clone, Default)]
pub struct OfflineAttributes {
    pub symbol: String,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub market_cap: Option<f64>,
    pub debt_to_equity: Option<f64>,
}

/// Classify one entity from supplied attributes, without network or cache.
pub fn classify_offline(
    config: &ClassifierConfig,
    input: OfflineAttributes,
) -> Result<ClassificationResult> {
    let classifier = Classifier::new(config.clone())?;
    let now = Utc::now();
    let symbol = input.symbol.to_uppercase();
    let display_name = input.name.clone().unwrap_or_else(|| symbol.clone());
    let entity = Entity::new(symbol.clone(), display_name);

    let mut attrs = FetchedAttributes::new(symbol, now).source("MANUAL");
    if let Some(name) = input.name {
        attrs = attrs.name(name);
    }
    if let Some(sector) = input.sector {
        attrs = attrs.sector(sector);
    }
    if let Some(industry) = input.industry {
        attrs = attrs.industry(industry);
    }
    if let Some(market_cap) = input.market_cap {
        attrs = attrs.market_cap(market_cap);
    }
    if let Some(debt_to_equity) = input.debt_to_equity {
        attrs = attrs.debt_to_equity(debt_to_equity);
    }

    Ok(classifier.classify(&entity, &attrs, now)?)
}
