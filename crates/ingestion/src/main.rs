//! PaperMap harvester
//!
//! Usage:
//!   papermap          run once, or on `schedule.interval_hours` if set
//!   papermap init     create a fresh store; fails if tables already exist

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use papermap_common::metrics::{register_metrics, CLASSIFIER_BUCKETS};
use papermap_common::{config::AppConfig, db::DbPool, InitMode, Repository, VERSION};
use papermap_ingestion::{Harvester, IeeeXploreClient, RunReport, ZeroShotClassifier};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    if config.observability.json_logging {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
    }

    info!("Starting PaperMap harvester v{}", VERSION);

    if config.observability.metrics_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .set_buckets_for_metric(Matcher::Suffix("classifier_duration_seconds".to_string()), CLASSIFIER_BUCKETS)?
            .install()?;
        register_metrics();
        info!(%addr, "Prometheus exporter listening");
    }

    let db = DbPool::new(&config.database).await?;
    let repository = Repository::new(db);

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("init") {
        repository.initialize(InitMode::Fresh).await.map_err(|e| {
            error!(error = %e, "Refusing to initialize store");
            e
        })?;
        info!("Store initialized");
        return Ok(());
    }

    if config.source.api_key.is_none() {
        warn!("No search API key configured, requests will likely be rejected");
    }

    let source = Arc::new(IeeeXploreClient::new(config.source.clone())?);
    let classifier = Arc::new(ZeroShotClassifier::new(&config.classifier, config.classifier_labels())?);
    let harvester = Harvester::from_config(&config, repository, source, classifier);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let Some(interval) = config.schedule_interval() else {
        tokio::select! {
            _ = &mut shutdown => info!("Received Ctrl+C, abandoning run"),
            result = harvester.run() => log_report(&result?),
        }
        return Ok(());
    };

    info!(interval_secs = interval.as_secs(), "Running on schedule");
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            _ = &mut shutdown => break,
            result = harvester.run() => match result {
                Ok(report) => log_report(&report),
                Err(e) if e.is_retryable() => error!(error = %e, "Run failed, retrying at next tick"),
                Err(e) => {
                    error!(error = %e, "Run failed and needs operator action, stopping");
                    return Err(e.into());
                }
            },
        }
    }

    info!("Shutdown signal received, harvester stopped");
    Ok(())
}

fn log_report(report: &RunReport) {
    for category in &report.categories {
        info!(
            category = %category.category,
            offset = category.final_offset,
            inserted = category.inserted,
            duplicates = category.duplicates,
            exhaustion = ?category.exhaustion,
            "Category summary"
        );
    }
    info!(
        run_id = %report.run_id,
        new_papers = report.new_papers_ingested(),
        classified = report.classification.classified,
        "Run summary"
    );
}
