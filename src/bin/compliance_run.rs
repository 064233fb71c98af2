//! Concentration-test suite runner
//!
//! Evaluates the full test suite for one deal and analysis date against
//! metrics supplied by the portfolio-analytics export, recording results
//! to the execution ledger.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost/clo_compliance \
//!   cargo run --bin compliance_run --features database -- \
//!   MAG17 2024-06-28 metrics/mag17_2024-06-28.json
//! ```
//!
//! The metrics file maps test numbers to externally computed values:
//!
//! ```json
//! { "1": { "numerator": "368000000", "denominator": "400000000", "calculated_value": "0.92" } }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use clo_compliance::batch::{BatchRunner, CancelFlag, MetricSource};
use clo_compliance::catalog::TestCatalog;
use clo_compliance::database::{DatabaseManager, PgOverrideRepository};
use clo_compliance::models::{PassFailStatus, PortfolioMetric};
use clo_compliance::resolver::{ResolutionCache, ThresholdResolver};

/// Metrics loaded from an analytics export file
struct FileMetricSource {
    metrics: HashMap<i32, PortfolioMetric>,
}

impl FileMetricSource {
    fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: HashMap<String, PortfolioMetric> = serde_json::from_str(&raw)?;
        let metrics = parsed
            .into_iter()
            .filter_map(|(key, metric)| key.parse::<i32>().ok().map(|n| (n, metric)))
            .collect();
        Ok(Self { metrics })
    }
}

#[async_trait]
impl MetricSource for FileMetricSource {
    async fn metric(
        &self,
        _deal_id: &str,
        test_number: i32,
        _analysis_date: NaiveDate,
    ) -> anyhow::Result<Option<PortfolioMetric>> {
        Ok(self.metrics.get(&test_number).copied())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(deal_id), Some(date_arg), Some(metrics_path)) =
        (args.next(), args.next(), args.next())
    else {
        eprintln!("Usage: compliance_run <deal_id> <analysis_date> <metrics.json>");
        std::process::exit(2);
    };
    let analysis_date: NaiveDate = date_arg.parse()?;

    let manager = DatabaseManager::with_default_config().await?;
    manager.verify_schema().await?;

    let catalog = TestCatalog::standard()?;
    let cache = Arc::new(ResolutionCache::new());
    let overrides = Arc::new(PgOverrideRepository::with_cache(
        manager.pool().clone(),
        cache.clone(),
    ));
    let recorder = Arc::new(manager.execution_recorder());
    let resolver = Arc::new(ThresholdResolver::with_cache(catalog, overrides, cache));

    let metrics = Arc::new(FileMetricSource::load(&metrics_path)?);
    let runner = BatchRunner::new(resolver, recorder);
    let outcome = runner
        .run_suite(&deal_id, analysis_date, metrics, &CancelFlag::new())
        .await;

    println!(
        "{deal_id} {analysis_date}: {} evaluated ({} pass, {} fail, {} n/a), {} failed",
        outcome.records.len(),
        outcome.status_count(PassFailStatus::Pass),
        outcome.status_count(PassFailStatus::Fail),
        outcome.status_count(PassFailStatus::NotApplicable),
        outcome.failures.len(),
    );
    for failure in &outcome.failures {
        eprintln!("test {}: {}", failure.test_number, failure.error);
    }

    if outcome.failures.is_empty() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
