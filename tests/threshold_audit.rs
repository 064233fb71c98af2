//! Audit reporting integration tests
//!
//! Drives real suite runs into the in-memory ledger, then checks the
//! read-only aggregations the reporting collaborators consume.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use clo_compliance::batch::{BatchRunner, CancelFlag, MetricSource};
use clo_compliance::catalog::TestCatalog;
use clo_compliance::models::{NewOverrideFields, PortfolioMetric, TestCategory};
use clo_compliance::reporting::ComplianceReporter;
use clo_compliance::resolver::{ResolutionCache, ThresholdResolver};
use clo_compliance::storage::{InMemoryExecutionStore, InMemoryOverrideStore, OverrideStore};

fn date(s: &str) -> NaiveDate {
    NaiveDate::from_str(s).unwrap()
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

struct FixedMetrics(HashMap<i32, PortfolioMetric>);

#[async_trait]
impl MetricSource for FixedMetrics {
    async fn metric(
        &self,
        _deal_id: &str,
        test_number: i32,
        _analysis_date: NaiveDate,
    ) -> anyhow::Result<Option<PortfolioMetric>> {
        Ok(self.0.get(&test_number).copied())
    }
}

fn portfolio_metric(value: &str) -> PortfolioMetric {
    PortfolioMetric {
        numerator: dec(value),
        denominator: Decimal::ONE,
        calculated_value: dec(value),
    }
}

struct Fixture {
    overrides: Arc<InMemoryOverrideStore>,
    runner: BatchRunner,
    reporter: ComplianceReporter,
}

fn fixture() -> Fixture {
    let catalog = TestCatalog::standard().unwrap();
    let cache = Arc::new(ResolutionCache::new());
    let overrides = Arc::new(InMemoryOverrideStore::with_cache(cache.clone()));
    let ledger = Arc::new(InMemoryExecutionStore::new());
    let resolver = Arc::new(ThresholdResolver::with_cache(
        catalog.clone(),
        overrides.clone(),
        cache,
    ));
    let runner = BatchRunner::new(resolver, ledger.clone());
    let reporter = ComplianceReporter::new(catalog, overrides.clone(), ledger);
    Fixture {
        overrides,
        runner,
        reporter,
    }
}

fn cov_lite_override(deal_id: &str) -> NewOverrideFields {
    NewOverrideFields {
        deal_id: deal_id.to_string(),
        test_number: 29,
        threshold_value: dec("0.50"),
        effective_date: date("2016-03-23"),
        expiry_date: None,
        mag_version: "MAG6".to_string(),
        rating_agency: None,
        notes: None,
    }
}

#[tokio::test]
async fn cross_deal_comparison_counts_custom_thresholds() {
    let f = fixture();
    f.overrides.insert(cov_lite_override("MAG6")).await.unwrap();
    f.overrides
        .insert(NewOverrideFields {
            test_number: 88,
            threshold_value: dec("400"),
            ..cov_lite_override("MAG6")
        })
        .await
        .unwrap();

    let comparisons = f
        .reporter
        .compare_across_deals(
            &["MAG6".to_string(), "MAG17".to_string()],
            date("2024-06-28"),
        )
        .await
        .unwrap();

    assert_eq!(comparisons.len(), 2);
    let mag6 = &comparisons[0];
    assert_eq!(mag6.deal_id, "MAG6");
    assert_eq!(mag6.custom_threshold_count, 2);
    let mag17 = &comparisons[1];
    assert_eq!(mag17.custom_threshold_count, 0);
    // both deals face the same active catalog
    assert_eq!(mag6.total_tests, mag17.total_tests);
    assert!(mag6.total_tests > 60);
}

#[tokio::test]
async fn comparison_respects_the_as_of_date() {
    let f = fixture();
    f.overrides.insert(cov_lite_override("MAG6")).await.unwrap();

    let before = f
        .reporter
        .compare_across_deals(&["MAG6".to_string()], date("2016-03-22"))
        .await
        .unwrap();
    assert_eq!(before[0].custom_threshold_count, 0);

    let after = f
        .reporter
        .compare_across_deals(&["MAG6".to_string()], date("2016-03-23"))
        .await
        .unwrap();
    assert_eq!(after[0].custom_threshold_count, 1);
}

#[tokio::test]
async fn category_summary_buckets_latest_results() {
    let f = fixture();
    let mut metrics = HashMap::new();
    // asset quality: one pass, one fail
    metrics.insert(1, portfolio_metric("0.92"));
    metrics.insert(5, portfolio_metric("0.10"));
    // portfolio metrics: a passing spread
    metrics.insert(88, portfolio_metric("450"));

    f.runner
        .run_suite(
            "MAG17",
            date("2024-06-28"),
            Arc::new(FixedMetrics(metrics)),
            &CancelFlag::new(),
        )
        .await;

    let summary = f
        .reporter
        .summarize_category("MAG17", date("2024-06-28"))
        .await
        .unwrap();

    assert_eq!(summary.len(), 4);
    let asset_quality = summary
        .iter()
        .find(|s| s.category == TestCategory::AssetQuality)
        .unwrap();
    assert_eq!(asset_quality.pass_count, 1);
    assert_eq!(asset_quality.fail_count, 1);
    assert!(asset_quality.na_count > 0);

    let portfolio = summary
        .iter()
        .find(|s| s.category == TestCategory::PortfolioMetrics)
        .unwrap();
    assert_eq!(portfolio.pass_count, 1);
    assert_eq!(portfolio.fail_count, 0);
}

#[tokio::test]
async fn summary_reflects_only_the_latest_rerun() {
    let f = fixture();
    let failing = HashMap::from([(1, portfolio_metric("0.85"))]);
    let passing = HashMap::from([(1, portfolio_metric("0.92"))]);

    f.runner
        .run_suite(
            "MAG17",
            date("2024-06-28"),
            Arc::new(FixedMetrics(failing)),
            &CancelFlag::new(),
        )
        .await;
    f.runner
        .run_suite(
            "MAG17",
            date("2024-06-28"),
            Arc::new(FixedMetrics(passing)),
            &CancelFlag::new(),
        )
        .await;

    let summary = f
        .reporter
        .summarize_category("MAG17", date("2024-06-28"))
        .await
        .unwrap();
    let asset_quality = summary
        .iter()
        .find(|s| s.category == TestCategory::AssetQuality)
        .unwrap();
    // the earlier FAIL was superseded by the rerun's PASS
    assert_eq!(asset_quality.fail_count, 0);
    assert_eq!(asset_quality.pass_count, 1);
}
