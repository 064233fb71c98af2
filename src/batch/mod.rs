//! Batch evaluation of a deal's full concentration-test suite
//!
//! One (deal, test, date) evaluation is a pure function of its inputs
//! plus an override read, so the suite fans out across a bounded worker
//! pool. Per-test failures are collected, not propagated: one test's
//! configuration error must leave the other ninety-nine evaluated and
//! recorded. A cancellation flag stops the runner issuing further
//! evaluations promptly; in-flight tests finish and record.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::engine::{self, Evaluation};
use crate::error::ComplianceError;
use crate::models::{
    ExecutionRecord, NewExecutionFields, PassFailStatus, PortfolioMetric, TestDefinition,
    ThresholdSource,
};
use crate::resolver::{Resolution, ResolvedThreshold, ThresholdResolver};
use crate::storage::ExecutionStore;

/// Cooperative cancellation signal shared across a batch
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// External portfolio-analytics collaborator
///
/// This engine never computes numerators or denominators; it consumes
/// them per (deal, test, date). `Ok(None)` means the metric is not
/// available, which records as N/A.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn metric(
        &self,
        deal_id: &str,
        test_number: i32,
        analysis_date: NaiveDate,
    ) -> anyhow::Result<Option<PortfolioMetric>>;
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker-pool bound; evaluations are CPU-cheap, so this defaults to
    /// the core count rather than unbounded fan-out
    pub max_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

/// One test that failed to resolve or record
#[derive(Debug)]
pub struct TestFailure {
    pub test_number: i32,
    pub error: ComplianceError,
}

/// Result of one suite run
#[derive(Debug)]
pub struct BatchOutcome {
    pub deal_id: String,
    pub analysis_date: NaiveDate,
    pub records: Vec<ExecutionRecord>,
    pub failures: Vec<TestFailure>,
    /// True when the cancel flag stopped the runner before every test
    /// was issued
    pub cancelled: bool,
}

impl BatchOutcome {
    pub fn status_count(&self, status: PassFailStatus) -> usize {
        self.records
            .iter()
            .filter(|record| record.pass_fail_status == status)
            .count()
    }
}

/// Evaluates a deal's suite: resolve, fetch metric, compare, record
pub struct BatchRunner {
    resolver: Arc<ThresholdResolver>,
    ledger: Arc<dyn ExecutionStore>,
    config: EngineConfig,
}

impl BatchRunner {
    pub fn new(resolver: Arc<ThresholdResolver>, ledger: Arc<dyn ExecutionStore>) -> Self {
        Self::with_config(resolver, ledger, EngineConfig::default())
    }

    pub fn with_config(
        resolver: Arc<ThresholdResolver>,
        ledger: Arc<dyn ExecutionStore>,
        config: EngineConfig,
    ) -> Self {
        BatchRunner {
            resolver,
            ledger,
            config,
        }
    }

    /// Run every catalog test for one deal and analysis date
    ///
    /// No ordering guarantee across tests; the returned records are
    /// sorted by test number for stable reporting.
    pub async fn run_suite(
        &self,
        deal_id: &str,
        analysis_date: NaiveDate,
        metrics: Arc<dyn MetricSource>,
        cancel: &CancelFlag,
    ) -> BatchOutcome {
        let definitions: Vec<TestDefinition> =
            self.resolver.catalog().snapshot().all().cloned().collect();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        let mut handles = Vec::with_capacity(definitions.len());
        let mut cancelled = false;

        for definition in definitions {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let resolver = Arc::clone(&self.resolver);
            let ledger = Arc::clone(&self.ledger);
            let metrics = Arc::clone(&metrics);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let deal_id = deal_id.to_string();
            let test_number = definition.test_number;

            let handle = tokio::spawn(async move {
                let permit = semaphore.acquire_owned().await;
                if permit.is_err() || cancel.is_cancelled() {
                    return None;
                }
                let result = run_one(
                    &resolver,
                    ledger.as_ref(),
                    metrics.as_ref(),
                    &deal_id,
                    &definition,
                    analysis_date,
                )
                .await;
                Some(result)
            });
            handles.push((test_number, handle));
        }

        let mut records = Vec::new();
        let mut failures = Vec::new();
        for (test_number, handle) in handles {
            match handle.await {
                Ok(Some(Ok(record))) => records.push(record),
                Ok(Some(Err(error))) => failures.push(TestFailure { test_number, error }),
                Ok(None) => cancelled = true,
                Err(join_error) => failures.push(TestFailure {
                    test_number,
                    error: ComplianceError::Worker(anyhow::Error::new(join_error)),
                }),
            }
        }
        records.sort_by_key(|record| record.test_number);

        info!(
            deal_id,
            %analysis_date,
            evaluated = records.len(),
            failed = failures.len(),
            cancelled,
            "Concentration-test suite run complete"
        );

        BatchOutcome {
            deal_id: deal_id.to_string(),
            analysis_date,
            records,
            failures,
            cancelled,
        }
    }
}

async fn run_one(
    resolver: &ThresholdResolver,
    ledger: &dyn ExecutionStore,
    metrics: &dyn MetricSource,
    deal_id: &str,
    definition: &TestDefinition,
    analysis_date: NaiveDate,
) -> Result<ExecutionRecord, ComplianceError> {
    let resolution = resolver
        .resolve(deal_id, definition.test_number, analysis_date)
        .await?;

    let resolved = match resolution {
        Resolution::Inactive { .. } => {
            debug!(
                deal_id,
                test_number = definition.test_number,
                "Recording inactive test as N/A"
            );
            return record_not_applicable(
                ledger,
                deal_id,
                definition,
                analysis_date,
                definition.default_threshold,
                ThresholdSource::Default,
                "test inactive in catalog",
            )
            .await;
        }
        Resolution::Resolved(resolved) => resolved,
    };

    let metric = metrics
        .metric(deal_id, definition.test_number, analysis_date)
        .await
        .map_err(ComplianceError::Metric)?;

    let Some(metric) = metric else {
        return record_not_applicable(
            ledger,
            deal_id,
            definition,
            analysis_date,
            resolved.threshold,
            resolved.source,
            "metric unavailable",
        )
        .await;
    };

    let evaluation = engine::evaluate(&metric, resolved.threshold, definition.operator);
    append(
        ledger,
        deal_id,
        definition,
        analysis_date,
        &resolved,
        &metric,
        evaluation,
    )
    .await
}

async fn record_not_applicable(
    ledger: &dyn ExecutionStore,
    deal_id: &str,
    definition: &TestDefinition,
    analysis_date: NaiveDate,
    threshold: Decimal,
    source: ThresholdSource,
    comment: &str,
) -> Result<ExecutionRecord, ComplianceError> {
    let record = ledger
        .append(NewExecutionFields {
            deal_id: deal_id.to_string(),
            test_number: definition.test_number,
            analysis_date,
            threshold_used: threshold,
            threshold_source: source,
            calculated_value: Decimal::ZERO,
            numerator: Decimal::ZERO,
            denominator: Decimal::ZERO,
            pass_fail_status: PassFailStatus::NotApplicable,
            excess_amount: None,
            comments: Some(comment.to_string()),
        })
        .await?;
    Ok(record)
}

async fn append(
    ledger: &dyn ExecutionStore,
    deal_id: &str,
    definition: &TestDefinition,
    analysis_date: NaiveDate,
    resolved: &ResolvedThreshold,
    metric: &PortfolioMetric,
    evaluation: Evaluation,
) -> Result<ExecutionRecord, ComplianceError> {
    let record = ledger
        .append(NewExecutionFields {
            deal_id: deal_id.to_string(),
            test_number: definition.test_number,
            analysis_date,
            threshold_used: resolved.threshold,
            threshold_source: resolved.source,
            calculated_value: metric.calculated_value,
            numerator: metric.numerator,
            denominator: metric.denominator,
            pass_fail_status: evaluation.status,
            excess_amount: evaluation.excess_amount,
            comments: resolved.notes.clone(),
        })
        .await?;
    Ok(record)
}
