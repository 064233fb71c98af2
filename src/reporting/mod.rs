//! Comparison/Audit Reporter - read-only aggregation over the ledger
//!
//! Stateless request/response helpers consumed by external reporting
//! collaborators. Aggregates the latest execution record per test plus
//! the override table; never writes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use crate::catalog::TestCatalog;
use crate::error::StorageError;
use crate::models::{CategorySummary, DealComparison, PassFailStatus, TestCategory};
use crate::storage::{ExecutionStore, OverrideStore};

pub struct ComplianceReporter {
    catalog: TestCatalog,
    overrides: Arc<dyn OverrideStore>,
    ledger: Arc<dyn ExecutionStore>,
}

impl ComplianceReporter {
    pub fn new(
        catalog: TestCatalog,
        overrides: Arc<dyn OverrideStore>,
        ledger: Arc<dyn ExecutionStore>,
    ) -> Self {
        ComplianceReporter {
            catalog,
            overrides,
            ledger,
        }
    }

    /// Per-deal test counts and custom-threshold counts as of a date
    pub async fn compare_across_deals(
        &self,
        deal_ids: &[String],
        as_of: NaiveDate,
    ) -> Result<Vec<DealComparison>, StorageError> {
        let total_tests = self
            .catalog
            .snapshot()
            .all()
            .filter(|definition| definition.active)
            .count() as i64;

        let mut comparisons = Vec::with_capacity(deal_ids.len());
        for deal_id in deal_ids {
            let custom_threshold_count =
                self.overrides.count_active_for_deal(deal_id, as_of).await?;
            comparisons.push(DealComparison {
                deal_id: deal_id.clone(),
                total_tests,
                custom_threshold_count,
            });
        }
        Ok(comparisons)
    }

    /// Pass/fail/N-A counts per category from the latest record per test
    ///
    /// Categories with no recorded tests report zero counts so report
    /// consumers always see all four rows.
    pub async fn summarize_category(
        &self,
        deal_id: &str,
        as_of: NaiveDate,
    ) -> Result<Vec<CategorySummary>, StorageError> {
        let records = self.ledger.latest_for_deal(deal_id, as_of).await?;
        let snapshot = self.catalog.snapshot();

        let mut counts: HashMap<TestCategory, (i64, i64, i64)> = HashMap::new();
        for record in &records {
            let Some(definition) = snapshot.get(record.test_number) else {
                // Ledger retains history for tests dropped from the
                // current catalog generation; those rows have no
                // category to report under.
                debug!(
                    deal_id,
                    test_number = record.test_number,
                    "Skipping record for test absent from current catalog"
                );
                continue;
            };
            let entry = counts.entry(definition.category).or_default();
            match record.pass_fail_status {
                PassFailStatus::Pass => entry.0 += 1,
                PassFailStatus::Fail => entry.1 += 1,
                PassFailStatus::NotApplicable => entry.2 += 1,
            }
        }

        Ok(TestCategory::ALL
            .iter()
            .map(|&category| {
                let (pass_count, fail_count, na_count) =
                    counts.get(&category).copied().unwrap_or_default();
                CategorySummary {
                    category,
                    pass_count,
                    fail_count,
                    na_count,
                }
            })
            .collect())
    }
}
