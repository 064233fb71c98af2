//! Core data model for concentration-test evaluation
//!
//! Test definitions come from the versioned catalog, threshold overrides
//! are deal-scoped rows with effective periods, and execution records form
//! the append-only audit ledger. All threshold and metric values are
//! `rust_decimal::Decimal`; binary floats never enter the comparison path.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Test category enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(
    feature = "database",
    sqlx(type_name = "test_category", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum TestCategory {
    AssetQuality,
    Geographic,
    Industry,
    PortfolioMetrics,
}

impl TestCategory {
    /// All categories in reporting order
    pub const ALL: [TestCategory; 4] = [
        TestCategory::AssetQuality,
        TestCategory::Geographic,
        TestCategory::Industry,
        TestCategory::PortfolioMetrics,
    ];
}

/// Unit of a test's calculated result and threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(
    feature = "database",
    sqlx(type_name = "result_unit", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ResultUnit {
    /// Fraction of portfolio par (0.90 = 90%)
    Percentage,
    /// Plain count or score (e.g. diversity score)
    Absolute,
    BasisPoints,
    Years,
    RatingFactor,
}

/// Comparison policy, explicit per test definition
///
/// Direction and strictness are fixed at ingestion time; they are never
/// inferred from the test name at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(
    feature = "database",
    sqlx(type_name = "comparison_operator", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    /// PASS iff value > threshold
    MinimumStrict,
    /// PASS iff value >= threshold
    MinimumInclusive,
    /// PASS iff value < threshold
    MaximumStrict,
    /// PASS iff value <= threshold
    MaximumInclusive,
}

impl ComparisonOperator {
    pub fn is_minimum(self) -> bool {
        matches!(
            self,
            ComparisonOperator::MinimumStrict | ComparisonOperator::MinimumInclusive
        )
    }
}

/// Immutable catalog entry describing one concentration test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct TestDefinition {
    pub test_number: i32,
    pub name: String,
    pub category: TestCategory,
    pub unit: ResultUnit,
    pub operator: ComparisonOperator,
    pub default_threshold: Decimal,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Provenance of a resolved threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(
    feature = "database",
    sqlx(type_name = "threshold_source", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdSource {
    /// Deal-specific override row
    Deal,
    /// Vintage (MAG version) template threshold
    Template,
    /// Catalog default
    Default,
}

/// Deal-scoped threshold override with a time-bounded effective period
///
/// The effective interval is `[effective_date, expiry_date)`; `None`
/// expiry means open-ended. Per (deal_id, test_number) the intervals must
/// not overlap, enforced at write time by the stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct ThresholdOverride {
    pub override_id: Uuid,
    pub deal_id: String,
    pub test_number: i32,
    pub threshold_value: Decimal,
    pub effective_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    pub mag_version: String,
    pub rating_agency: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ThresholdOverride {
    /// Whether this override is in effect on the given analysis date
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.effective_date <= date && self.expiry_date.map_or(true, |expiry| expiry > date)
    }
}

/// Fields for creating an override
#[derive(Debug, Clone)]
pub struct NewOverrideFields {
    pub deal_id: String,
    pub test_number: i32,
    pub threshold_value: Decimal,
    pub effective_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    pub mag_version: String,
    pub rating_agency: Option<String>,
    pub notes: Option<String>,
}

/// Evaluation status recorded for audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(
    feature = "database",
    sqlx(type_name = "pass_fail_status", rename_all = "UPPERCASE")
)]
#[serde(rename_all = "UPPERCASE")]
pub enum PassFailStatus {
    Pass,
    Fail,
    /// Metric undefined (zero denominator, missing input, inactive test)
    #[serde(rename = "N/A")]
    #[cfg_attr(feature = "database", sqlx(rename = "N/A"))]
    NotApplicable,
}

/// One row of the append-only execution ledger
///
/// Reruns for the same (deal, test, analysis date) append new rows; the
/// current result is the row with the latest `execution_timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct ExecutionRecord {
    pub record_id: Uuid,
    pub deal_id: String,
    pub test_number: i32,
    pub analysis_date: NaiveDate,
    pub execution_timestamp: DateTime<Utc>,
    pub threshold_used: Decimal,
    pub threshold_source: ThresholdSource,
    pub calculated_value: Decimal,
    pub numerator: Decimal,
    pub denominator: Decimal,
    pub pass_fail_status: PassFailStatus,
    pub excess_amount: Option<Decimal>,
    pub comments: Option<String>,
}

/// Fields for appending an execution record
///
/// `record_id` and `execution_timestamp` are assigned by the store at
/// insert time so retried writes always produce distinct rows.
#[derive(Debug, Clone)]
pub struct NewExecutionFields {
    pub deal_id: String,
    pub test_number: i32,
    pub analysis_date: NaiveDate,
    pub threshold_used: Decimal,
    pub threshold_source: ThresholdSource,
    pub calculated_value: Decimal,
    pub numerator: Decimal,
    pub denominator: Decimal,
    pub pass_fail_status: PassFailStatus,
    pub excess_amount: Option<Decimal>,
    pub comments: Option<String>,
}

/// Deal identity as registered with the resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct DealProfile {
    pub deal_id: String,
    pub deal_name: String,
    /// Vintage family, e.g. "MAG6"; keys the template threshold tier
    pub mag_version: String,
}

/// Vintage-template threshold for a (MAG version, test) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VintageThreshold {
    pub mag_version: String,
    pub test_number: i32,
    pub threshold: Decimal,
}

/// Externally computed portfolio metric for one (deal, test, date)
///
/// Supplied by the portfolio-analytics collaborator; this engine never
/// computes numerators or denominators itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetric {
    pub numerator: Decimal,
    pub denominator: Decimal,
    pub calculated_value: Decimal,
}

/// Per-deal entry of the cross-deal comparison report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealComparison {
    pub deal_id: String,
    pub total_tests: i64,
    pub custom_threshold_count: i64,
}

/// Per-category entry of the category summary report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: TestCategory,
    pub pass_count: i64,
    pub fail_count: i64,
    pub na_count: i64,
}
