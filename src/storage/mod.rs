//! Storage seams for overrides and the execution ledger
//!
//! The resolver and batch runner talk to traits, not to Postgres: the
//! in-memory implementations here back tests and embedding callers, and
//! the `database` module provides the sqlx implementations. Write-time
//! invariants (non-overlapping override periods, append-only execution
//! records) are part of the trait contract, so every backend enforces
//! them.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{
    ExecutionRecord, NewExecutionFields, NewOverrideFields, ThresholdOverride,
};

pub mod memory;

pub use memory::{InMemoryExecutionStore, InMemoryOverrideStore};

/// Read/write access to deal threshold overrides
#[async_trait]
pub trait OverrideStore: Send + Sync {
    /// Overrides for (deal, test) whose effective period covers the date
    ///
    /// The non-overlap invariant means zero or one row; more than one
    /// indicates validation failed elsewhere and is the resolver's
    /// ambiguity path.
    async fn overrides_on(
        &self,
        deal_id: &str,
        test_number: i32,
        date: NaiveDate,
    ) -> Result<Vec<ThresholdOverride>, StorageError>;

    /// Insert a new override, rejecting overlapping effective periods
    async fn insert(&self, fields: NewOverrideFields) -> Result<ThresholdOverride, StorageError>;

    /// Supersede an override by setting its expiry date
    ///
    /// Overrides are never destructively rewritten; closing the period
    /// is the only mutation.
    async fn set_expiry(
        &self,
        override_id: Uuid,
        expiry: NaiveDate,
    ) -> Result<ThresholdOverride, StorageError>;

    /// Remove an override row (onboarding corrections only)
    async fn delete(&self, override_id: Uuid) -> Result<(), StorageError>;

    /// Count of overrides active for a deal on the date, for reporting
    async fn count_active_for_deal(
        &self,
        deal_id: &str,
        date: NaiveDate,
    ) -> Result<i64, StorageError>;
}

/// Append-only access to the execution ledger
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Append one record; the store assigns id and timestamp so retries
    /// always create distinct rows
    async fn append(&self, fields: NewExecutionFields) -> Result<ExecutionRecord, StorageError>;

    /// Current result: the record with the latest execution timestamp
    async fn latest(
        &self,
        deal_id: &str,
        test_number: i32,
        analysis_date: NaiveDate,
    ) -> Result<Option<ExecutionRecord>, StorageError>;

    /// Latest record per test for a deal and analysis date
    async fn latest_for_deal(
        &self,
        deal_id: &str,
        analysis_date: NaiveDate,
    ) -> Result<Vec<ExecutionRecord>, StorageError>;

    /// Full rerun history for one (deal, test, date), oldest first
    async fn history(
        &self,
        deal_id: &str,
        test_number: i32,
        analysis_date: NaiveDate,
    ) -> Result<Vec<ExecutionRecord>, StorageError>;
}

/// Check a candidate effective period against existing rows for the same
/// (deal, test)
///
/// Periods are half-open `[effective, expiry)`; `None` expiry is
/// open-ended. Two periods overlap iff each starts before the other
/// ends.
pub fn check_non_overlap(
    existing: &[ThresholdOverride],
    effective: NaiveDate,
    expiry: Option<NaiveDate>,
) -> Result<(), StorageError> {
    if let Some(expiry_date) = expiry {
        if expiry_date <= effective {
            return Err(StorageError::InvalidExpiry {
                effective,
                expiry: expiry_date,
            });
        }
    }

    for row in existing {
        let starts_before_existing_ends = row.expiry_date.map_or(true, |end| effective < end);
        let existing_starts_before_new_ends = expiry.map_or(true, |end| row.effective_date < end);
        if starts_before_existing_ends && existing_starts_before_new_ends {
            return Err(StorageError::OverlappingOverride {
                deal_id: row.deal_id.clone(),
                test_number: row.test_number,
                conflicting_effective: row.effective_date,
            });
        }
    }
    Ok(())
}
