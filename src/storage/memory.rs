//! In-memory store implementations
//!
//! Back the integration tests and embedding callers that bring their own
//! persistence. Semantics match the Postgres repositories: overlap
//! rejection at write time, append-only execution ledger with strictly
//! increasing timestamps, cache invalidation on override mutation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{
    ExecutionRecord, NewExecutionFields, NewOverrideFields, ThresholdOverride,
};
use crate::resolver::cache::ResolutionCache;

use super::{check_non_overlap, ExecutionStore, OverrideStore};

/// In-memory override table
#[derive(Default)]
pub struct InMemoryOverrideStore {
    rows: RwLock<Vec<ThresholdOverride>>,
    cache: Option<Arc<ResolutionCache>>,
}

impl InMemoryOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire a resolution cache to invalidate on mutations
    pub fn with_cache(cache: Arc<ResolutionCache>) -> Self {
        InMemoryOverrideStore {
            rows: RwLock::new(Vec::new()),
            cache: Some(cache),
        }
    }

    fn invalidate(&self, deal_id: &str, test_number: i32) {
        if let Some(cache) = &self.cache {
            cache.invalidate(deal_id, test_number);
        }
    }
}

#[async_trait]
impl OverrideStore for InMemoryOverrideStore {
    async fn overrides_on(
        &self,
        deal_id: &str,
        test_number: i32,
        date: NaiveDate,
    ) -> Result<Vec<ThresholdOverride>, StorageError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|row| {
                row.deal_id == deal_id
                    && row.test_number == test_number
                    && row.is_active_on(date)
            })
            .cloned()
            .collect())
    }

    async fn insert(&self, fields: NewOverrideFields) -> Result<ThresholdOverride, StorageError> {
        let mut rows = self.rows.write().await;
        let existing: Vec<ThresholdOverride> = rows
            .iter()
            .filter(|row| row.deal_id == fields.deal_id && row.test_number == fields.test_number)
            .cloned()
            .collect();
        check_non_overlap(&existing, fields.effective_date, fields.expiry_date)?;

        let row = ThresholdOverride {
            override_id: Uuid::new_v4(),
            deal_id: fields.deal_id,
            test_number: fields.test_number,
            threshold_value: fields.threshold_value,
            effective_date: fields.effective_date,
            expiry_date: fields.expiry_date,
            mag_version: fields.mag_version,
            rating_agency: fields.rating_agency,
            notes: fields.notes,
            created_at: Utc::now(),
        };
        rows.push(row.clone());
        drop(rows);

        self.invalidate(&row.deal_id, row.test_number);
        Ok(row)
    }

    async fn set_expiry(
        &self,
        override_id: Uuid,
        expiry: NaiveDate,
    ) -> Result<ThresholdOverride, StorageError> {
        let mut rows = self.rows.write().await;
        let target = rows
            .iter()
            .find(|row| row.override_id == override_id)
            .cloned()
            .ok_or(StorageError::OverrideNotFound { override_id })?;

        // Moving the expiry re-shapes the effective period, so it gets
        // the same overlap check as an insert, against the sibling rows.
        let siblings: Vec<ThresholdOverride> = rows
            .iter()
            .filter(|row| {
                row.override_id != override_id
                    && row.deal_id == target.deal_id
                    && row.test_number == target.test_number
            })
            .cloned()
            .collect();
        check_non_overlap(&siblings, target.effective_date, Some(expiry))?;

        let updated = match rows.iter_mut().find(|row| row.override_id == override_id) {
            Some(row) => {
                row.expiry_date = Some(expiry);
                row.clone()
            }
            None => return Err(StorageError::OverrideNotFound { override_id }),
        };
        drop(rows);

        self.invalidate(&updated.deal_id, updated.test_number);
        Ok(updated)
    }

    async fn delete(&self, override_id: Uuid) -> Result<(), StorageError> {
        let mut rows = self.rows.write().await;
        let position = rows
            .iter()
            .position(|row| row.override_id == override_id)
            .ok_or(StorageError::OverrideNotFound { override_id })?;
        let removed = rows.remove(position);
        drop(rows);

        self.invalidate(&removed.deal_id, removed.test_number);
        Ok(())
    }

    async fn count_active_for_deal(
        &self,
        deal_id: &str,
        date: NaiveDate,
    ) -> Result<i64, StorageError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|row| row.deal_id == deal_id && row.is_active_on(date))
            .count() as i64)
    }
}

/// In-memory execution ledger
#[derive(Default)]
pub struct InMemoryExecutionStore {
    inner: RwLock<LedgerInner>,
}

#[derive(Default)]
struct LedgerInner {
    rows: Vec<ExecutionRecord>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows in the ledger, reruns included
    pub async fn len(&self) -> usize {
        self.inner.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn append(&self, fields: NewExecutionFields) -> Result<ExecutionRecord, StorageError> {
        let mut inner = self.inner.write().await;

        // Strictly increasing timestamps so "latest" is unambiguous even
        // for back-to-back retries on a coarse clock.
        let mut timestamp = Utc::now();
        if let Some(last) = inner.last_timestamp {
            if timestamp <= last {
                timestamp = last + Duration::nanoseconds(1);
            }
        }
        inner.last_timestamp = Some(timestamp);

        let record = ExecutionRecord {
            record_id: Uuid::new_v4(),
            deal_id: fields.deal_id,
            test_number: fields.test_number,
            analysis_date: fields.analysis_date,
            execution_timestamp: timestamp,
            threshold_used: fields.threshold_used,
            threshold_source: fields.threshold_source,
            calculated_value: fields.calculated_value,
            numerator: fields.numerator,
            denominator: fields.denominator,
            pass_fail_status: fields.pass_fail_status,
            excess_amount: fields.excess_amount,
            comments: fields.comments,
        };
        inner.rows.push(record.clone());
        Ok(record)
    }

    async fn latest(
        &self,
        deal_id: &str,
        test_number: i32,
        analysis_date: NaiveDate,
    ) -> Result<Option<ExecutionRecord>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .iter()
            .filter(|row| {
                row.deal_id == deal_id
                    && row.test_number == test_number
                    && row.analysis_date == analysis_date
            })
            .max_by_key(|row| row.execution_timestamp)
            .cloned())
    }

    async fn latest_for_deal(
        &self,
        deal_id: &str,
        analysis_date: NaiveDate,
    ) -> Result<Vec<ExecutionRecord>, StorageError> {
        let inner = self.inner.read().await;
        let mut latest: std::collections::BTreeMap<i32, &ExecutionRecord> =
            std::collections::BTreeMap::new();
        for row in inner
            .rows
            .iter()
            .filter(|row| row.deal_id == deal_id && row.analysis_date == analysis_date)
        {
            match latest.get(&row.test_number) {
                Some(current) if current.execution_timestamp >= row.execution_timestamp => {}
                _ => {
                    latest.insert(row.test_number, row);
                }
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn history(
        &self,
        deal_id: &str,
        test_number: i32,
        analysis_date: NaiveDate,
    ) -> Result<Vec<ExecutionRecord>, StorageError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<ExecutionRecord> = inner
            .rows
            .iter()
            .filter(|row| {
                row.deal_id == deal_id
                    && row.test_number == test_number
                    && row.analysis_date == analysis_date
            })
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.execution_timestamp);
        Ok(rows)
    }
}
