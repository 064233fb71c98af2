//! Postgres-backed threshold override repository
//!
//! Enforces the non-overlap invariant inside each write transaction:
//! existing rows for the (deal, test) are locked, the candidate period
//! is checked, and only then does the write commit. This applies to
//! inserts and to expiry changes alike, since moving an expiry re-shapes
//! the effective period. Overrides are superseded by setting an expiry,
//! never rewritten.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{NewOverrideFields, ThresholdOverride};
use crate::resolver::ResolutionCache;
use crate::storage::{check_non_overlap, OverrideStore};

/// Repository for deal threshold overrides
#[derive(Clone)]
pub struct PgOverrideRepository {
    pool: PgPool,
    cache: Option<Arc<ResolutionCache>>,
}

impl PgOverrideRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, cache: None }
    }

    /// Wire a resolution cache to invalidate on mutations
    pub fn with_cache(pool: PgPool, cache: Arc<ResolutionCache>) -> Self {
        Self {
            pool,
            cache: Some(cache),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn invalidate(&self, deal_id: &str, test_number: i32) {
        if let Some(cache) = &self.cache {
            cache.invalidate(deal_id, test_number);
        }
    }

    /// All override rows for one (deal, test), any period
    pub async fn all_for(
        &self,
        deal_id: &str,
        test_number: i32,
    ) -> Result<Vec<ThresholdOverride>, StorageError> {
        let rows = sqlx::query_as::<_, ThresholdOverride>(
            r#"
            SELECT override_id, deal_id, test_number, threshold_value,
                   effective_date, expiry_date, mag_version, rating_agency,
                   notes, created_at
            FROM clo.threshold_overrides
            WHERE deal_id = $1 AND test_number = $2
            ORDER BY effective_date
            "#,
        )
        .bind(deal_id)
        .bind(test_number)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch overrides")?;
        Ok(rows)
    }
}

#[async_trait]
impl OverrideStore for PgOverrideRepository {
    async fn overrides_on(
        &self,
        deal_id: &str,
        test_number: i32,
        date: NaiveDate,
    ) -> Result<Vec<ThresholdOverride>, StorageError> {
        let rows = sqlx::query_as::<_, ThresholdOverride>(
            r#"
            SELECT override_id, deal_id, test_number, threshold_value,
                   effective_date, expiry_date, mag_version, rating_agency,
                   notes, created_at
            FROM clo.threshold_overrides
            WHERE deal_id = $1
              AND test_number = $2
              AND effective_date <= $3
              AND (expiry_date IS NULL OR expiry_date > $3)
            ORDER BY effective_date DESC, override_id DESC
            "#,
        )
        .bind(deal_id)
        .bind(test_number)
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch active overrides")?;
        Ok(rows)
    }

    async fn insert(&self, fields: NewOverrideFields) -> Result<ThresholdOverride, StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin override insert transaction")?;

        let existing = sqlx::query_as::<_, ThresholdOverride>(
            r#"
            SELECT override_id, deal_id, test_number, threshold_value,
                   effective_date, expiry_date, mag_version, rating_agency,
                   notes, created_at
            FROM clo.threshold_overrides
            WHERE deal_id = $1 AND test_number = $2
            FOR UPDATE
            "#,
        )
        .bind(&fields.deal_id)
        .bind(fields.test_number)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to lock existing overrides")?;

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

        sqlx::query(
            r#"
            INSERT INTO clo.threshold_overrides
                (override_id, deal_id, test_number, threshold_value,
                 effective_date, expiry_date, mag_version, rating_agency,
                 notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(row.override_id)
        .bind(&row.deal_id)
        .bind(row.test_number)
        .bind(row.threshold_value)
        .bind(row.effective_date)
        .bind(row.expiry_date)
        .bind(&row.mag_version)
        .bind(&row.rating_agency)
        .bind(&row.notes)
        .bind(row.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert override")?;

        tx.commit()
            .await
            .context("Failed to commit override insert")?;

        info!(
            deal_id = %row.deal_id,
            test_number = row.test_number,
            threshold = %row.threshold_value,
            effective = %row.effective_date,
            "Recorded threshold override"
        );
        self.invalidate(&row.deal_id, row.test_number);
        Ok(row)
    }

    async fn set_expiry(
        &self,
        override_id: Uuid,
        expiry: NaiveDate,
    ) -> Result<ThresholdOverride, StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin override expiry transaction")?;

        let target: Option<(String, i32, NaiveDate)> = sqlx::query_as(
            r#"
            SELECT deal_id, test_number, effective_date
            FROM clo.threshold_overrides
            WHERE override_id = $1
            FOR UPDATE
            "#,
        )
        .bind(override_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to look up override")?;

        let (deal_id, test_number, effective) =
            target.ok_or(StorageError::OverrideNotFound { override_id })?;

        // The new expiry re-shapes the effective period: lock the sibling
        // rows and run the same overlap check an insert gets.
        let siblings = sqlx::query_as::<_, ThresholdOverride>(
            r#"
            SELECT override_id, deal_id, test_number, threshold_value,
                   effective_date, expiry_date, mag_version, rating_agency,
                   notes, created_at
            FROM clo.threshold_overrides
            WHERE deal_id = $1 AND test_number = $2 AND override_id <> $3
            FOR UPDATE
            "#,
        )
        .bind(&deal_id)
        .bind(test_number)
        .bind(override_id)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to lock sibling overrides")?;

        check_non_overlap(&siblings, effective, Some(expiry))?;

        let row = sqlx::query_as::<_, ThresholdOverride>(
            r#"
            UPDATE clo.threshold_overrides
            SET expiry_date = $2
            WHERE override_id = $1
            RETURNING override_id, deal_id, test_number, threshold_value,
                      effective_date, expiry_date, mag_version, rating_agency,
                      notes, created_at
            "#,
        )
        .bind(override_id)
        .bind(expiry)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to set override expiry")?;

        tx.commit()
            .await
            .context("Failed to commit override expiry")?;

        info!(
            deal_id = %row.deal_id,
            test_number = row.test_number,
            expiry = %expiry,
            "Superseded threshold override"
        );
        self.invalidate(&row.deal_id, row.test_number);
        Ok(row)
    }

    async fn delete(&self, override_id: Uuid) -> Result<(), StorageError> {
        let row = sqlx::query_as::<_, (String, i32)>(
            r#"
            DELETE FROM clo.threshold_overrides
            WHERE override_id = $1
            RETURNING deal_id, test_number
            "#,
        )
        .bind(override_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to delete override")?
        .ok_or(StorageError::OverrideNotFound { override_id })?;

        self.invalidate(&row.0, row.1);
        Ok(())
    }

    async fn count_active_for_deal(
        &self,
        deal_id: &str,
        date: NaiveDate,
    ) -> Result<i64, StorageError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM clo.threshold_overrides
            WHERE deal_id = $1
              AND effective_date <= $2
              AND (expiry_date IS NULL OR expiry_date > $2)
            "#,
        )
        .bind(deal_id)
        .bind(date)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count active overrides")?;
        Ok(count)
    }
}
