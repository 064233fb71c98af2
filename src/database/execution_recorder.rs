//! Postgres-backed execution ledger
//!
//! Append-only: each evaluation is one atomic INSERT with a fresh id and
//! timestamp assigned here, so a caller retrying a transient failure
//! produces a new, distinct row rather than corrupting logical state.
//! "Current" result queries select by max execution_timestamp, with the
//! table's insertion sequence breaking same-instant ties.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{ExecutionRecord, NewExecutionFields};
use crate::storage::ExecutionStore;

const RECORD_COLUMNS: &str = "record_id, deal_id, test_number, analysis_date, \
     execution_timestamp, threshold_used, threshold_source, calculated_value, \
     numerator, denominator, pass_fail_status, excess_amount, comments";

/// Append-only recorder over `clo.execution_records`
#[derive(Clone)]
pub struct PgExecutionRecorder {
    pool: PgPool,
}

impl PgExecutionRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionRecorder {
    async fn append(&self, fields: NewExecutionFields) -> Result<ExecutionRecord, StorageError> {
        let record = ExecutionRecord {
            record_id: Uuid::new_v4(),
            deal_id: fields.deal_id,
            test_number: fields.test_number,
            analysis_date: fields.analysis_date,
            execution_timestamp: Utc::now(),
            threshold_used: fields.threshold_used,
            threshold_source: fields.threshold_source,
            calculated_value: fields.calculated_value,
            numerator: fields.numerator,
            denominator: fields.denominator,
            pass_fail_status: fields.pass_fail_status,
            excess_amount: fields.excess_amount,
            comments: fields.comments,
        };

        sqlx::query(
            r#"
            INSERT INTO clo.execution_records
                (record_id, deal_id, test_number, analysis_date,
                 execution_timestamp, threshold_used, threshold_source,
                 calculated_value, numerator, denominator,
                 pass_fail_status, excess_amount, comments)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.record_id)
        .bind(&record.deal_id)
        .bind(record.test_number)
        .bind(record.analysis_date)
        .bind(record.execution_timestamp)
        .bind(record.threshold_used)
        .bind(record.threshold_source)
        .bind(record.calculated_value)
        .bind(record.numerator)
        .bind(record.denominator)
        .bind(record.pass_fail_status)
        .bind(record.excess_amount)
        .bind(&record.comments)
        .execute(&self.pool)
        .await
        .context("Failed to append execution record")?;

        debug!(
            deal_id = %record.deal_id,
            test_number = record.test_number,
            status = ?record.pass_fail_status,
            "Appended execution record"
        );
        Ok(record)
    }

    async fn latest(
        &self,
        deal_id: &str,
        test_number: i32,
        analysis_date: NaiveDate,
    ) -> Result<Option<ExecutionRecord>, StorageError> {
        let record = sqlx::query_as::<_, ExecutionRecord>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM clo.execution_records
            WHERE deal_id = $1 AND test_number = $2 AND analysis_date = $3
            ORDER BY execution_timestamp DESC, record_seq DESC
            LIMIT 1
            "#
        ))
        .bind(deal_id)
        .bind(test_number)
        .bind(analysis_date)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest execution record")?;
        Ok(record)
    }

    async fn latest_for_deal(
        &self,
        deal_id: &str,
        analysis_date: NaiveDate,
    ) -> Result<Vec<ExecutionRecord>, StorageError> {
        let records = sqlx::query_as::<_, ExecutionRecord>(&format!(
            r#"
            SELECT DISTINCT ON (test_number) {RECORD_COLUMNS}
            FROM clo.execution_records
            WHERE deal_id = $1 AND analysis_date = $2
            ORDER BY test_number, execution_timestamp DESC, record_seq DESC
            "#
        ))
        .bind(deal_id)
        .bind(analysis_date)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch latest records for deal")?;
        Ok(records)
    }

    async fn history(
        &self,
        deal_id: &str,
        test_number: i32,
        analysis_date: NaiveDate,
    ) -> Result<Vec<ExecutionRecord>, StorageError> {
        let records = sqlx::query_as::<_, ExecutionRecord>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM clo.execution_records
            WHERE deal_id = $1 AND test_number = $2 AND analysis_date = $3
            ORDER BY execution_timestamp, record_seq
            "#
        ))
        .bind(deal_id)
        .bind(test_number)
        .bind(analysis_date)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch execution history")?;
        Ok(records)
    }
}
