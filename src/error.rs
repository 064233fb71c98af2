//! Error handling for the concentration-test engine
//!
//! This module provides idiomatic Rust error types using thiserror for
//! better error messages and proper error chain handling. Configuration
//! errors carry the offending identifiers so a failed resolution can be
//! traced back to its deal/test without replaying the batch.

use thiserror::Error;

/// Main error type for the compliance engine
#[derive(Error, Debug)]
pub enum ComplianceError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Metric source failure: {0}")]
    Metric(#[source] anyhow::Error),

    #[error("Batch worker failure: {0}")]
    Worker(#[source] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Catalog ingestion and lookup errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Test {test_number} is not in the catalog")]
    UnknownTest { test_number: i32 },

    #[error("Duplicate test number {test_number} ('{first}' vs '{second}')")]
    DuplicateTest {
        test_number: i32,
        first: String,
        second: String,
    },

    #[error("Invalid definition for test {test_number}: {reason}")]
    InvalidDefinition { test_number: i32, reason: String },

    #[error("Catalog dataset failed to parse: {0}")]
    Dataset(#[from] serde_yaml::Error),

    #[error("Catalog dataset is empty")]
    EmptyDataset,
}

/// Threshold resolution errors
///
/// These are fatal to a single (deal, test, date) resolution only; the
/// batch runner isolates them so the rest of the suite still evaluates.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("Test {test_number} is not in the catalog (deal {deal_id})")]
    UnknownTest { deal_id: String, test_number: i32 },

    #[error("Override lookup failed for deal {deal_id} test {test_number}: {source}")]
    OverrideLookup {
        deal_id: String,
        test_number: i32,
        #[source]
        source: anyhow::Error,
    },
}

/// Storage-layer errors
///
/// Transient insert failures are retryable: every retry appends a new,
/// distinctly timestamped record rather than overwriting logical state.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error(
        "Override for deal {deal_id} test {test_number} overlaps an existing \
         effective period starting {conflicting_effective}"
    )]
    OverlappingOverride {
        deal_id: String,
        test_number: i32,
        conflicting_effective: chrono::NaiveDate,
    },

    #[error("Override {override_id} not found")]
    OverrideNotFound { override_id: uuid::Uuid },

    #[error("Expiry {expiry} precedes effective date {effective}")]
    InvalidExpiry {
        effective: chrono::NaiveDate,
        expiry: chrono::NaiveDate,
    },

    #[error("Storage backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_carry_offending_identifiers() {
        let err = ResolutionError::UnknownTest {
            deal_id: "MAG17".to_string(),
            test_number: 999,
        };
        let msg = err.to_string();
        assert!(msg.contains("999"));
        assert!(msg.contains("MAG17"));
    }

    #[test]
    fn storage_errors_wrap_into_compliance_error() {
        let err: ComplianceError = StorageError::OverrideNotFound {
            override_id: uuid::Uuid::nil(),
        }
        .into();
        assert!(matches!(err, ComplianceError::Storage(_)));
    }
}
