//! CLO concentration-test compliance engine
//!
//! Resolves the effective threshold for each concentration test of a
//! structured-credit deal (deal override, vintage template, or catalog
//! default), evaluates externally computed portfolio metrics against
//! those thresholds, and records immutable execution records for audit.
//!
//! ## Flow
//! Catalog -> Resolver -> Evaluation Engine -> Recorder -> Reporter
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use clo_compliance::catalog::TestCatalog;
//! use clo_compliance::resolver::ThresholdResolver;
//! use clo_compliance::storage::InMemoryOverrideStore;
//!
//! # async fn demo() -> Result<(), clo_compliance::ComplianceError> {
//! let catalog = TestCatalog::standard()?;
//! let overrides = Arc::new(InMemoryOverrideStore::new());
//! let resolver = ThresholdResolver::new(catalog, overrides);
//! let date: chrono::NaiveDate = "2024-06-28".parse().unwrap();
//! let resolution = resolver.resolve("MAG17", 1, date).await?;
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Test definitions, overrides, and execution records
pub mod models;

// Versioned test catalog with ingestion validation
pub mod catalog;

// Threshold resolution: override -> vintage template -> default
pub mod resolver;

// Comparison policy over resolved thresholds
pub mod engine;

// Storage seams and in-memory implementations
pub mod storage;

// Suite evaluation with bounded concurrency
pub mod batch;

// Read-only audit aggregation
pub mod reporting;

// Database integration (when enabled)
#[cfg(feature = "database")]
pub mod database;

// Public re-exports for the common call path
pub use batch::{BatchOutcome, BatchRunner, CancelFlag, EngineConfig, MetricSource};
pub use catalog::{CatalogBuilder, TestCatalog};
pub use engine::{evaluate, Evaluation};
pub use error::{CatalogError, ComplianceError, ResolutionError, StorageError};
pub use models::{
    ComparisonOperator, ExecutionRecord, PassFailStatus, PortfolioMetric, TestCategory,
    TestDefinition, ThresholdOverride, ThresholdSource,
};
pub use reporting::ComplianceReporter;
pub use resolver::{Resolution, ResolutionCache, ResolvedThreshold, ThresholdResolver};
pub use storage::{ExecutionStore, InMemoryExecutionStore, InMemoryOverrideStore, OverrideStore};

// Database integration re-exports (when the database feature is enabled)
#[cfg(feature = "database")]
pub use database::{DatabaseConfig, DatabaseManager, PgExecutionRecorder, PgOverrideRepository};
