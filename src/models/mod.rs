//! Models module for the concentration-test engine
//!
//! This module contains the data structures used to represent test
//! definitions, threshold overrides, and execution records, both in
//! memory and in the database.

pub mod compliance_models;

// Re-export commonly used types for convenience
pub use compliance_models::{
    CategorySummary, ComparisonOperator, DealComparison, DealProfile, ExecutionRecord,
    NewExecutionFields, NewOverrideFields, PassFailStatus, PortfolioMetric, ResultUnit,
    TestCategory, TestDefinition, ThresholdOverride, ThresholdSource, VintageThreshold,
};
