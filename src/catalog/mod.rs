//! Test Catalog - versioned concentration-test reference data
//!
//! The catalog is an immutable snapshot loaded at process start from the
//! embedded dataset (or from storage) and swapped atomically on reload.
//! Live evaluation never sees a partially loaded catalog and never
//! mutates it row by row; a reseed is a new validated snapshot or
//! nothing.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::error::CatalogError;
use crate::models::{TestCategory, TestDefinition, VintageThreshold};

pub mod validation;

pub use validation::CatalogBuilder;

/// Embedded standard dataset, parsed and validated by
/// [`TestCatalog::standard`]
const STANDARD_DATASET: &str = include_str!("standard_tests.yaml");

/// Raw shape of a catalog dataset file
#[derive(Debug, Deserialize)]
struct CatalogDataset {
    catalog_version: String,
    tests: Vec<TestDefinition>,
    #[serde(default)]
    vintage_thresholds: Vec<VintageThreshold>,
}

/// One immutable, validated catalog generation
#[derive(Debug)]
pub struct CatalogSnapshot {
    version: String,
    loaded_at: DateTime<Utc>,
    by_number: BTreeMap<i32, TestDefinition>,
    vintage_thresholds: Vec<VintageThreshold>,
}

impl CatalogSnapshot {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }

    pub fn get(&self, test_number: i32) -> Option<&TestDefinition> {
        self.by_number.get(&test_number)
    }

    /// All definitions ordered by test number
    pub fn all(&self) -> impl Iterator<Item = &TestDefinition> {
        self.by_number.values()
    }

    /// Definitions in one category, ordered by test number
    pub fn list_by_category(&self, category: TestCategory) -> Vec<TestDefinition> {
        self.by_number
            .values()
            .filter(|def| def.category == category)
            .cloned()
            .collect()
    }

    /// Template threshold for a (MAG version, test) pair, if registered
    pub fn vintage_threshold(
        &self,
        mag_version: &str,
        test_number: i32,
    ) -> Option<&VintageThreshold> {
        self.vintage_thresholds
            .iter()
            .find(|v| v.mag_version == mag_version && v.test_number == test_number)
    }

    pub(crate) fn from_parts(
        version: String,
        by_number: BTreeMap<i32, TestDefinition>,
        vintage_thresholds: Vec<VintageThreshold>,
    ) -> Self {
        CatalogSnapshot {
            version,
            loaded_at: Utc::now(),
            by_number,
            vintage_thresholds,
        }
    }
}

/// Shared handle over the current catalog snapshot
///
/// Readers clone an `Arc` under a short read lock; `reload` swaps the
/// whole snapshot so in-flight resolutions keep the generation they
/// started with.
#[derive(Debug, Clone)]
pub struct TestCatalog {
    current: Arc<RwLock<Arc<CatalogSnapshot>>>,
}

impl TestCatalog {
    /// Build a catalog from an already validated snapshot
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        TestCatalog {
            current: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    /// Load the embedded standard dataset
    pub fn standard() -> Result<Self, CatalogError> {
        Self::from_yaml(STANDARD_DATASET)
    }

    /// Parse and validate a dataset file
    pub fn from_yaml(yaml: &str) -> Result<Self, CatalogError> {
        let snapshot = parse_dataset(yaml)?;
        info!(
            version = %snapshot.version,
            tests = snapshot.len(),
            "Loaded concentration-test catalog"
        );
        Ok(Self::new(snapshot))
    }

    /// Current snapshot handle
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Definition lookup against the current snapshot
    pub fn get(&self, test_number: i32) -> Result<TestDefinition, CatalogError> {
        self.snapshot()
            .get(test_number)
            .cloned()
            .ok_or(CatalogError::UnknownTest { test_number })
    }

    /// Definitions in one category, ordered by test number
    pub fn list_by_category(&self, category: TestCategory) -> Vec<TestDefinition> {
        self.snapshot().list_by_category(category)
    }

    /// Atomically replace the current snapshot
    ///
    /// Validation happens before the swap; a rejected dataset leaves the
    /// current snapshot untouched.
    pub fn reload_from_yaml(&self, yaml: &str) -> Result<(), CatalogError> {
        let snapshot = parse_dataset(yaml)?;
        self.reload(snapshot);
        Ok(())
    }

    /// Swap in an already validated snapshot
    pub fn reload(&self, snapshot: CatalogSnapshot) {
        info!(
            version = %snapshot.version,
            tests = snapshot.len(),
            "Reloading concentration-test catalog"
        );
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(snapshot);
    }
}

fn parse_dataset(yaml: &str) -> Result<CatalogSnapshot, CatalogError> {
    let dataset: CatalogDataset = serde_yaml::from_str(yaml)?;
    if dataset.tests.is_empty() {
        return Err(CatalogError::EmptyDataset);
    }

    let mut builder = CatalogBuilder::new(dataset.catalog_version);
    for definition in dataset.tests {
        builder.add(definition)?;
    }
    for vintage in dataset.vintage_thresholds {
        builder.add_vintage_threshold(vintage)?;
    }
    Ok(builder.build())
}
