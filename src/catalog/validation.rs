//! Catalog ingestion validation
//!
//! The source data this catalog replaced encoded operator direction and
//! units in free text and accepted whatever row was written last. The
//! builder makes those rules explicit: duplicate test numbers, ambiguous
//! percentage encodings (points vs fractions), and malformed rows are
//! rejected at ingestion instead of surfacing as evaluation-time flips.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::error::CatalogError;
use crate::models::{ResultUnit, TestDefinition, VintageThreshold};

use super::CatalogSnapshot;

/// Validating accumulator for a catalog generation
#[derive(Debug)]
pub struct CatalogBuilder {
    version: String,
    by_number: BTreeMap<i32, TestDefinition>,
    vintage_thresholds: Vec<VintageThreshold>,
}

impl CatalogBuilder {
    pub fn new(version: impl Into<String>) -> Self {
        CatalogBuilder {
            version: version.into(),
            by_number: BTreeMap::new(),
            vintage_thresholds: Vec::new(),
        }
    }

    /// Add one definition, rejecting duplicates and malformed rows
    pub fn add(&mut self, definition: TestDefinition) -> Result<(), CatalogError> {
        validate_definition(&definition)?;

        if let Some(existing) = self.by_number.get(&definition.test_number) {
            return Err(CatalogError::DuplicateTest {
                test_number: definition.test_number,
                first: existing.name.clone(),
                second: definition.name,
            });
        }
        self.by_number.insert(definition.test_number, definition);
        Ok(())
    }

    /// Register a vintage template threshold
    ///
    /// The referenced test must already be in the catalog so a template
    /// can never point at a number the resolver cannot look up.
    pub fn add_vintage_threshold(
        &mut self,
        vintage: VintageThreshold,
    ) -> Result<(), CatalogError> {
        let definition = self.by_number.get(&vintage.test_number).ok_or(
            CatalogError::UnknownTest {
                test_number: vintage.test_number,
            },
        )?;
        validate_threshold(definition.test_number, definition.unit, vintage.threshold)?;
        self.vintage_thresholds.push(vintage);
        Ok(())
    }

    pub fn build(self) -> CatalogSnapshot {
        CatalogSnapshot::from_parts(self.version, self.by_number, self.vintage_thresholds)
    }
}

fn validate_definition(definition: &TestDefinition) -> Result<(), CatalogError> {
    if definition.name.trim().is_empty() {
        return Err(CatalogError::InvalidDefinition {
            test_number: definition.test_number,
            reason: "name is empty".to_string(),
        });
    }
    if definition.test_number <= 0 {
        return Err(CatalogError::InvalidDefinition {
            test_number: definition.test_number,
            reason: "test number must be positive".to_string(),
        });
    }
    validate_threshold(
        definition.test_number,
        definition.unit,
        definition.default_threshold,
    )
}

fn validate_threshold(
    test_number: i32,
    unit: ResultUnit,
    threshold: Decimal,
) -> Result<(), CatalogError> {
    if threshold < Decimal::ZERO {
        return Err(CatalogError::InvalidDefinition {
            test_number,
            reason: format!("threshold {threshold} is negative"),
        });
    }
    // Percentage thresholds are fractions; a value above 1 means someone
    // wrote percentage points (e.g. 80.0 for 80%), which historically
    // flipped pass/fail for the same test across data revisions.
    if unit == ResultUnit::Percentage && threshold > Decimal::ONE {
        return Err(CatalogError::InvalidDefinition {
            test_number,
            reason: format!(
                "percentage threshold {threshold} exceeds 1; encode fractions, not points"
            ),
        });
    }
    Ok(())
}
