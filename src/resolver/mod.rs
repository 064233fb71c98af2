//! Threshold Resolver - deal override, vintage template, catalog default
//!
//! Given (deal, test, analysis date), determines the effective threshold
//! and its provenance. Precedence: active deal override, then the
//! vintage template registered for the deal's MAG version, then the
//! catalog default. Resolution is deterministic: the same override set
//! and date always produce the same threshold and source.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::{CatalogSnapshot, TestCatalog};
use crate::error::ResolutionError;
use crate::models::{DealProfile, TestDefinition, ThresholdOverride, ThresholdSource};
use crate::storage::OverrideStore;

pub mod cache;

pub use cache::ResolutionCache;

/// Effective threshold with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedThreshold {
    pub test_number: i32,
    pub threshold: Decimal,
    pub source: ThresholdSource,
    pub notes: Option<String>,
}

/// Resolution outcome
///
/// An inactive catalog definition resolves to `Inactive`, which upstream
/// records as N/A rather than evaluating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resolution {
    Resolved(ResolvedThreshold),
    Inactive { test_number: i32 },
}

/// Resolver over a catalog, an override store, and the deal registry
pub struct ThresholdResolver {
    catalog: TestCatalog,
    overrides: Arc<dyn OverrideStore>,
    deals: RwLock<HashMap<String, DealProfile>>,
    cache: Arc<ResolutionCache>,
    // last catalog generation this resolver worked against; a swap
    // clears the cache wholesale
    seen_snapshot: RwLock<Arc<CatalogSnapshot>>,
}

impl ThresholdResolver {
    pub fn new(catalog: TestCatalog, overrides: Arc<dyn OverrideStore>) -> Self {
        Self::with_cache(catalog, overrides, Arc::new(ResolutionCache::new()))
    }

    /// Build with a shared cache handle, typically the one wired into
    /// the override store for invalidation
    pub fn with_cache(
        catalog: TestCatalog,
        overrides: Arc<dyn OverrideStore>,
        cache: Arc<ResolutionCache>,
    ) -> Self {
        let seen_snapshot = RwLock::new(catalog.snapshot());
        ThresholdResolver {
            catalog,
            overrides,
            deals: RwLock::new(HashMap::new()),
            cache,
            seen_snapshot,
        }
    }

    /// Current snapshot, clearing the resolution cache if the catalog
    /// generation changed since the last resolution
    fn refreshed_snapshot(&self) -> Arc<CatalogSnapshot> {
        let current = self.catalog.snapshot();
        {
            let seen = self
                .seen_snapshot
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if Arc::ptr_eq(&seen, &current) {
                return current;
            }
        }
        let mut seen = self
            .seen_snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !Arc::ptr_eq(&seen, &current) {
            debug!(
                version = current.version(),
                "Catalog generation changed; clearing resolution cache"
            );
            self.cache.clear();
            *seen = current.clone();
        }
        current
    }

    pub fn catalog(&self) -> &TestCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    /// Register a deal so its vintage template tier applies
    ///
    /// Unregistered deals resolve against overrides and defaults only.
    pub fn register_deal(&self, profile: DealProfile) {
        let mut deals = self
            .deals
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        deals.insert(profile.deal_id.clone(), profile);
    }

    fn mag_version_for(&self, deal_id: &str) -> Option<String> {
        let deals = self
            .deals
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        deals.get(deal_id).map(|profile| profile.mag_version.clone())
    }

    /// Resolve the effective threshold for (deal, test, date)
    pub async fn resolve(
        &self,
        deal_id: &str,
        test_number: i32,
        analysis_date: NaiveDate,
    ) -> Result<Resolution, ResolutionError> {
        let snapshot = self.refreshed_snapshot();
        let definition = snapshot
            .get(test_number)
            .ok_or_else(|| ResolutionError::UnknownTest {
                deal_id: deal_id.to_string(),
                test_number,
            })?;

        if !definition.active {
            debug!(deal_id, test_number, "Test inactive; resolving to N/A");
            return Ok(Resolution::Inactive { test_number });
        }

        if let Some(resolved) = self
            .resolve_override(deal_id, test_number, analysis_date)
            .await?
        {
            return Ok(Resolution::Resolved(resolved));
        }

        Ok(Resolution::Resolved(
            self.fallback(&snapshot, deal_id, definition),
        ))
    }

    async fn resolve_override(
        &self,
        deal_id: &str,
        test_number: i32,
        analysis_date: NaiveDate,
    ) -> Result<Option<ResolvedThreshold>, ResolutionError> {
        if let Some(cached) = self.cache.get(deal_id, test_number, analysis_date) {
            return Ok(cached.map(|row| deal_resolution(&row, None)));
        }

        let rows = self
            .overrides
            .overrides_on(deal_id, test_number, analysis_date)
            .await
            .map_err(|err| ResolutionError::OverrideLookup {
                deal_id: deal_id.to_string(),
                test_number,
                source: anyhow::Error::new(err),
            })?;

        let mut rows = rows.into_iter();
        let Some(mut best) = rows.next() else {
            self.cache.put(deal_id, test_number, analysis_date, None);
            return Ok(None);
        };

        // Latest effective date wins, tie-break by highest id.
        let mut count = 1usize;
        for row in rows {
            count += 1;
            if (row.effective_date, row.override_id) > (best.effective_date, best.override_id) {
                best = row;
            }
        }

        if count == 1 {
            self.cache
                .put(deal_id, test_number, analysis_date, Some(best.clone()));
            return Ok(Some(deal_resolution(&best, None)));
        }

        // Write-time validation should make this unreachable. Flag the
        // ambiguity for reconciliation and do not cache the pick.
        warn!(
            deal_id,
            test_number,
            count,
            %analysis_date,
            "Overlapping overrides detected during resolution"
        );
        let note = format!(
            "ambiguous: {count} overlapping overrides active on {analysis_date}; \
             using effective {effective}",
            effective = best.effective_date
        );
        Ok(Some(deal_resolution(&best, Some(note))))
    }

    fn fallback(
        &self,
        snapshot: &CatalogSnapshot,
        deal_id: &str,
        definition: &TestDefinition,
    ) -> ResolvedThreshold {
        if let Some(mag_version) = self.mag_version_for(deal_id) {
            if let Some(vintage) = snapshot.vintage_threshold(&mag_version, definition.test_number)
            {
                return ResolvedThreshold {
                    test_number: definition.test_number,
                    threshold: vintage.threshold,
                    source: ThresholdSource::Template,
                    notes: Some(format!("vintage template {mag_version}")),
                };
            }
        }

        ResolvedThreshold {
            test_number: definition.test_number,
            threshold: definition.default_threshold,
            source: ThresholdSource::Default,
            notes: None,
        }
    }
}

fn deal_resolution(row: &ThresholdOverride, ambiguity_note: Option<String>) -> ResolvedThreshold {
    ResolvedThreshold {
        test_number: row.test_number,
        threshold: row.threshold_value,
        source: ThresholdSource::Deal,
        notes: ambiguity_note.or_else(|| row.notes.clone()),
    }
}
