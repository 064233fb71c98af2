//! Per-(deal, test) override resolution cache
//!
//! A cached entry is bounded by the analysis date it was resolved for:
//! a hit requires the date to fall inside the cached override's
//! effective period, or to be exactly the date a "no override" result
//! was produced for. Stores invalidate the key on any override insert,
//! expiry, or delete; catalog reloads clear the cache wholesale.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::NaiveDate;

use crate::models::ThresholdOverride;

#[derive(Debug)]
struct CachedLookup {
    resolved_for: NaiveDate,
    row: Option<ThresholdOverride>,
}

/// Concurrent cache of override lookups
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: RwLock<HashMap<(String, i32), CachedLookup>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached lookup result valid for the given analysis date
    ///
    /// Outer `None` means miss; inner `None` means "no override active".
    pub fn get(
        &self,
        deal_id: &str,
        test_number: i32,
        date: NaiveDate,
    ) -> Option<Option<ThresholdOverride>> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let cached = entries.get(&(deal_id.to_string(), test_number))?;
        match &cached.row {
            Some(row) if row.is_active_on(date) => Some(Some(row.clone())),
            _ if cached.resolved_for == date => Some(cached.row.clone()),
            _ => None,
        }
    }

    pub fn put(
        &self,
        deal_id: &str,
        test_number: i32,
        date: NaiveDate,
        row: Option<ThresholdOverride>,
    ) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(
            (deal_id.to_string(), test_number),
            CachedLookup {
                resolved_for: date,
                row,
            },
        );
    }

    /// Drop the cached lookup for one (deal, test)
    pub fn invalidate(&self, deal_id: &str, test_number: i32) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.remove(&(deal_id.to_string(), test_number));
    }

    /// Drop everything (catalog reload, bulk override load)
    pub fn clear(&self) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
