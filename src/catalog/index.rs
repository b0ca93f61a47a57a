//! NameIndex: literal display name -> catalog entry
//!
//! Built once per session. Bare 1-3 digit names ("7", "18", "300") are dropped
//! because they collide with page furniture such as prices, counters and
//! pagination.

use std::collections::HashMap;
use std::sync::Arc;

use super::CatalogEntry;

/// True for names the index refuses when filtering is on: `^\d{1,3}$`
pub fn is_short_numeral(name: &str) -> bool {
    (1..=3).contains(&name.len()) && name.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    by_name: HashMap<String, Arc<CatalogEntry>>,
}

impl NameIndex {
    /// Build from a catalog. Last entry wins for a duplicated name.
    pub fn build<I>(catalog: I, filter_short_numerals: bool) -> Self
    where
        I: IntoIterator<Item = CatalogEntry>,
    {
        let mut by_name = HashMap::new();
        for entry in catalog {
            if entry.name.trim().is_empty() {
                continue;
            }
            if filter_short_numerals && is_short_numeral(&entry.name) {
                continue;
            }
            by_name.insert(entry.name.clone(), Arc::new(entry));
        }
        Self { by_name }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CatalogEntry>> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &Arc<CatalogEntry>> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
