//! Collaborator seams for the catalog and per-item details
//!
//! Fetching, parsing and caching the catalog dump (and the detail API with its
//! response cache) live outside the engine. The engine only consumes these
//! traits; tests substitute fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::CatalogEntry;
use crate::error::{EngineError, Result};

/// What the provider has on hand right now, without touching the network
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub entries: Vec<CatalogEntry>,
    #[serde(default)]
    pub stale: bool,
}

/// Failure reported by a collaborator
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ProviderError(pub String);

#[async_trait(?Send)]
pub trait CatalogProvider {
    /// Cached catalog plus staleness. Never blocks on the network.
    fn current(&self) -> CatalogSnapshot;

    /// Always performs a round trip and returns the freshly filtered catalog
    async fn refresh(&self) -> std::result::Result<Vec<CatalogEntry>, ProviderError>;
}

/// Enrichment for one item, shown in the badge's expanded view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub min_players: Option<u32>,
    #[serde(default)]
    pub max_players: Option<u32>,
    #[serde(default)]
    pub playing_time: Option<u32>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// Memoized by the implementor; safe to call concurrently for distinct ids
#[async_trait(?Send)]
pub trait DetailProvider {
    async fn detail(&self, id: &str) -> Option<DetailRecord>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CatalogSource {
    /// Cached and fresh
    Fresh,
    /// Cached but stale; caller should refresh in the background
    Stale,
    /// Nothing cached; fetched now
    Refreshed,
}

#[derive(Debug, Clone)]
pub struct CatalogLoad {
    pub entries: Vec<CatalogEntry>,
    pub source: CatalogSource,
}

impl CatalogLoad {
    pub fn needs_background_refresh(&self) -> bool {
        self.source == CatalogSource::Stale
    }
}

/// Obtain a catalog for a session start.
///
/// A cached copy is used immediately, stale or not. Only an empty cache waits
/// on `refresh`, and a failed refresh is `CatalogUnavailable`.
pub async fn load_catalog<P: CatalogProvider + ?Sized>(provider: &P) -> Result<CatalogLoad> {
    let snapshot = provider.current();
    if !snapshot.entries.is_empty() {
        let source = if snapshot.stale { CatalogSource::Stale } else { CatalogSource::Fresh };
        return Ok(CatalogLoad { entries: snapshot.entries, source });
    }

    match provider.refresh().await {
        Ok(entries) => Ok(CatalogLoad { entries, source: CatalogSource::Refreshed }),
        Err(err) => Err(EngineError::CatalogUnavailable(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::cell::Cell;

    struct FakeProvider {
        cached: Vec<CatalogEntry>,
        stale: bool,
        remote: std::result::Result<Vec<CatalogEntry>, ProviderError>,
        refreshes: Cell<usize>,
    }

    #[async_trait(?Send)]
    impl CatalogProvider for FakeProvider {
        fn current(&self) -> CatalogSnapshot {
            CatalogSnapshot { entries: self.cached.clone(), stale: self.stale }
        }

        async fn refresh(&self) -> std::result::Result<Vec<CatalogEntry>, ProviderError> {
            self.refreshes.set(self.refreshes.get() + 1);
            self.remote.clone()
        }
    }

    fn catan() -> CatalogEntry {
        CatalogEntry::new("13", "Catan", "5", "7.2", "1995")
    }

    #[test]
    fn test_fresh_cache_skips_network() {
        let provider = FakeProvider {
            cached: vec![catan()],
            stale: false,
            remote: Err(ProviderError("offline".into())),
            refreshes: Cell::new(0),
        };
        let load = block_on(load_catalog(&provider)).unwrap();
        assert_eq!(load.source, CatalogSource::Fresh);
        assert!(!load.needs_background_refresh());
        assert_eq!(provider.refreshes.get(), 0);
    }

    #[test]
    fn test_stale_cache_used_immediately() {
        let provider = FakeProvider {
            cached: vec![catan()],
            stale: true,
            remote: Ok(vec![]),
            refreshes: Cell::new(0),
        };
        let load = block_on(load_catalog(&provider)).unwrap();
        assert_eq!(load.entries.len(), 1);
        assert!(load.needs_background_refresh());
        assert_eq!(provider.refreshes.get(), 0);
    }

    #[test]
    fn test_empty_cache_awaits_refresh() {
        let provider = FakeProvider {
            cached: vec![],
            stale: false,
            remote: Ok(vec![catan()]),
            refreshes: Cell::new(0),
        };
        let load = block_on(load_catalog(&provider)).unwrap();
        assert_eq!(load.source, CatalogSource::Refreshed);
        assert_eq!(provider.refreshes.get(), 1);
    }

    #[test]
    fn test_no_cache_and_failed_refresh_is_unavailable() {
        let provider = FakeProvider {
            cached: vec![],
            stale: true,
            remote: Err(ProviderError("503 from dump host".into())),
            refreshes: Cell::new(0),
        };
        let err = block_on(load_catalog(&provider)).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("503"));
    }
}
