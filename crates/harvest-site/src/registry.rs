//! In-memory site definition registry.

use crate::{
    definition::SiteDefinition,
    error::{Result, SiteError},
    loader::SiteLoader,
};
use harvest_core::SiteId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// In-memory cache of site definitions.
#[derive(Clone, Default)]
pub struct SiteRegistry {
    definitions: Arc<RwLock<HashMap<SiteId, SiteDefinition>>>,
}

impl SiteRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry and load all definitions from the given loader.
    pub fn load_from(loader: &SiteLoader) -> Result<Self> {
        let registry = Self::new();
        registry.reload(loader)?;
        Ok(registry)
    }

    /// Replace the cache with freshly loaded definitions.
    pub fn reload(&self, loader: &SiteLoader) -> Result<()> {
        let definitions = loader.load_all()?;

        let mut cache = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        cache.clear();
        for definition in definitions {
            cache.insert(definition.id().clone(), definition);
        }

        info!(count = cache.len(), "reloaded site definitions");
        Ok(())
    }

    /// Get a site definition by ID.
    pub fn get(&self, site_id: &SiteId) -> Result<SiteDefinition> {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(site_id)
            .cloned()
            .ok_or_else(|| SiteError::NotFound {
                site_id: site_id.to_string(),
            })
    }

    /// Find the site whose domain is a suffix of `host`.
    #[must_use]
    pub fn find_by_host(&self, host: &str) -> Option<SiteDefinition> {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|def| {
                host == def.site.domain || host.ends_with(&format!(".{}", def.site.domain))
            })
            .cloned()
    }

    /// All site IDs, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<SiteId> {
        let mut ids: Vec<_> = self
            .definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Number of loaded sites.
    #[must_use]
    pub fn count(&self) -> usize {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Add or update a definition after validating it.
    pub fn insert(&self, definition: SiteDefinition) -> Result<()> {
        definition.validate()?;

        let site_id = definition.id().clone();
        self.definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(site_id.clone(), definition);

        debug!(site_id = %site_id, "inserted site definition");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE_1688: &str = include_str!("../../../site-definitions/1688.toml");
    const SITE_AMAZON: &str = include_str!("../../../site-definitions/amazon.toml");

    fn registry() -> SiteRegistry {
        let registry = SiteRegistry::new();
        for contents in [SITE_1688, SITE_AMAZON] {
            let definition: SiteDefinition = toml::from_str(contents).expect("parse definition");
            registry.insert(definition).expect("insert definition");
        }
        registry
    }

    #[test]
    fn test_registry_insert_and_get() {
        let registry = registry();
        assert_eq!(registry.count(), 2);

        let amazon = registry
            .get(&SiteId::new("amazon").expect("valid site ID"))
            .expect("get definition");
        assert_eq!(amazon.storage.ids_key, "asins");
    }

    #[test]
    fn test_registry_get_nonexistent() {
        let registry = SiteRegistry::new();
        let result = registry.get(&SiteId::new("nowhere").expect("valid site ID"));
        assert!(matches!(result, Err(SiteError::NotFound { .. })));
    }

    #[test]
    fn test_find_by_host() {
        let registry = registry();
        let found = registry.find_by_host("s.1688.com").expect("match subdomain");
        assert_eq!(found.id().as_str(), "1688");
        assert!(registry.find_by_host("www.amazon.com").is_some());
        assert!(registry.find_by_host("notamazon.com").is_none());
    }

    #[test]
    fn test_ids_sorted() {
        let ids: Vec<String> = registry().ids().iter().map(ToString::to_string).collect();
        assert_eq!(ids, vec!["1688".to_string(), "amazon".to_string()]);
    }
}
