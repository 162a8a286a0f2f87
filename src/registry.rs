// src/registry.rs

//! Site registry.
//!
//! Ordered, validated collection of monitored sites. Reads run concurrently;
//! structural changes take the single writer lock, validate the new state,
//! flush it to the config store, and only then become visible.

use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{AppError, Result};
use crate::models::{Site, SiteKey};
use crate::storage::ConfigStore;

/// Owned registry of monitored sites.
pub struct SiteRegistry {
    sites: RwLock<Vec<Site>>,
    store: Option<Arc<dyn ConfigStore>>,
}

impl SiteRegistry {
    /// In-memory registry seeded with `sites`.
    pub fn new(sites: Vec<Site>) -> Result<Self> {
        validate_all(&sites)?;
        Ok(Self {
            sites: RwLock::new(sites),
            store: None,
        })
    }

    /// Registry loaded from, and flushed to, a config store.
    pub fn with_store(store: Arc<dyn ConfigStore>) -> Result<Self> {
        let sites = store.load()?;
        validate_all(&sites)?;
        log::debug!("Loaded {} site(s) into the registry", sites.len());
        Ok(Self {
            sites: RwLock::new(sites),
            store: Some(store),
        })
    }

    /// Snapshot of all sites in registry order.
    pub fn list(&self) -> Vec<Site> {
        self.sites
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.sites.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &SiteKey) -> Option<Site> {
        self.sites
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| &s.key == key)
            .cloned()
    }

    /// Look up a site by key, name or URL (case-insensitive).
    pub fn find(&self, key_or_url: &str) -> Option<Site> {
        let needle = key_or_url.trim();
        let needle_url = needle.trim_end_matches('/');
        self.sites
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| {
                s.key.as_str().eq_ignore_ascii_case(needle)
                    || s.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(needle))
                    || s.url.trim_end_matches('/').eq_ignore_ascii_case(needle_url)
            })
            .cloned()
    }

    /// Resolve a lookup string to a key, failing when nothing matches.
    pub fn resolve(&self, key_or_url: &str) -> Result<SiteKey> {
        self.find(key_or_url)
            .map(|s| s.key)
            .ok_or_else(|| AppError::SiteNotFound(key_or_url.to_string()))
    }

    /// Append a new site.
    pub fn add(&self, site: Site) -> Result<Site> {
        let added = site.clone();
        self.mutate(move |sites| {
            if sites.iter().any(|s| s.key == site.key) {
                return Err(AppError::DuplicateSite(site.key.to_string()));
            }
            sites.push(site);
            Ok(())
        })?;
        log::info!("Added site {} ({})", added.key, added.url);
        Ok(added)
    }

    /// Remove a site, returning its last definition.
    pub fn remove(&self, key: &SiteKey) -> Result<Site> {
        let mut removed = None;
        self.mutate(|sites| {
            let index = sites
                .iter()
                .position(|s| &s.key == key)
                .ok_or_else(|| AppError::SiteNotFound(key.to_string()))?;
            removed = Some(sites.remove(index));
            Ok(())
        })?;
        log::info!("Removed site {key}");
        removed.ok_or_else(|| AppError::SiteNotFound(key.to_string()))
    }

    /// Edit a site in place. The key itself cannot change.
    pub fn update<F>(&self, key: &SiteKey, edit: F) -> Result<Site>
    where
        F: FnOnce(&mut Site),
    {
        let mut updated = None;
        self.mutate(|sites| {
            let index = sites
                .iter()
                .position(|s| &s.key == key)
                .ok_or_else(|| AppError::SiteNotFound(key.to_string()))?;
            edit(&mut sites[index]);
            if &sites[index].key != key {
                return Err(AppError::validation(format!(
                    "site key '{key}' cannot be changed"
                )));
            }
            updated = Some(sites[index].clone());
            Ok(())
        })?;
        log::info!("Updated site {key}");
        updated.ok_or_else(|| AppError::SiteNotFound(key.to_string()))
    }

    pub fn set_enabled(&self, key: &SiteKey, enabled: bool) -> Result<Site> {
        self.update(key, |site| site.enabled = enabled)
    }

    /// Re-read the config store, keeping the current state on failure.
    pub fn reload(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let sites = store.load()?;
        validate_all(&sites)?;
        *self.sites.write().unwrap_or_else(PoisonError::into_inner) = sites;
        Ok(())
    }

    /// Apply `change` to a copy, validate, flush, then publish.
    fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<Site>) -> Result<()>,
    {
        let mut guard = self.sites.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        change(&mut next)?;
        validate_all(&next)?;
        if let Some(store) = &self.store {
            store.save(&next)?;
        }
        *guard = next;
        Ok(())
    }
}

fn validate_all(sites: &[Site]) -> Result<()> {
    for (i, site) in sites.iter().enumerate() {
        site.validate()?;
        if sites[..i].iter().any(|s| s.key == site.key) {
            return Err(AppError::DuplicateSite(site.key.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TomlConfigStore;
    use tempfile::TempDir;

    fn site(url: &str) -> Site {
        Site::new(url).unwrap()
    }

    #[test]
    fn test_add_keeps_order_and_rejects_duplicates() {
        let registry = SiteRegistry::new(Vec::new()).unwrap();
        registry.add(site("https://a.example.com")).unwrap();
        registry.add(site("https://b.example.com")).unwrap();

        let keys: Vec<_> = registry.list().into_iter().map(|s| s.key.to_string()).collect();
        assert_eq!(keys, vec!["a-example-com", "b-example-com"]);

        let err = registry.add(site("https://a.example.com")).unwrap_err();
        assert!(matches!(err, AppError::DuplicateSite(_)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_invalid_site_is_never_admitted() {
        let registry = SiteRegistry::new(Vec::new()).unwrap();
        let mut bad = site("https://a.example.com");
        bad.ignore_patterns = vec!["(".into()];
        assert!(registry.add(bad).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_failed_update_leaves_site_unchanged() {
        let registry = SiteRegistry::new(vec![site("https://a.example.com")]).unwrap();
        let key = registry.list()[0].key.clone();

        let err = registry.update(&key, |s| s.interval_secs = Some(0));
        assert!(err.is_err());
        assert_eq!(registry.get(&key).unwrap().interval_secs, None);

        registry.update(&key, |s| s.interval_secs = Some(60)).unwrap();
        assert_eq!(registry.get(&key).unwrap().interval_secs, Some(60));
    }

    #[test]
    fn test_find_by_key_name_or_url() {
        let mut shop = site("https://shop.example.com/");
        shop.name = Some("My Shop".into());
        let registry = SiteRegistry::new(vec![shop]).unwrap();

        assert!(registry.find("shop-example-com").is_some());
        assert!(registry.find("my shop").is_some());
        assert!(registry.find("HTTPS://SHOP.EXAMPLE.COM").is_some());
        assert!(registry.find("https://other.example.com").is_none());
        assert!(matches!(
            registry.resolve("nope"),
            Err(AppError::SiteNotFound(_))
        ));
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let registry = SiteRegistry::new(Vec::new()).unwrap();
        let key = SiteKey::parse("ghost").unwrap();
        assert!(matches!(
            registry.remove(&key),
            Err(AppError::SiteNotFound(_))
        ));
    }

    #[test]
    fn test_mutations_are_flushed_to_store() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(TomlConfigStore::new(tmp.path().join("sitewatch.toml")));
        let registry = SiteRegistry::with_store(store.clone()).unwrap();

        let added = registry.add(site("https://a.example.com")).unwrap();
        registry.set_enabled(&added.key, false).unwrap();
        assert_eq!(store.load().unwrap(), registry.list());

        let reopened = SiteRegistry::with_store(store).unwrap();
        assert!(!reopened.get(&added.key).unwrap().enabled);
    }
}
