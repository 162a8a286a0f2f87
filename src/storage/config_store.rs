// src/storage/config_store.rs

//! Durable registry state.
//!
//! `TomlConfigStore` keeps the sites in the `[[sites]]` array of the main
//! config file and rewrites only that array, leaving every other section
//! as it was.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;
use crate::models::Site;
use crate::utils::fs;

/// Loads and saves the registry's sites.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<Vec<Site>>;
    fn save(&self, sites: &[Site]) -> Result<()>;
}

#[derive(Deserialize)]
struct SitesSection {
    #[serde(default)]
    sites: Vec<Site>,
}

/// Registry persisted in a TOML config file.
#[derive(Debug, Clone)]
pub struct TomlConfigStore {
    path: PathBuf,
}

impl TomlConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> Result<toml::Table> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.parse::<toml::Table>()?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(toml::Table::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl ConfigStore for TomlConfigStore {
    fn load(&self) -> Result<Vec<Site>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let section: SitesSection = fs::load_toml(&self.path)?;
        Ok(section.sites)
    }

    fn save(&self, sites: &[Site]) -> Result<()> {
        let mut table = self.read_table()?;
        table.insert("sites".to_string(), toml::Value::try_from(sites)?);

        let content = toml::to_string_pretty(&table)?;
        fs::write_atomic(&self.path, content.as_bytes())?;
        log::debug!("Saved registry to {}", self.path.display());
        Ok(())
    }
}
