//! Configuration Management
//!
//! Persistent settings of the `serego` command line, stored as JSON under the
//! user's config directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gcp::auth::{self, DEFAULT_LOCATION};
use crate::registry::{DEFAULT_CACHE_TTL, DEFAULT_PAGE_SIZE};

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Last used project ID
    #[serde(default)]
    pub project_id: Option<String>,
    /// Service Directory region
    #[serde(default)]
    pub location: Option<String>,
    /// Object cache TTL; 0 disables the cache
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    /// Listing page size
    #[serde(default)]
    pub page_size: Option<u32>,
}

impl Config {
    /// `<config_dir>/serego/config.json`
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("serego").join("config.json"))
    }

    /// Load configuration from disk; a missing or unreadable file yields defaults
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|err| {
                tracing::warn!("Ignoring malformed config file {:?}: {}", path, err);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;

        Ok(())
    }

    /// Effective project (CLI > config > gcloud default); empty when none is known
    pub fn effective_project(&self, cli: Option<&str>) -> String {
        cli.map(str::to_string)
            .or_else(|| self.project_id.clone())
            .or_else(auth::get_default_project)
            .unwrap_or_default()
    }

    /// Effective location (CLI > config > gcloud default > us-central1)
    pub fn effective_location(&self, cli: Option<&str>) -> String {
        cli.map(str::to_string)
            .or_else(|| self.location.clone())
            .or_else(auth::get_default_location)
            .unwrap_or_else(|| DEFAULT_LOCATION.to_string())
    }

    /// Effective cache TTL; `None` disables caching
    pub fn effective_cache_ttl(&self, cli_secs: Option<u64>) -> Option<Duration> {
        match cli_secs.or(self.cache_ttl_secs) {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_CACHE_TTL),
        }
    }

    pub fn effective_page_size(&self, cli: Option<u32>) -> u32 {
        cli.or(self.page_size)
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }
}
