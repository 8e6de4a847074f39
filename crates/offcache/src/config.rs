use std::collections::HashSet;
use std::path::Path;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Store name used when none is configured.
pub const DEFAULT_CACHE_NAME: &str = "asbjj-v1";

/// Origin the seed paths are resolved against by default.
pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:8000";

/// Resources fetched into the store at install time by default.
pub const DEFAULT_SEED_RESOURCES: [&str; 4] = [
    "/",
    "/static/css/style.css",
    "/static/js/main.js",
    "/static/img/logo.png",
];

/// Controller configuration. Set once at startup and never changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Name of the Cache Store. Changing it is the only invalidation mechanism.
    pub cache_name: String,
    /// Base URL for relative seed paths and origin-form requests.
    pub origin: String,
    /// Seed Resource List, in install order.
    pub seed_resources: Vec<String>,
    /// Per-request timeout for the HTTP network. None waits indefinitely.
    pub request_timeout_secs: Option<u64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            seed_resources: DEFAULT_SEED_RESOURCES.iter().map(|s| s.to_string()).collect(),
            request_timeout_secs: None,
        }
    }
}

impl ControllerConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Parse a JSON config document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Check the cache name, origin and seed list.
    pub fn validate(&self) -> Result<()> {
        offstore::validate_name(&self.cache_name)?;
        self.seed_urls()?;
        Ok(())
    }

    /// The origin as a base URL.
    pub fn origin_url(&self) -> Result<Url> {
        let url = Url::parse(&self.origin).map_err(|e| Error::InvalidUrl {
            url: self.origin.clone(),
            reason: e.to_string(),
        })?;

        if url.cannot_be_a_base() {
            return Err(Error::InvalidUrl {
                url: self.origin.clone(),
                reason: "origin cannot be a base URL".to_string(),
            });
        }

        Ok(url)
    }

    /// Resolve a path or absolute URL against the origin.
    pub fn resolve(&self, target: &str) -> Result<Url> {
        let mut url = self
            .origin_url()?
            .join(target)
            .map_err(|e| Error::InvalidUrl {
                url: target.to_string(),
                reason: e.to_string(),
            })?;
        url.set_fragment(None);
        Ok(url)
    }

    /// Seed Resource List resolved to absolute URLs.
    ///
    /// Empty lists and entries that resolve to the same URL are rejected.
    pub fn seed_urls(&self) -> Result<Vec<Url>> {
        if self.seed_resources.is_empty() {
            return Err(Error::Config("seed resource list is empty".to_string()));
        }

        let mut seen = HashSet::new();
        let mut urls = Vec::with_capacity(self.seed_resources.len());

        for seed in &self.seed_resources {
            let url = self.resolve(seed)?;
            if !seen.insert(url.clone()) {
                return Err(Error::Config(format!("duplicate seed resource: {}", url)));
            }
            urls.push(url);
        }

        Ok(urls)
    }
}
