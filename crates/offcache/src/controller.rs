//! OfflineCacheController: cache-first fetch interception over a seeded store

use std::sync::Arc;

use futures::future::try_join_all;
use futures::lock::Mutex;
use offstore::{CacheStorage, CacheStore, RequestKey, Response};
use parking_lot::RwLock;
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::network::{Network, Request};
use crate::stats::ControllerStats;

/// Lifecycle of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    /// No successful install yet; every fetch goes to the network
    Uninitialized,
    /// Seed resources are stored; fetches are served cache-first
    Active,
}

/// Offline cache controller
///
/// Two entry points, driven by a host: [`on_install`](Self::on_install) once
/// to warm the store, then [`on_fetch`](Self::on_fetch) per intercepted
/// request. The store is only ever written by install.
pub struct OfflineCacheController<N> {
    config: ControllerConfig,
    seeds: Vec<Url>,
    storage: CacheStorage,
    network: N,
    store: RwLock<Option<Arc<CacheStore>>>,
    state: RwLock<LifecycleState>,
    install_lock: Mutex<()>,
    stats: ControllerStats,
}

impl<N: Network> OfflineCacheController<N> {
    /// Create a controller over `storage`
    ///
    /// If a non-empty store named `config.cache_name` already exists, the
    /// controller starts [`LifecycleState::Active`] without reinstalling. A
    /// store that cannot be opened leaves it `Uninitialized`, passing fetches
    /// through to the network.
    pub fn new(config: ControllerConfig, storage: CacheStorage, network: N) -> Result<Self> {
        config.validate()?;
        let seeds = config.seed_urls()?;

        let existing = if storage.has(&config.cache_name) {
            match storage.open(&config.cache_name) {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!(cache = %config.cache_name, error = %e, "Cannot open stored cache");
                    None
                }
            }
        } else {
            None
        };

        let (store, state) = match existing {
            Some(store) if !store.is_empty() => {
                info!(
                    cache = %config.cache_name,
                    entries = store.len(),
                    "Restored installed cache"
                );
                (Some(Arc::new(store)), LifecycleState::Active)
            }
            Some(store) => (Some(Arc::new(store)), LifecycleState::Uninitialized),
            None => (None, LifecycleState::Uninitialized),
        };

        Ok(Self {
            config,
            seeds,
            storage,
            network,
            store: RwLock::new(store),
            state: RwLock::new(state),
            install_lock: Mutex::new(()),
            stats: ControllerStats::new(),
        })
    }

    /// Install lifecycle event: fetch every seed and store them all, or none
    ///
    /// Any fetch error or non-2xx seed fails the install and leaves the state
    /// unchanged. No retry.
    pub async fn on_install(&self) -> Result<()> {
        let _guard = self.install_lock.lock().await;

        info!(
            cache = %self.config.cache_name,
            seeds = self.seeds.len(),
            "Installing"
        );

        match self.install_seeds().await {
            Ok(count) => {
                self.stats.record_install();
                *self.state.write() = LifecycleState::Active;
                info!(cache = %self.config.cache_name, entries = count, "Install complete");
                Ok(())
            }
            Err(e) => {
                self.stats.record_install_failure();
                warn!(cache = %self.config.cache_name, error = %e, "Install failed");
                Err(e)
            }
        }
    }

    async fn install_seeds(&self) -> Result<usize> {
        let store = self.open_store()?;

        let fetches = self.seeds.iter().map(|url| async move {
            let request = Request::get(url.clone());
            let response = self.network.fetch(&request).await?;
            if !response.is_ok() {
                return Err(Error::BadSeedResponse {
                    url: url.to_string(),
                    status: response.status,
                });
            }
            debug!(url = %url, bytes = response.body.len(), "Fetched seed");
            Ok::<_, Error>((request.key(), response))
        });

        let entries = try_join_all(fetches).await?;
        let count = entries.len();
        store.put_all(entries)?;

        Ok(count)
    }

    fn open_store(&self) -> Result<Arc<CacheStore>> {
        if let Some(store) = self.store.read().as_ref() {
            return Ok(Arc::clone(store));
        }

        let store = Arc::new(self.storage.open(&self.config.cache_name)?);
        *self.store.write() = Some(Arc::clone(&store));
        Ok(store)
    }

    /// Fetch interception: stored response if present, else one live fetch
    ///
    /// Network responses are returned as-is and never written to the store.
    pub async fn on_fetch(&self, request: &Request) -> Result<Response> {
        if let Some(response) = self.lookup(request) {
            self.stats.record_hit();
            debug!(method = %request.method, url = %request.url, "Cache hit");
            return Ok(response);
        }

        self.stats.record_miss();
        self.stats.record_network_fetch();
        debug!(method = %request.method, url = %request.url, "Cache miss");

        match self.network.fetch(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.stats.record_network_failure();
                debug!(url = %request.url, error = %e, "Network fetch failed");
                Err(e)
            }
        }
    }

    fn lookup(&self, request: &Request) -> Option<Response> {
        if *self.state.read() != LifecycleState::Active {
            return None;
        }

        let store = self.store.read().clone()?;
        match store.match_request(&request.key()) {
            Ok(found) => found,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache read failed, using network");
                None
            }
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// Request identities held in the Cache Store
    pub fn cached_keys(&self) -> Vec<RequestKey> {
        match self.store.read().as_ref() {
            Some(store) => store.keys(),
            None => Vec::new(),
        }
    }

    /// Resolve a request target against the configured origin
    pub fn resolve(&self, target: &str) -> Result<Url> {
        self.config.resolve(target)
    }

    /// Get controller statistics
    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    /// Configuration the controller was built with
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Network used for fallbacks and install
    pub fn network(&self) -> &N {
        &self.network
    }
}
