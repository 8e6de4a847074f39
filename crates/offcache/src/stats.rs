//! Controller statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for fetch interception and install outcomes
#[derive(Debug, Default)]
pub struct ControllerStats {
    hits: AtomicU64,
    misses: AtomicU64,
    network_fetches: AtomicU64,
    network_failures: AtomicU64,
    installs: AtomicU64,
    install_failures: AtomicU64,
}

/// Point-in-time copy of [`ControllerStats`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Fetches answered from the Cache Store
    pub hits: u64,
    /// Fetches that fell through to the network
    pub misses: u64,
    /// Live network fetches issued for intercepted requests
    pub network_fetches: u64,
    /// Live network fetches that failed
    pub network_failures: u64,
    /// Successful installs
    pub installs: u64,
    /// Failed installs
    pub install_failures: u64,
    /// hits / (hits + misses)
    pub hit_ratio: f64,
}

impl ControllerStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_network_fetch(&self) {
        self.network_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_network_failure(&self) {
        self.network_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_install(&self) {
        self.installs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_install_failure(&self) {
        self.install_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total hits
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get total misses
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get total network fetches
    pub fn network_fetches(&self) -> u64 {
        self.network_fetches.load(Ordering::Relaxed)
    }

    /// Get total network failures
    pub fn network_failures(&self) -> u64 {
        self.network_failures.load(Ordering::Relaxed)
    }

    /// Get successful installs
    pub fn installs(&self) -> u64 {
        self.installs.load(Ordering::Relaxed)
    }

    /// Get failed installs
    pub fn install_failures(&self) -> u64 {
        self.install_failures.load(Ordering::Relaxed)
    }

    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Copy all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            network_fetches: self.network_fetches(),
            network_failures: self.network_failures(),
            installs: self.installs(),
            install_failures: self.install_failures(),
            hit_ratio: self.hit_ratio(),
        }
    }
}
