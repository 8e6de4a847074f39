//! # offcache
//!
//! Cache-first offline controller.
//!
//! ## Lifecycle
//! - **Install**: fetch the Seed Resource List and store it in the named
//!   Cache Store, all or nothing
//! - **Fetch**: answer from the store when the request is there, otherwise
//!   make exactly one live fetch and return it untouched
//!
//! The host owns the event loop and calls both entry points; see the
//! `offcached` daemon for one such host.

#![warn(missing_docs)]

mod config;
mod controller;
mod error;
mod network;
mod stats;

pub use config::{ControllerConfig, DEFAULT_CACHE_NAME, DEFAULT_ORIGIN, DEFAULT_SEED_RESOURCES};
pub use controller::{LifecycleState, OfflineCacheController};
pub use error::{Error, Result};
pub use network::{is_hop_by_hop, HttpNetwork, Network, Request};
pub use stats::{ControllerStats, StatsSnapshot};

pub use offstore::{CacheStorage, RequestKey, Response};
pub use reqwest::Url;
