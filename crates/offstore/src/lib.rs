//! # offstore
//!
//! Persistent store of captured HTTP responses, keyed by request identity.
//!
//! ## Model
//! - One file per named store, under a shared data directory
//! - Append-only records, indexed in memory on open
//! - Batch writes are all-or-nothing
//! - GET requests only; no eviction, no expiry

#![warn(missing_docs)]

mod entry;
mod error;
mod parser;
mod registry;
mod storage;

pub use entry::{RequestKey, Response};
pub use error::{Error, Result};
pub use registry::{validate_name, CacheStorage, STORE_EXTENSION};
pub use storage::CacheStore;
