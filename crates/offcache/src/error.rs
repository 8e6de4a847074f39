//! Error types for the offcache controller.

use thiserror::Error;

/// Errors raised by the controller, its configuration, and the network seam.
#[derive(Error, Debug)]
pub enum Error {
    /// Error from the Cache Store.
    #[error("Store error: {0}")]
    Store(#[from] offstore::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Network fetch failed for a reason other than the HTTP client.
    #[error("Network error: {0}")]
    Network(String),

    /// A seed resource answered with a non-2xx status during install.
    #[error("Seed resource {url} returned status {status}")]
    BadSeedResponse {
        /// Absolute URL of the seed.
        url: String,
        /// Status the network returned.
        status: u16,
    },

    /// A URL could not be parsed or resolved against the origin.
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The offending input.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Configuration is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be decoded.
    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] serde_json::Error),

    /// I/O error while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for offcache operations.
pub type Result<T> = std::result::Result<T, Error>;
