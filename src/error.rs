//! Error types for the hippoled daemon

use thiserror::Error;

/// Result type alias for hippoled operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the hippoled daemon
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Database error (pool checkout, poisoned store lock)
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Device protocol error
    #[error("device error: {0}")]
    Device(String),

    /// Discovery error (malformed service entry, mDNS daemon failure)
    #[error("discovery error: {0}")]
    Discovery(String),

    /// API server failure (bind, serve or task join)
    #[error("api error: {0}")]
    Api(String),

    /// Reconciliation stopped making progress
    #[error("watchdog expired: {0}")]
    Watchdog(String),
}
