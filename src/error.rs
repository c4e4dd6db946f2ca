//! Error types for the decision engine.
//!
//! "No match" and "rate limited" are ordinary outcomes and never show up here.

use std::path::PathBuf;

/// Malformed configuration or rule set. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("invalid rule `{rule}`: {message}")]
    InvalidRule { rule: String, message: String },
}

/// Snapshot load/save/backup failure. Recovered from, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("state file {path} unavailable: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// A reply, notice or enforcement could not be delivered by the platform.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("platform rejected the request: {0}")]
    Rejected(String),

    /// The actor cannot be banned (e.g. no longer a member); kicking may still work.
    #[error("ban unavailable for actor {0}")]
    BanUnavailable(String),

    #[error("transport failure: {0}")]
    Transport(String),
}
