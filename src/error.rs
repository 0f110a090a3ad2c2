//! Error taxonomy shared by every index kind and page provider.

use std::io;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Failures surfaced by index operations, providers and the range algebra.
///
/// Nothing in this crate retries internally; callers that want retry-on-conflict
/// semantics wrap operations at the transaction layer.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Underlying backing-resource I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Invalid configuration, rejected at construction time.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// The operation needs a feature flag the index was not configured with.
    #[error("operation requires unsupported feature: {0}")]
    Unsupported(&'static str),
    /// Insert found the key already present.
    #[error("duplicate key")]
    DuplicateKey,
    /// Replace found no entry for the key.
    #[error("key not found")]
    KeyNotFound,
    /// Range-algebra precondition violated by the operands.
    #[error("range operands: {0}")]
    Algebra(&'static str),
    /// The named measure is not part of the index's measure set.
    #[error("measure {0:?} not defined")]
    UnknownMeasure(String),
    /// A page, record or invariant check failed.
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
    /// Encoding or decoding a page record failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Serialization(err.to_string())
    }
}
