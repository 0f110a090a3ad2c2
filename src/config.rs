//! Plain-data tuning options shared by every index kind.

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// Sizing and cache knobs for an index.
///
/// These are data only; callables (extractor, comparers) live in
/// [`crate::index::IndexConfig`]. The struct round-trips through serde so a
/// host application can keep it in its own configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOptions {
    /// Maximum entries per page before a split.
    pub page_size: usize,
    /// Pages the persisted provider keeps resident.
    pub cache_pages: usize,
    /// Expected key count the bloom filter is sized for.
    pub bloom_capacity: usize,
    /// Target bloom false-positive rate.
    pub bloom_fp_rate: f64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            page_size: 128,
            cache_pages: 1024,
            bloom_capacity: 16_384,
            bloom_fp_rate: 0.01,
        }
    }
}

impl IndexOptions {
    /// Small pages and cache; exercises splits and eviction early. Meant for
    /// tests and tiny data sets.
    pub fn compact() -> Self {
        Self {
            page_size: 4,
            cache_pages: 8,
            bloom_capacity: 256,
            bloom_fp_rate: 0.01,
        }
    }

    /// Wide pages and a large cache for bulk-loaded, scan-heavy indexes.
    pub fn bulk() -> Self {
        Self {
            page_size: 512,
            cache_pages: 8_192,
            bloom_capacity: 1 << 20,
            bloom_fp_rate: 0.005,
        }
    }

    /// Parses options from a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| IndexError::Configuration(err.to_string()))
    }
}
