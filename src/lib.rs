//! Ordex: a generic key-ordered index engine.
//!
//! The crate is organized leaf-first:
//!
//! - [`algebra`] — interval endpoints ([`Entire`]), ranges, rays and seek
//!   results, all comparisons going through explicit comparer values;
//! - [`page`] — the page model and the [`page::PageProvider`] abstraction
//!   with in-memory and cached-stream implementations;
//! - [`measure`] — incrementally maintained aggregates with a batch-recompute
//!   fallback;
//! - [`index`] — the [`OrderedIndex`] contract, the paged B+Tree core, the
//!   flat sorted alternative, and the non-unique / differential / composite
//!   composition wrappers plus the [`index::factory`] construction helpers.
//!
//! Access is single-writer with reader-visibility-after-write semantics; the
//! engine implements no locking or transactions of its own — an outer session
//! layer serializes access.

pub mod algebra;
pub mod config;
pub mod error;
pub mod index;
pub mod measure;
pub mod page;

pub use algebra::{Direction, Entire, Range, Ray, SeekResult};
pub use config::IndexOptions;
pub use error::{IndexError, Result};
pub use index::{
    BTreeIndex, CompositeIndex, CompositeSegment, DifferentialIndex, IndexConfig, NonUniqueIndex,
    OrderedIndex, SortedIndex, TaggedKey,
};
pub use measure::{Measure, MeasureResultSet, MeasureSet, MeasureValue};
pub use page::{BloomFilter, Features, MemoryPageProvider, PageProvider, PageRef, StreamPageProvider};
