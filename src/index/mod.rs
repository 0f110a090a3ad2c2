//! Index contract, per-index configuration, and the index kinds.

pub mod btree;
pub mod composite;
pub mod differential;
pub mod factory;
pub mod flat;
pub mod nonunique;

pub use btree::BTreeIndex;
pub use composite::{CompositeIndex, CompositeSegment};
pub use differential::DifferentialIndex;
pub use flat::SortedIndex;
pub use nonunique::{NonUniqueIndex, TaggedKey};

use std::path::PathBuf;
use std::sync::Arc;

use crate::algebra::{entire_compare, EntireCompare, KeyCompare, Range, Ray, SeekResult};
use crate::config::IndexOptions;
use crate::error::{IndexError, Result};
use crate::measure::{MeasureSet, MeasureValue};
use crate::page::Features;

/// Extracts the key from an item.
pub type KeyExtract<K, V> = Arc<dyn Fn(&V) -> K + Send + Sync>;

/// Lazy item stream handed out by [`OrderedIndex::reader`].
pub type Reader<'a, V> = Box<dyn Iterator<Item = Result<V>> + 'a>;

/// Everything an index needs at construction time.
///
/// Comparers and the extractor are explicit values threaded through every
/// operation; an index never reaches for an implicit type-level ordering.
pub struct IndexConfig<K, V> {
    /// Key extractor.
    pub extract: KeyExtract<K, V>,
    /// Raw key comparer.
    pub compare: KeyCompare<K>,
    /// Endpoint comparer, normally derived from `compare`.
    pub entire_compare: EntireCompare<K>,
    /// Page sizing and cache tuning.
    pub options: IndexOptions,
    /// Backing-resource location; selects the persisted provider when set.
    pub location: Option<PathBuf>,
    /// Capability flags.
    pub features: Features,
    /// Aggregates to maintain.
    pub measures: MeasureSet<V>,
}

impl<K: 'static, V> IndexConfig<K, V> {
    /// A read/write in-memory configuration with default options.
    pub fn new(extract: KeyExtract<K, V>, compare: KeyCompare<K>) -> Self {
        let entire = entire_compare(compare.clone());
        Self {
            extract,
            compare,
            entire_compare: entire,
            options: IndexOptions::default(),
            location: None,
            features: Features::READ_WRITE,
            measures: MeasureSet::new(),
        }
    }

    /// Replaces the tuning options.
    pub fn with_options(mut self, options: IndexOptions) -> Self {
        self.options = options;
        self
    }

    /// Points the index at a backing resource.
    pub fn with_location(mut self, location: PathBuf) -> Self {
        self.location = Some(location);
        self.features = self.features.with(Features::SERIALIZE);
        self
    }

    /// Replaces the capability flags.
    pub fn with_features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    /// Replaces the measure set.
    pub fn with_measures(mut self, measures: MeasureSet<V>) -> Self {
        self.measures = measures;
        self
    }

    /// Rejects configurations no index can run with. Fatal at configure time.
    pub fn validate(&self) -> Result<()> {
        if self.options.page_size < 2 {
            return Err(IndexError::Configuration(format!(
                "page size {} is below the minimum of 2",
                self.options.page_size
            )));
        }
        if self.options.cache_pages == 0 {
            return Err(IndexError::Configuration("cache must hold at least one page".into()));
        }
        if self.options.bloom_capacity == 0 {
            return Err(IndexError::Configuration("bloom capacity must be positive".into()));
        }
        if self.features.contains(Features::SERIALIZE) && self.location.is_none() {
            return Err(IndexError::Configuration(
                "serialize feature requires a backing location".into(),
            ));
        }
        if self.location.is_some() && !self.features.contains(Features::SERIALIZE) {
            return Err(IndexError::Configuration(
                "backing location requires the serialize feature".into(),
            ));
        }
        Ok(())
    }
}

impl<K, V> Clone for IndexConfig<K, V> {
    fn clone(&self) -> Self {
        Self {
            extract: self.extract.clone(),
            compare: self.compare.clone(),
            entire_compare: self.entire_compare.clone(),
            options: self.options.clone(),
            location: self.location.clone(),
            features: self.features,
            measures: self.measures.clone(),
        }
    }
}

/// The contract every index kind and wrapper exposes to the layer above.
///
/// All operations are synchronous. Access is single-writer: the engine
/// implements no locking of its own, and a reader opened from
/// [`OrderedIndex::reader`] is a live cursor — mutating the index while one
/// is open is caller error (no snapshot isolation is promised).
pub trait OrderedIndex<K, V> {
    /// Capability flags in effect.
    fn features(&self) -> Features;

    /// Current item count.
    fn len(&self) -> usize;

    /// Whether the index holds nothing.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Monotonic change counter, bumped by every successful mutation.
    fn version(&self) -> u64;

    /// The item stored under `key`, if any.
    fn get(&self, key: &K) -> Result<Option<V>>;

    /// Whether `key` is present.
    fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Whether this exact item is present under its own key.
    fn contains(&self, item: &V) -> Result<bool>;

    /// Seeks an exact key; a miss resolves to the nearest greater entry.
    fn seek_key(&self, key: &K) -> Result<SeekResult<V>>;

    /// Seeks along a ray: exact match, or the nearest entry in the ray's
    /// direction, or nothing if the ray runs off the key space.
    fn seek(&self, ray: &Ray<K>) -> Result<SeekResult<V>>;

    /// Lazy, finite, restartable stream over the items inside `range`, in the
    /// range's direction.
    fn reader(&self, range: &Range<K>) -> Result<Reader<'_, V>>;

    /// Inserts a new item. Fails on a duplicate key.
    fn add(&mut self, item: V) -> Result<()>;

    /// Removes this exact item. `Ok(false)` when absent or different.
    fn remove(&mut self, item: &V) -> Result<bool>;

    /// Removes whatever is stored under `key`. `Ok(false)` when absent.
    fn remove_key(&mut self, key: &K) -> Result<bool>;

    /// Swaps the item stored under the same key. Fails when absent.
    fn replace(&mut self, item: V) -> Result<()>;

    /// Drops every item and resets maintained state.
    fn clear(&mut self) -> Result<()>;

    /// Maintained aggregate over the full key space.
    fn measure(&self, name: &str) -> Result<MeasureValue>;

    /// Aggregate over a sub-range, recomputed by scanning exactly that range
    /// unless the full-range value can be used verbatim.
    fn measure_range(&self, range: &Range<K>, name: &str) -> Result<MeasureValue>;
}

/// An always-empty reader.
pub(crate) fn empty_reader<'a, V: 'a>() -> Reader<'a, V> {
    Box::new(std::iter::empty())
}

/// Whether a range spans the entire key space.
pub(crate) fn is_full_range<K: Clone>(range: &Range<K>, cmp: &KeyCompare<K>) -> bool {
    match (range.lower_endpoint(cmp), range.higher_endpoint(cmp)) {
        (Some(low), Some(high)) => low.is_infinite() && high.is_infinite(),
        _ => false,
    }
}
