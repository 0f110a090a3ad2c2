//! Builds configured index instances, injecting the default measures.

use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::algebra::Range;
use crate::error::{IndexError, Result};
use crate::measure::MeasureSet;
use crate::page::{Features, MemoryPageProvider, StreamPageProvider};

use super::{
    BTreeIndex, CompositeIndex, CompositeSegment, DifferentialIndex, IndexConfig, KeyExtract,
    NonUniqueIndex, OrderedIndex, SortedIndex, TaggedKey,
};
use super::nonunique::TagExtract;

fn with_default_measures<K: 'static, V: 'static>(
    mut config: IndexConfig<K, V>,
) -> IndexConfig<K, V> {
    config.measures = std::mem::take(&mut config.measures).ensure_defaults();
    config
}

/// Unique ordered index held fully in memory.
pub fn create_unique_memory<K, V>(
    config: IndexConfig<K, V>,
) -> Result<BTreeIndex<K, V, MemoryPageProvider<K, V>>>
where
    K: Clone + Hash + 'static,
    V: Clone + PartialEq + 'static,
{
    let config = with_default_measures(config);
    if config.location.is_some() {
        return Err(IndexError::Configuration(
            "memory index cannot take a backing location".into(),
        ));
    }
    let provider = MemoryPageProvider::with_features(config.features);
    BTreeIndex::open(config, provider)
}

/// Unique ordered index persisted through the cached-stream provider.
pub fn create_unique_persistent<K, V>(
    config: IndexConfig<K, V>,
) -> Result<BTreeIndex<K, V, StreamPageProvider<K, V>>>
where
    K: Clone + Hash + Serialize + DeserializeOwned + 'static,
    V: Clone + PartialEq + Serialize + DeserializeOwned + 'static,
{
    let config = with_default_measures(config);
    config.validate()?;
    let location = config.location.clone().ok_or_else(|| {
        IndexError::Configuration("persistent index requires a backing location".into())
    })?;
    let provider = StreamPageProvider::open(
        &location,
        config.features.with(Features::SERIALIZE),
        config.options.cache_pages,
    )?;
    info!(location = %location.display(), "opened persistent index");
    BTreeIndex::open(config, provider)
}

/// Unique ordered index; the backing location in the configuration selects
/// the persisted provider.
pub fn create_unique<K, V>(config: IndexConfig<K, V>) -> Result<Box<dyn OrderedIndex<K, V>>>
where
    K: Clone + Hash + Serialize + DeserializeOwned + 'static,
    V: Clone + PartialEq + Serialize + DeserializeOwned + 'static,
{
    if config.location.is_some() {
        Ok(Box::new(create_unique_persistent(config)?))
    } else {
        Ok(Box::new(create_unique_memory(config)?))
    }
}

/// Flat sorted-sequence index.
pub fn create_flat<K, V>(config: IndexConfig<K, V>) -> Result<SortedIndex<K, V>>
where
    K: Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    SortedIndex::open(with_default_measures(config))
}

/// Non-unique index over an in-memory unique core keyed by
/// `(logical key, disambiguator)`.
pub fn create_non_unique<K, V>(
    config: IndexConfig<K, V>,
    tag: TagExtract<V>,
) -> Result<NonUniqueIndex<K, V, BTreeIndex<TaggedKey<K>, V, MemoryPageProvider<TaggedKey<K>, V>>>>
where
    K: Clone + Hash + 'static,
    V: Clone + PartialEq + 'static,
{
    let config = with_default_measures(config);
    let inner_config = IndexConfig::new(
        TaggedKey::extractor(config.extract.clone(), tag.clone()),
        TaggedKey::comparer(config.compare.clone()),
    )
    .with_options(config.options.clone())
    .with_features(config.features)
    .with_measures(config.measures.clone());
    let inner = BTreeIndex::open(
        inner_config,
        MemoryPageProvider::with_features(config.features),
    )?;
    Ok(NonUniqueIndex::new(
        inner,
        config.extract,
        tag,
        config.compare,
    ))
}

/// Differential overlay over an existing base index.
pub fn create_differential<K, V, I>(
    base: I,
    config: IndexConfig<K, V>,
) -> Result<DifferentialIndex<K, V, I>>
where
    K: Clone + PartialEq + 'static,
    V: Clone + PartialEq + 'static,
    I: OrderedIndex<K, V>,
{
    DifferentialIndex::new(base, &with_default_measures(config))
}

/// Composite index over pre-built segments with disjoint coverage.
pub fn create_composite<K, V, I>(
    segments: Vec<(String, Range<K>, I)>,
    config: IndexConfig<K, V>,
) -> Result<CompositeIndex<K, V, I>>
where
    K: Clone + 'static,
    V: Clone + 'static,
    I: OrderedIndex<K, V>,
{
    let config = with_default_measures(config);
    let segments = segments
        .into_iter()
        .map(|(name, coverage, index)| CompositeSegment::new(name, coverage, index))
        .collect();
    CompositeIndex::new(
        segments,
        config.extract,
        config.compare,
        config.entire_compare,
        config.measures,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::algebra::ord_compare;
    use crate::config::IndexOptions;
    use crate::measure::{COUNT, SIZE};

    fn config() -> IndexConfig<i64, i64> {
        IndexConfig::new(Arc::new(|item: &i64| *item), ord_compare())
            .with_options(IndexOptions::compact())
    }

    #[test]
    fn default_measures_are_injected() {
        let mut idx = create_unique_memory(config()).unwrap();
        idx.add(5).unwrap();
        assert_eq!(idx.measure(COUNT).unwrap(), 1);
        assert!(idx.measure(SIZE).unwrap() > 0);
    }

    #[test]
    fn location_switches_to_the_persistent_provider() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("unique.odx");
        let mut idx =
            create_unique(config().with_location(path.clone())).unwrap();
        idx.add(7).unwrap();
        assert!(idx.features().contains(Features::SERIALIZE));
        assert!(path.exists());
    }

    #[test]
    fn invalid_page_size_is_fatal_at_configure_time() {
        let mut bad = config();
        bad.options.page_size = 1;
        assert!(matches!(
            create_unique_memory(bad),
            Err(IndexError::Configuration(_))
        ));
    }
}
