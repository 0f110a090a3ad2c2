//! Non-unique index implemented over one unique index.
//!
//! Every item is stored under a synthesized `(logical key, disambiguator)`
//! pair, so the unique core does all tree work; logical-key queries widen
//! their endpoints to leave the disambiguator unbounded.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::algebra::{Direction, Entire, KeyCompare, Range, Ray, SeekResult};
use crate::error::Result;
use crate::measure::MeasureValue;
use crate::page::Features;

use super::{KeyExtract, OrderedIndex, Reader};

/// Extracts the disambiguator distinguishing items that share a logical key.
pub type TagExtract<V> = Arc<dyn Fn(&V) -> u64 + Send + Sync>;

/// A logical key paired with its disambiguator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaggedKey<K> {
    /// The logical key items group under.
    pub key: K,
    /// Disambiguator; orders duplicates of one logical key.
    pub tag: u64,
}

impl<K: 'static> TaggedKey<K> {
    /// Lexicographic comparer: logical key first, then disambiguator.
    pub fn comparer(logical: KeyCompare<K>) -> KeyCompare<TaggedKey<K>> {
        Arc::new(move |a, b| logical(&a.key, &b.key).then_with(|| a.tag.cmp(&b.tag)))
    }

    /// Extractor for the inner unique index.
    pub fn extractor<V: 'static>(
        extract: KeyExtract<K, V>,
        tag: TagExtract<V>,
    ) -> KeyExtract<TaggedKey<K>, V> {
        Arc::new(move |item| TaggedKey {
            key: extract(item),
            tag: tag(item),
        })
    }
}

// Endpoint widening: the logical part stays fixed while the disambiguator
// goes unbounded on the appropriate side.
fn widen_low<K: Clone>(endpoint: &Entire<K>) -> Entire<TaggedKey<K>> {
    match endpoint {
        Entire::NegativeInfinity => Entire::NegativeInfinity,
        Entire::PositiveInfinity => Entire::PositiveInfinity,
        Entire::Exact(k) => Entire::Exact(TaggedKey {
            key: k.clone(),
            tag: u64::MIN,
        }),
        Entire::Before(k) => Entire::Before(TaggedKey {
            key: k.clone(),
            tag: u64::MIN,
        }),
        Entire::After(k) => Entire::After(TaggedKey {
            key: k.clone(),
            tag: u64::MAX,
        }),
    }
}

fn widen_high<K: Clone>(endpoint: &Entire<K>) -> Entire<TaggedKey<K>> {
    match endpoint {
        Entire::NegativeInfinity => Entire::NegativeInfinity,
        Entire::PositiveInfinity => Entire::PositiveInfinity,
        Entire::Exact(k) => Entire::Exact(TaggedKey {
            key: k.clone(),
            tag: u64::MAX,
        }),
        Entire::Before(k) => Entire::Before(TaggedKey {
            key: k.clone(),
            tag: u64::MIN,
        }),
        Entire::After(k) => Entire::After(TaggedKey {
            key: k.clone(),
            tag: u64::MAX,
        }),
    }
}

/// Non-unique ordered index over a unique inner index.
pub struct NonUniqueIndex<K, V, I> {
    inner: I,
    extract: KeyExtract<K, V>,
    tag: TagExtract<V>,
    compare: KeyCompare<K>,
}

impl<K, V, I> NonUniqueIndex<K, V, I>
where
    K: Clone + 'static,
    V: Clone + 'static,
    I: OrderedIndex<TaggedKey<K>, V>,
{
    /// Wraps an inner unique index keyed by [`TaggedKey`].
    ///
    /// The inner index must have been configured with
    /// [`TaggedKey::extractor`] over the same `extract`/`tag` pair.
    pub fn new(
        inner: I,
        extract: KeyExtract<K, V>,
        tag: TagExtract<V>,
        compare: KeyCompare<K>,
    ) -> Self {
        Self {
            inner,
            extract,
            tag,
            compare,
        }
    }

    fn tagged_key(&self, item: &V) -> TaggedKey<K> {
        TaggedKey {
            key: (self.extract)(item),
            tag: (self.tag)(item),
        }
    }

    fn widen_range(&self, range: &Range<K>) -> Range<TaggedKey<K>> {
        let cmp = &self.compare;
        let Some(direction) = range.direction(cmp) else {
            return Range::empty();
        };
        let low = widen_low(range.lower_endpoint(cmp).expect("non-empty"));
        let high = widen_high(range.higher_endpoint(cmp).expect("non-empty"));
        let widened = Range::new(low, high);
        match direction {
            Direction::Positive => widened,
            Direction::Negative => widened.invert(),
        }
    }

    fn widen_ray(&self, ray: &Ray<K>) -> Ray<TaggedKey<K>> {
        let point = match ray.direction {
            Direction::Positive => widen_low(&ray.point),
            Direction::Negative => widen_high(&ray.point),
        };
        Ray::new(point, ray.direction)
    }

    // The widened seek loses logical exactness; restore it by comparing the
    // found item's logical key against the sought point.
    fn logical_kind(&self, ray: &Ray<K>, item: V) -> SeekResult<V> {
        if let Entire::Exact(sought) = &ray.point {
            if (self.compare)(&(self.extract)(&item), sought) == Ordering::Equal {
                return SeekResult::Exact(item);
            }
        }
        SeekResult::Nearest(item)
    }
}

impl<K, V, I> OrderedIndex<K, V> for NonUniqueIndex<K, V, I>
where
    K: Clone + 'static,
    V: Clone + 'static,
    I: OrderedIndex<TaggedKey<K>, V>,
{
    fn features(&self) -> Features {
        self.inner.features()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn version(&self) -> u64 {
        self.inner.version()
    }

    /// The first item under `key`, in disambiguator order.
    fn get(&self, key: &K) -> Result<Option<V>> {
        let ray = Ray::at(key.clone(), Direction::Positive);
        match self.seek(&ray)? {
            SeekResult::Exact(item) => Ok(Some(item)),
            _ => Ok(None),
        }
    }

    fn contains(&self, item: &V) -> Result<bool> {
        self.inner.contains(item)
    }

    fn seek_key(&self, key: &K) -> Result<SeekResult<V>> {
        self.seek(&Ray::at(key.clone(), Direction::Positive))
    }

    fn seek(&self, ray: &Ray<K>) -> Result<SeekResult<V>> {
        match self.inner.seek(&self.widen_ray(ray))?.into_option() {
            Some(item) => Ok(self.logical_kind(ray, item)),
            None => Ok(SeekResult::None),
        }
    }

    fn reader(&self, range: &Range<K>) -> Result<Reader<'_, V>> {
        self.inner.reader(&self.widen_range(range))
    }

    fn add(&mut self, item: V) -> Result<()> {
        self.inner.add(item)
    }

    fn remove(&mut self, item: &V) -> Result<bool> {
        self.inner.remove(item)
    }

    /// Removes every item stored under the logical key.
    fn remove_key(&mut self, key: &K) -> Result<bool> {
        let tagged: Vec<TaggedKey<K>> = {
            let mut keys = Vec::new();
            for item in self.reader(&Range::point(key.clone()))? {
                let item = item?;
                keys.push(self.tagged_key(&item));
            }
            keys
        };
        let mut any = false;
        for tagged_key in tagged {
            any |= self.inner.remove_key(&tagged_key)?;
        }
        Ok(any)
    }

    fn replace(&mut self, item: V) -> Result<()> {
        self.inner.replace(item)
    }

    fn clear(&mut self) -> Result<()> {
        self.inner.clear()
    }

    fn measure(&self, name: &str) -> Result<MeasureValue> {
        self.inner.measure(name)
    }

    fn measure_range(&self, range: &Range<K>, name: &str) -> Result<MeasureValue> {
        self.inner.measure_range(&self.widen_range(range), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::ord_compare;
    use crate::config::IndexOptions;
    use crate::index::{BTreeIndex, IndexConfig};
    use crate::measure::{MeasureSet, COUNT};
    use crate::page::MemoryPageProvider;

    type Item = (&'static str, u64, i64);

    fn index() -> NonUniqueIndex<
        &'static str,
        Item,
        BTreeIndex<TaggedKey<&'static str>, Item, MemoryPageProvider<TaggedKey<&'static str>, Item>>,
    > {
        let extract: KeyExtract<&'static str, Item> = Arc::new(|item: &Item| item.0);
        let tag: TagExtract<Item> = Arc::new(|item: &Item| item.1);
        let compare = ord_compare::<&'static str>();
        let config = IndexConfig::new(
            TaggedKey::extractor(extract.clone(), tag.clone()),
            TaggedKey::comparer(compare.clone()),
        )
        .with_options(IndexOptions::compact())
        .with_measures(MeasureSet::new().ensure_defaults());
        let inner = BTreeIndex::open(config, MemoryPageProvider::new()).expect("open inner");
        NonUniqueIndex::new(inner, extract, tag, compare)
    }

    #[test]
    fn duplicate_logical_keys_coexist() {
        let mut idx = index();
        idx.add(("A", 1, 100)).unwrap();
        idx.add(("A", 2, 200)).unwrap();
        idx.add(("B", 1, 300)).unwrap();
        assert_eq!(idx.len(), 3);

        let hits: Vec<Item> = idx
            .reader(&Range::point("A"))
            .unwrap()
            .map(|item| item.unwrap())
            .collect();
        assert_eq!(hits, vec![("A", 1, 100), ("A", 2, 200)]);
    }

    #[test]
    fn same_disambiguator_still_collides() {
        let mut idx = index();
        idx.add(("A", 1, 100)).unwrap();
        assert!(idx.add(("A", 1, 999)).is_err());
    }

    #[test]
    fn logical_seek_reports_exactness() {
        let mut idx = index();
        idx.add(("B", 5, 1)).unwrap();
        idx.add(("D", 1, 2)).unwrap();
        assert_eq!(
            idx.seek(&Ray::at("B", Direction::Positive)).unwrap(),
            SeekResult::Exact(("B", 5, 1))
        );
        assert_eq!(
            idx.seek(&Ray::at("C", Direction::Positive)).unwrap(),
            SeekResult::Nearest(("D", 1, 2))
        );
        assert_eq!(
            idx.seek(&Ray::at("C", Direction::Negative)).unwrap(),
            SeekResult::Nearest(("B", 5, 1))
        );
    }

    #[test]
    fn remove_key_drops_every_duplicate() {
        let mut idx = index();
        idx.add(("A", 1, 100)).unwrap();
        idx.add(("A", 2, 200)).unwrap();
        idx.add(("B", 1, 300)).unwrap();
        assert!(idx.remove_key(&"A").unwrap());
        assert_eq!(idx.len(), 1);
        assert!(!idx.remove_key(&"A").unwrap());
        assert_eq!(idx.measure(COUNT).unwrap(), 1);
    }

    #[test]
    fn logical_range_excludes_neighbors() {
        let mut idx = index();
        idx.add(("A", 9, 1)).unwrap();
        idx.add(("B", 1, 2)).unwrap();
        idx.add(("B", 3, 3)).unwrap();
        idx.add(("C", 1, 4)).unwrap();
        let hits: Vec<Item> = idx
            .reader(&Range::open("A", "C"))
            .unwrap()
            .map(|item| item.unwrap())
            .collect();
        assert_eq!(hits, vec![("B", 1, 2), ("B", 3, 3)]);
    }
}
