//! Flat alternative: a unique ordered index over an in-memory sorted vector.
//!
//! Same contract as the paged tree, implemented with binary search and no
//! paging. Suits small or short-lived collections where page management is
//! pure overhead.

use std::cmp::Ordering;

use crate::algebra::{Direction, Entire, Range, Ray, SeekResult};
use crate::error::{IndexError, Result};
use crate::measure::{fold_measure, MeasureResultSet, MeasureValue};
use crate::page::Features;

use super::{empty_reader, is_full_range, IndexConfig, OrderedIndex, Reader};

/// Unique ordered index over a sorted `Vec`.
pub struct SortedIndex<K, V> {
    items: Vec<V>,
    config: IndexConfig<K, V>,
    results: MeasureResultSet,
    version: u64,
}

impl<K, V> SortedIndex<K, V>
where
    K: Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    /// Builds an empty index from a configuration. The paging and location
    /// options are irrelevant here and ignored.
    pub fn open(config: IndexConfig<K, V>) -> Result<Self> {
        config.validate()?;
        let results = MeasureResultSet::zeroed(&config.measures);
        Ok(Self {
            items: Vec::new(),
            config,
            results,
            version: 0,
        })
    }

    fn require(&self, features: Features, what: &'static str) -> Result<()> {
        if self.config.features.contains(features) {
            Ok(())
        } else {
            Err(IndexError::Unsupported(what))
        }
    }

    fn key_of(&self, item: &V) -> K {
        (self.config.extract)(item)
    }

    // Insertion slot for `key`, plus whether the slot holds it already.
    fn position(&self, key: &K) -> (usize, bool) {
        let cmp = &self.config.compare;
        let extract = &self.config.extract;
        let slot = self
            .items
            .partition_point(|item| cmp(&extract(item), key) == Ordering::Less);
        let exact =
            slot < self.items.len() && cmp(&extract(&self.items[slot]), key) == Ordering::Equal;
        (slot, exact)
    }

    // Insertion slot for an endpoint, via the asymmetric entire-vs-key
    // comparator.
    fn entire_position(&self, point: &Entire<K>) -> (usize, bool) {
        let cmp = &self.config.compare;
        let extract = &self.config.extract;
        let slot = self
            .items
            .partition_point(|item| point.compare_to_key(&extract(item), cmp) == Ordering::Greater);
        let exact = slot < self.items.len()
            && point.compare_to_key(&extract(&self.items[slot]), cmp) == Ordering::Equal;
        (slot, exact)
    }

    fn record_add(&mut self, item: &V) {
        self.results.record_add(&self.config.measures, item);
    }

    // Incremental subtract with the explicit O(n) batch fallback for
    // non-invertible aggregates.
    fn record_remove(&mut self, item: &V) {
        if !self.results.record_remove(&self.config.measures, item) {
            self.results
                .recompute(&self.config.measures, self.items.iter());
        }
    }

    fn bump(&mut self) {
        self.version += 1;
    }
}

impl<K, V> OrderedIndex<K, V> for SortedIndex<K, V>
where
    K: Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn features(&self) -> Features {
        self.config.features
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn get(&self, key: &K) -> Result<Option<V>> {
        self.require(Features::READ, "read")?;
        let (slot, exact) = self.position(key);
        Ok(exact.then(|| self.items[slot].clone()))
    }

    fn contains(&self, item: &V) -> Result<bool> {
        Ok(self.get(&self.key_of(item))?.as_ref() == Some(item))
    }

    fn seek_key(&self, key: &K) -> Result<SeekResult<V>> {
        self.seek(&Ray::at(key.clone(), Direction::Positive))
    }

    fn seek(&self, ray: &Ray<K>) -> Result<SeekResult<V>> {
        self.require(Features::READ, "read")?;
        let (slot, exact) = self.entire_position(&ray.point);
        if exact {
            return Ok(SeekResult::Exact(self.items[slot].clone()));
        }
        // The slot is where the point would insert; negative direction means
        // the neighbor one to the left, clamped off the low end.
        let neighbor = match ray.direction {
            Direction::Positive => (slot < self.items.len()).then_some(slot),
            Direction::Negative => slot.checked_sub(1),
        };
        Ok(match neighbor {
            Some(slot) => SeekResult::Nearest(self.items[slot].clone()),
            None => SeekResult::None,
        })
    }

    fn reader(&self, range: &Range<K>) -> Result<Reader<'_, V>> {
        self.require(Features::READ, "read")?;
        let cmp = &self.config.compare;
        let Some(direction) = range.direction(cmp) else {
            return Ok(empty_reader());
        };
        let low = range.lower_endpoint(cmp).expect("non-empty");
        let high = range.higher_endpoint(cmp).expect("non-empty");
        let (start, _) = self.entire_position(low);
        let extract = &self.config.extract;
        // One past the last item at or below the higher endpoint.
        let end = self.items.partition_point(|item| {
            high.compare_to_key(&extract(item), cmp) != Ordering::Less
        });
        if start >= end {
            return Ok(empty_reader());
        }
        let slice = &self.items[start..end];
        Ok(match direction {
            Direction::Positive => Box::new(slice.iter().map(|item| Ok(item.clone()))),
            Direction::Negative => Box::new(slice.iter().rev().map(|item| Ok(item.clone()))),
        })
    }

    fn add(&mut self, item: V) -> Result<()> {
        self.require(Features::WRITE, "write")?;
        let key = self.key_of(&item);
        let (slot, exact) = self.position(&key);
        if exact {
            return Err(IndexError::DuplicateKey);
        }
        self.record_add(&item);
        self.items.insert(slot, item);
        self.bump();
        Ok(())
    }

    fn remove(&mut self, item: &V) -> Result<bool> {
        self.require(Features::WRITE, "write")?;
        let key = self.key_of(item);
        let (slot, exact) = self.position(&key);
        if !exact || self.items[slot] != *item {
            return Ok(false);
        }
        let removed = self.items.remove(slot);
        self.record_remove(&removed);
        self.bump();
        Ok(true)
    }

    fn remove_key(&mut self, key: &K) -> Result<bool> {
        self.require(Features::WRITE, "write")?;
        let (slot, exact) = self.position(key);
        if !exact {
            return Ok(false);
        }
        let removed = self.items.remove(slot);
        self.record_remove(&removed);
        self.bump();
        Ok(true)
    }

    fn replace(&mut self, item: V) -> Result<()> {
        self.require(Features::WRITE, "write")?;
        let key = self.key_of(&item);
        let (slot, exact) = self.position(&key);
        if !exact {
            return Err(IndexError::KeyNotFound);
        }
        let new = item.clone();
        let old = std::mem::replace(&mut self.items[slot], item);
        self.record_remove(&old);
        self.record_add(&new);
        self.bump();
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.require(Features::WRITE, "write")?;
        self.items.clear();
        self.results = MeasureResultSet::zeroed(&self.config.measures);
        self.bump();
        Ok(())
    }

    fn measure(&self, name: &str) -> Result<MeasureValue> {
        self.require(Features::READ, "read")?;
        let entry = self.results.get(name)?;
        if entry.valid {
            return Ok(entry.value);
        }
        let measure = self
            .config
            .measures
            .get(name)
            .ok_or_else(|| IndexError::UnknownMeasure(name.to_string()))?;
        Ok(fold_measure(measure, self.items.iter()))
    }

    fn measure_range(&self, range: &Range<K>, name: &str) -> Result<MeasureValue> {
        self.require(Features::READ, "read")?;
        if is_full_range(range, &self.config.compare) {
            return self.measure(name);
        }
        let measure = self
            .config
            .measures
            .get(name)
            .cloned()
            .ok_or_else(|| IndexError::UnknownMeasure(name.to_string()))?;
        let mut acc = measure.zero();
        for item in self.reader(range)? {
            acc = measure.add(acc, &item?);
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::algebra::ord_compare;
    use crate::measure::{MeasureSet, MinMeasure, COUNT};

    fn index() -> SortedIndex<i64, i64> {
        let config = IndexConfig::new(Arc::new(|item: &i64| *item), ord_compare()).with_measures(
            MeasureSet::new()
                .ensure_defaults()
                .with(Arc::new(MinMeasure::new("Min", Arc::new(|item: &i64| *item)))),
        );
        SortedIndex::open(config).expect("open index")
    }

    #[test]
    fn keeps_sorted_order() {
        let mut idx = index();
        for key in [5, 1, 9, 3] {
            idx.add(key).unwrap();
        }
        let keys: Vec<i64> = idx
            .reader(&Range::full())
            .unwrap()
            .map(|item| item.unwrap())
            .collect();
        assert_eq!(keys, vec![1, 3, 5, 9]);
    }

    #[test]
    fn seek_clamps_off_the_low_end() {
        let mut idx = index();
        for key in [1, 3, 5] {
            idx.add(key).unwrap();
        }
        assert_eq!(
            idx.seek(&Ray::at(2, Direction::Positive)).unwrap(),
            SeekResult::Nearest(3)
        );
        assert_eq!(
            idx.seek(&Ray::at(2, Direction::Negative)).unwrap(),
            SeekResult::Nearest(1)
        );
        assert_eq!(
            idx.seek(&Ray::at(0, Direction::Negative)).unwrap(),
            SeekResult::None
        );
        assert_eq!(
            idx.seek(&Ray::at(6, Direction::Positive)).unwrap(),
            SeekResult::None
        );
    }

    #[test]
    fn version_advances_on_every_mutation() {
        let mut idx = index();
        let v0 = idx.version();
        idx.add(1).unwrap();
        idx.replace(1).unwrap();
        idx.remove_key(&1).unwrap();
        idx.clear().unwrap();
        assert_eq!(idx.version(), v0 + 4);
    }

    #[test]
    fn non_invertible_measure_falls_back_to_batch() {
        let mut idx = index();
        for key in [10, 20, 30] {
            idx.add(key).unwrap();
        }
        assert_eq!(idx.measure("Min").unwrap(), 10);
        // Removing the minimum cannot be inverted; the batch recompute runs.
        idx.remove_key(&10).unwrap();
        assert_eq!(idx.measure("Min").unwrap(), 20);
        assert_eq!(idx.measure(COUNT).unwrap(), 2);
    }

    #[test]
    fn negative_direction_reader() {
        let mut idx = index();
        for key in 0..10 {
            idx.add(key).unwrap();
        }
        let keys: Vec<i64> = idx
            .reader(&Range::closed(7, 2))
            .unwrap()
            .map(|item| item.unwrap())
            .collect();
        assert_eq!(keys, vec![7, 6, 5, 4, 3, 2]);
    }
}
