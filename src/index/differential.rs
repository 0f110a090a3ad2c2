//! Copy-on-write differential overlay atop a stable base index.
//!
//! Writes touch only the overlay's inserted and removed sets — the base is
//! never mutated. Reads consult insertions first, then the base minus the
//! removed keys, preserving base ordering. A key is never in the inserted and
//! removed sets at once: re-inserting a removed key clears its marker, and a
//! replaced base item is shadowed purely by its insertion.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::algebra::{Direction, Entire, KeyCompare, Range, Ray, SeekResult};
use crate::error::{IndexError, Result};
use crate::measure::{MeasureSet, MeasureValue};
use crate::page::Features;

use super::{IndexConfig, KeyExtract, OrderedIndex, Reader, SortedIndex};

/// Differential overlay over a read-only base index.
pub struct DifferentialIndex<K, V, I> {
    base: I,
    insertions: SortedIndex<K, V>,
    removals: SortedIndex<K, K>,
    extract: KeyExtract<K, V>,
    compare: KeyCompare<K>,
    measures: MeasureSet<V>,
    // Insertions whose key also lives (unremoved) in the base.
    shadowed: usize,
    version: u64,
}

impl<K, V, I> DifferentialIndex<K, V, I>
where
    K: Clone + PartialEq + 'static,
    V: Clone + PartialEq + 'static,
    I: OrderedIndex<K, V>,
{
    /// Wraps `base`, which the overlay will only ever read.
    pub fn new(base: I, config: &IndexConfig<K, V>) -> Result<Self> {
        let insertions = SortedIndex::open(
            IndexConfig::new(config.extract.clone(), config.compare.clone())
                .with_measures(config.measures.clone()),
        )?;
        let identity: KeyExtract<K, K> = Arc::new(|key: &K| key.clone());
        let removals = SortedIndex::open(IndexConfig::new(identity, config.compare.clone()))?;
        Ok(Self {
            base,
            insertions,
            removals,
            extract: config.extract.clone(),
            compare: config.compare.clone(),
            measures: config.measures.clone(),
            shadowed: 0,
            version: 0,
        })
    }

    /// The wrapped base, untouched by overlay writes.
    pub fn base(&self) -> &I {
        &self.base
    }

    fn removed(&self, key: &K) -> Result<bool> {
        self.removals.contains_key(key)
    }

    // Base seek that skips removed and insertion-shadowed entries by
    // restarting just past each filtered hit.
    fn seek_base(&self, ray: &Ray<K>) -> Result<SeekResult<V>> {
        let mut current = ray.clone();
        let mut first_probe = true;
        loop {
            let found = self.base.seek(&current)?;
            let Some(item) = found.clone().into_option() else {
                return Ok(SeekResult::None);
            };
            let key = (self.extract)(&item);
            if !self.removed(&key)? && !self.insertions.contains_key(&key)? {
                return Ok(if first_probe {
                    found
                } else {
                    SeekResult::Nearest(item)
                });
            }
            current = Ray::new(
                match ray.direction {
                    Direction::Positive => Entire::After(key),
                    Direction::Negative => Entire::Before(key),
                },
                ray.direction,
            );
            first_probe = false;
        }
    }

    fn bump(&mut self) {
        self.version += 1;
    }
}

impl<K, V, I> OrderedIndex<K, V> for DifferentialIndex<K, V, I>
where
    K: Clone + PartialEq + 'static,
    V: Clone + PartialEq + 'static,
    I: OrderedIndex<K, V>,
{
    fn features(&self) -> Features {
        Features::READ_WRITE.with(Features::DIFFERENTIAL)
    }

    fn len(&self) -> usize {
        self.base.len() - self.removals.len() - self.shadowed + self.insertions.len()
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn get(&self, key: &K) -> Result<Option<V>> {
        if let Some(item) = self.insertions.get(key)? {
            return Ok(Some(item));
        }
        if self.removed(key)? {
            return Ok(None);
        }
        self.base.get(key)
    }

    fn contains(&self, item: &V) -> Result<bool> {
        let key = (self.extract)(item);
        if self.insertions.contains_key(&key)? {
            return self.insertions.contains(item);
        }
        if self.removed(&key)? {
            return Ok(false);
        }
        self.base.contains(item)
    }

    fn seek_key(&self, key: &K) -> Result<SeekResult<V>> {
        self.seek(&Ray::at(key.clone(), Direction::Positive))
    }

    fn seek(&self, ray: &Ray<K>) -> Result<SeekResult<V>> {
        let overlay = self.insertions.seek(ray)?;
        if overlay.is_exact() {
            return Ok(overlay);
        }
        let base = self.seek_base(ray)?;
        if base.is_exact() {
            return Ok(base);
        }
        match (overlay.into_option(), base.into_option()) {
            (None, None) => Ok(SeekResult::None),
            (Some(item), None) | (None, Some(item)) => Ok(SeekResult::Nearest(item)),
            (Some(a), Some(b)) => {
                let ka = (self.extract)(&a);
                let kb = (self.extract)(&b);
                let pick_a = match ray.direction {
                    Direction::Positive => (self.compare)(&ka, &kb) != Ordering::Greater,
                    Direction::Negative => (self.compare)(&ka, &kb) != Ordering::Less,
                };
                Ok(SeekResult::Nearest(if pick_a { a } else { b }))
            }
        }
    }

    fn reader(&self, range: &Range<K>) -> Result<Reader<'_, V>> {
        let Some(direction) = range.direction(&self.compare) else {
            return Ok(super::empty_reader());
        };
        let overlay = self.insertions.reader(range)?;
        let base = self.base.reader(range)?;
        Ok(Box::new(MergeReader {
            overlay,
            base,
            overlay_head: None,
            base_head: None,
            index: self,
            direction,
            failed: false,
        }))
    }

    fn add(&mut self, item: V) -> Result<()> {
        let key = (self.extract)(&item);
        if self.insertions.contains_key(&key)? {
            return Err(IndexError::DuplicateKey);
        }
        let was_removed = self.removed(&key)?;
        if !was_removed && self.base.contains_key(&key)? {
            return Err(IndexError::DuplicateKey);
        }
        if was_removed {
            // Mutually exclusive sets: the marker dies, the insertion (which
            // now shadows the still-present base entry) takes over.
            self.removals.remove_key(&key)?;
            self.shadowed += 1;
        }
        self.insertions.add(item)?;
        self.bump();
        Ok(())
    }

    fn remove(&mut self, item: &V) -> Result<bool> {
        let key = (self.extract)(item);
        if self.insertions.contains_key(&key)? {
            if !self.insertions.remove(item)? {
                return Ok(false);
            }
            if self.base.contains_key(&key)? {
                self.shadowed -= 1;
                self.removals.add(key)?;
            }
            self.bump();
            return Ok(true);
        }
        if self.removed(&key)? || !self.base.contains(item)? {
            return Ok(false);
        }
        self.removals.add(key)?;
        self.bump();
        Ok(true)
    }

    fn remove_key(&mut self, key: &K) -> Result<bool> {
        if self.insertions.contains_key(key)? {
            self.insertions.remove_key(key)?;
            if self.base.contains_key(key)? {
                self.shadowed -= 1;
                self.removals.add(key.clone())?;
            }
            self.bump();
            return Ok(true);
        }
        if self.removed(key)? || !self.base.contains_key(key)? {
            return Ok(false);
        }
        self.removals.add(key.clone())?;
        self.bump();
        Ok(true)
    }

    fn replace(&mut self, item: V) -> Result<()> {
        let key = (self.extract)(&item);
        if self.insertions.contains_key(&key)? {
            self.insertions.replace(item)?;
        } else if !self.removed(&key)? && self.base.contains_key(&key)? {
            // Shadow the base entry; no removal marker is involved.
            self.insertions.add(item)?;
            self.shadowed += 1;
        } else {
            return Err(IndexError::KeyNotFound);
        }
        self.bump();
        Ok(())
    }

    /// Empties the overlay view: every base key gains a removal marker and
    /// the inserted set is dropped. The base itself stays intact.
    fn clear(&mut self) -> Result<()> {
        self.insertions.clear()?;
        self.removals.clear()?;
        let base_keys: Vec<K> = {
            let mut keys = Vec::new();
            for item in self.base.reader(&Range::full())? {
                keys.push((self.extract)(&item?));
            }
            keys
        };
        for key in base_keys {
            self.removals.add(key)?;
        }
        self.shadowed = 0;
        self.bump();
        Ok(())
    }

    fn measure(&self, name: &str) -> Result<MeasureValue> {
        self.measure_range(&Range::full(), name)
    }

    fn measure_range(&self, range: &Range<K>, name: &str) -> Result<MeasureValue> {
        let measure = self
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

// Ordered two-way merge of the overlay and the filtered base stream.
struct MergeReader<'a, K, V, I> {
    overlay: Reader<'a, V>,
    base: Reader<'a, V>,
    overlay_head: Option<V>,
    base_head: Option<V>,
    index: &'a DifferentialIndex<K, V, I>,
    direction: Direction,
    failed: bool,
}

impl<K, V, I> MergeReader<'_, K, V, I>
where
    K: Clone + PartialEq + 'static,
    V: Clone + PartialEq + 'static,
    I: OrderedIndex<K, V>,
{
    fn fill_overlay(&mut self) -> Result<()> {
        if self.overlay_head.is_none() {
            if let Some(item) = self.overlay.next().transpose()? {
                self.overlay_head = Some(item);
            }
        }
        Ok(())
    }

    // Pulls the next base item that is neither removed nor shadowed.
    fn fill_base(&mut self) -> Result<()> {
        while self.base_head.is_none() {
            let Some(item) = self.base.next().transpose()? else {
                return Ok(());
            };
            let key = (self.index.extract)(&item);
            if self.index.removed(&key)? || self.index.insertions.contains_key(&key)? {
                continue;
            }
            self.base_head = Some(item);
        }
        Ok(())
    }

    fn pull(&mut self) -> Result<Option<V>> {
        self.fill_overlay()?;
        self.fill_base()?;
        match (&self.overlay_head, &self.base_head) {
            (None, None) => Ok(None),
            (Some(_), None) => Ok(self.overlay_head.take()),
            (None, Some(_)) => Ok(self.base_head.take()),
            (Some(a), Some(b)) => {
                let ka = (self.index.extract)(a);
                let kb = (self.index.extract)(b);
                let overlay_first = match self.direction {
                    Direction::Positive => (self.index.compare)(&ka, &kb) != Ordering::Greater,
                    Direction::Negative => (self.index.compare)(&ka, &kb) != Ordering::Less,
                };
                if overlay_first {
                    Ok(self.overlay_head.take())
                } else {
                    Ok(self.base_head.take())
                }
            }
        }
    }
}

impl<K, V, I> Iterator for MergeReader<'_, K, V, I>
where
    K: Clone + PartialEq + 'static,
    V: Clone + PartialEq + 'static,
    I: OrderedIndex<K, V>,
{
    type Item = Result<V>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.pull() {
            Ok(next) => next.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::ord_compare;
    use crate::measure::{MeasureSet, COUNT};

    type Item = (i64, &'static str);

    fn base_config() -> IndexConfig<i64, Item> {
        IndexConfig::new(Arc::new(|item: &Item| item.0), ord_compare())
            .with_measures(MeasureSet::new().ensure_defaults())
    }

    fn overlay() -> DifferentialIndex<i64, Item, SortedIndex<i64, Item>> {
        let mut base = SortedIndex::open(base_config()).expect("open base");
        for key in [1, 2, 3] {
            base.add((key, "base")).unwrap();
        }
        DifferentialIndex::new(base, &base_config()).expect("open overlay")
    }

    #[test]
    fn remove_then_reinsert_shadows_the_base() {
        let mut idx = overlay();
        assert!(idx.remove_key(&2).unwrap());
        assert_eq!(idx.get(&2).unwrap(), None);

        idx.add((2, "overlay")).unwrap();
        assert_eq!(idx.get(&2).unwrap(), Some((2, "overlay")));
        assert_eq!(idx.len(), 3);

        // The base never changes.
        assert_eq!(idx.base().get(&2).unwrap(), Some((2, "base")));
        assert_eq!(idx.base().len(), 3);
    }

    #[test]
    fn reads_merge_in_base_order() {
        let mut idx = overlay();
        idx.remove_key(&1).unwrap();
        idx.add((5, "overlay")).unwrap();
        idx.add((0, "overlay")).unwrap();
        let keys: Vec<i64> = idx
            .reader(&Range::full())
            .unwrap()
            .map(|item| item.unwrap().0)
            .collect();
        assert_eq!(keys, vec![0, 2, 3, 5]);

        let reversed: Vec<i64> = idx
            .reader(&Range::full().invert())
            .unwrap()
            .map(|item| item.unwrap().0)
            .collect();
        assert_eq!(reversed, vec![5, 3, 2, 0]);
    }

    #[test]
    fn duplicate_insert_is_rejected_across_layers() {
        let mut idx = overlay();
        assert!(matches!(
            idx.add((2, "again")),
            Err(IndexError::DuplicateKey)
        ));
        idx.add((9, "overlay")).unwrap();
        assert!(matches!(
            idx.add((9, "again")),
            Err(IndexError::DuplicateKey)
        ));
    }

    #[test]
    fn replace_shadows_without_marker() {
        let mut idx = overlay();
        idx.replace((3, "patched")).unwrap();
        assert_eq!(idx.get(&3).unwrap(), Some((3, "patched")));
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.base().get(&3).unwrap(), Some((3, "base")));

        // Removing the shadowed key hides the base entry too.
        assert!(idx.remove_key(&3).unwrap());
        assert_eq!(idx.get(&3).unwrap(), None);
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn seek_skips_removed_base_entries() {
        let mut idx = overlay();
        idx.remove_key(&2).unwrap();
        assert_eq!(
            idx.seek(&Ray::at(2, Direction::Positive)).unwrap(),
            SeekResult::Nearest((3, "base"))
        );
        assert_eq!(
            idx.seek(&Ray::at(2, Direction::Negative)).unwrap(),
            SeekResult::Nearest((1, "base"))
        );
    }

    #[test]
    fn count_reflects_the_merged_view() {
        let mut idx = overlay();
        idx.remove_key(&1).unwrap();
        idx.add((7, "overlay")).unwrap();
        assert_eq!(idx.measure(COUNT).unwrap(), 3);
        assert_eq!(
            idx.measure_range(&Range::closed(2, 7), COUNT).unwrap(),
            3
        );
    }

    #[test]
    fn clear_empties_the_view_but_not_the_base() {
        let mut idx = overlay();
        idx.add((9, "overlay")).unwrap();
        idx.clear().unwrap();
        assert_eq!(idx.len(), 0);
        assert_eq!(idx.get(&1).unwrap(), None);
        assert_eq!(idx.base().len(), 3);
        // Base keys can be re-added after the wipe.
        idx.add((1, "fresh")).unwrap();
        assert_eq!(idx.get(&1).unwrap(), Some((1, "fresh")));
    }
}
