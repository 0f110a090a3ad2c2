//! Composite index: one logical index horizontally partitioned into disjoint
//! key-range segments.
//!
//! Each operation routes to the segment covering its key; multi-segment range
//! queries fan out and concatenate per-segment readers in key order. Segment
//! measures combine through [`crate::measure::Measure::merge`], with a
//! cross-segment scan when the combination is not itself incremental.

use crate::algebra::{Direction, EntireCompare, KeyCompare, Range, Ray, SeekResult};
use crate::error::{IndexError, Result};
use crate::measure::{MeasureSet, MeasureValue};
use crate::page::Features;

use super::{empty_reader, KeyExtract, OrderedIndex, Reader};

/// One horizontal partition of a composite index.
pub struct CompositeSegment<K, I> {
    /// Diagnostic name.
    pub name: String,
    /// The key range this segment owns. Must be disjoint from every other
    /// segment's coverage.
    pub coverage: Range<K>,
    /// The index holding this segment's items.
    pub index: I,
}

impl<K, I> CompositeSegment<K, I> {
    /// Builds a named segment.
    pub fn new(name: impl Into<String>, coverage: Range<K>, index: I) -> Self {
        Self {
            name: name.into(),
            coverage,
            index,
        }
    }
}

/// Horizontally segmented index presenting one full view.
pub struct CompositeIndex<K, V, I> {
    segments: Vec<CompositeSegment<K, I>>,
    extract: KeyExtract<K, V>,
    compare: KeyCompare<K>,
    measures: MeasureSet<V>,
    version: u64,
}

impl<K, V, I> CompositeIndex<K, V, I>
where
    K: Clone + 'static,
    V: Clone + 'static,
    I: OrderedIndex<K, V>,
{
    /// Validates segment coverage (non-empty, ascending, pairwise disjoint)
    /// and assembles the composite.
    pub fn new(
        segments: Vec<CompositeSegment<K, I>>,
        extract: KeyExtract<K, V>,
        compare: KeyCompare<K>,
        entire_compare: EntireCompare<K>,
        measures: MeasureSet<V>,
    ) -> Result<Self> {
        if segments.is_empty() {
            return Err(IndexError::Configuration(
                "composite index needs at least one segment".into(),
            ));
        }
        let mut normalized = Vec::with_capacity(segments.len());
        for segment in segments {
            if segment.coverage.is_empty() {
                return Err(IndexError::Configuration(format!(
                    "segment {:?} covers nothing",
                    segment.name
                )));
            }
            normalized.push(CompositeSegment {
                coverage: segment.coverage.redirect(Direction::Positive, &compare),
                ..segment
            });
        }
        for pair in normalized.windows(2) {
            if pair[0].coverage.intersects(&pair[1].coverage, &compare) {
                return Err(IndexError::Configuration(format!(
                    "segments {:?} and {:?} overlap",
                    pair[0].name, pair[1].name
                )));
            }
            let left_high = pair[0]
                .coverage
                .higher_endpoint(&compare)
                .expect("non-empty");
            let right_low = pair[1]
                .coverage
                .lower_endpoint(&compare)
                .expect("non-empty");
            if entire_compare(left_high, right_low) == std::cmp::Ordering::Greater {
                return Err(IndexError::Configuration(format!(
                    "segments {:?} and {:?} are out of key order",
                    pair[0].name, pair[1].name
                )));
            }
        }
        Ok(Self {
            segments: normalized,
            extract,
            compare,
            measures,
            version: 0,
        })
    }

    /// The segments, in key order.
    pub fn segments(&self) -> &[CompositeSegment<K, I>] {
        &self.segments
    }

    fn route(&self, key: &K) -> Option<usize> {
        self.segments
            .iter()
            .position(|segment| segment.coverage.contains_key(key, &self.compare))
    }

    fn route_mut(&mut self, key: &K) -> Result<&mut CompositeSegment<K, I>> {
        let slot = self.route(key).ok_or_else(|| {
            IndexError::Configuration("key not covered by any segment".into())
        })?;
        Ok(&mut self.segments[slot])
    }

    // Segment indices in scan order for the given direction.
    fn ordered(&self, direction: Direction) -> Box<dyn Iterator<Item = usize> + '_> {
        match direction {
            Direction::Positive => Box::new(0..self.segments.len()),
            Direction::Negative => Box::new((0..self.segments.len()).rev()),
        }
    }

    // Measures combined across segments, or a full fan-out scan when the
    // combinator is not incremental.
    fn combine_measure(
        &self,
        range: &Range<K>,
        name: &str,
        full: bool,
    ) -> Result<MeasureValue> {
        let measure = self
            .measures
            .get(name)
            .cloned()
            .ok_or_else(|| IndexError::UnknownMeasure(name.to_string()))?;
        let mut acc = measure.zero();
        for segment in &self.segments {
            let part = if full {
                segment.index.measure(name)?
            } else {
                if !segment.coverage.intersects(range, &self.compare) {
                    continue;
                }
                let clip = segment
                    .coverage
                    .redirect(
                        range.direction(&self.compare).expect("non-empty"),
                        &self.compare,
                    )
                    .intersect(range, &self.compare)?;
                segment.index.measure_range(&clip, name)?
            };
            match measure.merge(acc, part) {
                Some(merged) => acc = merged,
                None => {
                    // Not incremental across segments; scan the whole range.
                    let mut scanned = measure.zero();
                    for item in self.reader(range)? {
                        scanned = measure.add(scanned, &item?);
                    }
                    return Ok(scanned);
                }
            }
        }
        Ok(acc)
    }
}

impl<K, V, I> OrderedIndex<K, V> for CompositeIndex<K, V, I>
where
    K: Clone + 'static,
    V: Clone + 'static,
    I: OrderedIndex<K, V>,
{
    fn features(&self) -> Features {
        self.segments
            .iter()
            .fold(Features::READ_WRITE.with(Features::SERIALIZE), |acc, segment| {
                acc.intersection(segment.index.features())
            })
    }

    fn len(&self) -> usize {
        self.segments.iter().map(|s| s.index.len()).sum()
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn get(&self, key: &K) -> Result<Option<V>> {
        match self.route(key) {
            Some(slot) => self.segments[slot].index.get(key),
            None => Ok(None),
        }
    }

    fn contains(&self, item: &V) -> Result<bool> {
        match self.route(&(self.extract)(item)) {
            Some(slot) => self.segments[slot].index.contains(item),
            None => Ok(false),
        }
    }

    fn seek_key(&self, key: &K) -> Result<SeekResult<V>> {
        self.seek(&Ray::at(key.clone(), Direction::Positive))
    }

    fn seek(&self, ray: &Ray<K>) -> Result<SeekResult<V>> {
        // Segments whose whole coverage lies before the ray origin resolve to
        // None on their own; the first hit in scan order wins.
        for slot in self.ordered(ray.direction) {
            let found = self.segments[slot].index.seek(ray)?;
            if !found.is_none() {
                return Ok(found);
            }
        }
        Ok(SeekResult::None)
    }

    fn reader(&self, range: &Range<K>) -> Result<Reader<'_, V>> {
        let Some(direction) = range.direction(&self.compare) else {
            return Ok(empty_reader());
        };
        let mut readers = Vec::new();
        for slot in self.ordered(direction) {
            let segment = &self.segments[slot];
            if !segment.coverage.intersects(range, &self.compare) {
                continue;
            }
            let clip = segment
                .coverage
                .redirect(direction, &self.compare)
                .intersect(range, &self.compare)?;
            readers.push(segment.index.reader(&clip)?);
        }
        Ok(Box::new(readers.into_iter().flatten()))
    }

    fn add(&mut self, item: V) -> Result<()> {
        let key = (self.extract)(&item);
        self.route_mut(&key)?.index.add(item)?;
        self.version += 1;
        Ok(())
    }

    fn remove(&mut self, item: &V) -> Result<bool> {
        let key = (self.extract)(item);
        let Some(slot) = self.route(&key) else {
            return Ok(false);
        };
        let removed = self.segments[slot].index.remove(item)?;
        if removed {
            self.version += 1;
        }
        Ok(removed)
    }

    fn remove_key(&mut self, key: &K) -> Result<bool> {
        let Some(slot) = self.route(key) else {
            return Ok(false);
        };
        let removed = self.segments[slot].index.remove_key(key)?;
        if removed {
            self.version += 1;
        }
        Ok(removed)
    }

    fn replace(&mut self, item: V) -> Result<()> {
        let key = (self.extract)(&item);
        let Some(slot) = self.route(&key) else {
            return Err(IndexError::KeyNotFound);
        };
        self.segments[slot].index.replace(item)?;
        self.version += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        for segment in &mut self.segments {
            segment.index.clear()?;
        }
        self.version += 1;
        Ok(())
    }

    fn measure(&self, name: &str) -> Result<MeasureValue> {
        self.combine_measure(&Range::full(), name, true)
    }

    fn measure_range(&self, range: &Range<K>, name: &str) -> Result<MeasureValue> {
        if range.is_empty() {
            let measure = self
                .measures
                .get(name)
                .ok_or_else(|| IndexError::UnknownMeasure(name.to_string()))?;
            return Ok(measure.zero());
        }
        self.combine_measure(range, name, false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::algebra::{entire_compare, ord_compare, Entire};
    use crate::index::{IndexConfig, SortedIndex};
    use crate::measure::{MeasureSet, COUNT};

    type Item = (i64, &'static str);

    fn segment_index() -> SortedIndex<i64, Item> {
        SortedIndex::open(
            IndexConfig::new(Arc::new(|item: &Item| item.0), ord_compare())
                .with_measures(MeasureSet::new().ensure_defaults()),
        )
        .expect("open segment")
    }

    fn composite() -> CompositeIndex<i64, Item, SortedIndex<i64, Item>> {
        let segments = vec![
            CompositeSegment::new(
                "low",
                Range::new(Entire::NegativeInfinity, Entire::Before(100)),
                segment_index(),
            ),
            CompositeSegment::new("mid", Range::closed(100, 199), segment_index()),
            CompositeSegment::new(
                "high",
                Range::new(Entire::Exact(200), Entire::PositiveInfinity),
                segment_index(),
            ),
        ];
        CompositeIndex::new(
            segments,
            Arc::new(|item: &Item| item.0),
            ord_compare(),
            entire_compare(ord_compare()),
            MeasureSet::new().ensure_defaults(),
        )
        .expect("assemble composite")
    }

    #[test]
    fn routes_by_key_coverage() {
        let mut idx = composite();
        idx.add((50, "low")).unwrap();
        idx.add((150, "mid")).unwrap();
        idx.add((250, "high")).unwrap();
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.get(&150).unwrap(), Some((150, "mid")));
        assert_eq!(idx.segments()[1].index.len(), 1);
    }

    #[test]
    fn overlapping_segments_are_rejected() {
        let segments = vec![
            CompositeSegment::new("a", Range::closed(0, 10), segment_index()),
            CompositeSegment::new("b", Range::closed(10, 20), segment_index()),
        ];
        assert!(matches!(
            CompositeIndex::new(
                segments,
                Arc::new(|item: &Item| item.0),
                ord_compare(),
                entire_compare(ord_compare()),
                MeasureSet::new(),
            ),
            Err(IndexError::Configuration(_))
        ));
    }

    #[test]
    fn range_reader_fans_out_in_key_order() {
        let mut idx = composite();
        for key in [10, 90, 110, 190, 210, 290] {
            idx.add((key, "v")).unwrap();
        }
        let keys: Vec<i64> = idx
            .reader(&Range::closed(50, 250))
            .unwrap()
            .map(|item| item.unwrap().0)
            .collect();
        assert_eq!(keys, vec![90, 110, 190, 210]);

        let reversed: Vec<i64> = idx
            .reader(&Range::closed(250, 50))
            .unwrap()
            .map(|item| item.unwrap().0)
            .collect();
        assert_eq!(reversed, vec![210, 190, 110, 90]);
    }

    #[test]
    fn seek_crosses_segment_boundaries() {
        let mut idx = composite();
        idx.add((90, "low")).unwrap();
        idx.add((210, "high")).unwrap();
        assert_eq!(
            idx.seek(&Ray::at(150, Direction::Positive)).unwrap(),
            SeekResult::Nearest((210, "high"))
        );
        assert_eq!(
            idx.seek(&Ray::at(150, Direction::Negative)).unwrap(),
            SeekResult::Nearest((90, "low"))
        );
    }

    #[test]
    fn measures_combine_across_segments() {
        let mut idx = composite();
        for key in [10, 110, 120, 210] {
            idx.add((key, "v")).unwrap();
        }
        assert_eq!(idx.measure(COUNT).unwrap(), 4);
        assert_eq!(
            idx.measure_range(&Range::closed(100, 300), COUNT).unwrap(),
            3
        );
    }

    #[test]
    fn uncovered_key_cannot_be_added() {
        let segments = vec![CompositeSegment::new(
            "only",
            Range::closed(0, 10),
            segment_index(),
        )];
        let mut idx = CompositeIndex::new(
            segments,
            Arc::new(|item: &Item| item.0),
            ord_compare(),
            entire_compare(ord_compare()),
            MeasureSet::new().ensure_defaults(),
        )
        .unwrap();
        assert!(matches!(
            idx.add((99, "v")),
            Err(IndexError::Configuration(_))
        ));
        assert!(!idx.remove_key(&99).unwrap());
    }
}
