//! Incrementally maintained aggregates over an index's current items.
//!
//! A [`Measure`] folds items into a running value under insert and remove;
//! subtraction may fail (not every aggregate inverts), in which case the
//! owning index falls back to a batch recompute over the affected range.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// Running value of a measure. Counts, byte totals and extrema all fit an
/// integer here; richer aggregates belong to the query layer above.
pub type MeasureValue = i64;

/// Name of the built-in item-count measure.
pub const COUNT: &str = "Count";
/// Name of the built-in byte-size measure.
pub const SIZE: &str = "Size";

/// A named aggregate with a zero value, an accumulator and an inverse that is
/// allowed to fail.
pub trait Measure<V>: Send + Sync {
    /// Measure name, unique within a set.
    fn name(&self) -> &str;

    /// Value of the aggregate over no items.
    fn zero(&self) -> MeasureValue;

    /// Contribution of a single item.
    fn of(&self, item: &V) -> MeasureValue;

    /// Folds one item into the running value.
    fn add(&self, acc: MeasureValue, item: &V) -> MeasureValue;

    /// Removes one item from the running value, or `None` when the aggregate
    /// cannot be inverted from the running value alone.
    fn subtract(&self, acc: MeasureValue, item: &V) -> Option<MeasureValue>;

    /// Combines two independently maintained values, or `None` when the
    /// combination is not itself incremental and needs a scan.
    fn merge(&self, _acc: MeasureValue, _other: MeasureValue) -> Option<MeasureValue> {
        None
    }
}

/// Item count. Always invertible and mergeable.
#[derive(Debug, Default)]
pub struct CountMeasure;

impl<V> Measure<V> for CountMeasure {
    fn name(&self) -> &str {
        COUNT
    }

    fn zero(&self) -> MeasureValue {
        0
    }

    fn of(&self, _item: &V) -> MeasureValue {
        1
    }

    fn add(&self, acc: MeasureValue, _item: &V) -> MeasureValue {
        acc + 1
    }

    fn subtract(&self, acc: MeasureValue, _item: &V) -> Option<MeasureValue> {
        Some(acc - 1)
    }

    fn merge(&self, acc: MeasureValue, other: MeasureValue) -> Option<MeasureValue> {
        Some(acc + other)
    }
}

/// Byte-size estimate: in-memory footprint of each item's direct
/// representation. Always invertible and mergeable.
#[derive(Debug, Default)]
pub struct SizeMeasure;

impl<V> Measure<V> for SizeMeasure {
    fn name(&self) -> &str {
        SIZE
    }

    fn zero(&self) -> MeasureValue {
        0
    }

    fn of(&self, item: &V) -> MeasureValue {
        std::mem::size_of_val(item) as MeasureValue
    }

    fn add(&self, acc: MeasureValue, item: &V) -> MeasureValue {
        acc + Measure::<V>::of(self, item)
    }

    fn subtract(&self, acc: MeasureValue, item: &V) -> Option<MeasureValue> {
        Some(acc - Measure::<V>::of(self, item))
    }

    fn merge(&self, acc: MeasureValue, other: MeasureValue) -> Option<MeasureValue> {
        Some(acc + other)
    }
}

/// Minimum of a projected value.
///
/// The canonical non-invertible measure: removing the current minimum cannot
/// be undone from the running value alone, so owners recompute by scanning.
pub struct MinMeasure<V> {
    name: String,
    project: Arc<dyn Fn(&V) -> MeasureValue + Send + Sync>,
}

impl<V> MinMeasure<V> {
    /// Builds a minimum measure over the projected value.
    pub fn new(
        name: impl Into<String>,
        project: Arc<dyn Fn(&V) -> MeasureValue + Send + Sync>,
    ) -> Self {
        Self {
            name: name.into(),
            project,
        }
    }
}

impl<V> Measure<V> for MinMeasure<V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn zero(&self) -> MeasureValue {
        MeasureValue::MAX
    }

    fn of(&self, item: &V) -> MeasureValue {
        (self.project)(item)
    }

    fn add(&self, acc: MeasureValue, item: &V) -> MeasureValue {
        acc.min((self.project)(item))
    }

    fn subtract(&self, acc: MeasureValue, item: &V) -> Option<MeasureValue> {
        // Removing a non-minimal item leaves the minimum untouched; removing
        // the minimum itself loses the runner-up.
        if (self.project)(item) == acc {
            None
        } else {
            Some(acc)
        }
    }

    fn merge(&self, acc: MeasureValue, other: MeasureValue) -> Option<MeasureValue> {
        Some(acc.min(other))
    }
}

/// The measures an index maintains, addressed by name.
pub struct MeasureSet<V> {
    measures: Vec<Arc<dyn Measure<V>>>,
}

impl<V> Clone for MeasureSet<V> {
    fn clone(&self) -> Self {
        Self {
            measures: self.measures.clone(),
        }
    }
}

impl<V> Default for MeasureSet<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> MeasureSet<V> {
    /// An empty set.
    pub fn new() -> Self {
        Self {
            measures: Vec::new(),
        }
    }

    /// Adds a measure, replacing any existing one with the same name.
    pub fn with(mut self, measure: Arc<dyn Measure<V>>) -> Self {
        self.measures.retain(|m| m.name() != measure.name());
        self.measures.push(measure);
        self
    }

    /// Ensures the default `Count` and `Size` measures are present.
    pub fn ensure_defaults(mut self) -> Self
    where
        V: 'static,
    {
        if self.get(COUNT).is_none() {
            self.measures.push(Arc::new(CountMeasure));
        }
        if self.get(SIZE).is_none() {
            self.measures.push(Arc::new(SizeMeasure));
        }
        self
    }

    /// Looks a measure up by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Measure<V>>> {
        self.measures.iter().find(|m| m.name() == name)
    }

    /// All measures, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Measure<V>>> {
        self.measures.iter()
    }

    /// Whether the set holds no measures.
    pub fn is_empty(&self) -> bool {
        self.measures.is_empty()
    }
}

/// One maintained value with its trust bit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureResult {
    /// The measure's name.
    pub name: String,
    /// Running value. Only meaningful while `valid`.
    pub value: MeasureValue,
    /// Cleared when an inverse failed; a batch recompute restores it.
    pub valid: bool,
}

/// The maintained values of a [`MeasureSet`], kept consistent as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureResultSet {
    entries: Vec<MeasureResult>,
}

impl MeasureResultSet {
    /// Zeroed results for every measure in the set.
    pub fn zeroed<V>(set: &MeasureSet<V>) -> Self {
        Self {
            entries: set
                .iter()
                .map(|m| MeasureResult {
                    name: m.name().to_string(),
                    value: m.zero(),
                    valid: true,
                })
                .collect(),
        }
    }

    /// The maintained result for `name`.
    pub fn get(&self, name: &str) -> Result<&MeasureResult> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| IndexError::UnknownMeasure(name.to_string()))
    }

    /// Folds one added item into every maintained value.
    pub fn record_add<V>(&mut self, set: &MeasureSet<V>, item: &V) {
        for entry in &mut self.entries {
            if let Some(measure) = set.get(&entry.name) {
                entry.value = measure.add(entry.value, item);
            }
        }
    }

    /// Removes one item from every maintained value.
    ///
    /// Returns `false` when any inverse failed; those entries are flagged
    /// invalid and the caller must recompute before trusting them.
    pub fn record_remove<V>(&mut self, set: &MeasureSet<V>, item: &V) -> bool {
        let mut all_inverted = true;
        for entry in &mut self.entries {
            if let Some(measure) = set.get(&entry.name) {
                match measure.subtract(entry.value, item) {
                    Some(value) => entry.value = value,
                    None => {
                        entry.valid = false;
                        all_inverted = false;
                    }
                }
            }
        }
        all_inverted
    }

    /// Whether every entry is currently trustworthy.
    pub fn all_valid(&self) -> bool {
        self.entries.iter().all(|e| e.valid)
    }

    /// Recomputes every entry from scratch over the given items.
    pub fn recompute<'a, V: 'a>(
        &mut self,
        set: &MeasureSet<V>,
        items: impl Iterator<Item = &'a V>,
    ) {
        for entry in &mut self.entries {
            if let Some(measure) = set.get(&entry.name) {
                entry.value = measure.zero();
                entry.valid = true;
            }
        }
        for item in items {
            for entry in &mut self.entries {
                if let Some(measure) = set.get(&entry.name) {
                    entry.value = measure.add(entry.value, item);
                }
            }
        }
    }

    /// Aligns the entry list with a measure set, keeping values for names
    /// that survive and zeroing (invalid) entries for new names.
    pub fn reconcile<V>(&mut self, set: &MeasureSet<V>) {
        self.entries.retain(|e| set.get(&e.name).is_some());
        for measure in set.iter() {
            if !self.entries.iter().any(|e| e.name == measure.name()) {
                self.entries.push(MeasureResult {
                    name: measure.name().to_string(),
                    value: measure.zero(),
                    valid: false,
                });
            }
        }
    }
}

/// Folds an item stream through one measure; the batch-scan fallback shared
/// by every index kind.
pub fn fold_measure<'a, V: 'a>(
    measure: &Arc<dyn Measure<V>>,
    items: impl Iterator<Item = &'a V>,
) -> MeasureValue {
    let mut acc = measure.zero();
    for item in items {
        acc = measure.add(acc, item);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> MeasureSet<i64> {
        MeasureSet::new().ensure_defaults().with(Arc::new(
            MinMeasure::new("Min", Arc::new(|v: &i64| *v)),
        ))
    }

    #[test]
    fn count_tracks_adds_and_removes() {
        let set = set();
        let mut results = MeasureResultSet::zeroed(&set);
        results.record_add(&set, &10);
        results.record_add(&set, &20);
        assert_eq!(results.get(COUNT).unwrap().value, 2);
        assert!(results.record_remove(&set, &20));
        assert_eq!(results.get(COUNT).unwrap().value, 1);
    }

    #[test]
    fn removing_the_minimum_invalidates() {
        let set = set();
        let mut results = MeasureResultSet::zeroed(&set);
        results.record_add(&set, &10);
        results.record_add(&set, &20);
        assert_eq!(results.get("Min").unwrap().value, 10);

        // Dropping a non-minimal item keeps the running value.
        assert!(results.record_remove(&set, &20));
        assert!(results.all_valid());

        results.record_add(&set, &20);
        assert!(!results.record_remove(&set, &10));
        assert!(!results.get("Min").unwrap().valid);

        results.recompute(&set, [20i64].iter());
        assert!(results.all_valid());
        assert_eq!(results.get("Min").unwrap().value, 20);
    }

    #[test]
    fn unknown_measure_is_an_error() {
        let results = MeasureResultSet::zeroed(&set());
        assert!(matches!(
            results.get("Median"),
            Err(IndexError::UnknownMeasure(_))
        ));
    }
}
