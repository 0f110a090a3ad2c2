//! Paged B+Tree index core.
//!
//! Orchestrates descend/seek/insert/remove/split over pages resolved through
//! a [`PageProvider`]; the same code runs fully in memory or over the cached
//! stream provider. Point lookups are gated by the descriptor's bloom filter,
//! whose negative answer is authoritative.

use std::cmp::Ordering;
use std::hash::Hash;

use smallvec::SmallVec;
use tracing::debug;

use crate::algebra::{Direction, Entire, KeyCompare, Range, Ray, SeekResult};
use crate::error::{IndexError, Result};
use crate::measure::{fold_measure, MeasureResultSet, MeasureValue};
use crate::page::{
    BloomFilter, DescriptorPage, Features, InnerPage, LeafPage, PageNode, PageProvider, PageRef,
};

use super::{empty_reader, is_full_range, IndexConfig, KeyExtract, OrderedIndex, Reader};

// Inner refs with the chosen child slot, root first. Sized for trees a few
// levels deep without spilling.
type DescentPath = SmallVec<[(PageRef, usize); 8]>;

/// Position of one entry inside the leaf chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LeafCursor {
    page: PageRef,
    slot: usize,
}

/// Key-ordered unique index over provider-resolved pages.
pub struct BTreeIndex<K, V, P> {
    provider: P,
    descriptor: DescriptorPage,
    config: IndexConfig<K, V>,
    version: u64,
}

impl<K, V, P> BTreeIndex<K, V, P>
where
    K: Clone + Hash + 'static,
    V: Clone + PartialEq + 'static,
    P: PageProvider<K, V>,
{
    /// Binds a configuration to a provider, loading existing tree state or
    /// initializing an empty descriptor.
    pub fn open(config: IndexConfig<K, V>, mut provider: P) -> Result<Self> {
        config.validate()?;
        let descriptor = match provider.load_descriptor()? {
            Some(mut descriptor) => {
                descriptor.measures.reconcile(&config.measures);
                descriptor
            }
            None => {
                let descriptor = DescriptorPage::new(
                    config.options.page_size,
                    BloomFilter::with_capacity(
                        config.options.bloom_capacity,
                        config.options.bloom_fp_rate,
                    ),
                    MeasureResultSet::zeroed(&config.measures),
                );
                provider.initialize(&descriptor)?;
                descriptor
            }
        };
        let mut index = Self {
            provider,
            descriptor,
            config,
            version: 0,
        };
        if !index.descriptor.measures.all_valid() {
            index.recompute_measures()?;
        }
        Ok(index)
    }

    /// The provider's backing state, for callers that dispose explicitly.
    pub fn into_provider(mut self) -> Result<P> {
        self.provider.store_descriptor(&self.descriptor)?;
        self.provider.flush()?;
        Ok(self.provider)
    }

    /// Pushes descriptor and dirty pages to the backing resource.
    pub fn flush(&mut self) -> Result<()> {
        self.provider.store_descriptor(&self.descriptor)?;
        self.provider.flush()
    }

    fn require(&self, features: Features, what: &'static str) -> Result<()> {
        if self.provider.features().contains(features) {
            Ok(())
        } else {
            Err(IndexError::Unsupported(what))
        }
    }

    fn key_of(&self, item: &V) -> K {
        (self.config.extract)(item)
    }

    // Walks from the root to the leaf covering `point`, recording the inner
    // path for split propagation.
    fn descend(&self, point: &Entire<K>) -> Result<Option<(DescentPath, PageRef)>> {
        let Some(root) = self.descriptor.root else {
            return Ok(None);
        };
        let cmp = self.config.compare.clone();
        let mut path = DescentPath::new();
        let mut current = root;
        loop {
            let step = self.provider.with_page(current, |node| match node {
                PageNode::Leaf(_) => Ok(None),
                PageNode::Inner(inner) => {
                    inner.check()?;
                    let slot = inner
                        .separators
                        .partition_point(|sep| point.compare_to_key(sep, &cmp) != Ordering::Less);
                    Ok(Some((inner.children[slot], slot)))
                }
            })?;
            match step {
                None => return Ok(Some((path, current))),
                Some((child, slot)) => {
                    path.push((current, slot));
                    current = child;
                }
            }
        }
    }

    // Insertion slot for `point` within a leaf, plus whether it is an exact hit.
    fn leaf_position(
        leaf: &LeafPage<V>,
        point: &Entire<K>,
        extract: &KeyExtract<K, V>,
        cmp: &KeyCompare<K>,
    ) -> (usize, bool) {
        let slot = leaf
            .items
            .partition_point(|item| point.compare_to_key(&extract(item), cmp) == Ordering::Greater);
        let exact = slot < leaf.items.len()
            && point.compare_to_key(&extract(&leaf.items[slot]), cmp) == Ordering::Equal;
        (slot, exact)
    }

    // Point lookup without the capability check; shared by reads and the
    // exact-item guard in `remove`.
    fn lookup(&self, key: &K) -> Result<Option<V>> {
        // A negative filter answer is authoritative; a positive one still
        // needs the descent.
        if !self.descriptor.bloom.may_contain(key) {
            return Ok(None);
        }
        let Some((_, leaf_ref)) = self.descend(&Entire::Exact(key.clone()))? else {
            return Ok(None);
        };
        let extract = self.config.extract.clone();
        let cmp = self.config.compare.clone();
        let point = Entire::Exact(key.clone());
        self.provider.with_page(leaf_ref, |node| {
            let leaf = node.as_leaf()?;
            let (slot, exact) = Self::leaf_position(leaf, &point, &extract, &cmp);
            Ok(exact.then(|| leaf.items[slot].clone()))
        })
    }

    fn item_at(&self, cursor: LeafCursor) -> Result<V> {
        self.provider.with_page(cursor.page, |node| {
            let leaf = node.as_leaf()?;
            leaf.items
                .get(cursor.slot)
                .cloned()
                .ok_or(IndexError::Corruption("leaf cursor out of bounds"))
        })
    }

    // First occupied slot at or after (`page`, `slot`), following next links.
    fn slot_forward(&self, mut page: PageRef, mut slot: usize) -> Result<Option<LeafCursor>> {
        loop {
            let (len, next) = self
                .provider
                .with_page(page, |node| {
                    let leaf = node.as_leaf()?;
                    Ok((leaf.items.len(), leaf.next))
                })?;
            if slot < len {
                return Ok(Some(LeafCursor { page, slot }));
            }
            match next {
                Some(next_page) => {
                    page = next_page;
                    slot = 0;
                }
                None => return Ok(None),
            }
        }
    }

    // Last occupied slot strictly before (`page`, `slot`), following prev links.
    fn slot_backward(&self, mut page: PageRef, slot: usize) -> Result<Option<LeafCursor>> {
        if slot > 0 {
            return Ok(Some(LeafCursor { page, slot: slot - 1 }));
        }
        loop {
            let prev = self
                .provider
                .with_page(page, |node| Ok(node.as_leaf()?.prev))?;
            match prev {
                Some(prev_page) => {
                    let len = self
                        .provider
                        .with_page(prev_page, |node| Ok(node.as_leaf()?.items.len()))?;
                    if len > 0 {
                        return Ok(Some(LeafCursor {
                            page: prev_page,
                            slot: len - 1,
                        }));
                    }
                    page = prev_page;
                }
                None => return Ok(None),
            }
        }
    }

    fn seek_cursor(&self, ray: &Ray<K>) -> Result<SeekResult<LeafCursor>> {
        let Some((_, leaf_ref)) = self.descend(&ray.point)? else {
            return Ok(SeekResult::None);
        };
        let extract = self.config.extract.clone();
        let cmp = self.config.compare.clone();
        let point = ray.point.clone();
        let (slot, exact) = self.provider.with_page(leaf_ref, |node| {
            Ok(Self::leaf_position(node.as_leaf()?, &point, &extract, &cmp))
        })?;
        if exact {
            return Ok(SeekResult::Exact(LeafCursor {
                page: leaf_ref,
                slot,
            }));
        }
        let nearest = match ray.direction {
            Direction::Positive => self.slot_forward(leaf_ref, slot)?,
            Direction::Negative => self.slot_backward(leaf_ref, slot)?,
        };
        Ok(match nearest {
            Some(cursor) => SeekResult::Nearest(cursor),
            None => SeekResult::None,
        })
    }

    // Locates the exact entry for `key` and removes or swaps it.
    // `replacement = None` removes; `Some(item)` swaps in place.
    fn take_entry(&mut self, key: &K, replacement: Option<V>) -> Result<Option<V>> {
        let Some((_, leaf_ref)) = self.descend(&Entire::Exact(key.clone()))? else {
            return Ok(None);
        };
        let extract = self.config.extract.clone();
        let cmp = self.config.compare.clone();
        let point = Entire::Exact(key.clone());
        self.provider.with_page_mut(leaf_ref, |node| {
            let leaf = node.as_leaf_mut()?;
            let (slot, exact) = Self::leaf_position(leaf, &point, &extract, &cmp);
            if !exact {
                return Ok(None);
            }
            Ok(Some(match replacement {
                Some(item) => std::mem::replace(&mut leaf.items[slot], item),
                None => leaf.items.remove(slot),
            }))
        })
    }

    fn record_add(&mut self, item: &V) {
        let measures = self.config.measures.clone();
        self.descriptor.measures.record_add(&measures, item);
    }

    // Subtracts `item` from every maintained value, falling back to a batch
    // recompute when some aggregate cannot be inverted.
    fn record_remove(&mut self, item: &V) -> Result<()> {
        let measures = self.config.measures.clone();
        if !self.descriptor.measures.record_remove(&measures, item) {
            self.recompute_measures()?;
        }
        Ok(())
    }

    fn recompute_measures(&mut self) -> Result<()> {
        let items = self.collect_all()?;
        let measures = self.config.measures.clone();
        self.descriptor.measures.recompute(&measures, items.iter());
        self.provider.store_descriptor(&self.descriptor)?;
        Ok(())
    }

    fn collect_all(&self) -> Result<Vec<V>> {
        let mut items = Vec::with_capacity(self.descriptor.len as usize);
        let mut cursor = match self.descriptor.leftmost {
            Some(page) => self.slot_forward(page, 0)?,
            None => None,
        };
        while let Some(at) = cursor {
            items.push(self.item_at(at)?);
            cursor = self.slot_forward(at.page, at.slot + 1)?;
        }
        Ok(items)
    }

    fn commit_descriptor(&mut self) -> Result<()> {
        self.version += 1;
        self.provider.store_descriptor(&self.descriptor)
    }

    // Pushes a separator/child pair into the parents, splitting inner pages
    // as they overflow; an exhausted path installs a new root.
    fn propagate_split(
        &mut self,
        mut path: DescentPath,
        separator: K,
        child: PageRef,
    ) -> Result<()> {
        let capacity = self.descriptor.page_size;
        let mut carry = Some((separator, child));
        while let Some((sep, new_child)) = carry.take() {
            match path.pop() {
                Some((parent, slot)) => {
                    let overflow = self.provider.with_page_mut(parent, |node| {
                        let inner = node.as_inner_mut()?;
                        inner.separators.insert(slot, sep);
                        inner.children.insert(slot + 1, new_child);
                        if inner.children.len() <= capacity {
                            return Ok(None);
                        }
                        let mid = inner.separators.len() / 2;
                        let right_separators = inner.separators.split_off(mid + 1);
                        let promoted = inner.separators.pop().expect("separator at mid");
                        let right_children = inner.children.split_off(mid + 1);
                        Ok(Some((promoted, right_separators, right_children)))
                    })?;
                    if let Some((promoted, separators, children)) = overflow {
                        let right = self.provider.allocate(PageNode::Inner(InnerPage {
                            separators,
                            children,
                        }))?;
                        debug!(parent = parent.0, right = right.0, "split inner page");
                        carry = Some((promoted, right));
                    }
                }
                None => {
                    let old_root = self.descriptor.root.expect("split implies a root");
                    let new_root = self.provider.allocate(PageNode::Inner(InnerPage {
                        separators: vec![sep],
                        children: vec![old_root, new_child],
                    }))?;
                    debug!(root = new_root.0, "installed new root");
                    self.descriptor.root = Some(new_root);
                }
            }
        }
        Ok(())
    }

    fn insert_into_leaf(
        &mut self,
        path: DescentPath,
        leaf_ref: PageRef,
        key: &K,
        item: V,
    ) -> Result<()> {
        let capacity = self.descriptor.page_size;
        let extract = self.config.extract.clone();
        let cmp = self.config.compare.clone();
        let point = Entire::Exact(key.clone());
        let split = self.provider.with_page_mut(leaf_ref, |node| {
            let leaf = node.as_leaf_mut()?;
            let (slot, exact) = Self::leaf_position(leaf, &point, &extract, &cmp);
            if exact {
                return Err(IndexError::DuplicateKey);
            }
            leaf.items.insert(slot, item);
            if leaf.items.len() <= capacity {
                return Ok(None);
            }
            let mid = leaf.items.len() / 2;
            let right_items = leaf.items.split_off(mid);
            Ok(Some((right_items, leaf.next)))
        })?;

        if let Some((right_items, old_next)) = split {
            let separator = extract(&right_items[0]);
            let right = self.provider.allocate(PageNode::Leaf(LeafPage {
                items: right_items,
                prev: Some(leaf_ref),
                next: old_next,
            }))?;
            self.provider.with_page_mut(leaf_ref, |node| {
                node.as_leaf_mut()?.next = Some(right);
                Ok(())
            })?;
            match old_next {
                Some(next_ref) => {
                    self.provider.with_page_mut(next_ref, |node| {
                        node.as_leaf_mut()?.prev = Some(right);
                        Ok(())
                    })?;
                }
                None => self.descriptor.rightmost = Some(right),
            }
            debug!(leaf = leaf_ref.0, right = right.0, "split leaf page");
            self.propagate_split(path, separator, right)?;
        }
        Ok(())
    }
}

impl<K, V, P> OrderedIndex<K, V> for BTreeIndex<K, V, P>
where
    K: Clone + Hash + 'static,
    V: Clone + PartialEq + 'static,
    P: PageProvider<K, V>,
{
    fn features(&self) -> Features {
        self.provider.features()
    }

    fn len(&self) -> usize {
        self.descriptor.len as usize
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn get(&self, key: &K) -> Result<Option<V>> {
        self.require(Features::READ, "read")?;
        self.lookup(key)
    }

    fn contains(&self, item: &V) -> Result<bool> {
        Ok(self.get(&self.key_of(item))?.as_ref() == Some(item))
    }

    fn seek_key(&self, key: &K) -> Result<SeekResult<V>> {
        self.seek(&Ray::at(key.clone(), Direction::Positive))
    }

    fn seek(&self, ray: &Ray<K>) -> Result<SeekResult<V>> {
        self.require(Features::READ, "read")?;
        match self.seek_cursor(ray)? {
            SeekResult::None => Ok(SeekResult::None),
            SeekResult::Exact(cursor) => Ok(SeekResult::Exact(self.item_at(cursor)?)),
            SeekResult::Nearest(cursor) => Ok(SeekResult::Nearest(self.item_at(cursor)?)),
        }
    }

    fn reader(&self, range: &Range<K>) -> Result<Reader<'_, V>> {
        self.require(Features::READ, "read")?;
        let cmp = &self.config.compare;
        let Some(direction) = range.direction(cmp) else {
            return Ok(empty_reader());
        };
        if self.descriptor.root.is_none() {
            return Ok(empty_reader());
        }
        let (start, bound) = match direction {
            Direction::Positive => (
                range.lower_endpoint(cmp).expect("non-empty").clone(),
                range.higher_endpoint(cmp).expect("non-empty").clone(),
            ),
            Direction::Negative => (
                range.higher_endpoint(cmp).expect("non-empty").clone(),
                range.lower_endpoint(cmp).expect("non-empty").clone(),
            ),
        };
        let cursor = self
            .seek_cursor(&Ray::new(start, direction))?
            .into_option();
        Ok(Box::new(TreeReader {
            index: self,
            cursor,
            bound,
            direction,
            done: false,
        }))
    }

    fn add(&mut self, item: V) -> Result<()> {
        self.require(Features::WRITE, "write")?;
        let key = self.key_of(&item);
        match self.descend(&Entire::Exact(key.clone()))? {
            None => {
                let leaf = self.provider.allocate(PageNode::Leaf(LeafPage {
                    items: vec![item.clone()],
                    prev: None,
                    next: None,
                }))?;
                self.descriptor.root = Some(leaf);
                self.descriptor.leftmost = Some(leaf);
                self.descriptor.rightmost = Some(leaf);
                self.record_add(&item);
            }
            Some((path, leaf_ref)) => {
                self.insert_into_leaf(path, leaf_ref, &key, item.clone())?;
                self.record_add(&item);
            }
        }
        self.descriptor.bloom.insert(&key);
        self.descriptor.len += 1;
        self.commit_descriptor()
    }

    fn remove(&mut self, item: &V) -> Result<bool> {
        self.require(Features::WRITE, "write")?;
        let key = self.key_of(item);
        // Only the exact stored entry counts; a different item under the
        // same key is left alone.
        match self.lookup(&key)? {
            Some(stored) if stored == *item => {}
            _ => return Ok(false),
        }
        match self.take_entry(&key, None)? {
            Some(removed) => {
                self.descriptor.len -= 1;
                self.record_remove(&removed)?;
                self.commit_descriptor()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove_key(&mut self, key: &K) -> Result<bool> {
        self.require(Features::WRITE, "write")?;
        match self.take_entry(key, None)? {
            Some(removed) => {
                self.descriptor.len -= 1;
                self.record_remove(&removed)?;
                self.commit_descriptor()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn replace(&mut self, item: V) -> Result<()> {
        self.require(Features::WRITE, "write")?;
        let key = self.key_of(&item);
        match self.take_entry(&key, Some(item.clone()))? {
            Some(old) => {
                self.record_remove(&old)?;
                self.record_add(&item);
                self.commit_descriptor()
            }
            None => Err(IndexError::KeyNotFound),
        }
    }

    fn clear(&mut self) -> Result<()> {
        self.require(Features::WRITE, "write")?;
        self.provider.clear()?;
        self.descriptor = DescriptorPage::new(
            self.config.options.page_size,
            BloomFilter::with_capacity(
                self.config.options.bloom_capacity,
                self.config.options.bloom_fp_rate,
            ),
            MeasureResultSet::zeroed(&self.config.measures),
        );
        self.provider.initialize(&self.descriptor)?;
        self.version += 1;
        debug!("cleared index");
        Ok(())
    }

    fn measure(&self, name: &str) -> Result<MeasureValue> {
        self.require(Features::READ, "read")?;
        let entry = self.descriptor.measures.get(name)?;
        if entry.valid {
            return Ok(entry.value);
        }
        // Mutation-time recomputes normally keep entries valid; this covers
        // descriptors reopened from state persisted before one happened.
        let measure = self
            .config
            .measures
            .get(name)
            .ok_or_else(|| IndexError::UnknownMeasure(name.to_string()))?;
        let items = self.collect_all()?;
        Ok(fold_measure(measure, items.iter()))
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

// Live cursor over the leaf chain, bounded by the far endpoint.
struct TreeReader<'a, K, V, P> {
    index: &'a BTreeIndex<K, V, P>,
    cursor: Option<LeafCursor>,
    bound: Entire<K>,
    direction: Direction,
    done: bool,
}

impl<K, V, P> Iterator for TreeReader<'_, K, V, P>
where
    K: Clone + Hash + 'static,
    V: Clone + PartialEq + 'static,
    P: PageProvider<K, V>,
{
    type Item = Result<V>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let at = self.cursor?;
        let step: Result<Option<V>> = (|| {
            let item = self.index.item_at(at)?;
            let key = (self.index.config.extract)(&item);
            let inside = match self.direction {
                Direction::Positive => {
                    self.bound.compare_to_key(&key, &self.index.config.compare) != Ordering::Less
                }
                Direction::Negative => {
                    self.bound.compare_to_key(&key, &self.index.config.compare)
                        != Ordering::Greater
                }
            };
            if !inside {
                return Ok(None);
            }
            self.cursor = match self.direction {
                Direction::Positive => self.index.slot_forward(at.page, at.slot + 1)?,
                Direction::Negative => self.index.slot_backward(at.page, at.slot)?,
            };
            Ok(Some(item))
        })();
        match step {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
