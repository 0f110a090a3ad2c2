//! Page model and the provider abstraction the tree core runs against.
//!
//! Pages are addressed only through opaque [`PageRef`] handles; identity and
//! caching belong to the [`PageProvider`]. The same tree algorithms run over
//! the fully resident [`MemoryPageProvider`] and the cached, persisted
//! [`StreamPageProvider`].

mod bloom;
mod memory;
mod stream;

pub use bloom::BloomFilter;
pub use memory::MemoryPageProvider;
pub use stream::StreamPageProvider;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::measure::MeasureResultSet;

/// Opaque handle to a provider-owned page.
///
/// An arena-style index, never a pointer: resolution strategy (page table,
/// cache over a backing stream) is the provider's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRef(pub u64);

impl PageRef {
    /// Reserved slot the descriptor persists under.
    pub const DESCRIPTOR: PageRef = PageRef(0);
}

/// Capability flags a provider (and the index above it) was configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features(u8);

impl Features {
    /// No capabilities.
    pub const NONE: Features = Features(0);
    /// Lookups, seeks and range readers.
    pub const READ: Features = Features(1);
    /// Insert, remove, replace, clear.
    pub const WRITE: Features = Features(1 << 1);
    /// Pages cross a serialization boundary (persisted provider).
    pub const SERIALIZE: Features = Features(1 << 2);
    /// Copy-on-write differential overlay semantics.
    pub const DIFFERENTIAL: Features = Features(1 << 3);
    /// Read and write.
    pub const READ_WRITE: Features = Features(1 | 1 << 1);
    /// Serialize and read.
    pub const SERIALIZE_AND_READ: Features = Features(1 | 1 << 2);

    /// Whether every flag in `other` is present in `self`.
    pub fn contains(self, other: Features) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of both flag sets.
    pub fn with(self, other: Features) -> Features {
        Features(self.0 | other.0)
    }

    /// Flags present in both sets.
    pub fn intersection(self, other: Features) -> Features {
        Features(self.0 & other.0)
    }
}

/// A leaf: ordered items plus sibling links.
///
/// The sibling links form a doubly linked chain across all leaves, so ordered
/// full scans never descend from the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafPage<V> {
    /// Items in key order.
    pub items: Vec<V>,
    /// Previous leaf in key order.
    pub prev: Option<PageRef>,
    /// Next leaf in key order.
    pub next: Option<PageRef>,
}

impl<V> LeafPage<V> {
    /// An empty, unlinked leaf.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            prev: None,
            next: None,
        }
    }
}

impl<V> Default for LeafPage<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// An inner page: separator keys and child references.
///
/// Invariant: `separators.len() + 1 == children.len()`. `children[i]` covers
/// keys below `separators[i]`; each separator is the smallest key reachable
/// through the child to its right.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerPage<K> {
    /// Separator keys, ascending.
    pub separators: Vec<K>,
    /// Child page references, one more than separators.
    pub children: Vec<PageRef>,
}

impl<K> InnerPage<K> {
    /// Verifies the separator/children arity invariant.
    pub fn check(&self) -> Result<()> {
        if self.separators.len() + 1 != self.children.len() {
            return Err(IndexError::Corruption("inner page separator/child arity"));
        }
        Ok(())
    }
}

/// The closed set of page kinds the tree dispatches over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageNode<K, V> {
    /// Branch page.
    Inner(InnerPage<K>),
    /// Leaf page.
    Leaf(LeafPage<V>),
}

impl<K, V> PageNode<K, V> {
    /// Whether this is a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self, PageNode::Leaf(_))
    }

    /// Borrows the leaf, or reports corruption.
    pub fn as_leaf(&self) -> Result<&LeafPage<V>> {
        match self {
            PageNode::Leaf(leaf) => Ok(leaf),
            PageNode::Inner(_) => Err(IndexError::Corruption("expected leaf page")),
        }
    }

    /// Mutably borrows the leaf, or reports corruption.
    pub fn as_leaf_mut(&mut self) -> Result<&mut LeafPage<V>> {
        match self {
            PageNode::Leaf(leaf) => Ok(leaf),
            PageNode::Inner(_) => Err(IndexError::Corruption("expected leaf page")),
        }
    }

    /// Borrows the inner page, or reports corruption.
    pub fn as_inner(&self) -> Result<&InnerPage<K>> {
        match self {
            PageNode::Inner(inner) => Ok(inner),
            PageNode::Leaf(_) => Err(IndexError::Corruption("expected inner page")),
        }
    }

    /// Mutably borrows the inner page, or reports corruption.
    pub fn as_inner_mut(&mut self) -> Result<&mut InnerPage<K>> {
        match self {
            PageNode::Inner(inner) => Ok(inner),
            PageNode::Leaf(_) => Err(IndexError::Corruption("expected inner page")),
        }
    }
}

/// Mutable root of tree metadata, persisted through the provider like any
/// other page (under [`PageRef::DESCRIPTOR`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorPage {
    /// Root page, if the tree has one.
    pub root: Option<PageRef>,
    /// First leaf in key order.
    pub leftmost: Option<PageRef>,
    /// Last leaf in key order.
    pub rightmost: Option<PageRef>,
    /// Maximum entries per page before a split.
    pub page_size: usize,
    /// Current item count.
    pub len: u64,
    /// Fast-reject membership filter. Grows only, except on clear.
    pub bloom: BloomFilter,
    /// Maintained aggregate values.
    pub measures: MeasureResultSet,
}

impl DescriptorPage {
    /// A descriptor for an empty tree.
    pub fn new(page_size: usize, bloom: BloomFilter, measures: MeasureResultSet) -> Self {
        Self {
            root: None,
            leftmost: None,
            rightmost: None,
            page_size,
            len: 0,
            bloom,
            measures,
        }
    }
}

/// Resolves opaque references to pages and owns their identity and caching.
///
/// Contract: read-your-writes (a page fetched twice without an intervening
/// `clear` reflects every write made through the provider) and no torn reads.
/// Locking granularity is the implementation's choice.
pub trait PageProvider<K, V> {
    /// Capability flags this provider was opened with.
    fn features(&self) -> Features;

    /// Whether a descriptor has been stored.
    fn is_initialized(&self) -> bool;

    /// Stores the initial descriptor. Fails if already initialized.
    fn initialize(&mut self, descriptor: &DescriptorPage) -> Result<()>;

    /// Loads the persisted descriptor, if any.
    fn load_descriptor(&self) -> Result<Option<DescriptorPage>>;

    /// Persists the descriptor.
    fn store_descriptor(&mut self, descriptor: &DescriptorPage) -> Result<()>;

    /// Takes ownership of a page and hands back its reference.
    fn allocate(&mut self, node: PageNode<K, V>) -> Result<PageRef>;

    /// Runs `f` over the page behind `page`.
    fn with_page<R>(&self, page: PageRef, f: impl FnOnce(&PageNode<K, V>) -> Result<R>) -> Result<R>
    where
        Self: Sized;

    /// Runs `f` over the page mutably and marks it dirty.
    fn with_page_mut<R>(
        &mut self,
        page: PageRef,
        f: impl FnOnce(&mut PageNode<K, V>) -> Result<R>,
    ) -> Result<R>
    where
        Self: Sized;

    /// Releases one page.
    fn free(&mut self, page: PageRef) -> Result<()>;

    /// Drops every page and invalidates all cached entries. The descriptor
    /// slot is cleared too; the index stores a fresh one afterwards.
    fn clear(&mut self) -> Result<()>;

    /// Pushes buffered state to the backing resource, if any.
    fn flush(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_flags_compose() {
        assert!(Features::READ_WRITE.contains(Features::READ));
        assert!(Features::READ_WRITE.contains(Features::WRITE));
        assert!(!Features::READ.contains(Features::WRITE));
        let all = Features::SERIALIZE_AND_READ.with(Features::WRITE);
        assert!(all.contains(Features::SERIALIZE));
        assert!(all.contains(Features::READ_WRITE));
    }

    #[test]
    fn inner_arity_is_checked() {
        let bad: InnerPage<i64> = InnerPage {
            separators: vec![1, 2],
            children: vec![PageRef(1), PageRef(2)],
        };
        assert!(bad.check().is_err());
    }
}
