//! Fully resident page provider.

use rustc_hash::FxHashMap;

use crate::error::{IndexError, Result};

use super::{DescriptorPage, Features, PageNode, PageProvider, PageRef};

/// Page provider backed by an in-process page table.
///
/// Reference identity is the table key; pages live exactly as long as the
/// provider. `flush` is a no-op — there is nothing behind the table.
pub struct MemoryPageProvider<K, V> {
    pages: FxHashMap<PageRef, PageNode<K, V>>,
    descriptor: Option<DescriptorPage>,
    next_ref: u64,
    features: Features,
}

impl<K, V> MemoryPageProvider<K, V> {
    /// An empty provider with read/write capability.
    pub fn new() -> Self {
        Self::with_features(Features::READ_WRITE)
    }

    /// An empty provider with explicit capability flags.
    pub fn with_features(features: Features) -> Self {
        Self {
            pages: FxHashMap::default(),
            descriptor: None,
            next_ref: PageRef::DESCRIPTOR.0 + 1,
            features,
        }
    }

    /// Number of live pages, descriptor excluded.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn resolve(&self, page: PageRef) -> Result<&PageNode<K, V>> {
        self.pages
            .get(&page)
            .ok_or(IndexError::Corruption("unresolvable page reference"))
    }
}

impl<K, V> Default for MemoryPageProvider<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> PageProvider<K, V> for MemoryPageProvider<K, V> {
    fn features(&self) -> Features {
        self.features
    }

    fn is_initialized(&self) -> bool {
        self.descriptor.is_some()
    }

    fn initialize(&mut self, descriptor: &DescriptorPage) -> Result<()> {
        if self.descriptor.is_some() {
            return Err(IndexError::Configuration(
                "provider already initialized".into(),
            ));
        }
        self.descriptor = Some(descriptor.clone());
        Ok(())
    }

    fn load_descriptor(&self) -> Result<Option<DescriptorPage>> {
        Ok(self.descriptor.clone())
    }

    fn store_descriptor(&mut self, descriptor: &DescriptorPage) -> Result<()> {
        self.descriptor = Some(descriptor.clone());
        Ok(())
    }

    fn allocate(&mut self, node: PageNode<K, V>) -> Result<PageRef> {
        let page = PageRef(self.next_ref);
        self.next_ref += 1;
        self.pages.insert(page, node);
        Ok(page)
    }

    fn with_page<R>(&self, page: PageRef, f: impl FnOnce(&PageNode<K, V>) -> Result<R>) -> Result<R> {
        f(self.resolve(page)?)
    }

    fn with_page_mut<R>(
        &mut self,
        page: PageRef,
        f: impl FnOnce(&mut PageNode<K, V>) -> Result<R>,
    ) -> Result<R> {
        let node = self
            .pages
            .get_mut(&page)
            .ok_or(IndexError::Corruption("unresolvable page reference"))?;
        f(node)
    }

    fn free(&mut self, page: PageRef) -> Result<()> {
        self.pages.remove(&page);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.pages.clear();
        self.descriptor = None;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
