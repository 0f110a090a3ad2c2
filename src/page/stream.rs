//! Cached page provider over an append-only backing stream.
//!
//! Pages are serialized into framed records (`[ref][len][crc32][payload]`,
//! newest record wins) behind a bounded LRU cache. Dirty pages are written
//! back on eviction and on flush; the descriptor rides the same log under its
//! reserved reference. The byte layout is private to this provider — nothing
//! above it may depend on record framing.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{IndexError, Result};

use super::{DescriptorPage, Features, PageNode, PageProvider, PageRef};

/// Default number of cached pages.
pub const DEFAULT_CACHE_PAGES: usize = 1024;

const RECORD_HEADER_LEN: u64 = 16;
// A length of all-ones marks a freed page; no payload follows.
const TOMBSTONE_LEN: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct RecordLocation {
    payload_offset: u64,
    len: u32,
    crc: u32,
}

struct CachedPage<K, V> {
    node: PageNode<K, V>,
    dirty: bool,
}

struct StreamInner<K, V> {
    file: File,
    cache: LruCache<PageRef, CachedPage<K, V>>,
    directory: FxHashMap<PageRef, RecordLocation>,
    descriptor: Option<DescriptorPage>,
    descriptor_dirty: bool,
    tail: u64,
    next_ref: u64,
}

/// Page provider that keeps a bounded cache over a persisted record log.
///
/// All shared state sits behind one lock, which trivially satisfies the
/// read-your-writes and no-torn-reads contract; finer latching is left to
/// callers that need it.
pub struct StreamPageProvider<K, V> {
    features: Features,
    path: PathBuf,
    inner: Mutex<StreamInner<K, V>>,
    disposed: bool,
}

impl<K, V> StreamPageProvider<K, V> {
    /// Opens (or creates) the backing log at `path`.
    ///
    /// `features` must include `SERIALIZE`; pages cross a serialization
    /// boundary here by construction.
    pub fn open(path: &Path, features: Features, cache_pages: usize) -> Result<Self> {
        if !features.contains(Features::SERIALIZE) {
            return Err(IndexError::Configuration(
                "stream provider requires the serialize feature".into(),
            ));
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let (directory, descriptor, tail, next_ref) = recover(&mut file)?;
        debug!(
            path = %path.display(),
            pages = directory.len(),
            tail,
            "opened page stream"
        );

        let capacity = NonZeroUsize::new(cache_pages)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_CACHE_PAGES).expect("nonzero default"));
        Ok(Self {
            features,
            path: path.to_path_buf(),
            inner: Mutex::new(StreamInner {
                file,
                cache: LruCache::new(capacity),
                directory,
                descriptor,
                descriptor_dirty: false,
                tail,
                next_ref,
            }),
            disposed: false,
        })
    }

    /// Where the backing log lives.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes everything and releases the backing file.
    ///
    /// Explicit disposal is the supported shutdown path; the `Drop` backstop
    /// only logs failures.
    pub fn dispose(mut self) -> Result<()>
    where
        K: Serialize + DeserializeOwned,
        V: Serialize + DeserializeOwned,
    {
        <Self as PageProvider<K, V>>::flush(&mut self)?;
        self.disposed = true;
        Ok(())
    }
}

impl<K, V> StreamInner<K, V> {
    fn append_record(&mut self, page: PageRef, payload: &[u8]) -> Result<RecordLocation> {
        let crc = crc32fast::hash(payload);
        let offset = self.tail;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&page.0.to_le_bytes())?;
        self.file.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.file.write_all(&crc.to_le_bytes())?;
        self.file.write_all(payload)?;
        self.tail = offset + RECORD_HEADER_LEN + payload.len() as u64;
        let location = RecordLocation {
            payload_offset: offset + RECORD_HEADER_LEN,
            len: payload.len() as u32,
            crc,
        };
        self.directory.insert(page, location);
        Ok(location)
    }

    fn append_tombstone(&mut self, page: PageRef) -> Result<()> {
        let offset = self.tail;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&page.0.to_le_bytes())?;
        self.file.write_all(&TOMBSTONE_LEN.to_le_bytes())?;
        self.file.write_all(&0u32.to_le_bytes())?;
        self.tail = offset + RECORD_HEADER_LEN;
        self.directory.remove(&page);
        Ok(())
    }

    fn read_payload(&mut self, location: RecordLocation) -> Result<Vec<u8>> {
        let mut payload = vec![0u8; location.len as usize];
        self.file.seek(SeekFrom::Start(location.payload_offset))?;
        self.file.read_exact(&mut payload)?;
        if crc32fast::hash(&payload) != location.crc {
            return Err(IndexError::Corruption("page record checksum mismatch"));
        }
        Ok(payload)
    }
}

impl<K, V> StreamInner<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    // Makes `page` resident, evicting (and writing back) as needed.
    fn ensure_cached(&mut self, page: PageRef) -> Result<()> {
        if self.cache.contains(&page) {
            return Ok(());
        }
        let location = *self
            .directory
            .get(&page)
            .ok_or(IndexError::Corruption("unresolvable page reference"))?;
        let payload = self.read_payload(location)?;
        let node: PageNode<K, V> = serde_json::from_slice(&payload)?;
        self.insert_cached(page, CachedPage { node, dirty: false })?;
        Ok(())
    }

    fn insert_cached(&mut self, page: PageRef, cached: CachedPage<K, V>) -> Result<()> {
        if let Some((evicted_ref, evicted)) = self.cache.push(page, cached) {
            // `push` returns the displaced entry; same-key replacement never
            // happens here because callers check residency first.
            if evicted.dirty {
                debug!(page = evicted_ref.0, "writing back evicted page");
                let payload = serde_json::to_vec(&evicted.node)?;
                self.append_record(evicted_ref, &payload)?;
            }
        }
        Ok(())
    }

    // TODO: compact the log once stale page images dominate the file; the
    // directory already knows which records are live.
    fn write_back_dirty(&mut self) -> Result<()> {
        let dirty_refs: Vec<PageRef> = self
            .cache
            .iter()
            .filter_map(|(page, cached)| cached.dirty.then_some(*page))
            .collect();
        for page in dirty_refs {
            let payload = {
                let cached = self.cache.get_mut(&page).expect("dirty page resident");
                cached.dirty = false;
                serde_json::to_vec(&cached.node)?
            };
            self.append_record(page, &payload)?;
        }
        if self.descriptor_dirty {
            if let Some(descriptor) = &self.descriptor {
                let payload = serde_json::to_vec(descriptor)?;
                self.append_record(PageRef::DESCRIPTOR, &payload)?;
            }
            self.descriptor_dirty = false;
        }
        Ok(())
    }
}

impl<K, V> PageProvider<K, V> for StreamPageProvider<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    fn features(&self) -> Features {
        self.features
    }

    fn is_initialized(&self) -> bool {
        self.inner.lock().descriptor.is_some()
    }

    fn initialize(&mut self, descriptor: &DescriptorPage) -> Result<()> {
        let inner = self.inner.get_mut();
        if inner.descriptor.is_some() {
            return Err(IndexError::Configuration(
                "provider already initialized".into(),
            ));
        }
        inner.descriptor = Some(descriptor.clone());
        inner.descriptor_dirty = true;
        Ok(())
    }

    fn load_descriptor(&self) -> Result<Option<DescriptorPage>> {
        Ok(self.inner.lock().descriptor.clone())
    }

    fn store_descriptor(&mut self, descriptor: &DescriptorPage) -> Result<()> {
        let inner = self.inner.get_mut();
        inner.descriptor = Some(descriptor.clone());
        inner.descriptor_dirty = true;
        Ok(())
    }

    fn allocate(&mut self, node: PageNode<K, V>) -> Result<PageRef> {
        let inner = self.inner.get_mut();
        let page = PageRef(inner.next_ref);
        inner.next_ref += 1;
        inner.insert_cached(page, CachedPage { node, dirty: true })?;
        Ok(page)
    }

    fn with_page<R>(&self, page: PageRef, f: impl FnOnce(&PageNode<K, V>) -> Result<R>) -> Result<R> {
        let mut inner = self.inner.lock();
        inner.ensure_cached(page)?;
        let cached = inner.cache.get(&page).expect("page just cached");
        f(&cached.node)
    }

    fn with_page_mut<R>(
        &mut self,
        page: PageRef,
        f: impl FnOnce(&mut PageNode<K, V>) -> Result<R>,
    ) -> Result<R> {
        let inner = self.inner.get_mut();
        inner.ensure_cached(page)?;
        let cached = inner.cache.get_mut(&page).expect("page just cached");
        cached.dirty = true;
        f(&mut cached.node)
    }

    fn free(&mut self, page: PageRef) -> Result<()> {
        let inner = self.inner.get_mut();
        inner.cache.pop(&page);
        if inner.directory.contains_key(&page) {
            inner.append_tombstone(page)?;
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        let inner = self.inner.get_mut();
        inner.cache.clear();
        inner.directory.clear();
        inner.descriptor = None;
        inner.descriptor_dirty = false;
        inner.file.set_len(0)?;
        inner.tail = 0;
        debug!("cleared page stream");
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let inner = self.inner.get_mut();
        inner.write_back_dirty()?;
        inner.file.sync_data()?;
        Ok(())
    }
}

impl<K, V> Drop for StreamPageProvider<K, V> {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        // Backstop only: callers that care about durability flush (or
        // dispose) explicitly and see the error.
        let inner = self.inner.get_mut();
        if inner.cache.iter().any(|(_, c)| c.dirty) || inner.descriptor_dirty {
            warn!(
                path = %self.path.display(),
                "page stream dropped with unflushed pages; data since last flush may be lost"
            );
        }
        if let Err(err) = inner.file.sync_data() {
            warn!(path = %self.path.display(), error = %err, "sync on drop failed");
        }
    }
}

// Rebuilds the page directory from the log, dropping a torn tail.
#[allow(clippy::type_complexity)]
fn recover(
    file: &mut File,
) -> Result<(
    FxHashMap<PageRef, RecordLocation>,
    Option<DescriptorPage>,
    u64,
    u64,
)> {
    let file_len = file.metadata()?.len();
    let mut directory = FxHashMap::default();
    let mut descriptor_location = None;
    let mut next_ref = PageRef::DESCRIPTOR.0 + 1;
    let mut offset = 0u64;

    while offset + RECORD_HEADER_LEN <= file_len {
        file.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; RECORD_HEADER_LEN as usize];
        file.read_exact(&mut header)?;
        let page = PageRef(u64::from_le_bytes(header[0..8].try_into().expect("8 bytes")));
        let len = u32::from_le_bytes(header[8..12].try_into().expect("4 bytes"));
        let crc = u32::from_le_bytes(header[12..16].try_into().expect("4 bytes"));

        if len == TOMBSTONE_LEN {
            directory.remove(&page);
            if page == PageRef::DESCRIPTOR {
                descriptor_location = None;
            }
            offset += RECORD_HEADER_LEN;
            continue;
        }
        let payload_end = offset + RECORD_HEADER_LEN + len as u64;
        if payload_end > file_len {
            break;
        }
        let location = RecordLocation {
            payload_offset: offset + RECORD_HEADER_LEN,
            len,
            crc,
        };
        if page == PageRef::DESCRIPTOR {
            descriptor_location = Some(location);
        } else {
            directory.insert(page, location);
            next_ref = next_ref.max(page.0 + 1);
        }
        offset = payload_end;
    }
    if offset < file_len {
        warn!(offset, "truncated page record; discarding log tail");
        file.set_len(offset)?;
    }
    let tail = offset;

    let descriptor = match descriptor_location {
        Some(location) => {
            let mut payload = vec![0u8; location.len as usize];
            file.seek(SeekFrom::Start(location.payload_offset))?;
            file.read_exact(&mut payload)?;
            if crc32fast::hash(&payload) != location.crc {
                return Err(IndexError::Corruption("descriptor record checksum mismatch"));
            }
            Some(serde_json::from_slice(&payload)?)
        }
        None => None,
    };

    Ok((directory, descriptor, tail, next_ref))
}
