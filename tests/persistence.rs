//! Persisted index lifecycle: flush, reopen, clear.

use std::sync::Arc;

use tempfile::TempDir;

use ordex::index::factory;
use ordex::measure::{MeasureSet, COUNT};
use ordex::{IndexConfig, IndexOptions, OrderedIndex, Range};

type Item = (u32, String);

fn config(dir: &TempDir) -> IndexConfig<u32, Item> {
    IndexConfig::new(
        Arc::new(|item: &Item| item.0),
        ordex::algebra::ord_compare(),
    )
    .with_options(IndexOptions {
        page_size: 4,
        cache_pages: 8,
        ..IndexOptions::default()
    })
    .with_measures(MeasureSet::new().ensure_defaults())
    .with_location(dir.path().join("index.odx"))
}

#[test]
fn contents_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let mut idx = factory::create_unique_persistent(config(&dir)).unwrap();
        for key in [8u32, 2, 6, 4, 0] {
            idx.add((key, format!("v{key}"))).unwrap();
        }
        idx.flush().unwrap();
    }

    let idx = factory::create_unique_persistent(config(&dir)).unwrap();
    assert_eq!(idx.len(), 5);
    assert_eq!(idx.get(&6).unwrap(), Some((6, "v6".to_string())));
    assert_eq!(idx.measure(COUNT).unwrap(), 5);
    let keys: Vec<u32> = idx
        .reader(&Range::full())
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(keys, vec![0, 2, 4, 6, 8]);
}

#[test]
fn mutations_after_reopen_keep_working() {
    let dir = TempDir::new().unwrap();
    {
        let mut idx = factory::create_unique_persistent(config(&dir)).unwrap();
        for key in 0u32..64 {
            idx.add((key, "first".to_string())).unwrap();
        }
        idx.flush().unwrap();
    }
    {
        let mut idx = factory::create_unique_persistent(config(&dir)).unwrap();
        for key in (0u32..64).step_by(2) {
            assert!(idx.remove_key(&key).unwrap(), "key {key}");
        }
        for key in 64u32..80 {
            idx.add((key, "second".to_string())).unwrap();
        }
        idx.flush().unwrap();
    }

    let idx = factory::create_unique_persistent(config(&dir)).unwrap();
    assert_eq!(idx.len(), 48);
    assert_eq!(idx.get(&2).unwrap(), None);
    assert_eq!(idx.get(&70).unwrap(), Some((70, "second".to_string())));
}

#[test]
fn clear_wipes_the_backing_log() {
    let dir = TempDir::new().unwrap();
    {
        let mut idx = factory::create_unique_persistent(config(&dir)).unwrap();
        for key in 0u32..32 {
            idx.add((key, "v".to_string())).unwrap();
        }
        idx.clear().unwrap();
        idx.add((99, "survivor".to_string())).unwrap();
        idx.flush().unwrap();
    }

    let idx = factory::create_unique_persistent(config(&dir)).unwrap();
    assert_eq!(idx.len(), 1);
    assert_eq!(idx.get(&99).unwrap(), Some((99, "survivor".to_string())));
    assert_eq!(idx.get(&5).unwrap(), None);
}

#[test]
fn unflushed_changes_are_not_promised() {
    let dir = TempDir::new().unwrap();
    {
        let mut idx = factory::create_unique_persistent(config(&dir)).unwrap();
        idx.add((1, "flushed".to_string())).unwrap();
        idx.flush().unwrap();
        idx.add((2, "not flushed".to_string())).unwrap();
        // Dropped without a flush: entry 2 may or may not have hit the log
        // (cache eviction can write it); only entry 1 is guaranteed.
    }
    let idx = factory::create_unique_persistent(config(&dir)).unwrap();
    assert_eq!(idx.get(&1).unwrap(), Some((1, "flushed".to_string())));
}
