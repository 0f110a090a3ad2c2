//! Point/range algebra: interval endpoints, ranges, rays and seek results.
//!
//! Every comparison in this module goes through an explicit comparer value so
//! search, merge and set operations share one code path regardless of how the
//! key type orders. Nothing here performs I/O.

mod entire;
mod range;
mod ray;
mod seek;

pub use entire::Entire;
pub use range::Range;
pub use ray::{Direction, Ray};
pub use seek::SeekResult;

use std::cmp::Ordering;
use std::sync::Arc;

/// Comparer over raw keys, threaded explicitly through every algebra call.
pub type KeyCompare<K> = Arc<dyn Fn(&K, &K) -> Ordering + Send + Sync>;

/// Comparer over [`Entire`] endpoints, normally derived from a [`KeyCompare`].
pub type EntireCompare<K> = Arc<dyn Fn(&Entire<K>, &Entire<K>) -> Ordering + Send + Sync>;

/// Key comparer backed by the type's `Ord` instance.
pub fn ord_compare<K: Ord + 'static>() -> KeyCompare<K> {
    Arc::new(|a, b| a.cmp(b))
}

/// Endpoint comparer derived from a key comparer.
pub fn entire_compare<K: 'static>(cmp: KeyCompare<K>) -> EntireCompare<K> {
    Arc::new(move |a, b| a.compare(b, &cmp))
}
