//! Probabilistic membership filter gating point lookups.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

// Fixed keys so persisted filters hash identically after reopen.
const SEED_A: (u64, u64) = (0x6f72_6465_785f_626c, 0x6f6f_6d5f_6861_7368);
const SEED_B: (u64, u64) = (0x9e37_79b9_7f4a_7c15, 0x2545_f491_4f6c_dd1d);

/// Bloom filter over keys: no false negatives, bounded false positives.
///
/// A negative answer is authoritative and short-circuits the descent; a
/// positive answer only means "descend and check". Membership grows
/// monotonically — removals leave the filter untouched — and only
/// [`BloomFilter::clear`] resets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomFilter {
    bits: Vec<u64>,
    n_bits: u64,
    n_hashes: u32,
}

impl BloomFilter {
    /// Sizes the filter for `expected` keys at roughly `fp_rate` false
    /// positives, using the standard `m = -n·ln(p)/ln(2)²` sizing.
    pub fn with_capacity(expected: usize, fp_rate: f64) -> Self {
        let n = expected.max(1) as f64;
        let p = fp_rate.clamp(1e-9, 0.5);
        let m = (-(n * p.ln()) / (2f64.ln().powi(2))).ceil().max(64.0) as u64;
        let k = ((m as f64 / n) * 2f64.ln()).round().clamp(1.0, 16.0) as u32;
        Self {
            bits: vec![0; m.div_ceil(64) as usize],
            n_bits: m,
            n_hashes: k,
        }
    }

    /// Records a key.
    pub fn insert<T: Hash + ?Sized>(&mut self, key: &T) {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.n_hashes {
            let bit = self.bit_index(h1, h2, i);
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
    }

    /// Whether the key may have been recorded. `false` is authoritative.
    pub fn may_contain<T: Hash + ?Sized>(&self, key: &T) -> bool {
        let (h1, h2) = hash_pair(key);
        (0..self.n_hashes).all(|i| {
            let bit = self.bit_index(h1, h2, i);
            self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0
        })
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.bits.fill(0);
    }

    // Double hashing: bit_i = h1 + i·h2 mod m.
    fn bit_index(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.n_bits
    }
}

fn hash_pair<T: Hash + ?Sized>(key: &T) -> (u64, u64) {
    let mut a = SipHasher13::new_with_keys(SEED_A.0, SEED_A.1);
    key.hash(&mut a);
    let mut b = SipHasher13::new_with_keys(SEED_B.0, SEED_B.1);
    key.hash(&mut b);
    // An h2 of zero would degrade double hashing to one probe.
    (a.finish(), b.finish() | 1)
}
