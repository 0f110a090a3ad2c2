//! Interval endpoints: exact keys, infinitesimally shifted keys, infinities.

use std::cmp::Ordering;

use super::KeyCompare;

/// A key tagged with an endpoint shift.
///
/// For any key `k` and a fixed comparer the total order is
/// `NegativeInfinity < Before(k) < Exact(k) < After(k) < PositiveInfinity`,
/// where `Before`/`After` denote the `k − ε` / `k + ε` infinitesimal shifts.
/// This lets the open interval `(a, b)` be written as the closed pair
/// `[After(a), Before(b)]`, so open, closed and unbounded endpoints all run
/// through the same comparison path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entire<K> {
    /// Below every key.
    NegativeInfinity,
    /// Infinitesimally below the key: `k − ε`.
    Before(K),
    /// The key itself.
    Exact(K),
    /// Infinitesimally above the key: `k + ε`.
    After(K),
    /// Above every key.
    PositiveInfinity,
}

impl<K> Entire<K> {
    /// The finite key, if this endpoint has one.
    pub fn key(&self) -> Option<&K> {
        match self {
            Entire::Before(k) | Entire::Exact(k) | Entire::After(k) => Some(k),
            _ => None,
        }
    }

    /// Whether this endpoint is one of the signed infinities.
    pub fn is_infinite(&self) -> bool {
        matches!(self, Entire::NegativeInfinity | Entire::PositiveInfinity)
    }

    /// Whether this endpoint carries an infinitesimal shift.
    pub fn is_shifted(&self) -> bool {
        matches!(self, Entire::Before(_) | Entire::After(_))
    }

    // Shift rank within one key: Before < Exact < After.
    fn shift_rank(&self) -> i8 {
        match self {
            Entire::Before(_) => -1,
            Entire::Exact(_) => 0,
            Entire::After(_) => 1,
            _ => 0,
        }
    }

    /// Total-order comparison under an explicit key comparer.
    pub fn compare(&self, other: &Entire<K>, cmp: &KeyCompare<K>) -> Ordering {
        use Entire::{NegativeInfinity, PositiveInfinity};
        match (self, other) {
            (NegativeInfinity, NegativeInfinity) | (PositiveInfinity, PositiveInfinity) => {
                Ordering::Equal
            }
            (NegativeInfinity, _) | (_, PositiveInfinity) => Ordering::Less,
            (PositiveInfinity, _) | (_, NegativeInfinity) => Ordering::Greater,
            _ => {
                let (a, b) = (self.key().expect("finite"), other.key().expect("finite"));
                cmp(a, b).then_with(|| self.shift_rank().cmp(&other.shift_rank()))
            }
        }
    }

    /// Asymmetric comparison of this endpoint against a raw key.
    ///
    /// Shifted endpoints never compare equal to a key: `Before(k)` sorts below
    /// `k`, `After(k)` above. This is the comparator seeks descend with.
    pub fn compare_to_key(&self, key: &K, cmp: &KeyCompare<K>) -> Ordering {
        match self {
            Entire::NegativeInfinity => Ordering::Less,
            Entire::PositiveInfinity => Ordering::Greater,
            Entire::Before(k) => match cmp(k, key) {
                Ordering::Equal => Ordering::Less,
                other => other,
            },
            Entire::Exact(k) => cmp(k, key),
            Entire::After(k) => match cmp(k, key) {
                Ordering::Equal => Ordering::Greater,
                other => other,
            },
        }
    }

    /// Steps just below this endpoint.
    ///
    /// `Before(k)` saturates to itself: the stepped-past boundary is not a
    /// realizable stored key, so the result stays exact over index contents.
    pub fn step_down(self) -> Entire<K> {
        match self {
            Entire::After(k) => Entire::Exact(k),
            Entire::Exact(k) => Entire::Before(k),
            other => other,
        }
    }

    /// Steps just above this endpoint; saturates on `After(k)`.
    pub fn step_up(self) -> Entire<K> {
        match self {
            Entire::Before(k) => Entire::Exact(k),
            Entire::Exact(k) => Entire::After(k),
            other => other,
        }
    }
}
