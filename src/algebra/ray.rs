//! Directional half-range seek origins.

use std::cmp::Ordering;

use super::{Entire, KeyCompare};

/// Scan direction through the key order.
///
/// There deliberately is no "none" variant; a direction is always definite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Toward greater keys.
    Positive,
    /// Toward lesser keys.
    Negative,
}

impl Direction {
    /// The opposite direction.
    pub fn invert(self) -> Self {
        match self {
            Direction::Positive => Direction::Negative,
            Direction::Negative => Direction::Positive,
        }
    }
}

/// "Scan from `point` in `direction`, inclusive."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ray<K> {
    /// Where the scan starts.
    pub point: Entire<K>,
    /// Which way it runs.
    pub direction: Direction,
}

impl<K> Ray<K> {
    /// Builds a ray from an endpoint and a direction.
    pub fn new(point: Entire<K>, direction: Direction) -> Self {
        Self { point, direction }
    }

    /// Ray starting at an exact key.
    pub fn at(key: K, direction: Direction) -> Self {
        Self::new(Entire::Exact(key), direction)
    }

    /// Whether `point` lies on this ray.
    pub fn contains(&self, point: &Entire<K>, cmp: &KeyCompare<K>) -> bool {
        match self.direction {
            Direction::Positive => point.compare(&self.point, cmp) != Ordering::Less,
            Direction::Negative => point.compare(&self.point, cmp) != Ordering::Greater,
        }
    }

    /// Two rays intersect iff they share a direction or one contains the
    /// other's origin.
    pub fn intersects(&self, other: &Ray<K>, cmp: &KeyCompare<K>) -> bool {
        self.direction == other.direction
            || self.contains(&other.point, cmp)
            || other.contains(&self.point, cmp)
    }
}

#[cfg(test)]
mod tests {
    use super::super::ord_compare;
    use super::*;

    #[test]
    fn ray_contains_its_origin() {
        let cmp = ord_compare::<i64>();
        let ray = Ray::at(5, Direction::Positive);
        assert!(ray.contains(&Entire::Exact(5), &cmp));
        assert!(ray.contains(&Entire::Exact(9), &cmp));
        assert!(!ray.contains(&Entire::Exact(4), &cmp));
    }

    #[test]
    fn opposed_rays_intersect_when_overlapping() {
        let cmp = ord_compare::<i64>();
        let up = Ray::at(2, Direction::Positive);
        let down = Ray::at(7, Direction::Negative);
        assert!(up.intersects(&down, &cmp));

        let away = Ray::at(1, Direction::Negative);
        assert!(!up.intersects(&away, &cmp));
        assert!(up.intersects(&Ray::at(9, Direction::Positive), &cmp));
    }
}
