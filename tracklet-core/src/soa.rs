//! Structure of Arrays (`SoA`) types for batched geometry.
//!
//! `HitColumns` stores the coordinates of a set of hits in parallel vectors
//! rather than as an array of structs, so pairwise discriminant loops read
//! contiguous memory.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::hit::DecodedHit;

/// Coordinates of a set of hits stored in `SoA` format.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitColumns {
    /// Index of each hit in the source table.
    pub source: Vec<usize>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    /// Transverse radius.
    pub r: Vec<f64>,
}

impl HitColumns {
    /// Creates a new empty set with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            source: Vec::with_capacity(capacity),
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
            r: Vec::with_capacity(capacity),
        }
    }

    /// Gathers the listed hits from a table.
    #[must_use]
    pub fn gather(hits: &[DecodedHit], indices: &[usize]) -> Self {
        let mut columns = Self::with_capacity(indices.len());
        for &i in indices {
            columns.push(i, &hits[i]);
        }
        columns
    }

    /// Returns the number of hits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.source.len()
    }

    /// Returns true if there are no hits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Clears all columns.
    pub fn clear(&mut self) {
        self.source.clear();
        self.x.clear();
        self.y.clear();
        self.z.clear();
        self.r.clear();
    }

    /// Pushes a single hit.
    pub fn push(&mut self, source: usize, hit: &DecodedHit) {
        self.source.push(source);
        self.x.push(hit.x());
        self.y.push(hit.y());
        self.z.push(hit.z());
        self.r.push(hit.r);
    }

    /// Returns true if every coordinate of hit `i` is finite.
    #[inline]
    #[must_use]
    pub fn is_finite(&self, i: usize) -> bool {
        self.x[i].is_finite() && self.y[i].is_finite() && self.z[i].is_finite() && self.r[i].is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CellIdLayout, SimHit};

    #[test]
    fn test_gather() {
        let layout = CellIdLayout::standard();
        let hits: Vec<DecodedHit> = [[3.0, 4.0, 1.0], [6.0, 8.0, 2.0], [0.0, 1.0, f64::NAN]]
            .into_iter()
            .map(|pos| crate::decode_hit(&SimHit::new(0, 0, None, pos, 0), &layout).unwrap())
            .collect();

        let mut columns = HitColumns::gather(&hits, &[2, 1]);
        assert_eq!(columns.len(), 2);
        assert_eq!(columns.source, vec![2, 1]);
        assert!((columns.r[1] - 10.0).abs() < f64::EPSILON);
        assert!(!columns.is_finite(0));
        assert!(columns.is_finite(1));

        columns.clear();
        assert!(columns.is_empty());
    }
}
