//! Surface geometry predicate supplied by the caller.
//!
//! The tracker surfaces are owned by an external geometry service. The
//! pipeline only needs two answers per hit: whether the position lies inside
//! the bounds of the surface addressed by its cell ID, and how far it is from
//! that surface.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Result of a bounds check against the surface a hit was recorded on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BoundsStatus {
    /// Position lies outside the surface bounds.
    Outside,
    /// Position lies inside the surface bounds.
    Inside,
    /// No geometry was available to decide.
    #[default]
    Undefined,
}

impl BoundsStatus {
    /// Statuses in reporting order.
    pub const ALL: [Self; 3] = [Self::Outside, Self::Inside, Self::Undefined];

    /// Short label used in tables and logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Outside => "outside",
            Self::Inside => "inside",
            Self::Undefined => "undefined",
        }
    }
}

/// Surface lookups for one detector description.
///
/// Implementations are built once per worker and borrowed by every hit
/// conversion on that worker.
pub trait SurfaceGeometry {
    /// Checks the position (mm) against the surface addressed by `cell_id`.
    fn bounds(&self, system: u32, cell_id: u64, position: [f64; 3]) -> BoundsStatus;

    /// Distance (mm) from the position to the surface, or a negative value
    /// when unknown.
    fn distance(&self, system: u32, cell_id: u64, position: [f64; 3]) -> f64;
}

/// Geometry used when no detector description is loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeometry;

impl SurfaceGeometry for NoGeometry {
    fn bounds(&self, _system: u32, _cell_id: u64, _position: [f64; 3]) -> BoundsStatus {
        BoundsStatus::Undefined
    }

    fn distance(&self, _system: u32, _cell_id: u64, _position: [f64; 3]) -> f64 {
        -1.0
    }
}

/// Per-status hit counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoundsTally {
    pub outside: usize,
    pub inside: usize,
    pub undefined: usize,
}

impl BoundsTally {
    /// Counts one status.
    pub fn record(&mut self, status: BoundsStatus) {
        match status {
            BoundsStatus::Outside => self.outside += 1,
            BoundsStatus::Inside => self.inside += 1,
            BoundsStatus::Undefined => self.undefined += 1,
        }
    }

    /// Returns the count for one status.
    #[must_use]
    pub const fn get(&self, status: BoundsStatus) -> usize {
        match status {
            BoundsStatus::Outside => self.outside,
            BoundsStatus::Inside => self.inside,
            BoundsStatus::Undefined => self.undefined,
        }
    }

    /// Adds another tally into this one.
    pub fn merge(&mut self, other: &Self) {
        self.outside += other.outside;
        self.inside += other.inside;
        self.undefined += other.undefined;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_geometry() {
        let geo = NoGeometry;
        assert_eq!(geo.bounds(3, 0, [1.0, 2.0, 3.0]), BoundsStatus::Undefined);
        assert!(geo.distance(3, 0, [1.0, 2.0, 3.0]) < 0.0);
    }

    #[test]
    fn test_tally() {
        let mut tally = BoundsTally::default();
        tally.record(BoundsStatus::Inside);
        tally.record(BoundsStatus::Inside);
        tally.record(BoundsStatus::Outside);

        let mut total = BoundsTally::default();
        total.merge(&tally);
        total.merge(&tally);
        assert_eq!(total.get(BoundsStatus::Inside), 4);
        assert_eq!(total.get(BoundsStatus::Outside), 2);
        assert_eq!(total.get(BoundsStatus::Undefined), 0);
    }
}
