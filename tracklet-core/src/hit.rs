//! Simulated tracker hits and their decoded form.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::cellid::{CellId, CellIdLayout, LayerHalf};
use crate::error::DecodeError;
use crate::geometry::BoundsStatus;

/// Speed of light in mm/ns.
pub const SPEED_OF_LIGHT_MM_PER_NS: f64 = 299.792_458;

/// Lower bound applied to the hit polar angle (rad).
pub const MIN_POLAR_ANGLE: f64 = 1e-6;

/// One sensor activation as extracted by the event source.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimHit {
    /// Index of the owning input file.
    pub file: u32,
    /// Event index within the file.
    pub event: u32,
    /// Index of the truth particle that produced the hit.
    pub particle: Option<u32>,
    /// Global position (mm).
    pub position: [f64; 3],
    /// Momentum at the hit (GeV), kept for signal samples only.
    pub momentum: Option<[f64; 3]>,
    /// Deposited energy (GeV).
    pub edep: f64,
    /// Time (ns).
    pub time: f64,
    /// Path length through the sensor (mm).
    pub path_length: f64,
    /// Packed cell identifier.
    pub cell_id: u64,
    /// Bounds check against the addressed surface.
    pub bounds: BoundsStatus,
    /// Distance to the addressed surface (mm), negative when unknown.
    pub distance: f64,
}

impl SimHit {
    /// Creates a hit with the required fields; optional fields are empty.
    #[must_use]
    pub fn new(file: u32, event: u32, particle: Option<u32>, position: [f64; 3], cell_id: u64) -> Self {
        Self {
            file,
            event,
            particle,
            position,
            momentum: None,
            edep: 0.0,
            time: 0.0,
            path_length: 0.0,
            cell_id,
            bounds: BoundsStatus::Undefined,
            distance: -1.0,
        }
    }

    /// Sets the hit time.
    #[must_use]
    pub fn with_time(mut self, time: f64) -> Self {
        self.time = time;
        self
    }

    /// Sets the hit momentum.
    #[must_use]
    pub fn with_momentum(mut self, momentum: [f64; 3]) -> Self {
        self.momentum = Some(momentum);
        self
    }

    /// Sets the bounds status and surface distance.
    #[must_use]
    pub fn with_bounds(mut self, bounds: BoundsStatus, distance: f64) -> Self {
        self.bounds = bounds;
        self.distance = distance;
        self
    }
}

/// Momentum-derived quantities of a signal hit.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitMomentum {
    /// Momentum magnitude (GeV).
    pub p: f64,
    /// Cosine of the angle between position and momentum.
    /// NaN when either vector vanishes.
    pub costheta: f64,
}

/// A hit with its cell ID decoded and kinematics derived.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecodedHit {
    pub file: u32,
    pub event: u32,
    pub particle: Option<u32>,
    pub cell: CellId,
    pub cell_id: u64,
    pub position: [f64; 3],
    /// Transverse radius `hypot(x, y)` (mm).
    pub r: f64,
    /// Raw time (ns).
    pub t: f64,
    /// Time minus the straight-line flight time from the origin (ns).
    pub t_corrected: f64,
    /// Polar angle of the position, floored at [`MIN_POLAR_ANGLE`].
    pub theta: f64,
    pub edep: f64,
    pub path_length: f64,
    pub bounds: BoundsStatus,
    pub distance: f64,
    pub momentum: Option<HitMomentum>,
}

impl DecodedHit {
    #[inline]
    #[must_use]
    pub const fn x(&self) -> f64 {
        self.position[0]
    }

    #[inline]
    #[must_use]
    pub const fn y(&self) -> f64 {
        self.position[1]
    }

    #[inline]
    #[must_use]
    pub const fn z(&self) -> f64 {
        self.position[2]
    }

    /// Double-layer index.
    #[inline]
    #[must_use]
    pub const fn double_layer(&self) -> u32 {
        self.cell.double_layer()
    }

    /// Lower/upper designation.
    #[inline]
    #[must_use]
    pub const fn half(&self) -> LayerHalf {
        self.cell.half()
    }
}

/// Decodes one hit and derives its kinematic fields.
///
/// # Errors
/// Propagates [`DecodeError`] from the cell ID layout.
pub fn decode_hit(hit: &SimHit, layout: &CellIdLayout) -> Result<DecodedHit, DecodeError> {
    let cell = layout.decode(hit.cell_id)?;
    let [x, y, z] = hit.position;
    let r = x.hypot(y);
    let distance_from_origin = r.hypot(z);

    let momentum = hit.momentum.map(|[px, py, pz]| {
        let p = px.hypot(py).hypot(pz);
        let denom = distance_from_origin * p;
        let costheta = if denom > 0.0 {
            (x * px + y * py + z * pz) / denom
        } else {
            f64::NAN
        };
        HitMomentum { p, costheta }
    });

    Ok(DecodedHit {
        file: hit.file,
        event: hit.event,
        particle: hit.particle,
        cell,
        cell_id: hit.cell_id,
        position: hit.position,
        r,
        t: hit.time,
        t_corrected: hit.time - distance_from_origin / SPEED_OF_LIGHT_MM_PER_NS,
        theta: r.atan2(z).max(MIN_POLAR_ANGLE),
        edep: hit.edep,
        path_length: hit.path_length,
        bounds: hit.bounds,
        distance: hit.distance,
        momentum,
    })
}

/// Counts from a batch decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecodeSummary {
    pub decoded: usize,
    pub failed: usize,
}

impl DecodeSummary {
    /// Adds another summary into this one.
    pub fn merge(&mut self, other: &Self) {
        self.decoded += other.decoded;
        self.failed += other.failed;
    }
}

/// Decodes a batch of hits, skipping and counting the ones that fail.
#[must_use]
pub fn decode_hits(hits: &[SimHit], layout: &CellIdLayout) -> (Vec<DecodedHit>, DecodeSummary) {
    let mut decoded = Vec::with_capacity(hits.len());
    let mut summary = DecodeSummary::default();
    for hit in hits {
        match decode_hit(hit, layout) {
            Ok(d) => {
                decoded.push(d);
                summary.decoded += 1;
            }
            Err(_) => summary.failed += 1,
        }
    }
    (decoded, summary)
}
