//! Doublet building.
//!
//! Hits are grouped by event and double layer (optionally also by module
//! and sensor). Within each group every lower-layer hit is paired with every
//! upper-layer hit, two discriminants are computed per pair, and the pairs
//! are filtered by configurable cuts:
//!
//! - `intercept_rz`: z-intercept of the r-z line through both hits
//! - `dr`: distance of closest approach of the x-y line to the origin
//! - `dphi` (optional): chord direction minus midpoint azimuth
//!
//! Both vanish for a straight track from the origin.
#![allow(
    clippy::cast_precision_loss,
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::missing_errors_doc
)]

use std::f64::consts::{PI, TAU};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use tracklet_core::{DecodedHit, Error, HitColumns, LayerHalf, Result};

use crate::grouping::GroupIndex;

/// How finely hits are grouped before pairing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Granularity {
    /// (file, event, system, double layer).
    #[default]
    Coarse,
    /// (file, event, system, double layer, module, sensor).
    Fine,
}

/// Key shared by all hits of one pairing group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GroupKey {
    pub file: u32,
    pub event: u32,
    pub system: u32,
    pub double_layer: u32,
    /// Set for [`Granularity::Fine`] only.
    pub module: Option<u32>,
    /// Set for [`Granularity::Fine`] only.
    pub sensor: Option<u32>,
}

impl GroupKey {
    /// Key of a hit at the given granularity.
    #[must_use]
    pub fn of(hit: &DecodedHit, granularity: Granularity) -> Self {
        let fine = granularity == Granularity::Fine;
        Self {
            file: hit.file,
            event: hit.event,
            system: hit.cell.system,
            double_layer: hit.double_layer(),
            module: fine.then_some(hit.cell.module),
            sensor: fine.then_some(hit.cell.sensor),
        }
    }
}

/// Cut thresholds. Each applies as a strict `|value| < threshold`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DoubletCuts {
    /// Threshold on `|intercept_rz|` (mm).
    pub dz: Option<f64>,
    /// Threshold on `dr` (mm).
    pub dr: Option<f64>,
    /// Threshold on `|dphi|` (rad).
    pub dphi: Option<f64>,
}

/// Configuration for [`DoubletBuilder`].
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DoubletConfig {
    /// Keep per-hit coordinates and momentum columns in the output.
    pub propagate_signal: bool,
    /// Grouping key granularity.
    pub granularity: Granularity,
    /// Drop candidates that fail any cut. When false all candidates are kept.
    pub apply_cuts: bool,
    /// Cut thresholds.
    pub cuts: DoubletCuts,
    /// Compute the angle-based `dphi` discriminant.
    pub compute_dphi: bool,
    /// Log progress every N groups (0 = never).
    pub progress_interval: usize,
}

impl Default for DoubletConfig {
    fn default() -> Self {
        Self {
            propagate_signal: false,
            granularity: Granularity::Coarse,
            apply_cuts: false,
            cuts: DoubletCuts::default(),
            compute_dphi: false,
            progress_interval: 1000,
        }
    }
}

impl DoubletConfig {
    /// Pass-through configuration: every candidate is kept.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable cuts with the given `intercept_rz` and `dr` thresholds.
    #[must_use]
    pub fn with_cuts(mut self, dz: f64, dr: f64) -> Self {
        self.apply_cuts = true;
        self.cuts.dz = Some(dz);
        self.cuts.dr = Some(dr);
        self
    }

    /// Compute `dphi` and cut on it.
    #[must_use]
    pub fn with_dphi_cut(mut self, dphi: f64) -> Self {
        self.compute_dphi = true;
        self.cuts.dphi = Some(dphi);
        self
    }

    /// Set the grouping granularity.
    #[must_use]
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Keep coordinates and momentum columns.
    #[must_use]
    pub fn with_propagate_signal(mut self, propagate: bool) -> Self {
        self.propagate_signal = propagate;
        self
    }

    /// Keep every candidate regardless of cuts.
    #[must_use]
    pub fn pass_through(mut self) -> Self {
        self.apply_cuts = false;
        self
    }

    /// Checks that the thresholds required by the enabled cuts are present.
    pub fn validate(&self) -> Result<()> {
        if self.apply_cuts {
            if self.cuts.dz.is_none() {
                return Err(Error::config("cuts enabled but no dz threshold"));
            }
            if self.cuts.dr.is_none() {
                return Err(Error::config("cuts enabled but no dr threshold"));
            }
        }
        if self.cuts.dphi.is_some() && !self.compute_dphi {
            return Err(Error::config("dphi threshold set but dphi is not computed"));
        }
        for (name, value) in [
            ("dz", self.cuts.dz),
            ("dr", self.cuts.dr),
            ("dphi", self.cuts.dphi),
        ] {
            if let Some(v) = value {
                if v.is_nan() || v <= 0.0 {
                    return Err(Error::config(format!(
                        "{name} threshold must be positive, got {v}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// z-intercept of the r-z line through two hits.
///
/// Returns `f64::INFINITY` when both hits share the same radius.
#[inline]
#[must_use]
pub fn intercept_rz(r_lower: f64, z_lower: f64, r_upper: f64, z_upper: f64) -> f64 {
    let dr = r_upper - r_lower;
    if dr == 0.0 {
        return f64::INFINITY;
    }
    let slope = (z_upper - z_lower) / dr;
    z_lower - r_lower * slope
}

/// Distance from the origin to the x-y line through two hits.
///
/// Returns `f64::INFINITY` when both hits share the same x.
#[inline]
#[must_use]
pub fn transverse_impact(x_lower: f64, y_lower: f64, x_upper: f64, y_upper: f64) -> f64 {
    let dx = x_upper - x_lower;
    if dx == 0.0 {
        return f64::INFINITY;
    }
    let slope = (y_upper - y_lower) / dx;
    let intercept = y_lower - slope * x_lower;
    intercept.abs() / slope.mul_add(slope, 1.0).sqrt()
}

/// Chord direction minus midpoint azimuth, wrapped into (-pi, pi].
#[inline]
#[must_use]
pub fn chord_angle(x_lower: f64, y_lower: f64, x_upper: f64, y_upper: f64) -> f64 {
    let local = (y_upper - y_lower).atan2(x_upper - x_lower);
    let global = ((y_lower + y_upper) / 2.0).atan2((x_lower + x_upper) / 2.0);
    wrap_angle(local - global)
}

/// Wraps an angle into (-pi, pi].
#[inline]
#[must_use]
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

#[inline]
fn passes(value: f64, threshold: Option<f64>) -> bool {
    value.is_finite() && threshold.is_none_or(|t| value.abs() < t)
}

/// Outcome of each cut for one candidate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CutFlags {
    pub dz: bool,
    pub dr: bool,
    /// True when no `dphi` cut is configured.
    pub dphi: bool,
}

impl CutFlags {
    /// Evaluates the cuts on one set of discriminants.
    ///
    /// Non-finite discriminants fail their cut whether or not a threshold
    /// is configured.
    #[must_use]
    pub fn evaluate(cuts: &DoubletCuts, intercept_rz: f64, dr: f64, dphi: Option<f64>) -> Self {
        let dphi = match (cuts.dphi, dphi) {
            (None, _) => true,
            (Some(t), Some(v)) => passes(v, Some(t)),
            (Some(_), None) => false,
        };
        Self {
            dz: passes(intercept_rz, cuts.dz),
            dr: passes(dr, cuts.dr),
            dphi,
        }
    }

    /// All cuts pass.
    #[inline]
    #[must_use]
    pub const fn all(&self) -> bool {
        self.dz && self.dr && self.dphi
    }
}

/// Candidate counts after each selection step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Cutflow {
    /// Every lower x upper pairing.
    pub total: u64,
    /// Passing the `dr` cut.
    pub dr: u64,
    /// Passing the `intercept_rz` cut.
    pub dz: u64,
    /// Passing the `dphi` cut (equals the well-formed count when unset).
    pub dphi: u64,
    /// Passing `dr` and `intercept_rz`.
    pub dr_and_dz: u64,
    /// Passing every cut.
    pub all: u64,
    /// Pairings with a non-finite input coordinate. Never emitted.
    pub malformed: u64,
}

impl Cutflow {
    /// Counts one candidate.
    pub fn record(&mut self, flags: CutFlags) {
        self.total += 1;
        self.dr += u64::from(flags.dr);
        self.dz += u64::from(flags.dz);
        self.dphi += u64::from(flags.dphi);
        self.dr_and_dz += u64::from(flags.dr && flags.dz);
        self.all += u64::from(flags.all());
    }

    /// Counts one malformed candidate.
    pub fn record_malformed(&mut self) {
        self.total += 1;
        self.malformed += 1;
    }

    /// Adds another cutflow into this one.
    pub fn merge(&mut self, other: &Self) {
        self.total += other.total;
        self.dr += other.dr;
        self.dz += other.dz;
        self.dphi += other.dphi;
        self.dr_and_dz += other.dr_and_dz;
        self.all += other.all;
        self.malformed += other.malformed;
    }

    /// Named steps in reporting order.
    #[must_use]
    pub fn steps(&self) -> [(&'static str, u64); 7] {
        [
            ("total", self.total),
            ("dr", self.dr),
            ("dz", self.dz),
            ("dphi", self.dphi),
            ("dr_and_dz", self.dr_and_dz),
            ("all", self.all),
            ("malformed", self.malformed),
        ]
    }
}

/// Reference to one of the two hits of a doublet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitRef {
    /// Index into the hit table passed to [`DoubletBuilder::build`].
    pub index: usize,
    pub particle: Option<u32>,
    pub layer: u32,
    pub module: u32,
    pub sensor: u32,
}

impl HitRef {
    fn of(index: usize, hit: &DecodedHit) -> Self {
        Self {
            index,
            particle: hit.particle,
            layer: hit.cell.layer,
            module: hit.cell.module,
            sensor: hit.cell.sensor,
        }
    }
}

/// Coordinates of one end of a doublet, kept when signal columns propagate.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentEnd {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub r: f64,
    pub t_corrected: f64,
    pub p: Option<f64>,
    pub costheta: Option<f64>,
}

impl SegmentEnd {
    fn of(hit: &DecodedHit) -> Self {
        Self {
            x: hit.x(),
            y: hit.y(),
            z: hit.z(),
            r: hit.r,
            t_corrected: hit.t_corrected,
            p: hit.momentum.map(|m| m.p),
            costheta: hit.momentum.map(|m| m.costheta),
        }
    }
}

/// A candidate two-hit segment.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Doublet {
    pub key: GroupKey,
    pub lower: HitRef,
    pub upper: HitRef,
    /// Lower and upper end coordinates, present when signal columns propagate.
    pub ends: Option<[SegmentEnd; 2]>,
    pub intercept_rz: f64,
    pub dr: f64,
    pub dphi: Option<f64>,
    pub cuts: CutFlags,
}

impl Doublet {
    /// The truth particle shared by both hits, if any.
    #[must_use]
    pub fn common_particle(&self) -> Option<u32> {
        match (self.lower.particle, self.upper.particle) {
            (Some(a), Some(b)) if a == b => Some(a),
            _ => None,
        }
    }
}

/// Output of [`DoubletBuilder::build`].
#[derive(Clone, Debug, Default)]
pub struct DoubletTable {
    pub doublets: Vec<Doublet>,
    /// Cutflow summed over all groups.
    pub cutflow: Cutflow,
    /// Cutflow of each paired group, in key order.
    pub group_cutflows: Vec<(GroupKey, Cutflow)>,
    /// Groups with at least two hits.
    pub groups_visited: usize,
    /// Groups with fewer than two hits.
    pub groups_skipped: usize,
}

impl DoubletTable {
    #[must_use]
    pub fn len(&self) -> usize {
        self.doublets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doublets.is_empty()
    }
}

/// Scratch buffers reused across groups.
#[derive(Default)]
struct PairScratch {
    intercept_rz: Vec<f64>,
    dr: Vec<f64>,
    dphi: Vec<f64>,
}

/// Builds doublets from decoded hits.
#[derive(Clone, Debug)]
pub struct DoubletBuilder {
    config: DoubletConfig,
}

impl DoubletBuilder {
    /// Create a builder, validating the configuration.
    pub fn new(config: DoubletConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &DoubletConfig {
        &self.config
    }

    /// Pair hits within each group and apply the configured cuts.
    ///
    /// # Errors
    /// Returns [`Error::EmptyResult`] if no doublet survives.
    pub fn build(&self, hits: &[DecodedHit]) -> Result<DoubletTable> {
        let granularity = self.config.granularity;
        let groups = GroupIndex::build(hits, |hit| Some(GroupKey::of(hit, granularity)));
        let n_groups = groups.len();
        log::info!("Making doublets from {} hits in {n_groups} groups", hits.len());

        let mut table = DoubletTable::default();
        let mut scratch = PairScratch::default();

        for (i_group, (key, indices)) in groups.into_sorted().into_iter().enumerate() {
            if indices.len() < 2 {
                table.groups_skipped += 1;
                continue;
            }
            let interval = self.config.progress_interval;
            if interval > 0 && i_group % interval == 0 {
                log::debug!("Processing group {}/{n_groups} ({key:?})", i_group + 1);
            }
            table.groups_visited += 1;

            let cutflow = self.pair_group(key, hits, &indices, &mut scratch, &mut table.doublets);
            table.cutflow.merge(&cutflow);
            table.group_cutflows.push((key, cutflow));
        }

        log::info!(
            "Doublets: {} kept of {} candidates ({} malformed)",
            table.doublets.len(),
            table.cutflow.total,
            table.cutflow.malformed
        );

        if table.doublets.is_empty() {
            return Err(Error::EmptyResult {
                stage: "doublet builder",
                context: format!(
                    "{} hits, {} groups paired, {} groups skipped, {} candidates, \
                     granularity {:?}, cuts applied: {}",
                    hits.len(),
                    table.groups_visited,
                    table.groups_skipped,
                    table.cutflow.total,
                    granularity,
                    self.config.apply_cuts
                ),
            });
        }
        Ok(table)
    }

    /// Cross-joins the lower and upper hits of one group.
    fn pair_group(
        &self,
        key: GroupKey,
        hits: &[DecodedHit],
        indices: &[usize],
        scratch: &mut PairScratch,
        out: &mut Vec<Doublet>,
    ) -> Cutflow {
        let (lower_idx, upper_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| hits[i].half() == LayerHalf::Lower);
        let lower = HitColumns::gather(hits, &lower_idx);
        let upper = HitColumns::gather(hits, &upper_idx);

        let mut cutflow = Cutflow::default();
        let n_upper = upper.len();

        for i in 0..lower.len() {
            let (xl, yl, zl, rl) = (lower.x[i], lower.y[i], lower.z[i], lower.r[i]);

            // Discriminants of row i against every upper hit.
            scratch.intercept_rz.clear();
            scratch.dr.clear();
            scratch.dphi.clear();
            scratch
                .intercept_rz
                .extend((0..n_upper).map(|j| intercept_rz(rl, zl, upper.r[j], upper.z[j])));
            scratch
                .dr
                .extend((0..n_upper).map(|j| transverse_impact(xl, yl, upper.x[j], upper.y[j])));
            if self.config.compute_dphi {
                scratch
                    .dphi
                    .extend((0..n_upper).map(|j| chord_angle(xl, yl, upper.x[j], upper.y[j])));
            }

            for j in 0..n_upper {
                if !lower.is_finite(i) || !upper.is_finite(j) {
                    cutflow.record_malformed();
                    continue;
                }
                let dphi = self.config.compute_dphi.then(|| scratch.dphi[j]);
                let flags = CutFlags::evaluate(
                    &self.config.cuts,
                    scratch.intercept_rz[j],
                    scratch.dr[j],
                    dphi,
                );
                cutflow.record(flags);
                if self.config.apply_cuts && !flags.all() {
                    continue;
                }

                let (li, ui) = (lower.source[i], upper.source[j]);
                let ends = self
                    .config
                    .propagate_signal
                    .then(|| [SegmentEnd::of(&hits[li]), SegmentEnd::of(&hits[ui])]);
                out.push(Doublet {
                    key,
                    lower: HitRef::of(li, &hits[li]),
                    upper: HitRef::of(ui, &hits[ui]),
                    ends,
                    intercept_rz: scratch.intercept_rz[j],
                    dr: scratch.dr[j],
                    dphi,
                    cuts: flags,
                });
            }
        }
        cutflow
    }
}
