//! Truth-matched efficiency curves.
//!
//! The denominator is the set of truth particles passing [`AcceptanceCuts`].
//! A particle enters the numerator when it is in the denominator and has a
//! hit, a double-layer hit pair, or a passing doublet in the target region,
//! with every hit involved passing [`HitQuality`].
#![allow(clippy::cast_precision_loss, clippy::module_name_repetitions)]

use std::collections::{HashMap, HashSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use tracklet_core::{
    BoundsStatus, DecodedHit, Error, LayerHalf, ParticleKey, ParticleTable, Result, TruthParticle,
};

use crate::doublet::DoubletTable;

/// Truth quantity an efficiency curve is binned in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Kinematic {
    Pt,
    P,
    Eta,
    Theta,
    Phi,
    VertexR,
}

impl Kinematic {
    pub const ALL: [Self; 6] = [
        Self::Pt,
        Self::P,
        Self::Eta,
        Self::Theta,
        Self::Phi,
        Self::VertexR,
    ];

    #[must_use]
    pub fn value(self, particle: &TruthParticle) -> f64 {
        match self {
            Self::Pt => particle.pt(),
            Self::P => particle.p(),
            Self::Eta => particle.eta(),
            Self::Theta => particle.theta(),
            Self::Phi => particle.phi(),
            Self::VertexR => particle.vertex_r(),
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Pt => "pt",
            Self::P => "p",
            Self::Eta => "eta",
            Self::Theta => "theta",
            Self::Phi => "phi",
            Self::VertexR => "vertex_r",
        }
    }

    /// Parse a name as returned by [`Self::name`].
    ///
    /// # Errors
    /// Returns `ConfigError` for unknown names.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == name)
            .ok_or_else(|| Error::config(format!("unknown kinematic variable {name:?}")))
    }
}

/// Open interval with optional ends: values on a set end lie outside.
/// NaN never lies inside.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Window {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Window {
    #[must_use]
    pub const fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub const fn between(min: f64, max: f64) -> Self {
        Self::new(Some(min), Some(max))
    }

    /// True if neither end is set.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        self.min.is_none_or(|m| value > m) && self.max.is_none_or(|m| value < m)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if let (Some(lo), Some(hi)) = (self.min, self.max) {
            if lo.is_nan() || hi.is_nan() || lo >= hi {
                return Err(Error::config(format!("{name} window [{lo}, {hi}] is empty")));
            }
        }
        Ok(())
    }
}

/// Denominator selection on truth particles.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AcceptanceCuts {
    /// Accepted `|pdg|` codes; all when unset.
    pub pdg: Option<Vec<i32>>,
    pub require_charged: bool,
    pub min_pt: Option<f64>,
    pub max_vertex_r: Option<f64>,
    pub max_vertex_z: Option<f64>,
    pub min_endpoint_r: Option<f64>,
    pub max_abs_eta: Option<f64>,
}

impl AcceptanceCuts {
    #[must_use]
    pub fn accepts(&self, particle: &TruthParticle) -> bool {
        if let Some(codes) = &self.pdg {
            if !codes.iter().any(|c| c.abs() == particle.pdg.abs()) {
                return false;
            }
        }
        if self.require_charged && particle.charge == 0.0 {
            return false;
        }
        let below = |value: f64, limit: Option<f64>| limit.is_none_or(|l| value <= l);
        let above = |value: f64, limit: Option<f64>| limit.is_none_or(|l| value >= l);

        above(particle.pt(), self.min_pt)
            && below(particle.vertex_r(), self.max_vertex_r)
            && below(particle.vertex[2].abs(), self.max_vertex_z)
            && above(particle.endpoint_r(), self.min_endpoint_r)
            && below(particle.eta().abs(), self.max_abs_eta)
    }
}

/// Numerator predicate on individual hits.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitQuality {
    /// Window on the propagation-corrected time (ns).
    pub time: Window,
    /// Window on the cosine between hit position and hit momentum.
    pub costheta: Window,
    /// Window on hit momentum over particle momentum.
    pub momentum_fraction: Window,
    /// Accepted surface bounds statuses; all when unset.
    pub bounds: Option<Vec<BoundsStatus>>,
}

impl HitQuality {
    /// Check that every window is non-empty.
    ///
    /// # Errors
    /// Returns `ConfigError` for a window with `min >= max`.
    pub fn validate(&self) -> Result<()> {
        self.time.validate("time")?;
        self.costheta.validate("costheta")?;
        self.momentum_fraction.validate("momentum fraction")
    }

    /// Hits without momentum fail any configured momentum window.
    #[must_use]
    pub fn accepts(&self, hit: &DecodedHit, particle: &TruthParticle) -> bool {
        if !self.time.contains(hit.t_corrected) {
            return false;
        }
        if let Some(statuses) = &self.bounds {
            if !statuses.contains(&hit.bounds) {
                return false;
            }
        }
        if self.costheta.is_open() && self.momentum_fraction.is_open() {
            return true;
        }
        let Some(momentum) = hit.momentum else {
            return false;
        };
        self.costheta.contains(momentum.costheta)
            && self.momentum_fraction.contains(momentum.p / particle.p())
    }
}

/// What a particle needs in the target region to count as found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Numerator {
    /// A hit on one physical layer.
    Hit { system: u32, layer: u32 },
    /// Hits on both halves of a double layer in the same module and sensor.
    DoubleLayer { system: u32, double_layer: u32 },
    /// A doublet passing every cut whose two hits belong to the particle.
    Doublets { system: u32, double_layer: u32 },
}

/// Bin edges with numpy-style semantics: bins are half-open except the last,
/// which includes its upper edge.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Binning {
    edges: Vec<f64>,
}

impl Binning {
    /// `bins` equal-width bins spanning `[lo, hi]`.
    ///
    /// # Errors
    /// Returns `ConfigError` if `bins` is zero or the range is empty.
    pub fn uniform(lo: f64, hi: f64, bins: usize) -> Result<Self> {
        if bins == 0 {
            return Err(Error::config("binning needs at least one bin"));
        }
        let width = (hi - lo) / bins as f64;
        let edges = (0..=bins)
            .map(|i| if i == bins { hi } else { lo + width * i as f64 })
            .collect();
        Self::from_edges(edges)
    }

    /// Explicit edges.
    ///
    /// # Errors
    /// Returns `ConfigError` unless there are at least two finite, strictly
    /// increasing edges.
    pub fn from_edges(edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::config("binning needs at least two edges"));
        }
        if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::config(format!(
                "bin edges must be finite and strictly increasing: {edges:?}"
            )));
        }
        Ok(Self { edges })
    }

    #[must_use]
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    #[must_use]
    pub fn bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Bin holding `value`, or `None` when outside the edges or NaN.
    #[must_use]
    pub fn find(&self, value: f64) -> Option<usize> {
        let (first, last) = (self.edges[0], self.edges[self.bins()]);
        if value.is_nan() || value < first || value > last {
            return None;
        }
        if value == last {
            return Some(self.bins() - 1);
        }
        Some(self.edges.partition_point(|&e| e <= value) - 1)
    }
}

/// Per-bin counts and ratio.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EfficiencyCurve {
    pub kinematic: Kinematic,
    pub edges: Vec<f64>,
    pub denominator: Vec<u64>,
    pub numerator: Vec<u64>,
    /// `numerator / denominator`, 0 where the denominator is empty.
    pub efficiency: Vec<f64>,
}

impl EfficiencyCurve {
    #[must_use]
    pub fn bin_centers(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
    }

    /// Overall efficiency across all bins.
    #[must_use]
    pub fn integrated(&self) -> f64 {
        let den: u64 = self.denominator.iter().sum();
        let num: u64 = self.numerator.iter().sum();
        if den == 0 {
            0.0
        } else {
            num as f64 / den as f64
        }
    }
}

/// Computes efficiency curves for one numerator definition.
#[derive(Clone, Debug)]
pub struct EfficiencyEvaluator {
    acceptance: AcceptanceCuts,
    quality: HitQuality,
    numerator: Numerator,
}

impl EfficiencyEvaluator {
    /// # Errors
    /// Returns `ConfigError` if a hit-quality window is empty.
    pub fn new(acceptance: AcceptanceCuts, quality: HitQuality, numerator: Numerator) -> Result<Self> {
        quality.validate()?;
        Ok(Self {
            acceptance,
            quality,
            numerator,
        })
    }

    #[must_use]
    pub fn numerator(&self) -> Numerator {
        self.numerator
    }

    /// Keys of accepted particles.
    #[must_use]
    pub fn denominator(&self, particles: &ParticleTable) -> HashSet<ParticleKey> {
        particles
            .as_slice()
            .iter()
            .filter(|p| self.acceptance.accepts(p))
            .map(|p| p.key)
            .collect()
    }

    fn quality_ok(&self, hit: &DecodedHit, particles: &ParticleTable) -> Option<ParticleKey> {
        let truth = particles.for_hit(hit.file, hit.event, hit.particle)?;
        self.quality.accepts(hit, truth).then_some(truth.key)
    }

    /// Keys of denominator particles satisfying the numerator.
    ///
    /// # Errors
    /// Returns `ConfigError` if the numerator needs doublets and none are
    /// given.
    pub fn found(
        &self,
        particles: &ParticleTable,
        hits: &[DecodedHit],
        doublets: Option<&DoubletTable>,
    ) -> Result<HashSet<ParticleKey>> {
        let denominator = self.denominator(particles);
        let mut found = HashSet::new();

        match self.numerator {
            Numerator::Hit { system, layer } => {
                for hit in hits {
                    if hit.cell.system != system || hit.cell.layer != layer {
                        continue;
                    }
                    if let Some(key) = self.quality_ok(hit, particles) {
                        found.insert(key);
                    }
                }
            }
            Numerator::DoubleLayer {
                system,
                double_layer,
            } => {
                let mut halves: HashMap<(ParticleKey, u32, u32), [bool; 2]> = HashMap::new();
                for hit in hits {
                    if hit.cell.system != system || hit.double_layer() != double_layer {
                        continue;
                    }
                    if let Some(key) = self.quality_ok(hit, particles) {
                        let seen = halves
                            .entry((key, hit.cell.module, hit.cell.sensor))
                            .or_default();
                        seen[usize::from(hit.half() == LayerHalf::Upper)] = true;
                    }
                }
                found.extend(
                    halves
                        .into_iter()
                        .filter(|(_, seen)| seen[0] && seen[1])
                        .map(|((key, _, _), _)| key),
                );
            }
            Numerator::Doublets {
                system,
                double_layer,
            } => {
                let table = doublets.ok_or_else(|| {
                    Error::config("doublet efficiency requires a doublet table")
                })?;
                for doublet in &table.doublets {
                    if doublet.key.system != system
                        || doublet.key.double_layer != double_layer
                        || !doublet.cuts.all()
                        || doublet.common_particle().is_none()
                    {
                        continue;
                    }
                    let (Some(lower), Some(upper)) = (
                        hits.get(doublet.lower.index),
                        hits.get(doublet.upper.index),
                    ) else {
                        continue;
                    };
                    if let (Some(a), Some(b)) = (
                        self.quality_ok(lower, particles),
                        self.quality_ok(upper, particles),
                    ) {
                        if a == b {
                            found.insert(a);
                        }
                    }
                }
            }
        }

        found.retain(|key| denominator.contains(key));
        Ok(found)
    }

    /// Bin denominator and numerator particles in one kinematic variable.
    ///
    /// # Errors
    /// See [`Self::found`].
    pub fn evaluate(
        &self,
        particles: &ParticleTable,
        hits: &[DecodedHit],
        doublets: Option<&DoubletTable>,
        kinematic: Kinematic,
        binning: &Binning,
    ) -> Result<EfficiencyCurve> {
        let found = self.found(particles, hits, doublets)?;
        let mut denominator = vec![0u64; binning.bins()];
        let mut numerator = vec![0u64; binning.bins()];

        for particle in particles.as_slice() {
            if !self.acceptance.accepts(particle) {
                continue;
            }
            let Some(bin) = binning.find(kinematic.value(particle)) else {
                continue;
            };
            denominator[bin] += 1;
            if found.contains(&particle.key) {
                numerator[bin] += 1;
            }
        }

        let efficiency = numerator
            .iter()
            .zip(&denominator)
            .map(|(&n, &d)| if d == 0 { 0.0 } else { n as f64 / d as f64 })
            .collect();
        let curve = EfficiencyCurve {
            kinematic,
            edges: binning.edges().to_vec(),
            denominator,
            numerator,
            efficiency,
        };
        log::info!(
            "Efficiency vs {} for {:?}: {:.4}",
            kinematic.name(),
            self.numerator,
            curve.integrated()
        );
        Ok(curve)
    }
}
