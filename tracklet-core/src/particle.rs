//! Truth particle records.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifies a truth particle within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParticleKey {
    pub file: u32,
    pub event: u32,
    pub index: u32,
}

impl ParticleKey {
    #[inline]
    #[must_use]
    pub const fn new(file: u32, event: u32, index: u32) -> Self {
        Self { file, event, index }
    }
}

/// One generated particle.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TruthParticle {
    pub key: ParticleKey,
    /// Momentum (GeV).
    pub momentum: [f64; 3],
    /// Mass (GeV).
    pub mass: f64,
    /// Charge (e).
    pub charge: f64,
    /// PDG particle code.
    pub pdg: i32,
    /// Production vertex (mm).
    pub vertex: [f64; 3],
    /// Decay or exit point (mm).
    pub endpoint: [f64; 3],
}

impl TruthParticle {
    /// Momentum magnitude.
    #[must_use]
    pub fn p(&self) -> f64 {
        let [px, py, pz] = self.momentum;
        px.hypot(py).hypot(pz)
    }

    /// Transverse momentum.
    #[must_use]
    pub fn pt(&self) -> f64 {
        self.momentum[0].hypot(self.momentum[1])
    }

    /// Polar angle of the momentum.
    #[must_use]
    pub fn theta(&self) -> f64 {
        self.pt().atan2(self.momentum[2])
    }

    /// Pseudorapidity.
    #[must_use]
    pub fn eta(&self) -> f64 {
        -(self.theta() / 2.0).tan().ln()
    }

    /// Azimuth of the momentum.
    #[must_use]
    pub fn phi(&self) -> f64 {
        self.momentum[1].atan2(self.momentum[0])
    }

    /// Charge over transverse momentum.
    #[must_use]
    pub fn q_over_pt(&self) -> f64 {
        self.charge / self.pt()
    }

    /// Transverse distance of the production vertex from the beam line.
    #[must_use]
    pub fn vertex_r(&self) -> f64 {
        self.vertex[0].hypot(self.vertex[1])
    }

    /// Transverse distance of the endpoint from the beam line.
    #[must_use]
    pub fn endpoint_r(&self) -> f64 {
        self.endpoint[0].hypot(self.endpoint[1])
    }
}

/// Read-only index of truth particles by key.
#[derive(Debug, Clone, Default)]
pub struct ParticleTable {
    particles: Vec<TruthParticle>,
    index: HashMap<ParticleKey, usize>,
}

impl ParticleTable {
    /// Builds the index. Later duplicates of a key shadow earlier ones.
    #[must_use]
    pub fn new(particles: Vec<TruthParticle>) -> Self {
        let index = particles
            .iter()
            .enumerate()
            .map(|(i, particle)| (particle.key, i))
            .collect();
        Self { particles, index }
    }

    /// Looks up a particle.
    #[must_use]
    pub fn get(&self, key: &ParticleKey) -> Option<&TruthParticle> {
        self.index.get(key).map(|&i| &self.particles[i])
    }

    /// Looks up the particle that produced a hit.
    #[must_use]
    pub fn for_hit(&self, file: u32, event: u32, particle: Option<u32>) -> Option<&TruthParticle> {
        particle.and_then(|index| self.get(&ParticleKey::new(file, event, index)))
    }

    /// All particles in insertion order.
    #[must_use]
    pub fn as_slice(&self) -> &[TruthParticle] {
        &self.particles
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
}
