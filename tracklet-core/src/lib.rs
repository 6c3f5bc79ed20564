//! tracklet-core: Core types for layered tracker hit processing.
//!
//! This crate provides the hit and truth-particle records, the packed
//! cell ID codec, detector system codes, the surface-geometry predicate
//! seam, and the error taxonomy shared by the rest of the workspace.
//!

pub mod cellid;
pub mod detector;
pub mod error;
pub mod geometry;
pub mod hit;
pub mod particle;
pub mod soa;

pub use cellid::{BitField, CellId, CellIdLayout, LayerHalf};
pub use detector::DetectorSystem;
pub use error::{DecodeError, Error, Result};
pub use geometry::{BoundsStatus, BoundsTally, NoGeometry, SurfaceGeometry};
pub use hit::{decode_hit, decode_hits, DecodeSummary, DecodedHit, HitMomentum, SimHit};
pub use particle::{ParticleKey, ParticleTable, TruthParticle};
pub use soa::HitColumns;
