//! tracklet-algorithms: Segment seeding and connectivity for layered trackers.
//!
//! This crate provides the stages that run on decoded hits:
//! - **Doublets** - lower x upper pairing per double layer with rz/xy cuts
//! - **Module map** - truth-driven module-to-module transition graph
//! - **Efficiency** - truth-matched efficiency curves over kinematic bins
//!

pub mod doublet;
pub mod efficiency;
pub mod grouping;
pub mod module_map;

pub use doublet::{
    chord_angle, intercept_rz, transverse_impact, CutFlags, Cutflow, Doublet, DoubletBuilder,
    DoubletConfig, DoubletCuts, DoubletTable, Granularity, GroupKey, HitRef, SegmentEnd,
};
pub use efficiency::{
    AcceptanceCuts, Binning, EfficiencyCurve, EfficiencyEvaluator, HitQuality, Kinematic,
    Numerator, Window,
};
pub use grouping::GroupIndex;
pub use module_map::{
    ModuleEdge, ModuleGraphBuilder, ModuleKey, ModuleMap, ModuleMapConfig, PruneRule,
    TransitionRule, TransitionStats, TransitionTable,
};
