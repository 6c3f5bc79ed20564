//! Module connectivity graph ("module map").
//!
//! Hits are ordered along each truth trajectory, consecutive hits form
//! transitions, and transitions between modules are counted. Edges with too
//! few entries are pruned to leave a sparse graph of geometrically linked
//! module pairs.
#![allow(clippy::cast_precision_loss, clippy::module_name_repetitions)]

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use tracklet_core::{
    CellId, DecodedHit, DetectorSystem, Error, LayerHalf, ParticleTable, Result,
};

use crate::grouping::GroupIndex;

/// Which consecutive-hit transitions become edges.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TransitionRule {
    /// Source on an upper (odd) layer, destination on the next layer.
    #[default]
    DoubleLayerBoundary,
    /// Every successor.
    AnySuccessor,
}

impl TransitionRule {
    /// Whether `from -> to` is an accepted transition.
    #[must_use]
    pub const fn accepts(self, from: &CellId, to: &CellId) -> bool {
        match self {
            Self::DoubleLayerBoundary => {
                matches!(from.half(), LayerHalf::Upper) && to.layer == from.layer + 1
            }
            Self::AnySuccessor => true,
        }
    }
}

/// How the count and fraction thresholds combine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PruneRule {
    /// Keep an edge only if it meets every configured threshold.
    #[default]
    Both,
    /// Keep an edge if it meets any configured threshold.
    Either,
}

/// Configuration for [`ModuleGraphBuilder`].
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModuleMapConfig {
    /// Minimum truth pT (GeV); transitions need strictly more.
    pub min_pt: Option<f64>,
    pub transition: TransitionRule,
    /// Minimum edge count kept by pruning.
    pub min_count: Option<u64>,
    /// Minimum fraction of the source module's outgoing count.
    pub min_fraction: Option<f64>,
    pub require: PruneRule,
    /// Only count transitions between barrel systems.
    pub barrel_only: bool,
}

impl ModuleMapConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_min_pt(mut self, min_pt: f64) -> Self {
        self.min_pt = Some(min_pt);
        self
    }

    #[must_use]
    pub fn with_min_count(mut self, min_count: u64) -> Self {
        self.min_count = Some(min_count);
        self
    }

    #[must_use]
    pub fn with_min_fraction(mut self, min_fraction: f64) -> Self {
        self.min_fraction = Some(min_fraction);
        self
    }

    #[must_use]
    pub fn with_transition(mut self, transition: TransitionRule) -> Self {
        self.transition = transition;
        self
    }

    #[must_use]
    pub fn with_prune_rule(mut self, require: PruneRule) -> Self {
        self.require = require;
        self
    }

    #[must_use]
    pub fn with_barrel_only(mut self, barrel_only: bool) -> Self {
        self.barrel_only = barrel_only;
        self
    }

    /// Check the thresholds needed for counting.
    ///
    /// # Errors
    /// Returns `ConfigError` if `min_pt` is missing or not finite.
    pub fn validate_counting(&self) -> Result<f64> {
        match self.min_pt {
            Some(pt) if pt.is_finite() => Ok(pt),
            Some(pt) => Err(Error::config(format!("min_pt must be finite, got {pt}"))),
            None => Err(Error::config("module map requires min_pt")),
        }
    }

    /// Check the thresholds needed for pruning.
    ///
    /// # Errors
    /// Returns `ConfigError` if neither threshold is set or the fraction is
    /// outside `[0, 1]`.
    pub fn validate_pruning(&self) -> Result<()> {
        if self.min_count.is_none() && self.min_fraction.is_none() {
            return Err(Error::config(
                "module map pruning requires min_count or min_fraction",
            ));
        }
        if let Some(f) = self.min_fraction {
            if !(0.0..=1.0).contains(&f) {
                return Err(Error::config(format!(
                    "min_fraction must be within [0, 1], got {f}"
                )));
            }
        }
        Ok(())
    }

    /// Full validation.
    ///
    /// # Errors
    /// See [`Self::validate_counting`] and [`Self::validate_pruning`].
    pub fn validate(&self) -> Result<()> {
        self.validate_counting()?;
        self.validate_pruning()
    }
}

/// Node of the module map: the full sensor location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModuleKey {
    pub system: u32,
    pub side: u32,
    pub layer: u32,
    pub module: u32,
    pub sensor: u32,
}

impl From<&CellId> for ModuleKey {
    fn from(cell: &CellId) -> Self {
        Self {
            system: cell.system,
            side: cell.side,
            layer: cell.layer,
            module: cell.module,
            sensor: cell.sensor,
        }
    }
}

fn in_barrel(cell: &CellId) -> Result<bool> {
    Ok(DetectorSystem::from_code(cell.system)?.is_barrel())
}

/// One directed edge between modules.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModuleEdge {
    pub source: ModuleKey,
    pub destination: ModuleKey,
    pub count: u64,
    /// `count` over the total outgoing count of `source` before pruning.
    pub fraction: f64,
}

/// Bookkeeping from [`ModuleGraphBuilder::count_transitions`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TransitionStats {
    /// Distinct (file, event, particle) trajectories.
    pub trajectories: usize,
    /// Consecutive hit pairs along all trajectories.
    pub candidates: usize,
    pub rejected_pt: usize,
    pub rejected_rule: usize,
    /// Trajectories whose particle is not in the truth table.
    pub missing_truth: usize,
    /// Transitions counted into edges.
    pub accepted: usize,
}

/// Unpruned edges in (source, destination) order.
#[derive(Clone, Debug, Default)]
pub struct TransitionTable {
    pub edges: Vec<ModuleEdge>,
    pub stats: TransitionStats,
}

impl TransitionTable {
    /// Edges leaving one module.
    pub fn outgoing(&self, source: ModuleKey) -> impl Iterator<Item = &ModuleEdge> + '_ {
        self.edges.iter().filter(move |e| e.source == source)
    }

    /// Sum of edge counts leaving one module.
    #[must_use]
    pub fn outgoing_count(&self, source: ModuleKey) -> u64 {
        self.outgoing(source).map(|e| e.count).sum()
    }
}

/// Pruned module graph.
#[derive(Clone, Debug, Default)]
pub struct ModuleMap {
    edges: Vec<ModuleEdge>,
    adjacency: BTreeMap<ModuleKey, Vec<ModuleKey>>,
}

impl ModuleMap {
    fn from_edges(mut edges: Vec<ModuleEdge>) -> Self {
        edges.sort_by_key(|e| (e.source, e.destination));
        let mut adjacency: BTreeMap<ModuleKey, Vec<ModuleKey>> = BTreeMap::new();
        for edge in &edges {
            adjacency.entry(edge.source).or_default().push(edge.destination);
        }
        Self { edges, adjacency }
    }

    /// True if `source -> destination` survived pruning.
    #[must_use]
    pub fn contains(&self, source: ModuleKey, destination: ModuleKey) -> bool {
        self.adjacency
            .get(&source)
            .is_some_and(|d| d.binary_search(&destination).is_ok())
    }

    /// Destinations reachable from `source`, sorted.
    #[must_use]
    pub fn successors(&self, source: ModuleKey) -> &[ModuleKey] {
        self.adjacency.get(&source).map_or(&[], Vec::as_slice)
    }

    /// Modules with at least one outgoing edge, sorted.
    pub fn sources(&self) -> impl Iterator<Item = ModuleKey> + '_ {
        self.adjacency.keys().copied()
    }

    #[must_use]
    pub fn edges(&self) -> &[ModuleEdge] {
        &self.edges
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Builds a [`ModuleMap`] from truth-matched hits.
#[derive(Clone, Debug)]
pub struct ModuleGraphBuilder {
    config: ModuleMapConfig,
}

impl ModuleGraphBuilder {
    /// Create a builder. Thresholds are validated when each stage runs.
    #[must_use]
    pub fn new(config: ModuleMapConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ModuleMapConfig {
        &self.config
    }

    /// Count module transitions along every truth trajectory.
    ///
    /// Hits without a truth particle are ignored.
    ///
    /// # Errors
    /// Returns `ConfigError` if `min_pt` is not configured, or if
    /// `barrel_only` is set and a hit carries an unknown system code.
    pub fn count_transitions(
        &self,
        hits: &[DecodedHit],
        particles: &ParticleTable,
    ) -> Result<TransitionTable> {
        let min_pt = self.config.validate_counting()?;
        let rule = self.config.transition;

        let trajectories =
            GroupIndex::build(hits, |h| h.particle.map(|p| (h.file, h.event, p)));
        let mut stats = TransitionStats {
            trajectories: trajectories.len(),
            ..TransitionStats::default()
        };
        let mut counts: BTreeMap<(ModuleKey, ModuleKey), u64> = BTreeMap::new();

        for ((file, event, particle), mut indices) in trajectories.into_sorted() {
            indices.sort_by_key(|&i| (hits[i].cell, i));
            let n_pairs = indices.len().saturating_sub(1);
            stats.candidates += n_pairs;

            let Some(truth) = particles.for_hit(file, event, Some(particle)) else {
                stats.missing_truth += 1;
                stats.rejected_pt += n_pairs;
                continue;
            };
            if truth.pt().partial_cmp(&min_pt) != Some(std::cmp::Ordering::Greater) {
                stats.rejected_pt += n_pairs;
                continue;
            }

            for pair in indices.windows(2) {
                let (from, to) = (&hits[pair[0]].cell, &hits[pair[1]].cell);
                if !rule.accepts(from, to)
                    || (self.config.barrel_only && !(in_barrel(from)? && in_barrel(to)?))
                {
                    stats.rejected_rule += 1;
                    continue;
                }
                stats.accepted += 1;
                *counts.entry((from.into(), to.into())).or_default() += 1;
            }
        }

        let mut totals: BTreeMap<ModuleKey, u64> = BTreeMap::new();
        for (&(source, _), &count) in &counts {
            *totals.entry(source).or_default() += count;
        }
        let edges = counts
            .into_iter()
            .map(|((source, destination), count)| ModuleEdge {
                source,
                destination,
                count,
                fraction: count as f64 / totals[&source] as f64,
            })
            .collect::<Vec<_>>();

        log::info!(
            "Module transitions: {} edges from {} accepted of {} candidates \
             ({} trajectories, {} below pT, {} rejected by rule, {} missing truth)",
            edges.len(),
            stats.accepted,
            stats.candidates,
            stats.trajectories,
            stats.rejected_pt,
            stats.rejected_rule,
            stats.missing_truth
        );
        Ok(TransitionTable { edges, stats })
    }

    /// True if the edge passes the configured thresholds.
    #[must_use]
    pub fn keeps(&self, edge: &ModuleEdge) -> bool {
        let checks = [
            self.config.min_count.map(|m| edge.count >= m),
            self.config.min_fraction.map(|m| edge.fraction >= m),
        ];
        let mut configured = checks.into_iter().flatten().peekable();
        if configured.peek().is_none() {
            return true;
        }
        match self.config.require {
            PruneRule::Both => configured.all(|ok| ok),
            PruneRule::Either => configured.any(|ok| ok),
        }
    }

    /// Remove edges below the configured thresholds.
    ///
    /// # Errors
    /// Returns `ConfigError` if no threshold is configured and
    /// `EmptyResult` if every edge is pruned.
    pub fn prune(&self, table: &TransitionTable) -> Result<ModuleMap> {
        self.config.validate_pruning()?;
        let kept: Vec<ModuleEdge> = table
            .edges
            .iter()
            .filter(|e| self.keeps(e))
            .copied()
            .collect();
        log::info!("Module map: kept {} of {} edges", kept.len(), table.edges.len());

        if kept.is_empty() {
            return Err(Error::EmptyResult {
                stage: "module map",
                context: format!(
                    "{} unpruned edges, min_count {:?}, min_fraction {:?}, rule {:?}",
                    table.edges.len(),
                    self.config.min_count,
                    self.config.min_fraction,
                    self.config.require
                ),
            });
        }
        Ok(ModuleMap::from_edges(kept))
    }

    /// Count then prune.
    ///
    /// # Errors
    /// See [`Self::count_transitions`] and [`Self::prune`].
    pub fn build(&self, hits: &[DecodedHit], particles: &ParticleTable) -> Result<ModuleMap> {
        self.config.validate()?;
        let table = self.count_transitions(hits, particles)?;
        self.prune(&table)
    }
}
