//! tracklet CLI
//!
//! Converts simulated tracker runs into hit tables and builds doublets,
//! module maps and efficiency curves from them.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::redundant_closure_for_method_calls,
    clippy::too_many_lines
)]

use clap::{Args, Parser, Subcommand};
use env_logger::Env;

use tracklet_algorithms::{
    DoubletBuilder, DoubletConfig, EfficiencyEvaluator, Granularity, Kinematic,
    ModuleGraphBuilder, ModuleMapConfig, Numerator, PruneRule, TransitionRule,
};
use tracklet_core::{BoundsStatus, CellIdLayout, DetectorSystem, NoGeometry, ParticleTable};
use tracklet_io::{
    EventSource, JsonEventSource, PipelineConfig, RunConverter, RunTables, TableWriter,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    TrackletIo(#[from] tracklet_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] tracklet_core::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] tracklet_core::DecodeError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Hit decoding, doublet seeding and module maps for layered trackers.
#[derive(Parser)]
#[command(name = "tracklet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Inputs shared by every processing command.
#[derive(Args, Debug)]
struct RunArgs {
    /// Input run file(s)
    #[arg(required = true)]
    input: Vec<PathBuf>,

    /// Pipeline configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output CSV file
    #[arg(short, long)]
    output: PathBuf,
}

/// Doublet threshold overrides.
#[derive(Args, Debug, Default)]
struct DoubletArgs {
    /// Cut on |z intercept| at the beamline (mm)
    #[arg(long)]
    dz_cut: Option<f64>,

    /// Cut on transverse impact parameter (mm)
    #[arg(long)]
    dr_cut: Option<f64>,

    /// Cut on |dphi| between the two hits (rad)
    #[arg(long)]
    dphi_cut: Option<f64>,

    /// Keep every candidate and only flag the cuts
    #[arg(long)]
    pass_through: bool,

    /// Group by module and sensor as well
    #[arg(long)]
    fine: bool,

    /// Keep per-end coordinates and momentum
    #[arg(long)]
    propagate_signal: bool,
}

impl DoubletArgs {
    /// Layers command-line overrides on top of the configured values.
    fn apply(&self, mut config: DoubletConfig) -> DoubletConfig {
        if self.dz_cut.is_some() || self.dr_cut.is_some() {
            config.apply_cuts = true;
            config.cuts.dz = self.dz_cut.or(config.cuts.dz);
            config.cuts.dr = self.dr_cut.or(config.cuts.dr);
        }
        if let Some(dphi) = self.dphi_cut {
            config = config.with_dphi_cut(dphi);
        }
        if self.pass_through {
            config = config.pass_through();
        }
        if self.fine {
            config = config.with_granularity(Granularity::Fine);
        }
        if self.propagate_signal {
            config = config.with_propagate_signal(true);
        }
        config
    }
}

/// Module map threshold overrides.
#[derive(Args, Debug, Default)]
struct ModuleMapArgs {
    /// Minimum transverse momentum of contributing particles (GeV)
    #[arg(long)]
    min_pt: Option<f64>,

    /// Minimum number of transitions for an edge to survive
    #[arg(long)]
    min_count: Option<u64>,

    /// Minimum fraction of the source module's transitions
    #[arg(long)]
    min_fraction: Option<f64>,

    /// Keep edges passing either threshold instead of both
    #[arg(long)]
    either: bool,

    /// Count transitions between any consecutive hits
    #[arg(long)]
    any_successor: bool,

    /// Only count transitions between barrel systems
    #[arg(long)]
    barrel_only: bool,
}

impl ModuleMapArgs {
    fn apply(&self, mut config: ModuleMapConfig) -> ModuleMapConfig {
        if let Some(min_pt) = self.min_pt {
            config = config.with_min_pt(min_pt);
        }
        if let Some(min_count) = self.min_count {
            config = config.with_min_count(min_count);
        }
        if let Some(min_fraction) = self.min_fraction {
            config = config.with_min_fraction(min_fraction);
        }
        if self.either {
            config = config.with_prune_rule(PruneRule::Either);
        }
        if self.any_successor {
            config = config.with_transition(TransitionRule::AnySuccessor);
        }
        if self.barrel_only {
            config = config.with_barrel_only(true);
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Decode packed cell IDs
    Decode {
        /// Cell ID(s), decimal or 0x-prefixed hex
        #[arg(required = true)]
        cell_ids: Vec<String>,

        /// Cell ID encoding string
        #[arg(short, long)]
        encoding: Option<String>,
    },

    /// Show event, hit and particle counts of run files
    Info {
        /// Input run file(s)
        #[arg(required = true)]
        input: Vec<PathBuf>,
    },

    /// Convert run files into a decoded hit table
    Hits {
        #[command(flatten)]
        run: RunArgs,

        /// Also write the truth particle table here
        #[arg(long)]
        particles: Option<PathBuf>,
    },

    /// Build doublets within each double layer
    Doublets {
        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        cuts: DoubletArgs,

        /// Also write the cutflow here
        #[arg(long)]
        cutflow: Option<PathBuf>,
    },

    /// Build the pruned module connectivity map
    ModuleMap {
        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        thresholds: ModuleMapArgs,

        /// Also write the unpruned transition statistics here
        #[arg(long)]
        transitions: Option<PathBuf>,
    },

    /// Compute a binned efficiency curve
    Efficiency {
        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        cuts: DoubletArgs,

        /// Kinematic variable to bin in (pt, p, eta, theta, phi, vertex_r)
        #[arg(short, long)]
        kinematic: Option<String>,
    },
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => {
            log::info!("Loading configuration from {}", path.display());
            PipelineConfig::from_file(path)?
        }
        None => PipelineConfig::default(),
    };
    Ok(config)
}

/// Decimal or `0x`-prefixed hexadecimal.
fn parse_cell_id(text: &str) -> Result<u64> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| CliError::InvalidArgument(format!("cell ID {text:?}: {e}")))
}

fn convert(config: &PipelineConfig, input: &[PathBuf]) -> Result<RunTables> {
    let start = Instant::now();
    let converter = RunConverter::new(JsonEventSource, config.conversion.clone());
    let (tables, report) = converter.convert(input, || NoGeometry)?;

    for failure in &report.failures {
        eprintln!("Skipped {}: {}", failure.path.display(), failure.message);
    }
    log::info!(
        "Converted {}/{} file(s) in {:.2?}: {} hits, {} particles",
        report.converted.len(),
        input.len(),
        start.elapsed(),
        tables.hits.len(),
        tables.particles.len()
    );
    log::debug!(
        "Decode failures: {}, filtered: {}, outside: {}",
        report.decode.failed,
        report.filtered,
        report.bounds.get(BoundsStatus::Outside)
    );
    Ok(tables)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Decode { cell_ids, encoding } => {
            let layout = match encoding {
                Some(encoding) => CellIdLayout::parse(&encoding)?,
                None => CellIdLayout::standard(),
            };

            println!(
                "{:>20} {:>6} {:>4} {:>5} {:>6} {:>6}  system name",
                "cell_id", "system", "side", "layer", "module", "sensor"
            );
            for text in &cell_ids {
                let raw = parse_cell_id(text)?;
                let id = layout.decode(raw)?;
                let name =
                    DetectorSystem::from_code(id.system).map_or("unknown", |system| system.name());
                println!(
                    "{:>20} {:>6} {:>4} {:>5} {:>6} {:>6}  {}",
                    raw, id.system, id.side, id.layer, id.module, id.sensor, name
                );
            }
        }

        Commands::Info { input } => {
            let mut failed = 0usize;
            for path in &input {
                match JsonEventSource.read_events(path) {
                    Ok(events) => {
                        let hits: usize = events.iter().map(|e| e.hits.len()).sum();
                        let particles: usize = events.iter().map(|e| e.particles.len()).sum();
                        println!("File: {}", path.display());
                        println!("  Events: {}", events.len());
                        println!("  Hits: {}", hits);
                        println!("  Particles: {}", particles);
                        if !events.is_empty() {
                            println!(
                                "  Hits/event: {:.1}",
                                hits as f64 / events.len() as f64
                            );
                        }
                    }
                    Err(e) => {
                        failed += 1;
                        eprintln!("File: {}: {}", path.display(), e);
                    }
                }
            }
            if failed == input.len() {
                return Err(tracklet_io::Error::AllInputsFailed {
                    count: failed,
                    first: input.first().cloned().unwrap_or_default(),
                }
                .into());
            }
        }

        Commands::Hits { run, particles } => {
            let config = load_config(run.config.as_deref())?;
            let tables = convert(&config, &run.input)?;

            TableWriter::create(&run.output)?.write_hits(&tables.hits)?;
            println!("Wrote {} hits to {}", tables.hits.len(), run.output.display());

            if let Some(path) = particles {
                TableWriter::create(&path)?.write_particles(&tables.particles)?;
                println!(
                    "Wrote {} particles to {}",
                    tables.particles.len(),
                    path.display()
                );
            }
        }

        Commands::Doublets { run, cuts, cutflow } => {
            let config = load_config(run.config.as_deref())?;
            let builder = DoubletBuilder::new(cuts.apply(config.doublets.clone()))?;
            let tables = convert(&config, &run.input)?;

            let start = Instant::now();
            let table = builder.build(&tables.hits)?;
            log::info!(
                "Built {} doublets from {} groups in {:.2?}",
                table.len(),
                table.groups_visited,
                start.elapsed()
            );
            for (step, count) in table.cutflow.steps() {
                log::debug!("  {:<10} {}", step, count);
            }

            TableWriter::create(&run.output)?.write_doublets(&table)?;
            println!("Wrote {} doublets to {}", table.len(), run.output.display());

            if let Some(path) = cutflow {
                TableWriter::create(&path)?.write_cutflow(&table)?;
                println!("Wrote cutflow to {}", path.display());
            }
        }

        Commands::ModuleMap {
            run,
            thresholds,
            transitions,
        } => {
            let config = load_config(run.config.as_deref())?;
            let builder = ModuleGraphBuilder::new(thresholds.apply(config.module_map.clone()));
            builder.config().validate()?;
            let tables = convert(&config, &run.input)?;
            let particles = ParticleTable::new(tables.particles);

            let table = builder.count_transitions(&tables.hits, &particles)?;
            let stats = &table.stats;
            log::info!(
                "{} trajectories, {} candidate transitions, {} accepted",
                stats.trajectories,
                stats.candidates,
                stats.accepted
            );
            if let Some(path) = transitions {
                let mut writer = TableWriter::create(&path)?;
                writer.write_transition_stats(stats)?;
                println!("Wrote transition statistics to {}", path.display());
            }

            let map = builder.prune(&table)?;
            log::info!("Kept {}/{} edges", map.len(), table.edges.len());
            TableWriter::create(&run.output)?.write_module_edges(map.edges())?;
            println!("Wrote {} edges to {}", map.len(), run.output.display());
        }

        Commands::Efficiency {
            run,
            cuts,
            kinematic,
        } => {
            let config = load_config(run.config.as_deref())?;
            let settings = &config.efficiency;
            let numerator = settings.numerator.ok_or_else(|| {
                tracklet_core::Error::config("efficiency requires a configured numerator")
            })?;
            let binning = settings.binning.clone().ok_or_else(|| {
                tracklet_core::Error::config("efficiency requires configured bins")
            })?;
            let kinematic = kinematic
                .as_deref()
                .map_or(Ok(settings.kinematic), Kinematic::from_name)?;
            let evaluator = EfficiencyEvaluator::new(
                settings.acceptance.clone(),
                settings.quality.clone(),
                numerator,
            )?;

            let tables = convert(&config, &run.input)?;
            let particles = ParticleTable::new(tables.particles);
            let doublets = match numerator {
                Numerator::Doublets { .. } => {
                    let builder = DoubletBuilder::new(cuts.apply(config.doublets.clone()))?;
                    Some(builder.build(&tables.hits)?)
                }
                _ => None,
            };

            let curve = evaluator.evaluate(
                &particles,
                &tables.hits,
                doublets.as_ref(),
                kinematic,
                &binning,
            )?;
            log::info!(
                "Integrated efficiency in {}: {:.4} ({}/{})",
                kinematic.name(),
                curve.integrated(),
                curve.numerator.iter().sum::<u64>(),
                curve.denominator.iter().sum::<u64>()
            );

            TableWriter::create(&run.output)?.write_efficiency(&curve)?;
            println!("Wrote {} bins to {}", binning.bins(), run.output.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cell_id() {
        assert_eq!(parse_cell_id("42").unwrap(), 42);
        assert_eq!(parse_cell_id("0x2a").unwrap(), 42);
        assert_eq!(parse_cell_id("0XFF").unwrap(), 255);
        assert!(matches!(
            parse_cell_id("forty-two"),
            Err(CliError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_doublet_overrides() {
        let base = DoubletConfig::default().with_cuts(2.0, 1.0);

        let config = DoubletArgs {
            dz_cut: Some(5.0),
            ..DoubletArgs::default()
        }
        .apply(base.clone());
        assert!(config.apply_cuts);
        assert_eq!(config.cuts.dz, Some(5.0));
        assert_eq!(config.cuts.dr, Some(1.0));

        let config = DoubletArgs {
            pass_through: true,
            fine: true,
            ..DoubletArgs::default()
        }
        .apply(base);
        assert!(!config.apply_cuts);
        assert_eq!(config.granularity, Granularity::Fine);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_single_cut_override_requires_both() {
        let config = DoubletArgs {
            dr_cut: Some(1.0),
            ..DoubletArgs::default()
        }
        .apply(DoubletConfig::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_module_map_overrides() {
        let config = ModuleMapArgs {
            min_pt: Some(1.0),
            min_fraction: Some(0.05),
            either: true,
            barrel_only: true,
            ..ModuleMapArgs::default()
        }
        .apply(ModuleMapConfig::default().with_min_count(3));
        assert_eq!(config.min_pt, Some(1.0));
        assert_eq!(config.min_count, Some(3));
        assert_eq!(config.require, PruneRule::Either);
        assert!(config.barrel_only);
        assert_eq!(config.transition, TransitionRule::DoubleLayerBoundary);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_parses_overrides() {
        let cli = Cli::try_parse_from([
            "tracklet",
            "doublets",
            "run.json",
            "-o",
            "out.csv",
            "--dz-cut",
            "2",
            "--dr-cut",
            "1",
            "--fine",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Doublets { run, cuts, cutflow } => {
                assert_eq!(run.input, vec![PathBuf::from("run.json")]);
                assert_eq!(cuts.dz_cut, Some(2.0));
                assert!(cuts.fine);
                assert!(cutflow.is_none());
            }
            _ => panic!("expected doublets"),
        }
    }
}
