//! Parallel conversion of run files into hit and particle tables.
//!
//! Files are split into one chunk per rayon worker. Each chunk builds its
//! own geometry context once and converts its files in order. A file that
//! fails to convert is logged and reported; the rest of the batch carries on.

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use tracklet_core::{
    decode_hits, BoundsStatus, BoundsTally, CellIdLayout, DecodeSummary, DecodedHit, ParticleKey,
    SimHit, SurfaceGeometry, TruthParticle,
};

use crate::source::{EventRecord, EventSource};
use crate::{Error, Result};

/// Per-file filtering and decoding options.
#[derive(Debug, Clone, Default)]
pub struct ConversionConfig {
    /// Cell ID bit layout.
    pub layout: CellIdLayout,
    /// Files whose name contains this marker are signal samples.
    pub signal_marker: Option<String>,
    /// `|pdg|` codes kept in signal samples, with their hits.
    pub particles_of_interest: Option<Vec<i32>>,
    /// Detector systems to keep.
    pub systems: Option<Vec<u32>>,
    /// Physical layers to keep.
    pub layers: Option<Vec<u32>>,
}

impl ConversionConfig {
    #[must_use]
    pub fn new(layout: CellIdLayout) -> Self {
        Self {
            layout,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_signal_marker(mut self, marker: impl Into<String>) -> Self {
        self.signal_marker = Some(marker.into());
        self
    }

    #[must_use]
    pub fn with_particles_of_interest(mut self, pdg: Vec<i32>) -> Self {
        self.particles_of_interest = Some(pdg);
        self
    }

    #[must_use]
    pub fn with_systems(mut self, systems: Vec<u32>) -> Self {
        self.systems = Some(systems);
        self
    }

    #[must_use]
    pub fn with_layers(mut self, layers: Vec<u32>) -> Self {
        self.layers = Some(layers);
        self
    }

    /// True if the file name carries the signal marker.
    #[must_use]
    pub fn is_signal(&self, path: &Path) -> bool {
        let Some(marker) = &self.signal_marker else {
            return false;
        };
        path.file_name()
            .is_some_and(|name| name.to_string_lossy().contains(marker.as_str()))
    }

    fn keeps_particle(&self, pdg: i32) -> bool {
        self.particles_of_interest
            .as_ref()
            .is_none_or(|codes| codes.iter().any(|c| c.abs() == pdg.abs()))
    }
}

/// Merged output of a conversion.
#[derive(Debug, Clone, Default)]
pub struct RunTables {
    /// Sorted by file, event, particle, system, layer, module, sensor.
    pub hits: Vec<DecodedHit>,
    /// Sorted by key.
    pub particles: Vec<TruthParticle>,
}

/// A file that could not be converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Bookkeeping for a conversion batch.
#[derive(Debug, Clone, Default)]
pub struct ConversionReport {
    pub converted: Vec<PathBuf>,
    pub failures: Vec<FileFailure>,
    pub decode: DecodeSummary,
    /// Bounds status of every hit that reached the geometry check.
    pub bounds: BoundsTally,
    /// Hits dropped by the system, layer or particle filters.
    pub filtered: usize,
    /// Number of geometry contexts built.
    pub workers: usize,
}

/// Output of one file.
#[derive(Debug, Default)]
struct FileOutput {
    hits: Vec<DecodedHit>,
    particles: Vec<TruthParticle>,
    decode: DecodeSummary,
    bounds: BoundsTally,
    filtered: usize,
}

/// Converts run files through an [`EventSource`].
pub struct RunConverter<S> {
    source: S,
    config: ConversionConfig,
}

impl<S: EventSource> RunConverter<S> {
    pub fn new(source: S, config: ConversionConfig) -> Self {
        Self { source, config }
    }

    #[must_use]
    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Convert every file in parallel and merge the results.
    ///
    /// `make_geometry` is called once per worker chunk. File indices in the
    /// output refer to positions in `files`.
    ///
    /// # Errors
    /// Returns [`Error::AllInputsFailed`] if no file converts.
    pub fn convert<G, F>(&self, files: &[PathBuf], make_geometry: F) -> Result<(RunTables, ConversionReport)>
    where
        G: SurfaceGeometry,
        F: Fn() -> G + Sync,
    {
        let mut report = ConversionReport::default();
        if files.is_empty() {
            return Ok((RunTables::default(), report));
        }
        log::info!("Converting {} run files", files.len());

        let chunk_size = files.len().div_ceil(rayon::current_num_threads()).max(1);
        let chunks: Vec<Vec<(PathBuf, Result<FileOutput>)>> = files
            .par_chunks(chunk_size)
            .enumerate()
            .map(|(i_chunk, chunk)| {
                let geometry = make_geometry();
                chunk
                    .iter()
                    .enumerate()
                    .map(|(k, path)| {
                        let index = u32::try_from(i_chunk * chunk_size + k).map_err(|_| {
                            Error::InvalidFormat(format!("too many input files ({})", files.len()))
                        });
                        let output = index.and_then(|i| self.convert_file(i, path, &geometry));
                        (path.clone(), output)
                    })
                    .collect()
            })
            .collect();
        report.workers = chunks.len();

        let mut tables = RunTables::default();
        for (path, output) in chunks.into_iter().flatten() {
            match output {
                Ok(out) => {
                    tables.hits.extend(out.hits);
                    tables.particles.extend(out.particles);
                    report.decode.merge(&out.decode);
                    report.bounds.merge(&out.bounds);
                    report.filtered += out.filtered;
                    report.converted.push(path);
                }
                Err(err) => {
                    log::warn!("Failed to convert {}: {err}", path.display());
                    report.failures.push(FileFailure {
                        path,
                        message: err.to_string(),
                    });
                }
            }
        }

        if report.converted.is_empty() {
            return Err(Error::AllInputsFailed {
                count: report.failures.len(),
                first: report
                    .failures
                    .first()
                    .map(|f| f.path.clone())
                    .unwrap_or_default(),
            });
        }

        tables.particles.sort_by_key(|p| p.key);
        tables.hits.sort_by_key(|h| {
            (
                h.file,
                h.event,
                h.particle,
                h.cell.system,
                h.cell.layer,
                h.cell.module,
                h.cell.sensor,
            )
        });

        log::info!(
            "Converted {} of {} files: {} hits, {} particles ({} undecodable, {} filtered)",
            report.converted.len(),
            files.len(),
            tables.hits.len(),
            tables.particles.len(),
            report.decode.failed,
            report.filtered
        );
        for status in BoundsStatus::ALL {
            log::info!("  hits {}: {}", status.label(), report.bounds.get(status));
        }
        Ok((tables, report))
    }

    fn convert_file<G: SurfaceGeometry>(&self, file: u32, path: &Path, geometry: &G) -> Result<FileOutput> {
        let events = self.source.read_events(path)?;
        let signal = self.config.is_signal(path);
        log::debug!(
            "Converting {} ({} events, {})",
            path.display(),
            events.len(),
            if signal { "signal" } else { "background" }
        );

        let mut output = FileOutput::default();
        for (i_event, event) in events.iter().enumerate() {
            let i_event = u32::try_from(i_event)
                .map_err(|_| Error::InvalidFormat(format!("too many events in {}", path.display())))?;
            self.convert_event(file, i_event, event, signal, geometry, &mut output)?;
        }
        Ok(output)
    }

    fn convert_event<G: SurfaceGeometry>(
        &self,
        file: u32,
        event: u32,
        record: &EventRecord,
        signal: bool,
        geometry: &G,
        output: &mut FileOutput,
    ) -> Result<()> {
        let filter_particles = signal && self.config.particles_of_interest.is_some();

        let mut kept = vec![!filter_particles; record.particles.len()];
        for (index, raw) in record.particles.iter().enumerate() {
            if filter_particles && !self.config.keeps_particle(raw.pdg) {
                continue;
            }
            kept[index] = true;
            let index = u32::try_from(index)
                .map_err(|_| Error::InvalidFormat(format!("too many particles in event {event}")))?;
            output.particles.push(TruthParticle {
                key: ParticleKey::new(file, event, index),
                momentum: raw.momentum,
                mass: raw.mass,
                charge: raw.charge,
                pdg: raw.pdg,
                vertex: raw.vertex,
                endpoint: raw.endpoint,
            });
        }

        let layout = &self.config.layout;
        let mut sim_hits = Vec::with_capacity(record.hits.len());
        for raw in &record.hits {
            if filter_particles {
                let of_interest = raw
                    .particle
                    .and_then(|p| kept.get(p as usize).copied())
                    .unwrap_or(false);
                if !of_interest {
                    output.filtered += 1;
                    continue;
                }
            }
            let Ok(cell) = layout.decode(raw.cell_id) else {
                output.decode.failed += 1;
                continue;
            };
            let in_systems = self.config.systems.as_ref().is_none_or(|s| s.contains(&cell.system));
            let in_layers = self.config.layers.as_ref().is_none_or(|l| l.contains(&cell.layer));
            if !in_systems || !in_layers {
                output.filtered += 1;
                continue;
            }

            let status = geometry.bounds(cell.system, raw.cell_id, raw.position);
            output.bounds.record(status);
            if status == BoundsStatus::Outside {
                continue;
            }

            let mut hit = SimHit::new(file, event, raw.particle, raw.position, raw.cell_id).with_time(raw.time);
            if signal {
                let distance = geometry.distance(cell.system, raw.cell_id, raw.position);
                hit = hit.with_bounds(status, distance);
                hit.momentum = raw.momentum;
                hit.edep = raw.edep;
                hit.path_length = raw.path_length;
            } else {
                hit.bounds = status;
            }
            sim_hits.push(hit);
        }

        let (decoded, summary) = decode_hits(&sim_hits, layout);
        output.decode.merge(&summary);
        output.hits.extend(decoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{RawHit, RawParticle};
    use std::collections::HashMap;
    use tracklet_core::{CellId, NoGeometry};

    /// In-memory source keyed by file name.
    struct MemorySource(HashMap<PathBuf, Vec<EventRecord>>);

    impl EventSource for MemorySource {
        fn read_events(&self, path: &Path) -> Result<Vec<EventRecord>> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| Error::InvalidFormat(format!("no such run {}", path.display())))
        }
    }

    fn raw_hit(particle: Option<u32>, system: u32, layer: u32) -> RawHit {
        let cell_id = CellIdLayout::standard()
            .encode(&CellId::new(system, 0, layer, 1, 2))
            .unwrap();
        RawHit {
            position: [100.0, 0.0, 10.0],
            momentum: Some([1.0, 0.0, 0.0]),
            edep: 1e-4,
            time: 0.5,
            path_length: 0.1,
            cell_id,
            particle,
        }
    }

    fn raw_particle(pdg: i32) -> RawParticle {
        RawParticle {
            momentum: [1.0, 0.0, 0.0],
            mass: 0.1,
            charge: -1.0,
            pdg,
            vertex: [0.0; 3],
            endpoint: [0.0; 3],
        }
    }

    fn event() -> EventRecord {
        EventRecord {
            hits: vec![
                raw_hit(Some(1), 3, 0),
                raw_hit(Some(0), 3, 1),
                raw_hit(None, 5, 2),
            ],
            particles: vec![raw_particle(13), raw_particle(-11)],
        }
    }

    #[test]
    fn test_signal_filtering() {
        let path = PathBuf::from("muonGun_01.json");
        let source = MemorySource(HashMap::from([(path.clone(), vec![event()])]));
        let config = ConversionConfig::new(CellIdLayout::standard())
            .with_signal_marker("muonGun")
            .with_particles_of_interest(vec![13]);
        let (tables, report) = RunConverter::new(source, config)
            .convert(&[path], || NoGeometry)
            .unwrap();

        assert_eq!(tables.particles.len(), 1);
        assert_eq!(tables.particles[0].key.index, 0);
        assert_eq!(tables.hits.len(), 1);
        assert_eq!(tables.hits[0].particle, Some(0));
        assert!(tables.hits[0].momentum.is_some());
        assert_eq!(report.filtered, 2);
    }

    #[test]
    fn test_background_strips_signal_columns() {
        let path = PathBuf::from("bib_01.json");
        let source = MemorySource(HashMap::from([(path.clone(), vec![event()])]));
        let config = ConversionConfig::new(CellIdLayout::standard())
            .with_signal_marker("muonGun")
            .with_particles_of_interest(vec![13])
            .with_layers(vec![0, 2]);
        let (tables, report) = RunConverter::new(source, config)
            .convert(&[path], || NoGeometry)
            .unwrap();

        assert_eq!(tables.particles.len(), 2);
        assert_eq!(tables.hits.len(), 2);
        assert!(tables.hits.iter().all(|h| h.momentum.is_none()));
        assert_eq!(report.filtered, 1);
        assert_eq!(report.bounds.undefined, 2);
    }

    struct RejectOuter;

    impl SurfaceGeometry for RejectOuter {
        fn bounds(&self, system: u32, _cell_id: u64, _position: [f64; 3]) -> BoundsStatus {
            if system == 5 {
                BoundsStatus::Outside
            } else {
                BoundsStatus::Inside
            }
        }

        fn distance(&self, _system: u32, _cell_id: u64, _position: [f64; 3]) -> f64 {
            0.01
        }
    }

    #[test]
    fn test_geometry_drops_outside_hits() {
        let path = PathBuf::from("muonGun_02.json");
        let source = MemorySource(HashMap::from([(path.clone(), vec![event()])]));
        let config = ConversionConfig::new(CellIdLayout::standard()).with_signal_marker("muonGun");
        let (tables, report) = RunConverter::new(source, config)
            .convert(&[path], || RejectOuter)
            .unwrap();

        assert_eq!(tables.hits.len(), 2);
        assert_eq!(report.bounds.outside, 1);
        assert_eq!(report.bounds.inside, 2);
        assert!(tables.hits.iter().all(|h| h.bounds == BoundsStatus::Inside));
        assert!((tables.hits[0].distance - 0.01).abs() < f64::EPSILON);
    }

    #[test]
    fn test_outputs_sorted() {
        let path = PathBuf::from("run.json");
        let source = MemorySource(HashMap::from([(path.clone(), vec![event(), event()])]));
        let (tables, _) = RunConverter::new(source, ConversionConfig::default())
            .convert(&[path], || NoGeometry)
            .unwrap();

        let keys: Vec<_> = tables.hits.iter().map(|h| (h.event, h.particle)).collect();
        assert_eq!(
            keys,
            vec![
                (0, None),
                (0, Some(0)),
                (0, Some(1)),
                (1, None),
                (1, Some(0)),
                (1, Some(1))
            ]
        );
    }
}
