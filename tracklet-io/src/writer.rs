//! CSV writers for pipeline tables.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracklet_algorithms::{Cutflow, DoubletTable, EfficiencyCurve, ModuleEdge, SegmentEnd, TransitionStats};
use tracklet_core::{DecodedHit, TruthParticle};

use crate::Result;

fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(String::new, |v| v.to_string())
}

/// Writes pipeline tables as CSV.
pub struct TableWriter<W: Write = BufWriter<File>> {
    writer: W,
}

impl TableWriter {
    /// Creates a new file writer.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> TableWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Writes decoded hits, one row per hit.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_hits(&mut self, hits: &[DecodedHit]) -> Result<()> {
        writeln!(
            self.writer,
            "file,event,particle,system,side,layer,module,sensor,double_layer,upper,cell_id,\
             x,y,z,r,t,t_corrected,theta,edep,path_length,bounds,distance,p,costheta"
        )?;
        for h in hits {
            let c = &h.cell;
            writeln!(
                self.writer,
                "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
                h.file,
                h.event,
                opt(h.particle),
                c.system,
                c.side,
                c.layer,
                c.module,
                c.sensor,
                h.double_layer(),
                h.half().parity(),
                h.cell_id,
                h.x(),
                h.y(),
                h.z(),
                h.r,
                h.t,
                h.t_corrected,
                h.theta,
                h.edep,
                h.path_length,
                h.bounds.label(),
                h.distance,
                opt(h.momentum.map(|m| m.p)),
                opt(h.momentum.map(|m| m.costheta)),
            )?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Writes truth particles with their derived kinematics.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_particles(&mut self, particles: &[TruthParticle]) -> Result<()> {
        writeln!(
            self.writer,
            "file,event,index,pdg,charge,mass,px,py,pz,pt,eta,phi,vertex_x,vertex_y,vertex_z,\
             endpoint_x,endpoint_y,endpoint_z"
        )?;
        for p in particles {
            let [px, py, pz] = p.momentum;
            let [vx, vy, vz] = p.vertex;
            let [ex, ey, ez] = p.endpoint;
            writeln!(
                self.writer,
                "{},{},{},{},{},{},{px},{py},{pz},{},{},{},{vx},{vy},{vz},{ex},{ey},{ez}",
                p.key.file,
                p.key.event,
                p.key.index,
                p.pdg,
                p.charge,
                p.mass,
                p.pt(),
                p.eta(),
                p.phi(),
            )?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Writes doublets. Coordinate columns appear only when the table carries
    /// them.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_doublets(&mut self, table: &DoubletTable) -> Result<()> {
        let with_ends = table.doublets.first().is_some_and(|d| d.ends.is_some());
        write!(
            self.writer,
            "file,event,system,double_layer,module,sensor,\
             hit_lower,hit_upper,particle_lower,particle_upper,\
             module_lower,module_upper,sensor_lower,sensor_upper,\
             intercept_rz,dr,dphi,pass_dz,pass_dr,pass_dphi,pass_all"
        )?;
        if with_ends {
            for suffix in ["lower", "upper"] {
                for column in ["x", "y", "z", "r", "t_corrected", "p", "costheta"] {
                    write!(self.writer, ",{column}_{suffix}")?;
                }
            }
        }
        writeln!(self.writer)?;

        for d in &table.doublets {
            write!(
                self.writer,
                "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
                d.key.file,
                d.key.event,
                d.key.system,
                d.key.double_layer,
                opt(d.key.module),
                opt(d.key.sensor),
                d.lower.index,
                d.upper.index,
                opt(d.lower.particle),
                opt(d.upper.particle),
                d.lower.module,
                d.upper.module,
                d.lower.sensor,
                d.upper.sensor,
                d.intercept_rz,
                d.dr,
                opt(d.dphi),
                u8::from(d.cuts.dz),
                u8::from(d.cuts.dr),
                u8::from(d.cuts.dphi),
                u8::from(d.cuts.all()),
            )?;
            if with_ends {
                let ends: [Option<&SegmentEnd>; 2] = match &d.ends {
                    Some([lower, upper]) => [Some(lower), Some(upper)],
                    None => [None, None],
                };
                for end in ends {
                    match end {
                        Some(e) => write!(
                            self.writer,
                            ",{},{},{},{},{},{},{}",
                            e.x,
                            e.y,
                            e.z,
                            e.r,
                            e.t_corrected,
                            opt(e.p),
                            opt(e.costheta)
                        )?,
                        None => write!(self.writer, ",,,,,,,")?,
                    }
                }
            }
            writeln!(self.writer)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Writes the summed cutflow followed by one row per group.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_cutflow(&mut self, table: &DoubletTable) -> Result<()> {
        let header: Vec<&str> = Cutflow::default().steps().iter().map(|(name, _)| *name).collect();
        writeln!(self.writer, "file,event,system,double_layer,module,sensor,{}", header.join(","))?;

        let row = |flow: &Cutflow| {
            flow.steps()
                .iter()
                .map(|(_, n)| n.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        writeln!(self.writer, ",,,,,,{}", row(&table.cutflow))?;
        for (key, flow) in &table.group_cutflows {
            writeln!(
                self.writer,
                "{},{},{},{},{},{},{}",
                key.file,
                key.event,
                key.system,
                key.double_layer,
                opt(key.module),
                opt(key.sensor),
                row(flow)
            )?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Writes module-map edges.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_module_edges(&mut self, edges: &[ModuleEdge]) -> Result<()> {
        writeln!(
            self.writer,
            "system,side,layer,module,sensor,\
             next_system,next_side,next_layer,next_module,next_sensor,count,fraction"
        )?;
        for e in edges {
            let (s, d) = (&e.source, &e.destination);
            writeln!(
                self.writer,
                "{},{},{},{},{},{},{},{},{},{},{},{}",
                s.system,
                s.side,
                s.layer,
                s.module,
                s.sensor,
                d.system,
                d.side,
                d.layer,
                d.module,
                d.sensor,
                e.count,
                e.fraction
            )?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Writes transition bookkeeping as name/value rows.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_transition_stats(&mut self, stats: &TransitionStats) -> Result<()> {
        writeln!(self.writer, "step,count")?;
        for (name, count) in [
            ("trajectories", stats.trajectories),
            ("candidates", stats.candidates),
            ("rejected_pt", stats.rejected_pt),
            ("rejected_rule", stats.rejected_rule),
            ("missing_truth", stats.missing_truth),
            ("accepted", stats.accepted),
        ] {
            writeln!(self.writer, "{name},{count}")?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Writes an efficiency curve, one row per bin.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_efficiency(&mut self, curve: &EfficiencyCurve) -> Result<()> {
        writeln!(
            self.writer,
            "{name}_low,{name}_high,{name}_center,denominator,numerator,efficiency",
            name = curve.kinematic.name()
        )?;
        let centers = curve.bin_centers();
        for (i, center) in centers.iter().enumerate() {
            writeln!(
                self.writer,
                "{},{},{},{},{},{}",
                curve.edges[i],
                curve.edges[i + 1],
                center,
                curve.denominator[i],
                curve.numerator[i],
                curve.efficiency[i]
            )?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tracklet_algorithms::{Binning, DoubletBuilder, DoubletConfig, Kinematic, ModuleKey};
    use tracklet_core::{decode_hit, CellId, CellIdLayout, SimHit};

    fn hits() -> Vec<DecodedHit> {
        let layout = CellIdLayout::standard();
        [(0, [100.0, 0.0, 0.0]), (1, [102.0, 0.0, 0.1])]
            .into_iter()
            .map(|(layer, pos)| {
                let raw = layout.encode(&CellId::new(3, 0, layer, 2, 1)).unwrap();
                decode_hit(&SimHit::new(0, 4, Some(7), pos, raw), &layout).unwrap()
            })
            .collect()
    }

    fn lines(writer: TableWriter<Vec<u8>>) -> Vec<String> {
        String::from_utf8(writer.into_inner())
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn test_write_hits_csv() {
        let file = NamedTempFile::new().unwrap();
        let mut writer = TableWriter::create(file.path()).unwrap();
        writer.write_hits(&hits()).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.starts_with("file,event,particle,system"));
        assert!(content.contains("0,4,7,3,0,1,2,1,0,1,"));
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn test_write_doublets_with_and_without_coordinates() {
        let bare = DoubletBuilder::new(DoubletConfig::new()).unwrap().build(&hits()).unwrap();
        let mut writer = TableWriter::new(Vec::new());
        writer.write_doublets(&bare).unwrap();
        let out = lines(writer);
        assert_eq!(out.len(), 2);
        assert!(!out[0].contains("x_lower"));
        assert_eq!(out[0].split(',').count(), out[1].split(',').count());

        let config = DoubletConfig::new().with_propagate_signal(true);
        let full = DoubletBuilder::new(config).unwrap().build(&hits()).unwrap();
        let mut writer = TableWriter::new(Vec::new());
        writer.write_doublets(&full).unwrap();
        let out = lines(writer);
        assert!(out[0].ends_with("p_upper,costheta_upper"));
        assert_eq!(out[0].split(',').count(), out[1].split(',').count());
    }

    #[test]
    fn test_write_cutflow() {
        let table = DoubletBuilder::new(DoubletConfig::new()).unwrap().build(&hits()).unwrap();
        let mut writer = TableWriter::new(Vec::new());
        writer.write_cutflow(&table).unwrap();
        let out = lines(writer);
        assert_eq!(out.len(), 3);
        assert!(out[1].starts_with(",,,,,,1,"));
        assert!(out[2].starts_with("0,4,3,0,,,1,"));
    }

    #[test]
    fn test_write_module_edges() {
        let edge = ModuleEdge {
            source: ModuleKey::from(&CellId::new(3, 0, 1, 4, 0)),
            destination: ModuleKey::from(&CellId::new(3, 0, 2, 5, 7)),
            count: 12,
            fraction: 0.75,
        };
        let mut writer = TableWriter::new(Vec::new());
        writer.write_module_edges(&[edge]).unwrap();
        let out = lines(writer);
        assert_eq!(
            out[0],
            "system,side,layer,module,sensor,next_system,next_side,next_layer,next_module,next_sensor,count,fraction"
        );
        assert_eq!(out[1], "3,0,1,4,0,3,0,2,5,7,12,0.75");
    }

    #[test]
    fn test_write_efficiency() {
        let curve = EfficiencyCurve {
            kinematic: Kinematic::Pt,
            edges: Binning::uniform(0.0, 2.0, 2).unwrap().edges().to_vec(),
            denominator: vec![4, 0],
            numerator: vec![3, 0],
            efficiency: vec![0.75, 0.0],
        };
        let mut writer = TableWriter::new(Vec::new());
        writer.write_efficiency(&curve).unwrap();
        let out = lines(writer);
        assert_eq!(out[0], "pt_low,pt_high,pt_center,denominator,numerator,efficiency");
        assert_eq!(out[1], "0,1,0.5,4,3,0.75");
        assert_eq!(out[2], "1,2,1.5,0,0,0");
    }
}
