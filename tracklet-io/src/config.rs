//! Pipeline configuration loaded from JSON.
//!
//! Every section is optional. Calibration thresholds (cuts, minimum pT,
//! pruning limits) have no defaults here; each stage validates the values it
//! needs when it runs.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;

use tracklet_algorithms::{
    AcceptanceCuts, Binning, DoubletConfig, DoubletCuts, Granularity, HitQuality, Kinematic,
    ModuleMapConfig, Numerator, PruneRule, TransitionRule, Window,
};
use tracklet_core::{BoundsStatus, CellIdLayout, DetectorSystem, Error as CoreError};

use crate::convert::ConversionConfig;
use crate::Result;

/// Efficiency stage settings.
#[derive(Debug, Clone)]
pub struct EfficiencyConfig {
    pub acceptance: AcceptanceCuts,
    pub quality: HitQuality,
    pub numerator: Option<Numerator>,
    pub kinematic: Kinematic,
    pub binning: Option<Binning>,
}

impl Default for EfficiencyConfig {
    fn default() -> Self {
        Self {
            acceptance: AcceptanceCuts::default(),
            quality: HitQuality::default(),
            numerator: None,
            kinematic: Kinematic::Pt,
            binning: None,
        }
    }
}

/// Settings for every stage of the pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub conversion: ConversionConfig,
    pub doublets: DoubletConfig,
    pub module_map: ModuleMapConfig,
    pub efficiency: EfficiencyConfig,
}

// Intermediate structs for the JSON schema
#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct JsonConfig {
    encoding: Option<String>,
    conversion: JsonConversion,
    doublets: JsonDoublets,
    module_map: JsonModuleMap,
    efficiency: JsonEfficiency,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct JsonConversion {
    signal_marker: Option<String>,
    particles_of_interest: Option<Vec<i32>>,
    systems: Option<Vec<u32>>,
    layers: Option<Vec<u32>>,
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct JsonDoublets {
    dz_cut: Option<f64>,
    dr_cut: Option<f64>,
    dphi_cut: Option<f64>,
    apply_cuts: Option<bool>,
    compute_dphi: bool,
    fine: bool,
    propagate_signal: bool,
    progress_interval: usize,
}

impl Default for JsonDoublets {
    fn default() -> Self {
        Self {
            dz_cut: None,
            dr_cut: None,
            dphi_cut: None,
            apply_cuts: None,
            compute_dphi: false,
            fine: false,
            propagate_signal: false,
            progress_interval: DoubletConfig::default().progress_interval,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct JsonModuleMap {
    min_pt: Option<f64>,
    min_count: Option<u64>,
    min_fraction: Option<f64>,
    /// "both" or "either".
    prune_rule: Option<String>,
    /// "double_layer_boundary" or "any_successor".
    transition: Option<String>,
    barrel_only: bool,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct JsonEfficiency {
    acceptance: JsonAcceptance,
    quality: JsonQuality,
    numerator: Option<JsonNumerator>,
    kinematic: Option<String>,
    bins: Option<JsonBins>,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct JsonAcceptance {
    pdg: Option<Vec<i32>>,
    require_charged: bool,
    min_pt: Option<f64>,
    max_vertex_r: Option<f64>,
    max_vertex_z: Option<f64>,
    min_endpoint_r: Option<f64>,
    max_abs_eta: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct JsonQuality {
    time: Option<[f64; 2]>,
    costheta: Option<[f64; 2]>,
    momentum_fraction: Option<[f64; 2]>,
    bounds: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonNumerator {
    /// "hit", "double_layer" or "doublets".
    kind: String,
    system: u32,
    layer: Option<u32>,
    double_layer: Option<u32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonBins {
    Uniform { min: f64, max: f64, count: usize },
    Edges(Vec<f64>),
}

fn window(bounds: Option<[f64; 2]>) -> Window {
    bounds.map_or_else(Window::default, |[lo, hi]| Window::between(lo, hi))
}

fn parse_bounds(label: &str) -> std::result::Result<BoundsStatus, CoreError> {
    BoundsStatus::ALL
        .into_iter()
        .find(|s| s.label() == label)
        .ok_or_else(|| CoreError::config(format!("unknown bounds status {label:?}")))
}

impl JsonNumerator {
    fn into_numerator(self) -> std::result::Result<Numerator, CoreError> {
        DetectorSystem::from_code(self.system)?;
        let missing = |field: &str| {
            CoreError::config(format!("{} numerator requires `{field}`", self.kind))
        };
        match self.kind.as_str() {
            "hit" => Ok(Numerator::Hit {
                system: self.system,
                layer: self.layer.ok_or_else(|| missing("layer"))?,
            }),
            "double_layer" => Ok(Numerator::DoubleLayer {
                system: self.system,
                double_layer: self.double_layer.ok_or_else(|| missing("double_layer"))?,
            }),
            "doublets" => Ok(Numerator::Doublets {
                system: self.system,
                double_layer: self.double_layer.ok_or_else(|| missing("double_layer"))?,
            }),
            other => Err(CoreError::config(format!("unknown numerator kind {other:?}"))),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// holds invalid values.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let json_config: JsonConfig = serde_json::from_reader(reader)?;
        Self::from_json_config(json_config)
    }

    /// Load configuration from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the string is not valid JSON or holds invalid
    /// values.
    pub fn from_json(json: &str) -> Result<Self> {
        let json_config: JsonConfig = serde_json::from_str(json)?;
        Self::from_json_config(json_config)
    }

    fn from_json_config(config: JsonConfig) -> Result<Self> {
        let encoding = config.encoding.as_deref().unwrap_or(CellIdLayout::STANDARD_ENCODING);
        let layout = CellIdLayout::parse(encoding)?;
        for &code in config.conversion.systems.iter().flatten() {
            DetectorSystem::from_code(code)?;
        }

        let conversion = ConversionConfig {
            layout,
            signal_marker: config.conversion.signal_marker,
            particles_of_interest: config.conversion.particles_of_interest,
            systems: config.conversion.systems,
            layers: config.conversion.layers,
        };

        let d = config.doublets;
        let doublets = DoubletConfig {
            propagate_signal: d.propagate_signal,
            granularity: if d.fine {
                Granularity::Fine
            } else {
                Granularity::Coarse
            },
            // Cuts apply by default once both thresholds are given.
            apply_cuts: d
                .apply_cuts
                .unwrap_or(d.dz_cut.is_some() && d.dr_cut.is_some()),
            cuts: DoubletCuts {
                dz: d.dz_cut,
                dr: d.dr_cut,
                dphi: d.dphi_cut,
            },
            compute_dphi: d.compute_dphi || d.dphi_cut.is_some(),
            progress_interval: d.progress_interval,
        };

        let m = config.module_map;
        let require = match m.prune_rule.as_deref() {
            None | Some("both") => PruneRule::Both,
            Some("either") => PruneRule::Either,
            Some(other) => {
                return Err(CoreError::config(format!("unknown prune rule {other:?}")).into())
            }
        };
        let transition = match m.transition.as_deref() {
            None | Some("double_layer_boundary") => TransitionRule::DoubleLayerBoundary,
            Some("any_successor") => TransitionRule::AnySuccessor,
            Some(other) => {
                return Err(CoreError::config(format!("unknown transition rule {other:?}")).into())
            }
        };
        let module_map = ModuleMapConfig {
            min_pt: m.min_pt,
            transition,
            min_count: m.min_count,
            min_fraction: m.min_fraction,
            require,
            barrel_only: m.barrel_only,
        };

        let e = config.efficiency;
        let acceptance = AcceptanceCuts {
            pdg: e.acceptance.pdg,
            require_charged: e.acceptance.require_charged,
            min_pt: e.acceptance.min_pt,
            max_vertex_r: e.acceptance.max_vertex_r,
            max_vertex_z: e.acceptance.max_vertex_z,
            min_endpoint_r: e.acceptance.min_endpoint_r,
            max_abs_eta: e.acceptance.max_abs_eta,
        };
        let quality = HitQuality {
            time: window(e.quality.time),
            costheta: window(e.quality.costheta),
            momentum_fraction: window(e.quality.momentum_fraction),
            bounds: e
                .quality
                .bounds
                .map(|labels| {
                    labels
                        .iter()
                        .map(|l| parse_bounds(l))
                        .collect::<std::result::Result<Vec<_>, CoreError>>()
                })
                .transpose()?,
        };
        quality.validate()?;
        let efficiency = EfficiencyConfig {
            acceptance,
            quality,
            numerator: e.numerator.map(JsonNumerator::into_numerator).transpose()?,
            kinematic: e
                .kinematic
                .as_deref()
                .map_or(Ok(Kinematic::Pt), Kinematic::from_name)?,
            binning: e
                .bins
                .map(|bins| match bins {
                    JsonBins::Uniform { min, max, count } => Binning::uniform(min, max, count),
                    JsonBins::Edges(edges) => Binning::from_edges(edges),
                })
                .transpose()?,
        };

        let config = Self {
            conversion,
            doublets,
            module_map,
            efficiency,
        };
        config.doublets.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use approx::assert_relative_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config.conversion.layout, CellIdLayout::standard());
        assert!(!config.doublets.apply_cuts);
        assert!(config.module_map.min_pt.is_none());
        assert!(config.efficiency.numerator.is_none());
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "encoding": "system:5,side:-2,layer:6,module:11,sensor:8",
            "conversion": {
                "signal_marker": "muonGun",
                "particles_of_interest": [13],
                "systems": [3, 5]
            },
            "doublets": { "dz_cut": 2.0, "dr_cut": 1.0, "fine": true },
            "module_map": { "min_pt": 1.0, "min_fraction": 0.01, "prune_rule": "either" },
            "efficiency": {
                "acceptance": { "pdg": [13], "min_pt": 0.5, "max_abs_eta": 1.0 },
                "quality": { "time": [-0.09, 0.15], "bounds": ["inside", "undefined"] },
                "numerator": { "kind": "doublets", "system": 3, "double_layer": 0 },
                "kinematic": "eta",
                "bins": { "min": -1.0, "max": 1.0, "count": 20 }
            }
        }"#;
        let config = PipelineConfig::from_json(json).unwrap();

        assert_eq!(config.conversion.signal_marker.as_deref(), Some("muonGun"));
        assert!(config.doublets.apply_cuts);
        assert_eq!(config.doublets.granularity, Granularity::Fine);
        assert_relative_eq!(config.doublets.cuts.dz.unwrap(), 2.0);
        assert_eq!(config.module_map.require, PruneRule::Either);
        assert_eq!(
            config.efficiency.numerator,
            Some(Numerator::Doublets {
                system: 3,
                double_layer: 0
            })
        );
        assert_eq!(config.efficiency.kinematic, Kinematic::Eta);
        assert_eq!(config.efficiency.binning.unwrap().bins(), 20);
        assert_eq!(
            config.efficiency.quality.bounds,
            Some(vec![BoundsStatus::Inside, BoundsStatus::Undefined])
        );
    }

    #[test]
    fn test_explicit_edges() {
        let json = r#"{"efficiency": {"bins": [0.0, 1.0, 5.0, 10.0]}}"#;
        let config = PipelineConfig::from_json(json).unwrap();
        assert_eq!(config.efficiency.binning.unwrap().edges(), &[0.0, 1.0, 5.0, 10.0]);
    }

    #[test]
    fn test_cuts_without_thresholds_rejected() {
        let result = PipelineConfig::from_json(r#"{"doublets": {"apply_cuts": true, "dz_cut": 2.0}}"#);
        assert!(matches!(result, Err(Error::CoreError(CoreError::ConfigError(_)))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        for json in [
            r#"{"encoding": "system:5,layer:6"}"#,
            r#"{"module_map": {"prune_rule": "sometimes"}}"#,
            r#"{"efficiency": {"numerator": {"kind": "hit", "system": 3}}}"#,
            r#"{"efficiency": {"kinematic": "rapidity"}}"#,
            r#"{"efficiency": {"quality": {"bounds": ["nowhere"]}}}"#,
            r#"{"efficiency": {"quality": {"time": [1.0, -1.0]}}}"#,
        ] {
            assert!(PipelineConfig::from_json(json).is_err(), "{json}");
        }
        for json in [
            r#"{"conversion": {"systems": [3, 7]}}"#,
            r#"{"efficiency": {"numerator": {"kind": "hit", "system": 0, "layer": 1}}}"#,
        ] {
            assert!(
                matches!(
                    PipelineConfig::from_json(json),
                    Err(Error::CoreError(CoreError::ConfigError(_)))
                ),
                "{json}"
            );
        }
        for json in [
            r#"{"conversion": {"systems": [1, 2, 3, 4, 5, 6]}}"#,
            r#"{"module_map": {"barrel_only": true}}"#,
        ] {
            assert!(PipelineConfig::from_json(json).is_ok(), "{json}");
        }
        assert!(matches!(
            PipelineConfig::from_json(r#"{"doublets": {"dz": 1.0}}"#),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"module_map": {{"min_pt": 0.9, "min_count": 3}}}}"#).unwrap();
        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.module_map.min_count, Some(3));
        assert!(config.module_map.validate().is_ok());
    }
}
