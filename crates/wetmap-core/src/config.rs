//! Immutable run configuration.
//!
//! Loaded once from JSON, validated before any compute, then passed by
//! reference into every component. Defaults reproduce the values the mapping
//! runs were calibrated with.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::collection::OrbitPass;
use crate::error::{PipelineError, Result};
use crate::labels::LabelMode;
use crate::regions;
use crate::season::Season;

/// Derived normalized-difference indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpectralIndex {
    /// (VV − VH) / (VV + VH) from the SAR composites.
    Ndpi,
    /// (NIR − red) / (NIR + red), bands B8 and B4.
    Ndvi,
    /// (green − NIR) / (green + NIR), bands B3 and B8.
    Ndwi,
}

impl SpectralIndex {
    pub fn name(self) -> &'static str {
        match self {
            SpectralIndex::Ndpi => "NDPI",
            SpectralIndex::Ndvi => "NDVI",
            SpectralIndex::Ndwi => "NDWI",
        }
    }

    /// `(a, b)` source bands of `(a − b) / (a + b)`.
    pub fn operands(self) -> (&'static str, &'static str) {
        match self {
            SpectralIndex::Ndpi => ("VV", "VH"),
            SpectralIndex::Ndvi => ("B8", "B4"),
            SpectralIndex::Ndwi => ("B3", "B8"),
        }
    }

    pub fn is_radar(self) -> bool {
        matches!(self, SpectralIndex::Ndpi)
    }
}

/// Per-branch band lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandSelection {
    pub sar: Vec<String>,
    pub optical: Vec<String>,
    pub indices: Vec<SpectralIndex>,
    pub topographic: Vec<String>,
}

impl Default for BandSelection {
    fn default() -> Self {
        let s = |v: &[&str]| v.iter().map(|b| b.to_string()).collect();
        Self {
            sar: s(&["VV", "VH"]),
            optical: s(&["B2", "B3", "B4", "B8"]),
            indices: vec![SpectralIndex::Ndvi, SpectralIndex::Ndwi],
            topographic: s(&["tpi", "twi", "slope"]),
        }
    }
}

impl BandSelection {
    pub fn radar_indices(&self) -> impl Iterator<Item = SpectralIndex> + '_ {
        self.indices.iter().copied().filter(|i| i.is_radar())
    }

    pub fn optical_indices(&self) -> impl Iterator<Item = SpectralIndex> + '_ {
        self.indices.iter().copied().filter(|i| !i.is_radar())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SarParams {
    pub instrument_mode: String,
    pub required_polarisation: String,
    pub orbit_pass: OrbitPass,
    /// Backscatter below this value (dB) in any selected polarisation is
    /// treated as a swath-edge artifact.
    pub edge_threshold_db: f32,
}

impl Default for SarParams {
    fn default() -> Self {
        Self {
            instrument_mode: "IW".into(),
            required_polarisation: "VV".into(),
            orbit_pass: OrbitPass::Descending,
            edge_threshold_db: -30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticalParams {
    /// Granules at or above this cloud cover are dropped.
    pub max_cloudy_pixel_percentage: f64,
    pub qa_band: String,
    pub cloud_bit: u8,
    pub cirrus_bit: u8,
    pub cloud_probability_band: String,
    /// Inclusive upper bound.
    pub max_cloud_probability: f32,
    /// Coastal-aerosol band; high values flag haze.
    pub aerosol_band: String,
    /// Inclusive upper bound.
    pub max_aerosol: f32,
}

impl Default for OpticalParams {
    fn default() -> Self {
        Self {
            max_cloudy_pixel_percentage: 20.0,
            qa_band: "QA60".into(),
            cloud_bit: 10,
            cirrus_bit: 11,
            cloud_probability_band: "MSK_CLDPRB".into(),
            max_cloud_probability: 5.0,
            aerosol_band: "B1".into(),
            max_aerosol: 1800.0,
        }
    }
}

fn default_split() -> f64 {
    0.6
}

/// How training and validation records are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Partition {
    /// One stratified sample split by a uniform random column:
    /// train `< split`, validation `>= split`.
    Single {
        #[serde(default = "default_split")]
        split: f64,
    },
    /// Independent stratified samples from the training and validation rasters.
    #[default]
    Dual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub training_points_per_class: usize,
    pub validation_points_per_class: usize,
    pub partition: Partition,
    /// Sampling pixel spacing (m). `None` uses the label mode's spacing.
    pub scale_m: Option<f64>,
    pub seed: u64,
    /// Keep pixel coordinates on exported sample tables.
    pub keep_geometries: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            training_points_per_class: 5000,
            validation_points_per_class: 10000,
            partition: Partition::Dual,
            scale_m: None,
            seed: 42,
            keep_geometries: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Target coordinate system of the classified raster.
    pub crs: String,
    /// Output pixel size (m).
    pub scale_m: f64,
    pub max_pixels: u64,
    /// Also export the classified training/validation tables.
    pub classified_samples: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            crs: "EPSG:3006".into(),
            scale_m: 10.0,
            max_pixels: 3_784_216_672_400,
            classified_samples: true,
        }
    }
}

/// What to do with a window whose collection is empty after filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyWindowPolicy {
    Fail,
    /// Substitute fully masked bands with the expected names.
    #[default]
    Degrade,
}

/// Everything a run needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// County name from the region table, or `all`.
    pub region: String,
    pub label_mode: LabelMode,
    pub years: Vec<i32>,
    pub seasons: Vec<Season>,
    pub bands: BandSelection,
    pub sar: SarParams,
    pub optical: OpticalParams,
    pub sampling: SamplingConfig,
    pub export: ExportConfig,
    pub on_empty_window: EmptyWindowPolicy,
    /// Boundary-simplification retries after a resource-limit rejection.
    pub max_geometry_retries: u32,
    /// Run interactive diagnostics (bounded by `interactive_timeout_secs`).
    pub verbose: bool,
    pub interactive_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            region: "Norrbotten".into(),
            label_mode: LabelMode::Digitized,
            years: vec![2021],
            seasons: vec![Season::Summer],
            bands: BandSelection::default(),
            sar: SarParams::default(),
            optical: OpticalParams::default(),
            sampling: SamplingConfig::default(),
            export: ExportConfig::default(),
            on_empty_window: EmptyWindowPolicy::Degrade,
            max_geometry_retries: 3,
            verbose: false,
            interactive_timeout_secs: 300,
        }
    }
}

impl RunConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Sampling spacing after applying the label-mode default.
    pub fn sampling_scale_m(&self) -> f64 {
        self.sampling.scale_m.unwrap_or_else(|| self.label_mode.default_scale_m())
    }

    /// Report every problem at once as a single configuration error.
    pub fn validate(&self) -> Result<()> {
        let mut problems: Vec<String> = Vec::new();

        if self.years.is_empty() {
            problems.push("years is empty".into());
        }
        for (i, y) in self.years.iter().enumerate() {
            if self.years[..i].contains(y) {
                problems.push(format!("year {y} listed twice"));
            }
        }
        if self.seasons.is_empty() {
            problems.push("seasons is empty".into());
        }
        if !regions::is_known(&self.region) {
            problems.push(format!("unknown region '{}'", self.region));
        }

        let s = &self.sampling;
        if s.training_points_per_class == 0 {
            problems.push("training_points_per_class must be positive".into());
        }
        match s.partition {
            Partition::Single { split } => {
                if !(split > 0.0 && split < 1.0) {
                    problems.push(format!("split fraction {split} must lie in (0, 1)"));
                }
            }
            Partition::Dual => {
                if s.validation_points_per_class == 0 {
                    problems.push("validation_points_per_class must be positive".into());
                }
                if self.label_mode.validation_asset().is_none() {
                    problems.push(format!(
                        "label mode {:?} has no validation raster; use the single partition",
                        self.label_mode
                    ));
                }
            }
        }
        if !(self.sampling_scale_m() > 0.0) {
            problems.push("sampling scale must be positive".into());
        }
        if !(self.export.scale_m > 0.0) {
            problems.push("export scale must be positive".into());
        }

        for (field, bit) in [("cloud_bit", self.optical.cloud_bit), ("cirrus_bit", self.optical.cirrus_bit)] {
            if bit >= 32 {
                problems.push(format!("{field} {bit} must be below 32"));
            }
        }

        let b = &self.bands;
        if b.sar.is_empty() && b.optical.is_empty() {
            problems.push("no SAR or optical bands selected".into());
        }
        for (branch, list) in [("sar", &b.sar), ("optical", &b.optical), ("topographic", &b.topographic)] {
            for (i, name) in list.iter().enumerate() {
                if list[..i].contains(name) {
                    problems.push(format!("{branch} band {name} listed twice"));
                }
            }
        }
        for idx in &b.indices {
            let (a, c) = idx.operands();
            let pool = if idx.is_radar() { &b.sar } else { &b.optical };
            for op in [a, c] {
                if !pool.iter().any(|n| n == op) {
                    problems.push(format!("{} needs band {op}", idx.name()));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Configuration(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        RunConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = RunConfig::from_json_str(
            r#"{ "region": "Uppsala", "years": [2020, 2021], "seasons": ["winter", "summer"],
                 "sampling": { "partition": { "mode": "single", "split": 0.6 } } }"#,
        )
        .unwrap();
        assert_eq!(cfg.region, "Uppsala");
        assert_eq!(cfg.seasons, vec![Season::Winter, Season::Summer]);
        assert_eq!(cfg.sampling.partition, Partition::Single { split: 0.6 });
        assert_eq!(cfg.sampling.training_points_per_class, 5000);
        assert_eq!(cfg.sar.edge_threshold_db, -30.0);
        assert_eq!(cfg.optical.max_cloud_probability, 5.0);
        assert_eq!(cfg.export.crs, "EPSG:3006");
        cfg.validate().unwrap();
    }

    #[test]
    fn index_without_source_bands_is_rejected() {
        let mut cfg = RunConfig::default();
        cfg.bands.indices.push(SpectralIndex::Ndpi);
        cfg.bands.sar = vec!["VV".into()];
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("NDPI needs band VH"), "got {err}");
    }

    #[test]
    fn every_problem_is_reported() {
        let cfg = RunConfig {
            years: vec![],
            seasons: vec![],
            region: "Atlantis".into(),
            ..RunConfig::default()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("years is empty"));
        assert!(err.contains("seasons is empty"));
        assert!(err.contains("Atlantis"));
    }

    #[test]
    fn dual_partition_needs_a_validation_raster() {
        let cfg = RunConfig { label_mode: LabelMode::Vmi, ..RunConfig::default() };
        assert!(cfg.validate().is_err());
        let single = RunConfig {
            label_mode: LabelMode::Vmi,
            sampling: SamplingConfig { partition: Partition::Single { split: 0.6 }, ..SamplingConfig::default() },
            ..RunConfig::default()
        };
        single.validate().unwrap();
        assert_eq!(single.sampling_scale_m(), 100.0);
    }

    #[test]
    fn split_must_be_a_fraction() {
        let cfg = RunConfig {
            sampling: SamplingConfig { partition: Partition::Single { split: 1.0 }, ..SamplingConfig::default() },
            ..RunConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn single_partition_split_defaults() {
        let cfg = RunConfig::from_json_str(r#"{ "sampling": { "partition": { "mode": "single" } } }"#).unwrap();
        assert_eq!(cfg.sampling.partition, Partition::Single { split: 0.6 });
        let text = serde_json::to_string(&cfg).unwrap();
        assert_eq!(RunConfig::from_json_str(&text).unwrap(), cfg);
    }

    #[test]
    fn qa_bits_must_fit_the_mask() {
        let mut cfg = RunConfig::default();
        cfg.optical.cloud_bit = 40;
        cfg.optical.cirrus_bit = 31;
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("cloud_bit 40"), "got {err}");
        assert!(!err.contains("cirrus_bit"), "got {err}");
    }
}
