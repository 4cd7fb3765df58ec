//! Class-stratified point sampling over a feature stack.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::config::{Partition, SamplingConfig};
use crate::error::{PipelineError, Result};
use crate::geometry::Region;
use crate::labels::ClassLabel;
use crate::stack::{FeatureStack, TARGET};

/// One sampled pixel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRecord {
    /// One value per non-target band, in stack order.
    pub features: Vec<f32>,
    pub label: ClassLabel,
    pub region: String,
    pub row: usize,
    pub col: usize,
    /// Uniform `[0, 1)` column used by the single-raster split.
    pub random: f64,
}

/// How many records a class asked for and how many it got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassFill {
    pub class: ClassLabel,
    pub requested: usize,
    pub drawn: usize,
}

impl ClassFill {
    /// Fewer eligible pixels than requested. Not an error, never padded.
    pub fn is_partial(&self) -> bool {
        self.drawn < self.requested
    }
}

/// Records drawn from one stack layout.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SampleSet {
    pub band_names: Vec<String>,
    pub records: Vec<SampleRecord>,
    pub fills: Vec<ClassFill>,
}

impl SampleSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn labels(&self) -> Vec<ClassLabel> {
        self.records.iter().map(|r| r.label).collect()
    }

    pub fn count_of(&self, class: ClassLabel) -> usize {
        self.records.iter().filter(|r| r.label == class).count()
    }

    /// Train (`random < threshold`) and validation (`random >= threshold`).
    pub fn split_by_random_column(&self, threshold: f64) -> (SampleSet, SampleSet) {
        let (train, validation): (Vec<_>, Vec<_>) =
            self.records.iter().cloned().partition(|r| r.random < threshold);
        let subset = |records| SampleSet { band_names: self.band_names.clone(), records, fills: Vec::new() };
        (subset(train), subset(validation))
    }
}

/// Draws a fixed number of pixels per class inside a region.
pub struct StratifiedSampler<'a> {
    region: &'a Region,
    scale_m: f64,
    seed: u64,
}

impl<'a> StratifiedSampler<'a> {
    pub fn new(region: &'a Region, scale_m: f64, seed: u64) -> Self {
        Self { region, scale_m, seed }
    }

    pub fn with_seed(&self, seed: u64) -> Self {
        Self { seed, ..*self }
    }

    /// Sample `points_per_class` pixels of every class observed in `class_band`
    /// (class 0 excluded) on a lattice of spacing `scale_m`. Pixels with any
    /// masked feature are not eligible.
    pub fn sample(&self, stack: &FeatureStack, class_band: &str, points_per_class: usize) -> Result<SampleSet> {
        let labels = stack
            .band(class_band)
            .ok_or_else(|| PipelineError::missing_band(class_band, "feature stack"))?;
        let grid = *stack.grid();
        let (cx, cy) = grid.cell_size_m();
        let step_c = ((self.scale_m / cx).round() as usize).max(1);
        let step_r = ((self.scale_m / cy).round() as usize).max(1);

        let mut eligible: BTreeMap<ClassLabel, Vec<usize>> = BTreeMap::new();
        for row in (0..grid.height).step_by(step_r) {
            for col in (0..grid.width).step_by(step_c) {
                let idx = row * grid.width + col;
                let class = match ClassLabel::from_value(labels.data[idx]) {
                    Some(c) if c.is_scored() => c,
                    _ => continue,
                };
                let (lon, lat) = grid.cell_center(row, col);
                if !self.region.contains(lon, lat) {
                    continue;
                }
                if stack.features().iter().any(|b| !b.data[idx].is_finite()) {
                    continue;
                }
                eligible.entry(class).or_default().push(idx);
            }
        }

        if eligible.is_empty() {
            return Err(PipelineError::EmptyRegion { region: self.region.name.clone() });
        }
        debug!("[sampler] lattice step {step_c}x{step_r} px, {} classes eligible", eligible.len());

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut records = Vec::new();
        let mut fills = Vec::with_capacity(eligible.len());
        for (class, mut pixels) in eligible {
            let n = points_per_class.min(pixels.len());
            let (chosen, _) = pixels.partial_shuffle(&mut rng, n);
            chosen.sort_unstable();
            for &idx in chosen.iter() {
                records.push(SampleRecord {
                    features: stack.feature_vector(idx),
                    label: class,
                    region: self.region.name.clone(),
                    row: idx / grid.width,
                    col: idx % grid.width,
                    random: rng.gen::<f64>(),
                });
            }
            let fill = ClassFill { class, requested: points_per_class, drawn: n };
            if fill.is_partial() {
                warn!(
                    "[sampler] {}: class {} has {} eligible pixels, {} requested",
                    self.region.name, class, n, points_per_class
                );
            }
            fills.push(fill);
        }

        info!("[sampler] {}: {} records from {}", self.region.name, records.len(), class_band);
        Ok(SampleSet { band_names: stack.feature_names(), records, fills })
    }
}

/// Training and validation records for one run.
#[derive(Debug, Clone)]
pub struct SamplePartition {
    pub training: SampleSet,
    pub validation: SampleSet,
    pub training_fill: Vec<ClassFill>,
    pub validation_fill: Vec<ClassFill>,
}

/// Apply the configured partition mode. Dual mode needs the stack carrying the
/// validation label; its seed is offset so the two draws are independent.
pub fn partition(
    sampler: &StratifiedSampler<'_>,
    training_stack: &FeatureStack,
    validation_stack: Option<&FeatureStack>,
    cfg: &SamplingConfig,
) -> Result<SamplePartition> {
    match cfg.partition {
        Partition::Single { split } => {
            let all = sampler.sample(training_stack, TARGET, cfg.training_points_per_class)?;
            let (training, validation) = all.split_by_random_column(split);
            debug!("[sampler] split at {split}: {} train / {} validation", training.len(), validation.len());
            Ok(SamplePartition {
                training,
                validation,
                training_fill: all.fills.clone(),
                validation_fill: all.fills,
            })
        }
        Partition::Dual => {
            let validation_stack = validation_stack
                .ok_or_else(|| PipelineError::config("dual partition requires a validation label raster"))?;
            let training = sampler.sample(training_stack, TARGET, cfg.training_points_per_class)?;
            let validation = sampler.with_seed(sampler.seed.wrapping_add(1)).sample(
                validation_stack,
                TARGET,
                cfg.validation_points_per_class,
            )?;
            Ok(SamplePartition {
                training_fill: training.fills.clone(),
                validation_fill: validation.fills.clone(),
                training,
                validation,
            })
        }
    }
}
