//! Classifier capability and a local baseline.
//!
//! The production classifier runs on the compute backend; the pipeline only
//! needs `train` and `predict`. [`MinimumDistance`] implements the same
//! contract in process so runs and tests work offline.

use log::info;
use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::geometry::Region;
use crate::labels::ClassLabel;
use crate::raster::Band;
use crate::sampling::SampleSet;
use crate::stack::FeatureStack;

/// Relative contribution of one input band.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureImportance {
    pub band: String,
    pub importance: f64,
}

pub trait TrainedModel: Send + Sync {
    /// Class of one feature vector in sample-set band order. Vectors with no
    /// finite value predict `NoData`.
    fn predict(&self, features: &[f32]) -> ClassLabel;

    fn feature_importance(&self) -> Vec<FeatureImportance>;
}

pub trait Classifier {
    type Model: TrainedModel + 'static;

    fn train(&self, samples: &SampleSet) -> Result<Self::Model>;
}

/// Nearest class centroid on standardised features.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimumDistance;

#[derive(Debug, Clone)]
pub struct CentroidModel {
    band_names: Vec<String>,
    mean: Vec<f64>,
    scale: Vec<f64>,
    centroids: Vec<(ClassLabel, Vec<f64>)>,
    importance: Vec<f64>,
}

impl Classifier for MinimumDistance {
    type Model = CentroidModel;

    fn train(&self, samples: &SampleSet) -> Result<CentroidModel> {
        if samples.is_empty() {
            return Err(PipelineError::config("cannot train on an empty sample set"));
        }
        let nf = samples.band_names.len();
        let n = samples.len() as f64;

        let mut mean = vec![0.0; nf];
        for r in &samples.records {
            for (m, &v) in mean.iter_mut().zip(&r.features) {
                *m += v as f64;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0.0; nf];
        for r in &samples.records {
            for ((s, &v), m) in var.iter_mut().zip(&r.features).zip(&mean) {
                *s += (v as f64 - m).powi(2);
            }
        }
        let scale: Vec<f64> = var.iter().map(|s| (s / n).sqrt()).map(|sd| if sd > 0.0 { sd } else { 1.0 }).collect();

        // Per-class sums in raw units.
        let mut classes: Vec<(ClassLabel, usize, Vec<f64>)> = Vec::new();
        for r in &samples.records {
            let slot = match classes.iter().position(|(c, _, _)| *c == r.label) {
                Some(i) => i,
                None => {
                    classes.push((r.label, 0, vec![0.0; nf]));
                    classes.len() - 1
                }
            };
            let (_, count, sums) = &mut classes[slot];
            *count += 1;
            for (s, &v) in sums.iter_mut().zip(&r.features) {
                *s += v as f64;
            }
        }
        classes.sort_by_key(|(c, _, _)| *c);
        let class_means: Vec<(ClassLabel, usize, Vec<f64>)> = classes
            .into_iter()
            .map(|(c, count, sums)| (c, count, sums.into_iter().map(|s| s / count as f64).collect()))
            .collect();

        // Fisher ratio per band: between-class over within-class variance.
        let mut within = vec![0.0; nf];
        for r in &samples.records {
            if let Some((_, _, mu)) = class_means.iter().find(|(c, _, _)| *c == r.label) {
                for ((w, &v), m) in within.iter_mut().zip(&r.features).zip(mu) {
                    *w += (v as f64 - m).powi(2);
                }
            }
        }
        let fisher: Vec<f64> = (0..nf)
            .map(|f| {
                let between: f64 = class_means
                    .iter()
                    .map(|(_, count, mu)| *count as f64 * (mu[f] - mean[f]).powi(2))
                    .sum();
                between / within[f].max(f64::EPSILON)
            })
            .collect();
        let total: f64 = fisher.iter().sum();
        let importance = if total > 0.0 {
            fisher.iter().map(|v| v / total).collect()
        } else {
            vec![1.0 / nf.max(1) as f64; nf]
        };

        let centroids = class_means
            .into_iter()
            .map(|(c, _, mu)| {
                let z: Vec<f64> = mu.iter().zip(&mean).zip(&scale).map(|((v, m), s)| (v - m) / s).collect();
                (c, z)
            })
            .collect::<Vec<_>>();

        info!(
            "[classifier] trained on {} records, {} classes, {} features",
            samples.len(),
            centroids.len(),
            nf
        );
        Ok(CentroidModel { band_names: samples.band_names.clone(), mean, scale, centroids, importance })
    }
}

impl TrainedModel for CentroidModel {
    fn predict(&self, features: &[f32]) -> ClassLabel {
        let mut best = ClassLabel::NoData;
        let mut best_d = f64::INFINITY;
        for (class, centroid) in &self.centroids {
            let mut d = 0.0;
            let mut used = 0;
            for (((&v, m), s), c) in features.iter().zip(&self.mean).zip(&self.scale).zip(centroid) {
                if v.is_finite() {
                    d += ((v as f64 - m) / s - c).powi(2);
                    used += 1;
                }
            }
            if used > 0 && d < best_d {
                best_d = d;
                best = *class;
            }
        }
        best
    }

    fn feature_importance(&self) -> Vec<FeatureImportance> {
        self.band_names
            .iter()
            .zip(&self.importance)
            .map(|(band, &importance)| FeatureImportance { band: band.clone(), importance })
            .collect()
    }
}

/// Predict every record of a sample set.
pub fn classify_samples<M: TrainedModel + ?Sized>(model: &M, samples: &SampleSet) -> Vec<ClassLabel> {
    samples.records.iter().map(|r| model.predict(&r.features)).collect()
}

/// Classified raster of the stack, clipped to the region. Pixels outside the
/// region or without features are 0.
pub fn classify_stack<M: TrainedModel + ?Sized>(model: &M, stack: &FeatureStack, region: &Region) -> Band {
    let grid = *stack.grid();
    let mut out = Band::filled("classification", grid, ClassLabel::NoData.value() as f32);
    for row in 0..grid.height {
        for col in 0..grid.width {
            let (lon, lat) = grid.cell_center(row, col);
            if !region.contains(lon, lat) {
                continue;
            }
            let class = model.predict(&stack.feature_vector(row * grid.width + col));
            out.set(row, col, class.value() as f32);
        }
    }
    out
}
