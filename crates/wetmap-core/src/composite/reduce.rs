//! Per-pixel temporal reducers and band arithmetic.
//!
//! Masked samples (`NaN`) are skipped; a pixel with no valid sample stays
//! masked. With the `threading` feature the pixel loop runs on rayon.

use crate::error::{PipelineError, Result};
use crate::raster::Band;

#[cfg(not(feature = "threading"))]
fn reduce_pixels<F>(layers: &[&[f32]], reducer: F) -> Vec<f32>
where
    F: Fn(&mut Vec<f32>) -> f32 + Sync,
{
    let len = layers.first().map_or(0, |l| l.len());
    let mut buf = Vec::with_capacity(layers.len());
    (0..len)
        .map(|i| {
            buf.clear();
            buf.extend(layers.iter().map(|l| l[i]).filter(|v| v.is_finite()));
            reducer(&mut buf)
        })
        .collect()
}

#[cfg(feature = "threading")]
fn reduce_pixels<F>(layers: &[&[f32]], reducer: F) -> Vec<f32>
where
    F: Fn(&mut Vec<f32>) -> f32 + Sync,
{
    use rayon::prelude::*;

    let len = layers.first().map_or(0, |l| l.len());
    (0..len)
        .into_par_iter()
        .map_init(
            || Vec::with_capacity(layers.len()),
            |buf, i| {
                buf.clear();
                buf.extend(layers.iter().map(|l| l[i]).filter(|v| v.is_finite()));
                reducer(buf)
            },
        )
        .collect()
}

/// Arithmetic mean across time.
pub fn temporal_mean(layers: &[&[f32]]) -> Vec<f32> {
    reduce_pixels(layers, |vals| {
        if vals.is_empty() {
            return f32::NAN;
        }
        let sum: f64 = vals.iter().map(|&v| v as f64).sum();
        (sum / vals.len() as f64) as f32
    })
}

/// Median across time; an even count averages the two middle values.
pub fn temporal_median(layers: &[&[f32]]) -> Vec<f32> {
    reduce_pixels(layers, |vals| {
        let n = vals.len();
        if n == 0 {
            return f32::NAN;
        }
        vals.sort_unstable_by(|a, b| a.total_cmp(b));
        if n % 2 == 1 {
            vals[n / 2]
        } else {
            (vals[n / 2 - 1] + vals[n / 2]) / 2.0
        }
    })
}

/// Number of valid samples per pixel. Never masked.
pub fn temporal_count(layers: &[&[f32]]) -> Vec<f32> {
    reduce_pixels(layers, |vals| vals.len() as f32)
}

/// `(a − b) / (a + b)` per pixel. Masked when either input is masked or the
/// denominator is zero.
pub fn normalized_difference(a: &Band, b: &Band, name: impl Into<String>) -> Result<Band> {
    if !a.same_grid(b) {
        return Err(PipelineError::GridMismatch(format!(
            "normalized difference of {} and {} on different grids",
            a.name, b.name
        )));
    }
    let data = a
        .data
        .iter()
        .zip(&b.data)
        .map(|(&x, &y)| {
            let denom = x + y;
            if !x.is_finite() || !y.is_finite() || denom == 0.0 {
                f32::NAN
            } else {
                (x - y) / denom
            }
        })
        .collect();
    Band::from_data(name, a.grid, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GridSpec;

    const NAN: f32 = f32::NAN;

    #[test]
    fn mean_skips_masked_samples() {
        let a = [1.0, NAN, NAN];
        let b = [3.0, 4.0, NAN];
        let out = temporal_mean(&[&a, &b]);
        assert_eq!(out[0], 2.0);
        assert_eq!(out[1], 4.0);
        assert!(out[2].is_nan());
    }

    #[test]
    fn median_odd_and_even_counts() {
        let a = [5.0, 1.0];
        let b = [1.0, 2.0];
        let c = [3.0, NAN];
        let d = [100.0, NAN];
        let out = temporal_median(&[&a, &b, &c, &d]);
        // pixel 0: {1, 3, 5, 100} → (3 + 5) / 2
        assert_eq!(out[0], 4.0);
        // pixel 1: {1, 2} → 1.5
        assert_eq!(out[1], 1.5);
        let odd = temporal_median(&[&a, &b, &c]);
        assert_eq!(odd[0], 3.0);
    }

    #[test]
    fn median_resists_outlier_where_mean_does_not() {
        let layers: Vec<[f32; 1]> = vec![[10.0], [11.0], [12.0], [9000.0], [10.5]];
        let refs: Vec<&[f32]> = layers.iter().map(|l| &l[..]).collect();
        assert_eq!(temporal_median(&refs)[0], 11.0);
        assert!(temporal_mean(&refs)[0] > 1000.0);
    }

    #[test]
    fn count_reports_zero_for_fully_masked_pixels() {
        let a = [1.0, NAN];
        let b = [2.0, NAN];
        assert_eq!(temporal_count(&[&a, &b]), vec![2.0, 0.0]);
    }

    #[test]
    fn no_layers_yields_empty_output() {
        assert!(temporal_mean(&[]).is_empty());
    }

    #[test]
    fn normalized_difference_values_and_masks() {
        let grid = GridSpec::new(4, 1, 0.0, 4.0, 0.0, 1.0);
        let nir = Band::from_data("B8", grid, vec![3000.0, 0.0, NAN, 1000.0]).unwrap();
        let red = Band::from_data("B4", grid, vec![1000.0, 0.0, 500.0, 3000.0]).unwrap();
        let ndvi = normalized_difference(&nir, &red, "NDVI_summer2021").unwrap();
        assert_eq!(ndvi.name, "NDVI_summer2021");
        assert!((ndvi.data[0] - 0.5).abs() < 1e-6);
        assert!(ndvi.data[1].is_nan(), "zero denominator is masked");
        assert!(ndvi.data[2].is_nan());
        assert!((ndvi.data[3] + 0.5).abs() < 1e-6);
    }
}
