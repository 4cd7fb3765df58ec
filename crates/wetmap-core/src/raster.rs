use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Metres per degree of latitude (spherical approximation).
pub const METRES_PER_DEGREE: f64 = 111_320.0;

/// Spatial layout shared by every band of a stack.
/// Extent in EPSG:4326 degrees; row 0 is the southern edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub width: usize,
    pub height: usize,
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl GridSpec {
    pub fn new(width: usize, height: usize, min_lon: f64, max_lon: f64, min_lat: f64, max_lat: f64) -> Self {
        Self { width, height, min_lon, max_lon, min_lat, max_lat }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pixel width in degrees of longitude.
    pub fn dx(&self) -> f64 {
        (self.max_lon - self.min_lon) / self.width as f64
    }

    /// Pixel height in degrees of latitude.
    pub fn dy(&self) -> f64 {
        (self.max_lat - self.min_lat) / self.height as f64
    }

    /// Geographic centre `(lon, lat)` of pixel `(row, col)`.
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.min_lon + (col as f64 + 0.5) * self.dx(),
            self.min_lat + (row as f64 + 0.5) * self.dy(),
        )
    }

    /// Approximate metric pixel size `(x, y)` at the grid's mid-latitude.
    pub fn cell_size_m(&self) -> (f64, f64) {
        let mid_lat = (self.min_lat + self.max_lat) / 2.0;
        let cy = self.dy().abs() * METRES_PER_DEGREE;
        let cx = self.dx().abs() * METRES_PER_DEGREE * mid_lat.to_radians().cos();
        (cx, cy)
    }

    /// Grid covering the same extent at a different metric pixel size.
    pub fn at_scale(&self, scale_m: f64) -> GridSpec {
        let (cx, cy) = self.cell_size_m();
        let width = ((self.width as f64 * cx / scale_m).round() as usize).max(1);
        let height = ((self.height as f64 * cy / scale_m).round() as usize).max(1);
        GridSpec { width, height, ..*self }
    }

    fn approx_eq(&self, other: &GridSpec) -> bool {
        const EPS: f64 = 1e-9;
        self.width == other.width
            && self.height == other.height
            && (self.min_lon - other.min_lon).abs() < EPS
            && (self.max_lon - other.max_lon).abs() < EPS
            && (self.min_lat - other.min_lat).abs() < EPS
            && (self.max_lat - other.max_lat).abs() < EPS
    }
}

/// A named single-channel raster layer. `NaN` marks a masked pixel.
/// Row-major, `grid.width × grid.height` values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    pub grid: GridSpec,
    pub data: Vec<f32>,
}

impl Band {
    /// Create a band filled with the given value.
    pub fn filled(name: impl Into<String>, grid: GridSpec, fill: f32) -> Self {
        Self { name: name.into(), grid, data: vec![fill; grid.len()] }
    }

    /// Create a fully masked band.
    pub fn masked(name: impl Into<String>, grid: GridSpec) -> Self {
        Self::filled(name, grid, f32::NAN)
    }

    pub fn from_data(name: impl Into<String>, grid: GridSpec, data: Vec<f32>) -> Result<Self> {
        let name = name.into();
        if data.len() != grid.len() {
            return Err(PipelineError::GridMismatch(format!(
                "band {name}: {} values for a {}x{} grid",
                data.len(),
                grid.width,
                grid.height
            )));
        }
        Ok(Self { name, grid, data })
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.grid.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f32) {
        self.data[row * self.grid.width + col] = val;
    }

    /// Same pixels under a new name.
    pub fn renamed(&self, name: impl Into<String>) -> Band {
        Band { name: name.into(), grid: self.grid, data: self.data.clone() }
    }

    pub fn same_grid(&self, other: &Band) -> bool {
        self.grid.approx_eq(&other.grid)
    }

    pub fn ensure_grid(&self, grid: &GridSpec) -> Result<()> {
        if self.grid.approx_eq(grid) {
            Ok(())
        } else {
            Err(PipelineError::GridMismatch(format!(
                "band {} is {}x{}, expected {}x{}",
                self.name, self.grid.width, self.grid.height, grid.width, grid.height
            )))
        }
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| v.is_finite()).count()
    }

    /// Sample the band at (lon, lat) using bilinear interpolation between pixel
    /// centres. Returns None if (lon, lat) is outside the band extent; the result
    /// is masked if any contributing pixel is masked.
    pub fn sample(&self, lon: f64, lat: f64) -> Option<f32> {
        let g = &self.grid;
        if g.is_empty() || lon < g.min_lon || lon > g.max_lon || lat < g.min_lat || lat > g.max_lat {
            return None;
        }

        let fx = ((lon - g.min_lon) / g.dx() - 0.5).clamp(0.0, (g.width - 1) as f64);
        let fy = ((lat - g.min_lat) / g.dy() - 0.5).clamp(0.0, (g.height - 1) as f64);

        let x0 = fx.floor() as usize;
        let y0 = fy.floor() as usize;
        let x1 = (x0 + 1).min(g.width - 1);
        let y1 = (y0 + 1).min(g.height - 1);

        let tx = (fx - x0 as f64) as f32;
        let ty = (fy - y0 as f64) as f32;

        let v00 = self.get(y0, x0);
        let v10 = self.get(y0, x1);
        let v01 = self.get(y1, x0);
        let v11 = self.get(y1, x1);

        // Zero-weight taps are skipped so a masked neighbour only masks the
        // result when it actually contributes.
        let taps = [
            (v00, (1.0 - tx) * (1.0 - ty)),
            (v10, tx * (1.0 - ty)),
            (v01, (1.0 - tx) * ty),
            (v11, tx * ty),
        ];
        let v = taps
            .iter()
            .filter(|(_, w)| *w > 0.0)
            .map(|(val, w)| val * w)
            .sum::<f32>();

        Some(v)
    }

    /// Bilinear resampling onto `target`. Pixels whose centre falls outside this
    /// band's extent are masked.
    pub fn resample_bilinear(&self, target: &GridSpec) -> Band {
        let mut data = Vec::with_capacity(target.len());
        for r in 0..target.height {
            for c in 0..target.width {
                let (lon, lat) = target.cell_center(r, c);
                data.push(self.sample(lon, lat).unwrap_or(f32::NAN));
            }
        }
        Band { name: self.name.clone(), grid: *target, data }
    }

    /// Nearest-neighbour resampling onto `target`, for categorical bands.
    pub fn resample_nearest(&self, target: &GridSpec) -> Band {
        let g = &self.grid;
        let mut data = Vec::with_capacity(target.len());
        for r in 0..target.height {
            for c in 0..target.width {
                let (lon, lat) = target.cell_center(r, c);
                let fx = (lon - g.min_lon) / g.dx();
                let fy = (lat - g.min_lat) / g.dy();
                let v = if g.is_empty() || fx < 0.0 || fy < 0.0 || fx >= g.width as f64 || fy >= g.height as f64 {
                    f32::NAN
                } else {
                    self.get(fy as usize, fx as usize)
                };
                data.push(v);
            }
        }
        Band { name: self.name.clone(), grid: *target, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_grid(n: usize) -> GridSpec {
        GridSpec::new(n, n, 0.0, n as f64, 0.0, n as f64)
    }

    #[test]
    fn sample_at_pixel_centres_returns_exact_values() {
        let mut b = Band::filled("dem", unit_grid(4), 0.0);
        b.set(0, 0, 10.0);
        b.set(0, 3, 20.0);
        b.set(3, 0, 30.0);
        b.set(3, 3, 40.0);

        assert!((b.sample(0.5, 0.5).unwrap() - 10.0).abs() < 1e-5);
        assert!((b.sample(3.5, 0.5).unwrap() - 20.0).abs() < 1e-5);
        assert!((b.sample(0.5, 3.5).unwrap() - 30.0).abs() < 1e-5);
        assert!((b.sample(3.5, 3.5).unwrap() - 40.0).abs() < 1e-5);
    }

    #[test]
    fn sample_between_centres_interpolates() {
        let mut b = Band::filled("slope", unit_grid(2), 0.0);
        b.set(0, 1, 4.0);
        b.set(1, 1, 4.0);
        let v = b.sample(1.0, 1.0).unwrap();
        assert!((v - 2.0).abs() < 1e-5, "midpoint should be 2.0, got {v}");
    }

    #[test]
    fn sample_out_of_bounds_returns_none() {
        let b = Band::filled("tpi", unit_grid(4), 1.0);
        assert!(b.sample(-0.1, 1.0).is_none());
        assert!(b.sample(1.0, 4.5).is_none());
    }

    #[test]
    fn masked_neighbour_masks_interpolation() {
        let mut b = Band::filled("twi", unit_grid(2), 1.0);
        b.set(1, 1, f32::NAN);
        assert!(b.sample(1.0, 1.0).unwrap().is_nan());
        assert_eq!(b.sample(0.5, 0.5), Some(1.0));
    }

    #[test]
    fn resample_to_finer_grid_preserves_ramp() {
        // Coarse 4x4 ramp along longitude, resampled to 8x8 over the same extent.
        let coarse_grid = unit_grid(4);
        let mut coarse = Band::filled("dem", coarse_grid, 0.0);
        for r in 0..4 {
            for c in 0..4 {
                coarse.set(r, c, c as f32 * 10.0);
            }
        }
        let fine_grid = GridSpec::new(8, 8, 0.0, 4.0, 0.0, 4.0);
        let fine = coarse.resample_bilinear(&fine_grid);
        assert_eq!(fine.data.len(), 64);
        assert_eq!(fine.name, "dem");
        // Fine column 3 centre is at lon 1.75 → coarse fx = 1.25 → 12.5.
        assert!((fine.get(2, 3) - 12.5).abs() < 1e-4, "got {}", fine.get(2, 3));
        // Monotone along each row.
        for c in 1..8 {
            assert!(fine.get(5, c) >= fine.get(5, c - 1));
        }
    }

    #[test]
    fn from_data_rejects_wrong_length() {
        let err = Band::from_data("B2", unit_grid(3), vec![0.0; 8]).unwrap_err();
        assert!(matches!(err, PipelineError::GridMismatch(_)));
    }

    #[test]
    fn cell_size_scales_with_latitude() {
        let equator = GridSpec::new(10, 10, 0.0, 0.001, 0.0, 0.001);
        let north = GridSpec::new(10, 10, 0.0, 0.001, 60.0, 60.001);
        let (ex, ey) = equator.cell_size_m();
        let (nx, ny) = north.cell_size_m();
        assert!((ex - ey).abs() < 0.01);
        assert!((nx - ex * 0.5).abs() < 0.01, "cos(60°) halves x size: {nx} vs {ex}");
        assert!((ny - ey).abs() < 1e-9);
    }

    #[test]
    fn nearest_keeps_categories() {
        let mut classes = Band::filled("classification", unit_grid(2), 1.0);
        classes.set(1, 1, 3.0);
        let fine = classes.resample_nearest(&GridSpec::new(4, 4, 0.0, 2.0, 0.0, 2.0));
        assert_eq!(fine.grid.width, 4);
        assert!(fine.data.iter().all(|&v| v == 1.0 || v == 3.0));
        assert_eq!(fine.get(3, 3), 3.0);
        assert_eq!(fine.get(0, 0), 1.0);
    }
}
