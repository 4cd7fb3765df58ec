//! Per-window sensor compositing.
//!
//! Each branch is a pure function of (collection, region bounds, window,
//! configuration). The optical branch runs first, then SAR, so the band order
//! inside a window is stable across runs.

pub mod optical;
pub mod reduce;
pub mod sar;

use crate::collection::{SensorFamily, SourceImage};
use crate::config::{BandSelection, RunConfig};
use crate::error::Result;
use crate::geometry::BBox;
use crate::raster::{Band, GridSpec};
use crate::season::TemporalWindow;

/// Bands produced for one window, in output order.
#[derive(Debug, Clone)]
pub struct WindowComposite {
    pub window: TemporalWindow,
    pub bands: Vec<Band>,
    /// Branches that had no source images and were replaced by masked bands.
    pub degraded: Vec<SensorFamily>,
}

/// Output band names of one branch for one window: selected bands, then the
/// branch's indices in configured order.
pub fn expected_band_names(bands: &BandSelection, family: SensorFamily, window: &TemporalWindow) -> Vec<String> {
    let (bases, indices): (&[String], Vec<_>) = match family {
        SensorFamily::Optical => (bands.optical.as_slice(), bands.optical_indices().collect()),
        SensorFamily::Sar => (bands.sar.as_slice(), bands.radar_indices().collect()),
    };
    bases
        .iter()
        .map(|base| window.band_name(base))
        .chain(indices.into_iter().map(|idx| window.band_name(idx.name())))
        .collect()
}

/// Branches with at least one selected band, in composition order.
pub fn active_branches(bands: &BandSelection) -> Vec<SensorFamily> {
    let mut out = Vec::with_capacity(2);
    if !bands.optical.is_empty() {
        out.push(SensorFamily::Optical);
    }
    if !bands.sar.is_empty() {
        out.push(SensorFamily::Sar);
    }
    out
}

pub struct SensorCompositor<'a> {
    config: &'a RunConfig,
    grid: GridSpec,
    bounds: BBox,
}

impl<'a> SensorCompositor<'a> {
    pub fn new(config: &'a RunConfig, grid: GridSpec, bounds: BBox) -> Self {
        Self { config, grid, bounds }
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn branches(&self) -> Vec<SensorFamily> {
        active_branches(&self.config.bands)
    }

    /// Composite one branch. Fails with `EmptyCollection` when nothing
    /// survives filtering; the caller decides whether that ends the run.
    pub fn compose(&self, family: SensorFamily, images: &[SourceImage], window: &TemporalWindow) -> Result<Vec<Band>> {
        let c = self.config;
        match family {
            SensorFamily::Optical => {
                optical::composite(images, &self.bounds, window, &c.bands, &c.optical, &self.grid)
            }
            SensorFamily::Sar => sar::composite(images, &self.bounds, window, &c.bands, &c.sar, &self.grid),
        }
    }

    /// Names `compose` would produce for `family` in `window`.
    pub fn expected_band_names(&self, family: SensorFamily, window: &TemporalWindow) -> Vec<String> {
        expected_band_names(&self.config.bands, family, window)
    }

    /// Fully masked stand-ins for a branch with no source images.
    pub fn degraded(&self, family: SensorFamily, window: &TemporalWindow) -> Vec<Band> {
        self.expected_band_names(family, window)
            .into_iter()
            .map(|name| Band::masked(name, self.grid))
            .collect()
    }

    /// Per-pixel count of valid acquisitions after masking.
    pub fn observation_count(
        &self,
        family: SensorFamily,
        images: &[SourceImage],
        window: &TemporalWindow,
    ) -> Result<Band> {
        let c = self.config;
        match family {
            SensorFamily::Optical => optical::observation_count(images, &self.bounds, window, &c.optical, &self.grid),
            SensorFamily::Sar => sar::observation_count(images, &self.bounds, window, &c.bands, &c.sar, &self.grid),
        }
    }
}
