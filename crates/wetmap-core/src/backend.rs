//! Contract with the geospatial compute backend.
//!
//! The pipeline never reads rasters directly; everything comes through an
//! [`ImageSource`]. [`InMemorySource`] keeps owned rasters in process and is
//! what the CLI archive loader and the tests use.

use std::collections::BTreeMap;

use log::debug;

use crate::collection::{in_window, SensorFamily, SourceImage};
use crate::error::{PipelineError, Result};
use crate::geometry::{BBox, Polygon, Region};
use crate::raster::{Band, GridSpec};
use crate::season::TemporalWindow;

/// One collection request: a sensor family restricted to region bounds and
/// a date window.
#[derive(Debug, Clone)]
pub struct CollectionQuery {
    pub family: SensorFamily,
    pub bounds: BBox,
    pub window: TemporalWindow,
}

pub trait ImageSource: Send + Sync {
    /// Images of `query.family` intersecting the bounds within the window.
    fn images(&self, query: &CollectionQuery) -> Result<Vec<SourceImage>>;

    /// Byte-valued label raster by asset name.
    fn label_raster(&self, asset: &str) -> Result<Band>;

    /// Static topographic layer, at its native resolution.
    fn topographic(&self, name: &str) -> Result<Band>;

    /// Administrative boundary for a region code, if the backend has one.
    fn region_boundary(&self, code: u32) -> Result<Option<Polygon>>;

    /// Working grid of the composites for requests inside `bounds`.
    fn working_grid(&self, bounds: &BBox) -> Result<GridSpec>;

    /// Reject geometries the backend cannot evaluate with `ResourceLimit`.
    fn admit_region(&self, region: &Region) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct InMemorySource {
    grid: GridSpec,
    images: Vec<SourceImage>,
    labels: BTreeMap<String, Band>,
    topographic: BTreeMap<String, Band>,
    boundaries: BTreeMap<u32, Polygon>,
    max_vertices: Option<usize>,
}

impl InMemorySource {
    pub fn new(grid: GridSpec) -> Self {
        Self {
            grid,
            images: Vec::new(),
            labels: BTreeMap::new(),
            topographic: BTreeMap::new(),
            boundaries: BTreeMap::new(),
            max_vertices: None,
        }
    }

    pub fn with_image(mut self, image: SourceImage) -> Self {
        self.images.push(image);
        self
    }

    pub fn with_label(mut self, asset: impl Into<String>, band: Band) -> Self {
        self.labels.insert(asset.into(), band);
        self
    }

    pub fn with_topographic(mut self, band: Band) -> Self {
        self.topographic.insert(band.name.clone(), band);
        self
    }

    pub fn with_boundary(mut self, code: u32, boundary: Polygon) -> Self {
        self.boundaries.insert(code, boundary);
        self
    }

    /// Reject region boundaries with more vertices than `max`.
    pub fn with_max_vertices(mut self, max: usize) -> Self {
        self.max_vertices = Some(max);
        self
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl ImageSource for InMemorySource {
    fn images(&self, query: &CollectionQuery) -> Result<Vec<SourceImage>> {
        let found: Vec<SourceImage> =
            in_window(&self.images, query.family, &query.bounds, &query.window).cloned().collect();
        debug!(
            "[backend] {} {}: {} of {} images",
            query.family,
            query.window.label,
            found.len(),
            self.images.len()
        );
        Ok(found)
    }

    fn label_raster(&self, asset: &str) -> Result<Band> {
        self.labels
            .get(asset)
            .cloned()
            .ok_or_else(|| PipelineError::missing_band(asset, "label assets"))
    }

    fn topographic(&self, name: &str) -> Result<Band> {
        self.topographic
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::missing_band(name, "topographic layers"))
    }

    fn region_boundary(&self, code: u32) -> Result<Option<Polygon>> {
        Ok(self.boundaries.get(&code).cloned())
    }

    fn working_grid(&self, bounds: &BBox) -> Result<GridSpec> {
        let g = &self.grid;
        let extent = BBox::new(g.min_lon, g.min_lat, g.max_lon, g.max_lat);
        if !extent.intersects(bounds) {
            return Err(PipelineError::EmptyRegion {
                region: format!(
                    "[{:.4}, {:.4}, {:.4}, {:.4}] outside the archive extent",
                    bounds.min_lon, bounds.min_lat, bounds.max_lon, bounds.max_lat
                ),
            });
        }
        Ok(*g)
    }

    fn admit_region(&self, region: &Region) -> Result<()> {
        match self.max_vertices {
            Some(max) if region.boundary.vertex_count() > max => Err(PipelineError::ResourceLimit(format!(
                "region {} boundary has {} vertices, limit is {max}",
                region.name,
                region.boundary.vertex_count()
            ))),
            _ => Ok(()),
        }
    }
}
