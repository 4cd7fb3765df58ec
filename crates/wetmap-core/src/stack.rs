//! Feature stack assembly and its deferred plan.
//!
//! Layout invariant: band 0 is the label renamed to [`TARGET`], followed by
//! every window's composites in planner order, then the static topographic
//! layers. Names are unique across the stack.

use std::collections::BTreeSet;

use log::{debug, info, warn};

use crate::backend::{CollectionQuery, ImageSource};
use crate::collection::SensorFamily;
use crate::composite::{active_branches, expected_band_names, SensorCompositor, WindowComposite};
use crate::config::{EmptyWindowPolicy, RunConfig};
use crate::error::{PipelineError, Result};
use crate::geometry::BBox;
use crate::raster::{Band, GridSpec};
use crate::season::TemporalWindow;

/// Canonical name of the label band.
pub const TARGET: &str = "target";

/// Ordered, named bands on one grid. Immutable once assembled.
#[derive(Debug, Clone)]
pub struct FeatureStack {
    bands: Vec<Band>,
}

impl FeatureStack {
    pub fn grid(&self) -> &GridSpec {
        &self.bands[0].grid
    }

    pub fn target(&self) -> &Band {
        &self.bands[0]
    }

    /// Every band after the target.
    pub fn features(&self) -> &[Band] {
        &self.bands[1..]
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands.iter().find(|b| b.name == name)
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands.iter().map(|b| b.name.clone()).collect()
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.features().iter().map(|b| b.name.clone()).collect()
    }

    /// Feature values of pixel `idx` (row-major), one per non-target band.
    pub fn feature_vector(&self, idx: usize) -> Vec<f32> {
        self.features().iter().map(|b| b.data[idx]).collect()
    }

    /// Same features under a different label, e.g. the independent
    /// validation raster.
    pub fn with_target(&self, label: &Band) -> Result<FeatureStack> {
        label.ensure_grid(self.grid())?;
        let mut bands = Vec::with_capacity(self.bands.len());
        bands.push(label.renamed(TARGET));
        bands.extend(self.features().iter().cloned());
        Ok(FeatureStack { bands })
    }

    /// The stack without the named feature bands. The target always stays.
    pub fn without(&self, names: &[String]) -> FeatureStack {
        let mut bands = Vec::with_capacity(self.bands.len());
        bands.push(self.bands[0].clone());
        bands.extend(self.features().iter().filter(|b| !names.contains(&b.name)).cloned());
        FeatureStack { bands }
    }
}

/// Concatenate label, window composites and topographic layers.
///
/// Composites must already be on the label grid. Topographic layers are
/// bilinearly resampled onto it when they are not.
pub fn assemble(label: &Band, composites: &[WindowComposite], topographic: &[Band]) -> Result<FeatureStack> {
    let grid = label.grid;
    let mut seen = BTreeSet::new();
    seen.insert(TARGET.to_string());

    let init = vec![label.renamed(TARGET)];
    let bands = composites
        .iter()
        .flat_map(|c| c.bands.iter().cloned())
        .chain(topographic.iter().map(|t| {
            if t.grid == grid {
                t.clone()
            } else {
                t.resample_bilinear(&grid)
            }
        }))
        .try_fold(init, |mut acc, band| {
            band.ensure_grid(&grid)?;
            if !seen.insert(band.name.clone()) {
                return Err(PipelineError::BandCollision(band.name));
            }
            acc.push(band);
            Ok(acc)
        })?;

    debug!("[assembler] {} bands on {}x{}", bands.len(), grid.width, grid.height);
    Ok(FeatureStack { bands })
}

/// Result of evaluating a plan.
#[derive(Debug, Clone)]
pub struct EvaluatedStack {
    pub stack: FeatureStack,
    /// `(window label, branch)` pairs replaced by masked bands.
    pub degraded: Vec<(String, SensorFamily)>,
    /// Names of the masked stand-in bands.
    pub degraded_bands: Vec<String>,
}

impl EvaluatedStack {
    /// The stack with degraded bands dropped, ready for sampling and
    /// classification. Fails when no feature band is left.
    pub fn usable(&self) -> Result<FeatureStack> {
        if self.degraded_bands.is_empty() {
            return Ok(self.stack.clone());
        }
        let stack = self.stack.without(&self.degraded_bands);
        if stack.features().is_empty() {
            let (window, sensor) = self.degraded[0].clone();
            return Err(PipelineError::EmptyCollection { sensor, window });
        }
        warn!(
            "[assembler] dropping {} degraded bands: {}",
            self.degraded_bands.len(),
            self.degraded_bands.join(", ")
        );
        Ok(stack)
    }
}

/// Deferred description of a feature stack.
///
/// Building a plan checks names and ordering only; nothing is fetched until
/// [`FeatureStackPlan::evaluate`].
#[derive(Debug, Clone)]
pub struct FeatureStackPlan {
    label_asset: String,
    bounds: BBox,
    windows: Vec<TemporalWindow>,
    branches: Vec<SensorFamily>,
    topographic: Vec<String>,
    band_names: Vec<String>,
    policy: EmptyWindowPolicy,
}

impl FeatureStackPlan {
    pub fn new(config: &RunConfig, bounds: BBox, windows: Vec<TemporalWindow>) -> Result<Self> {
        let branches = active_branches(&config.bands);
        let mut band_names = vec![TARGET.to_string()];
        for w in &windows {
            for &family in &branches {
                band_names.extend(expected_band_names(&config.bands, family, w));
            }
        }
        band_names.extend(config.bands.topographic.iter().cloned());

        let mut seen = BTreeSet::new();
        for name in &band_names {
            if !seen.insert(name.as_str()) {
                return Err(PipelineError::BandCollision(name.clone()));
            }
        }

        Ok(Self {
            label_asset: config.label_mode.training_asset().to_string(),
            bounds,
            windows,
            branches,
            topographic: config.bands.topographic.clone(),
            band_names,
            policy: config.on_empty_window,
        })
    }

    /// Band names of the evaluated stack, target first.
    pub fn band_names(&self) -> &[String] {
        &self.band_names
    }

    pub fn windows(&self) -> &[TemporalWindow] {
        &self.windows
    }

    pub fn bounds(&self) -> &BBox {
        &self.bounds
    }

    /// Fetch, composite and assemble. Empty windows fail or degrade per the
    /// configured policy.
    pub fn evaluate(&self, config: &RunConfig, source: &dyn ImageSource) -> Result<EvaluatedStack> {
        let grid = source.working_grid(&self.bounds)?;
        let label = config.label_mode.prepare(source.label_raster(&self.label_asset)?);
        label.ensure_grid(&grid)?;

        let compositor = SensorCompositor::new(config, grid, self.bounds);
        let mut composites = Vec::with_capacity(self.windows.len());
        let mut degraded_pairs = Vec::new();
        let mut degraded_bands = Vec::new();

        for window in &self.windows {
            let mut bands = Vec::new();
            let mut degraded = Vec::new();
            for &family in &self.branches {
                let query = CollectionQuery { family, bounds: self.bounds, window: window.clone() };
                let images = source.images(&query)?;
                match compositor.compose(family, &images, window) {
                    Ok(out) => bands.extend(out),
                    Err(e @ PipelineError::EmptyCollection { .. }) => match self.policy {
                        EmptyWindowPolicy::Fail => return Err(e),
                        EmptyWindowPolicy::Degrade => {
                            warn!("[compositor] {e}; substituting masked bands");
                            let masked = compositor.degraded(family, window);
                            degraded_bands.extend(masked.iter().map(|b| b.name.clone()));
                            bands.extend(masked);
                            degraded.push(family);
                            degraded_pairs.push((window.label.clone(), family));
                        }
                    },
                    Err(e) => return Err(e),
                }
            }
            composites.push(WindowComposite { window: window.clone(), bands, degraded });
        }

        let topographic = self
            .topographic
            .iter()
            .map(|name| source.topographic(name))
            .collect::<Result<Vec<_>>>()?;

        let stack = assemble(&label, &composites, &topographic)?;
        info!(
            "[assembler] stack ready: {} features over {} windows",
            stack.features().len(),
            self.windows.len()
        );
        Ok(EvaluatedStack { stack, degraded: degraded_pairs, degraded_bands })
    }
}
