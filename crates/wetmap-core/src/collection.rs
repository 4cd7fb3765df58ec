//! Source images as delivered by the compute backend, and the metadata
//! filters applied before temporal reduction.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::{OpticalParams, SarParams};
use crate::geometry::BBox;
use crate::raster::Band;
use crate::season::TemporalWindow;

/// The two configured sensor families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorFamily {
    /// C-band synthetic-aperture radar backscatter (dB).
    Sar,
    /// Multispectral surface reflectance.
    Optical,
}

impl fmt::Display for SensorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorFamily::Sar => f.write_str("SAR"),
            SensorFamily::Optical => f.write_str("optical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrbitPass {
    Ascending,
    Descending,
}

/// Per-granule metadata used by the collection filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageProperties {
    /// SAR acquisition mode, e.g. `IW` or `EW`.
    pub instrument_mode: Option<String>,
    /// SAR transmitter/receiver polarisations, e.g. `["VV", "VH"]`.
    pub polarisations: Vec<String>,
    pub orbit_pass: Option<OrbitPass>,
    /// Optical granule cloud cover in percent.
    pub cloudy_pixel_percentage: Option<f64>,
}

/// One acquisition with its bands resampled to the working grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceImage {
    pub id: String,
    pub family: SensorFamily,
    pub acquired: NaiveDate,
    pub footprint: BBox,
    pub properties: ImageProperties,
    pub bands: BTreeMap<String, Band>,
}

impl SourceImage {
    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands.get(name)
    }
}

/// Spatial + temporal restriction common to both branches.
pub fn in_window<'a>(
    images: &'a [SourceImage],
    family: SensorFamily,
    bounds: &BBox,
    window: &TemporalWindow,
) -> impl Iterator<Item = &'a SourceImage> + 'a {
    let bounds = *bounds;
    let window = window.clone();
    images
        .iter()
        .filter(move |img| img.family == family)
        .filter(move |img| img.footprint.intersects(&bounds))
        .filter(move |img| window.contains(img.acquired))
}

/// Fixed acquisition mode, required polarisation and orbit direction.
pub fn passes_sar_filter(img: &SourceImage, params: &SarParams) -> bool {
    let p = &img.properties;
    p.instrument_mode.as_deref() == Some(params.instrument_mode.as_str())
        && p.polarisations.iter().any(|pol| pol == &params.required_polarisation)
        && p.orbit_pass == Some(params.orbit_pass)
}

/// Granules with cloudy-pixel fraction at or above the threshold are rejected,
/// as are granules that do not report one.
pub fn passes_cloud_filter(img: &SourceImage, params: &OpticalParams) -> bool {
    img.properties
        .cloudy_pixel_percentage
        .map(|pct| pct < params.max_cloudy_pixel_percentage)
        .unwrap_or(false)
}
