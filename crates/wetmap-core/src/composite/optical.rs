//! Optical branch: granule cloud filter, per-pixel validity mask, median.

use log::debug;

use crate::collection::{in_window, passes_cloud_filter, SensorFamily, SourceImage};
use crate::config::{BandSelection, OpticalParams};
use crate::error::{PipelineError, Result};
use crate::geometry::BBox;
use crate::raster::{Band, GridSpec};
use crate::season::TemporalWindow;

use super::reduce::{normalized_difference, temporal_count, temporal_median};

pub fn select<'a>(
    images: &'a [SourceImage],
    bounds: &BBox,
    window: &TemporalWindow,
    params: &OpticalParams,
) -> Vec<&'a SourceImage> {
    in_window(images, SensorFamily::Optical, bounds, window)
        .filter(|img| passes_cloud_filter(img, params))
        .collect()
}

fn required<'a>(img: &'a SourceImage, name: &str, grid: &GridSpec) -> Result<&'a Band> {
    let band = img
        .band(name)
        .ok_or_else(|| PipelineError::missing_band(name, format!("optical image {}", img.id)))?;
    band.ensure_grid(grid)?;
    Ok(band)
}

fn qa_flag(bit: u8) -> Result<u32> {
    1u32.checked_shl(u32::from(bit))
        .ok_or_else(|| PipelineError::config(format!("QA bit {bit} is outside the 32-bit mask")))
}

/// Clear-sky mask of one image: QA cloud and cirrus bits both zero, cloud
/// probability and aerosol within bounds. A masked mask input is not clear.
pub fn clear_mask(img: &SourceImage, params: &OpticalParams, grid: &GridSpec) -> Result<Vec<bool>> {
    let qa = required(img, &params.qa_band, grid)?;
    let prob = required(img, &params.cloud_probability_band, grid)?;
    let aerosol = required(img, &params.aerosol_band, grid)?;
    let opaque = qa_flag(params.cloud_bit)?;
    let cirrus = qa_flag(params.cirrus_bit)?;

    let mask = (0..grid.len())
        .map(|i| {
            let q = qa.data[i];
            if !q.is_finite() || q < 0.0 {
                return false;
            }
            let bits = q as u32;
            bits & opaque == 0
                && bits & cirrus == 0
                && prob.data[i] <= params.max_cloud_probability
                && aerosol.data[i] <= params.max_aerosol
        })
        .collect();
    Ok(mask)
}

/// Selected bands of one image with cloudy pixels masked.
pub fn masked_bands(
    img: &SourceImage,
    bands: &[String],
    params: &OpticalParams,
    grid: &GridSpec,
) -> Result<Vec<Vec<f32>>> {
    let clear = clear_mask(img, params, grid)?;
    bands
        .iter()
        .map(|name| {
            let band = required(img, name, grid)?;
            Ok(band
                .data
                .iter()
                .zip(&clear)
                .map(|(&v, &ok)| if ok { v } else { f32::NAN })
                .collect())
        })
        .collect()
}

/// Median composite of the selected optical bands, renamed with the window
/// label, followed by the optical indices in configured order.
pub fn composite(
    images: &[SourceImage],
    bounds: &BBox,
    window: &TemporalWindow,
    bands: &BandSelection,
    params: &OpticalParams,
    grid: &GridSpec,
) -> Result<Vec<Band>> {
    let selected = select(images, bounds, window, params);
    if selected.is_empty() {
        return Err(PipelineError::EmptyCollection {
            sensor: SensorFamily::Optical,
            window: window.label.clone(),
        });
    }
    debug!("[compositor] {}: {} optical granules", window.label, selected.len());

    let masked: Vec<Vec<Vec<f32>>> = selected
        .iter()
        .map(|img| masked_bands(img, &bands.optical, params, grid))
        .collect::<Result<_>>()?;

    let mut out = Vec::with_capacity(bands.optical.len() + bands.indices.len());
    for (b, name) in bands.optical.iter().enumerate() {
        let series: Vec<&[f32]> = masked.iter().map(|layers| layers[b].as_slice()).collect();
        out.push(Band::from_data(window.band_name(name), *grid, temporal_median(&series))?);
    }

    for idx in bands.optical_indices() {
        let (a, b) = idx.operands();
        let pick = |base: &str| {
            let name = window.band_name(base);
            out.iter()
                .find(|band| band.name == name)
                .ok_or_else(|| PipelineError::missing_band(name.clone(), "optical composite"))
        };
        let nd = normalized_difference(pick(a)?, pick(b)?, window.band_name(idx.name()))?;
        out.push(nd);
    }
    Ok(out)
}

/// Per-pixel count of clear-sky observations.
pub fn observation_count(
    images: &[SourceImage],
    bounds: &BBox,
    window: &TemporalWindow,
    params: &OpticalParams,
    grid: &GridSpec,
) -> Result<Band> {
    let masks: Vec<Vec<f32>> = select(images, bounds, window, params)
        .into_iter()
        .map(|img| {
            let clear = clear_mask(img, params, grid)?;
            Ok(clear.into_iter().map(|ok| if ok { 1.0 } else { f32::NAN }).collect())
        })
        .collect::<Result<_>>()?;
    let series: Vec<&[f32]> = masks.iter().map(|m| m.as_slice()).collect();
    let data = if series.is_empty() { vec![0.0; grid.len()] } else { temporal_count(&series) };
    Band::from_data(window.band_name("count_optical"), *grid, data)
}
