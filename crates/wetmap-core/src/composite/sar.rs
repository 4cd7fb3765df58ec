//! SAR branch: metadata filter, swath-edge masking, temporal mean.

use log::debug;

use crate::collection::{in_window, passes_sar_filter, SensorFamily, SourceImage};
use crate::config::{BandSelection, SarParams};
use crate::error::{PipelineError, Result};
use crate::geometry::BBox;
use crate::raster::{Band, GridSpec};
use crate::season::TemporalWindow;

use super::reduce::{normalized_difference, temporal_count, temporal_mean};

/// Images that survive the SAR filters for `window`.
pub fn select<'a>(
    images: &'a [SourceImage],
    bounds: &BBox,
    window: &TemporalWindow,
    params: &SarParams,
) -> Vec<&'a SourceImage> {
    in_window(images, SensorFamily::Sar, bounds, window)
        .filter(|img| passes_sar_filter(img, params))
        .collect()
}

/// Selected polarisations of one image with edge pixels masked in every
/// polarisation. Returned in selection order.
pub fn mask_edges(
    img: &SourceImage,
    polarisations: &[String],
    threshold_db: f32,
    grid: &GridSpec,
) -> Result<Vec<Vec<f32>>> {
    let mut layers = Vec::with_capacity(polarisations.len());
    for pol in polarisations {
        let band = img
            .band(pol)
            .ok_or_else(|| PipelineError::missing_band(pol.as_str(), format!("SAR image {}", img.id)))?;
        band.ensure_grid(grid)?;
        layers.push(band.data.clone());
    }

    for i in 0..grid.len() {
        let edge = layers.iter().any(|l| l[i] < threshold_db);
        if edge {
            for l in layers.iter_mut() {
                l[i] = f32::NAN;
            }
        }
    }
    Ok(layers)
}

/// Mean composite of every selected polarisation, renamed with the window
/// label, followed by NDPI when requested.
pub fn composite(
    images: &[SourceImage],
    bounds: &BBox,
    window: &TemporalWindow,
    bands: &BandSelection,
    params: &SarParams,
    grid: &GridSpec,
) -> Result<Vec<Band>> {
    let selected = select(images, bounds, window, params);
    if selected.is_empty() {
        return Err(PipelineError::EmptyCollection {
            sensor: SensorFamily::Sar,
            window: window.label.clone(),
        });
    }
    debug!("[compositor] {}: {} SAR acquisitions", window.label, selected.len());

    let masked: Vec<Vec<Vec<f32>>> = selected
        .iter()
        .map(|img| mask_edges(img, &bands.sar, params.edge_threshold_db, grid))
        .collect::<Result<_>>()?;

    let mut out = Vec::with_capacity(bands.sar.len() + 1);
    for (b, pol) in bands.sar.iter().enumerate() {
        let series: Vec<&[f32]> = masked.iter().map(|layers| layers[b].as_slice()).collect();
        out.push(Band::from_data(window.band_name(pol), *grid, temporal_mean(&series))?);
    }

    for idx in bands.radar_indices() {
        let (a, b) = idx.operands();
        let find = |base: &str| {
            let name = window.band_name(base);
            out.iter()
                .find(|band| band.name == name)
                .ok_or_else(|| PipelineError::missing_band(name.clone(), "SAR composite"))
        };
        let nd = normalized_difference(find(a)?, find(b)?, window.band_name(idx.name()))?;
        out.push(nd);
    }
    Ok(out)
}

/// Per-pixel count of acquisitions that survive edge masking.
pub fn observation_count(
    images: &[SourceImage],
    bounds: &BBox,
    window: &TemporalWindow,
    bands: &BandSelection,
    params: &SarParams,
    grid: &GridSpec,
) -> Result<Band> {
    let selected = select(images, bounds, window, params);
    let masked: Vec<Vec<Vec<f32>>> = selected
        .iter()
        .map(|img| mask_edges(img, &bands.sar, params.edge_threshold_db, grid))
        .collect::<Result<_>>()?;
    let series: Vec<&[f32]> = masked.iter().filter_map(|layers| layers.first()).map(|l| l.as_slice()).collect();
    let data = if series.is_empty() { vec![0.0; grid.len()] } else { temporal_count(&series) };
    Band::from_data(window.band_name("count_SAR"), *grid, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{ImageProperties, OrbitPass};
    use crate::config::SpectralIndex;
    use crate::season::{window_for, Season};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn grid() -> GridSpec {
        GridSpec::new(3, 1, 16.0, 16.003, 65.0, 65.001)
    }

    fn sar_image(day: u32, vv: [f32; 3], vh: [f32; 3], pass: OrbitPass) -> SourceImage {
        let g = grid();
        let mut bands = BTreeMap::new();
        bands.insert("VV".to_string(), Band::from_data("VV", g, vv.to_vec()).unwrap());
        bands.insert("VH".to_string(), Band::from_data("VH", g, vh.to_vec()).unwrap());
        SourceImage {
            id: format!("S1_{day}"),
            family: SensorFamily::Sar,
            acquired: NaiveDate::from_ymd_opt(2021, 7, day).unwrap(),
            footprint: BBox::new(15.0, 64.0, 17.0, 66.0),
            properties: ImageProperties {
                instrument_mode: Some("IW".into()),
                polarisations: vec!["VV".into(), "VH".into()],
                orbit_pass: Some(pass),
                cloudy_pixel_percentage: None,
            },
            bands,
        }
    }

    fn bounds() -> BBox {
        BBox::new(16.0, 65.0, 16.003, 65.001)
    }

    #[test]
    fn edge_pixels_are_masked_in_all_polarisations() {
        let img = sar_image(1, [-10.0, -35.0, -12.0], [-18.0, -20.0, -31.0], OrbitPass::Descending);
        let pols = vec!["VV".to_string(), "VH".to_string()];
        let layers = mask_edges(&img, &pols, -30.0, &grid()).unwrap();
        assert_eq!(layers[0][0], -10.0);
        assert!(layers[0][1].is_nan() && layers[1][1].is_nan());
        assert!(layers[0][2].is_nan() && layers[1][2].is_nan());
    }

    #[test]
    fn composite_is_mean_of_unmasked_dates_with_label_suffix() {
        let w = window_for(2021, Season::Summer).unwrap();
        let images = vec![
            sar_image(1, [-10.0, -35.0, -8.0], [-16.0, -20.0, -14.0], OrbitPass::Descending),
            sar_image(13, [-12.0, -14.0, -10.0], [-18.0, -22.0, -16.0], OrbitPass::Descending),
            // Ascending pass is filtered out entirely.
            sar_image(20, [0.0, 0.0, 0.0], [0.0, 0.0, 0.0], OrbitPass::Ascending),
        ];
        let bands = BandSelection {
            indices: vec![SpectralIndex::Ndpi],
            ..BandSelection::default()
        };
        let out = composite(&images, &bounds(), &w, &bands, &SarParams::default(), &grid()).unwrap();
        let names: Vec<&str> = out.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["VV_summer2021", "VH_summer2021", "NDPI_summer2021"]);

        let vv = &out[0];
        assert_eq!(vv.data[0], -11.0);
        assert_eq!(vv.data[1], -14.0, "edge date must not contribute");
        assert_eq!(vv.data[2], -9.0);

        let ndpi = &out[2];
        let expected = (-11.0f32 - -17.0) / (-11.0 + -17.0);
        assert!((ndpi.data[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn empty_window_is_an_empty_collection_error() {
        let w = window_for(2021, Season::Winter).unwrap();
        let images = vec![sar_image(1, [-10.0; 3], [-15.0; 3], OrbitPass::Descending)];
        let err = composite(&images, &bounds(), &w, &BandSelection::default(), &SarParams::default(), &grid())
            .unwrap_err();
        assert!(
            matches!(err, PipelineError::EmptyCollection { sensor: SensorFamily::Sar, ref window } if window == "winter2020"),
            "got {err:?}"
        );
    }

    #[test]
    fn configurable_threshold() {
        let img = sar_image(1, [-26.0, -10.0, -10.0], [-15.0; 3], OrbitPass::Descending);
        let pols = vec!["VV".to_string()];
        let strict = mask_edges(&img, &pols, -25.0, &grid()).unwrap();
        assert!(strict[0][0].is_nan());
        let loose = mask_edges(&img, &pols, -30.0, &grid()).unwrap();
        assert_eq!(loose[0][0], -26.0);
    }

    #[test]
    fn observation_count_tracks_masked_dates() {
        let w = window_for(2021, Season::Summer).unwrap();
        let images = vec![
            sar_image(1, [-10.0, -35.0, -8.0], [-16.0, -20.0, -14.0], OrbitPass::Descending),
            sar_image(13, [-12.0, -14.0, -10.0], [-18.0, -22.0, -16.0], OrbitPass::Descending),
        ];
        let count =
            observation_count(&images, &bounds(), &w, &BandSelection::default(), &SarParams::default(), &grid())
                .unwrap();
        assert_eq!(count.data, vec![2.0, 1.0, 2.0]);
    }
}
