/// Local scene archive: a directory with `manifest.json` and single-band
/// GeoTIFF-style rasters, loaded into an [`InMemorySource`].
///
/// All rasters in the archive are stored north-up (TIFF row 0 = max_lat) and
/// are flipped on load so band row 0 is the southern edge.
use std::collections::BTreeMap;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use log::{debug, info};
use serde::Deserialize;
use tiff::decoder::{Decoder, DecodingResult};
use wetmap_core::collection::{ImageProperties, SensorFamily, SourceImage};
use wetmap_core::geometry::{BBox, Polygon};
use wetmap_core::{Band, GridSpec, InMemorySource};

pub const MANIFEST: &str = "manifest.json";

// ── Manifest schema ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct Manifest {
    /// Working grid every image and label raster is delivered on.
    pub grid: GridSpec,
    #[serde(default)]
    pub images: Vec<ImageEntry>,
    /// Label rasters keyed by asset name.
    #[serde(default)]
    pub labels: BTreeMap<String, RasterEntry>,
    /// Topographic layers keyed by band name; may carry their own grid.
    #[serde(default)]
    pub topographic: BTreeMap<String, RasterEntry>,
    /// Region boundaries keyed by administrative code.
    #[serde(default)]
    pub boundaries: BTreeMap<u32, Vec<[f64; 2]>>,
    /// Vertex budget for region boundaries.
    #[serde(default)]
    pub max_vertices: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ImageEntry {
    pub id: String,
    pub family: SensorFamily,
    pub acquired: NaiveDate,
    /// Defaults to the archive grid extent.
    #[serde(default)]
    pub footprint: Option<BBox>,
    #[serde(default)]
    pub properties: ImageProperties,
    pub bands: BTreeMap<String, RasterEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RasterEntry {
    /// Relative to the archive directory.
    pub path: PathBuf,
    #[serde(default)]
    pub grid: Option<GridSpec>,
    /// Sentinel value mapped to the mask.
    #[serde(default)]
    pub nodata: Option<f32>,
}

// ── Loading ──────────────────────────────────────────────────────────────────

pub fn load(dir: &Path) -> Result<InMemorySource> {
    let manifest_path = dir.join(MANIFEST);
    let text = fs::read_to_string(&manifest_path)
        .with_context(|| format!("Cannot read {}", manifest_path.display()))?;
    let manifest: Manifest =
        serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", manifest_path.display()))?;
    build(dir, manifest)
}

fn build(dir: &Path, manifest: Manifest) -> Result<InMemorySource> {
    let grid = manifest.grid;
    let extent = BBox::new(grid.min_lon, grid.min_lat, grid.max_lon, grid.max_lat);
    let mut source = InMemorySource::new(grid);

    for entry in manifest.images {
        let mut bands = BTreeMap::new();
        for (name, raster) in &entry.bands {
            let band = read_band(dir, name, raster, grid)
                .with_context(|| format!("Image {} band {name}", entry.id))?;
            bands.insert(name.clone(), band);
        }
        debug!("[archive] {} {} on {}: {} bands", entry.family, entry.id, entry.acquired, bands.len());
        source = source.with_image(SourceImage {
            id: entry.id,
            family: entry.family,
            acquired: entry.acquired,
            footprint: entry.footprint.unwrap_or(extent),
            properties: entry.properties,
            bands,
        });
    }

    for (asset, raster) in &manifest.labels {
        let band = read_band(dir, asset, raster, grid).with_context(|| format!("Label raster {asset}"))?;
        source = source.with_label(asset.clone(), band);
    }
    for (name, raster) in &manifest.topographic {
        let band = read_band(dir, name, raster, grid).with_context(|| format!("Topographic layer {name}"))?;
        source = source.with_topographic(band);
    }
    for (code, ring) in manifest.boundaries {
        if ring.len() < 3 {
            bail!("Boundary for region code {code} has {} vertices", ring.len());
        }
        source = source.with_boundary(code, Polygon::new(ring));
    }
    if let Some(max) = manifest.max_vertices {
        source = source.with_max_vertices(max);
    }

    info!(
        "[archive] {}: {} images, {} labels, {} topographic layers on a {}x{} grid",
        dir.display(),
        source.image_count(),
        manifest.labels.len(),
        manifest.topographic.len(),
        grid.width,
        grid.height
    );
    Ok(source)
}

fn read_band(dir: &Path, name: &str, raster: &RasterEntry, default_grid: GridSpec) -> Result<Band> {
    let grid = raster.grid.unwrap_or(default_grid);
    let path = dir.join(&raster.path);
    let (width, height, data) = read_tiff(&path)?;
    if width != grid.width || height != grid.height {
        bail!(
            "{} is {width}x{height}, expected {}x{}",
            path.display(),
            grid.width,
            grid.height
        );
    }
    let data = flip_rows(&data, width, raster.nodata);
    Ok(Band::from_data(name, grid, data)?)
}

/// Decode the first image of a TIFF into `f32` samples, storage order.
pub fn read_tiff(path: &Path) -> Result<(usize, usize, Vec<f32>)> {
    let file = fs::File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut decoder =
        Decoder::new(BufReader::new(file)).with_context(|| format!("Not a valid TIFF: {}", path.display()))?;
    let (width, height) = decoder.dimensions()?;
    let data: Vec<f32> = match decoder.read_image()? {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => bail!("Unsupported sample format in {}", path.display()),
    };
    Ok((width as usize, height as usize, data))
}

/// TIFF storage order (N→S) to band order (S→N), nodata → NaN.
fn flip_rows(data: &[f32], cols: usize, nodata: Option<f32>) -> Vec<f32> {
    let rows = data.len() / cols.max(1);
    let mut out = Vec::with_capacity(data.len());
    for r in (0..rows).rev() {
        for &v in &data[r * cols..(r + 1) * cols] {
            out.push(if nodata == Some(v) { f32::NAN } else { v });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufWriter;
    use tiff::encoder::{colortype, TiffEncoder};
    use wetmap_core::backend::{CollectionQuery, ImageSource};
    use wetmap_core::season::{window_for, Season};

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wetmap-archive-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_f32(path: &Path, w: u32, h: u32, data: &[f32]) {
        let mut file = BufWriter::new(fs::File::create(path).unwrap());
        TiffEncoder::new(&mut file).unwrap().write_image::<colortype::Gray32Float>(w, h, data).unwrap();
    }

    fn write_u8(path: &Path, w: u32, h: u32, data: &[u8]) {
        let mut file = BufWriter::new(fs::File::create(path).unwrap());
        TiffEncoder::new(&mut file).unwrap().write_image::<colortype::Gray8>(w, h, data).unwrap();
    }

    #[test]
    fn flip_rows_reverses_and_masks_nodata() {
        // TIFF rows: [0, 1] north, [2, -9999] south.
        let out = flip_rows(&[0.0, 1.0, 2.0, -9999.0], 2, Some(-9999.0));
        assert_eq!(out[0], 2.0, "band row 0 should be the southern TIFF row");
        assert!(out[1].is_nan());
        assert_eq!(&out[2..], &[0.0, 1.0]);
    }

    #[test]
    fn loads_images_labels_and_boundaries() {
        let dir = scratch("load");
        write_f32(&dir.join("vv.tif"), 2, 2, &[-10.0, -11.0, -12.0, -13.0]);
        write_u8(&dir.join("train.tif"), 2, 2, &[1, 2, 3, 0]);
        write_f32(&dir.join("slope.tif"), 1, 1, &[4.5]);
        fs::write(
            dir.join(MANIFEST),
            r#"{
              "grid": { "width": 2, "height": 2, "min_lon": 20.0, "max_lon": 20.002, "min_lat": 66.0, "max_lat": 66.002 },
              "images": [{
                "id": "S1A_20210703", "family": "sar", "acquired": "2021-07-03",
                "properties": { "instrument_mode": "IW", "polarisations": ["VV"], "orbit_pass": "DESCENDING" },
                "bands": { "VV": { "path": "vv.tif" } }
              }],
              "labels": { "target10m_lm2_training": { "path": "train.tif" } },
              "topographic": { "slope": { "path": "slope.tif",
                "grid": { "width": 1, "height": 1, "min_lon": 20.0, "max_lon": 20.002, "min_lat": 66.0, "max_lat": 66.002 } } },
              "boundaries": { "25": [[20.0, 66.0], [20.002, 66.0], [20.002, 66.002], [20.0, 66.002]] },
              "max_vertices": 100
            }"#,
        )
        .unwrap();

        let src = load(&dir).unwrap();
        assert_eq!(src.image_count(), 1);

        let query = CollectionQuery {
            family: SensorFamily::Sar,
            bounds: BBox::new(20.0, 66.0, 20.002, 66.002),
            window: window_for(2021, Season::Summer).unwrap(),
        };
        let images = src.images(&query).unwrap();
        let vv = images[0].band("VV").unwrap();
        assert_eq!(vv.get(0, 0), -12.0, "row 0 is south");
        assert_eq!(vv.get(1, 1), -11.0);

        let label = src.label_raster("target10m_lm2_training").unwrap();
        assert_eq!(label.data, vec![3.0, 0.0, 1.0, 2.0]);
        assert_eq!(src.topographic("slope").unwrap().grid.width, 1);
        assert_eq!(src.region_boundary(25).unwrap().unwrap().vertex_count(), 4);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn size_mismatch_is_reported() {
        let dir = scratch("mismatch");
        write_u8(&dir.join("train.tif"), 3, 1, &[1, 2, 3]);
        fs::write(
            dir.join(MANIFEST),
            r#"{ "grid": { "width": 2, "height": 2, "min_lon": 0.0, "max_lon": 1.0, "min_lat": 0.0, "max_lat": 1.0 },
                 "labels": { "lbl": { "path": "train.tif" } } }"#,
        )
        .unwrap();
        let err = format!("{:#}", load(&dir).unwrap_err());
        assert!(err.contains("3x1, expected 2x2"), "got {err}");
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_manifest_names_the_path() {
        let dir = scratch("empty");
        let err = format!("{:#}", load(&dir).unwrap_err());
        assert!(err.contains(MANIFEST), "got {err}");
        fs::remove_dir_all(&dir).unwrap();
    }
}
