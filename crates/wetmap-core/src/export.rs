//! Run artifacts written to a local directory.
//!
//! File names follow `{run_label}_{artifact}`. The classified raster is an
//! 8-bit single-band TIFF, north-up, with a JSON sidecar describing its
//! target coordinate system and pixel size.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;
use tiff::encoder::{colortype, TiffEncoder};

use crate::classifier::FeatureImportance;
use crate::config::ExportConfig;
use crate::error::{PipelineError, Result};
use crate::evaluation::ConfusionMatrix;
use crate::geometry::{BBox, Region};
use crate::labels::ClassLabel;
use crate::raster::Band;
use crate::sampling::SampleSet;

/// Metadata written next to the classified raster.
#[derive(Debug, Clone, Serialize)]
pub struct RasterSidecar {
    pub run_label: String,
    pub crs: String,
    pub scale_m: f64,
    pub width: usize,
    pub height: usize,
    pub region: String,
    pub region_code: u32,
    pub bbox: BBox,
    pub classes: Vec<(u8, String)>,
}

pub struct LocalExporter {
    out_dir: PathBuf,
    run_label: String,
}

impl LocalExporter {
    pub fn new(out_dir: impl Into<PathBuf>, run_label: impl Into<String>) -> Result<Self> {
        let out_dir = out_dir.into();
        fs::create_dir_all(&out_dir)?;
        Ok(Self { out_dir, run_label: run_label.into() })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn path_for(&self, artifact: &str) -> PathBuf {
        self.out_dir.join(format!("{}_{artifact}", self.run_label))
    }

    /// `band,importance` table.
    pub fn feature_importance(&self, importance: &[FeatureImportance]) -> Result<PathBuf> {
        let path = self.path_for("featureImportance.csv");
        let mut w = csv::Writer::from_path(&path)?;
        for row in importance {
            w.serialize(row)?;
        }
        w.flush()?;
        info!("[export] {}", path.display());
        Ok(path)
    }

    /// Raw training and validation matrices as nested-array literals.
    pub fn accuracy_matrices(&self, training: &ConfusionMatrix, validation: &ConfusionMatrix) -> Result<PathBuf> {
        let path = self.path_for("accuracyMatrices.csv");
        let mut w = csv::Writer::from_path(&path)?;
        w.write_record(["trainConfusionMatrix", "validationErrorMatrix"])?;
        w.write_record([training.to_array_literal(), validation.to_array_literal()])?;
        w.flush()?;
        info!("[export] {}", path.display());
        Ok(path)
    }

    /// One row per record: region, optional pixel position, features, target
    /// and predicted class.
    pub fn classified_samples(
        &self,
        subset: &str,
        samples: &SampleSet,
        predicted: &[ClassLabel],
        keep_geometries: bool,
    ) -> Result<PathBuf> {
        if predicted.len() != samples.len() {
            return Err(PipelineError::config(format!(
                "{subset}: {} records but {} predictions",
                samples.len(),
                predicted.len()
            )));
        }
        let path = self.path_for(&format!("{subset}_ss_classified.csv"));
        let mut w = csv::Writer::from_path(&path)?;

        let mut header = vec!["region".to_string()];
        if keep_geometries {
            header.extend(["row".to_string(), "col".to_string()]);
        }
        header.extend(samples.band_names.iter().cloned());
        header.extend(["target".to_string(), "classification".to_string()]);
        w.write_record(&header)?;

        for (rec, pred) in samples.records.iter().zip(predicted) {
            let mut row = vec![rec.region.clone()];
            if keep_geometries {
                row.push(rec.row.to_string());
                row.push(rec.col.to_string());
            }
            row.extend(rec.features.iter().map(|v| v.to_string()));
            row.push(rec.label.value().to_string());
            row.push(pred.value().to_string());
            w.write_record(&row)?;
        }
        w.flush()?;
        info!("[export] {} ({} rows)", path.display(), samples.len());
        Ok(path)
    }

    /// Classified raster at the export pixel size. Fails with `ResourceLimit`
    /// when the output would exceed `max_pixels`.
    pub fn classified_raster(&self, classes: &Band, region: &Region, cfg: &ExportConfig) -> Result<PathBuf> {
        let out_grid = classes.grid.at_scale(cfg.scale_m);
        let pixels = out_grid.len() as u64;
        if pixels > cfg.max_pixels {
            return Err(PipelineError::ResourceLimit(format!(
                "classified raster of {} would be {pixels} pixels at {} m, limit {}",
                region.name, cfg.scale_m, cfg.max_pixels
            )));
        }
        let resampled = classes.resample_nearest(&out_grid);

        // Row 0 of a band is south; TIFF rows run north to south.
        let mut bytes = Vec::with_capacity(out_grid.len());
        for r in (0..out_grid.height).rev() {
            for c in 0..out_grid.width {
                let v = resampled.get(r, c);
                let b = ClassLabel::from_value(v).map_or(ClassLabel::NoData.value(), ClassLabel::value);
                bytes.push(b);
            }
        }

        let scale_tag = cfg.scale_m.round() as u64;
        let path = self.path_for(&format!("classified{scale_tag}.tif"));
        let mut file = BufWriter::new(File::create(&path)?);
        TiffEncoder::new(&mut file)?.write_image::<colortype::Gray8>(
            out_grid.width as u32,
            out_grid.height as u32,
            &bytes,
        )?;
        file.flush()?;

        let sidecar = RasterSidecar {
            run_label: self.run_label.clone(),
            crs: cfg.crs.clone(),
            scale_m: cfg.scale_m,
            width: out_grid.width,
            height: out_grid.height,
            region: region.name.clone(),
            region_code: region.code,
            bbox: region.bbox(),
            classes: ClassLabel::SCORED.iter().map(|c| (c.value(), c.to_string())).collect(),
        };
        let sidecar_path = self.path_for(&format!("classified{scale_tag}.json"));
        let mut meta = BufWriter::new(File::create(&sidecar_path)?);
        serde_json::to_writer_pretty(&mut meta, &sidecar)?;
        meta.flush()?;

        info!("[export] {} ({}x{})", path.display(), out_grid.width, out_grid.height);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GridSpec;
    use crate::sampling::SampleRecord;
    use std::io::Cursor;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wetmap-export-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn importance_and_matrix_tables() {
        let dir = scratch("tables");
        let ex = LocalExporter::new(&dir, "Uppsala_run1000_lm2").unwrap();
        let imp = vec![
            FeatureImportance { band: "VV_summer2021".into(), importance: 0.75 },
            FeatureImportance { band: "twi".into(), importance: 0.25 },
        ];
        let path = ex.feature_importance(&imp).unwrap();
        assert!(path.ends_with("Uppsala_run1000_lm2_featureImportance.csv"));
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "band,importance\nVV_summer2021,0.75\ntwi,0.25\n");

        let m = ConfusionMatrix::from_counts(
            vec![ClassLabel::NonWetland, ClassLabel::Wetland],
            vec![vec![8, 2], vec![1, 9]],
        )
        .unwrap();
        let path = ex.accuracy_matrices(&m, &m).unwrap();
        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let rec = rdr.records().next().unwrap().unwrap();
        assert_eq!(&rec[0], "[[8,2],[1,9]]");
        assert_eq!(&rec[1], "[[8,2],[1,9]]");
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn classified_samples_carry_target_and_prediction() {
        let dir = scratch("samples");
        let ex = LocalExporter::new(&dir, "run").unwrap();
        let set = SampleSet {
            band_names: vec!["NDVI_summer2021".into()],
            records: vec![SampleRecord {
                features: vec![0.5],
                label: ClassLabel::Wetland,
                region: "Norrbotten".into(),
                row: 3,
                col: 4,
                random: 0.1,
            }],
            fills: Vec::new(),
        };
        let path = ex.classified_samples("validation", &set, &[ClassLabel::Water], true).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "region,row,col,NDVI_summer2021,target,classification\nNorrbotten,3,4,0.5,2,3\n");
        assert!(ex.classified_samples("validation", &set, &[], false).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn raster_is_north_up_bytes_with_sidecar() {
        let dir = scratch("raster");
        let ex = LocalExporter::new(&dir, "run").unwrap();
        // Two rows of ~10 m pixels; south row wetland, north row water.
        let dy = 10.0 / crate::raster::METRES_PER_DEGREE;
        let dx = dy / 60.0f64.to_radians().cos();
        let grid = GridSpec::new(2, 2, 17.0, 17.0 + 2.0 * dx, 60.0, 60.0 + 2.0 * dy);
        let band = Band::from_data("classification", grid, vec![2.0, 2.0, 3.0, f32::NAN]).unwrap();
        let region = Region::new("Uppsala", 3, BBox::new(17.0, 60.0, 17.0 + 2.0 * dx, 60.0 + 2.0 * dy).to_polygon())
            .unwrap();

        let path = ex.classified_raster(&band, &region, &ExportConfig::default()).unwrap();
        assert!(path.ends_with("run_classified10.tif"));

        let bytes = fs::read(&path).unwrap();
        let mut dec = tiff::decoder::Decoder::new(Cursor::new(bytes)).unwrap();
        assert_eq!(dec.dimensions().unwrap(), (2, 2));
        match dec.read_image().unwrap() {
            tiff::decoder::DecodingResult::U8(v) => assert_eq!(v, vec![3, 0, 2, 2]),
            _ => panic!("expected 8-bit pixels"),
        }

        let sidecar: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join("run_classified10.json")).unwrap()).unwrap();
        assert_eq!(sidecar["crs"], "EPSG:3006");
        assert_eq!(sidecar["region_code"], 3);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn oversized_raster_is_a_resource_limit() {
        let dir = scratch("limit");
        let ex = LocalExporter::new(&dir, "run").unwrap();
        let grid = GridSpec::new(10, 10, 17.0, 18.0, 60.0, 61.0);
        let band = Band::filled("classification", grid, 1.0);
        let region = Region::new("Uppsala", 3, BBox::new(17.0, 60.0, 18.0, 61.0).to_polygon()).unwrap();
        let cfg = ExportConfig { max_pixels: 1_000, ..ExportConfig::default() };
        let err = ex.classified_raster(&band, &region, &cfg).unwrap_err();
        assert!(matches!(err, PipelineError::ResourceLimit(_)), "got {err:?}");
        fs::remove_dir_all(&dir).unwrap();
    }
}
