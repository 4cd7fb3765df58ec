//! Class labels and the label sources that feed the target band.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::raster::Band;

/// Fixed class domain of the label rasters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ClassLabel {
    /// Absent / no-data sentinel. Never sampled, never scored.
    NoData = 0,
    NonWetland = 1,
    Wetland = 2,
    Water = 3,
}

impl ClassLabel {
    pub const SCORED: [ClassLabel; 3] = [ClassLabel::NonWetland, ClassLabel::Wetland, ClassLabel::Water];

    /// Interpret a raster value. Masked or out-of-domain values yield `None`.
    pub fn from_value(v: f32) -> Option<ClassLabel> {
        if !v.is_finite() || v.fract() != 0.0 || !(0.0..=255.0).contains(&v) {
            return None;
        }
        ClassLabel::try_from(v as u8).ok()
    }

    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn is_scored(self) -> bool {
        self != ClassLabel::NoData
    }
}

impl TryFrom<u8> for ClassLabel {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(ClassLabel::NoData),
            1 => Ok(ClassLabel::NonWetland),
            2 => Ok(ClassLabel::Wetland),
            3 => Ok(ClassLabel::Water),
            other => Err(other),
        }
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClassLabel::NoData => "no-data",
            ClassLabel::NonWetland => "non-wetland",
            ClassLabel::Wetland => "wetland",
            ClassLabel::Water => "water",
        };
        f.write_str(name)
    }
}

/// Which pre-rasterised label source feeds the target band, and the sampling
/// spacing that goes with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelMode {
    /// National wetland inventory raster. Coarse polygons, sparse sampling.
    Vmi,
    /// Hand-picked, digitised polygons with an independent validation raster.
    #[default]
    Digitized,
    /// MODIS IGBP land cover remapped to the wetland classes.
    Igbp,
}

/// IGBP class codes mapped onto the wetland domain.
const IGBP_PERMANENT_WETLANDS: u8 = 11;
const IGBP_WATER_BODIES: u8 = 17;

impl LabelMode {
    /// Number used in run labels (`_lm{n}`).
    pub fn number(self) -> u8 {
        match self {
            LabelMode::Vmi => 1,
            LabelMode::Digitized => 2,
            LabelMode::Igbp => 3,
        }
    }

    pub fn training_asset(self) -> &'static str {
        match self {
            LabelMode::Vmi => "target10m_lm1",
            LabelMode::Digitized => "target10m_lm2_training",
            LabelMode::Igbp => "MCD12Q1_LC_Type1",
        }
    }

    /// Independent validation raster, when the mode has one.
    pub fn validation_asset(self) -> Option<&'static str> {
        match self {
            LabelMode::Digitized => Some("target10m_lm2_validation"),
            LabelMode::Vmi | LabelMode::Igbp => None,
        }
    }

    /// Sampling pixel spacing in metres.
    pub fn default_scale_m(self) -> f64 {
        match self {
            LabelMode::Vmi => 100.0,
            LabelMode::Digitized => 10.0,
            LabelMode::Igbp => 500.0,
        }
    }

    /// Turn the raw asset into a label band in the class domain.
    pub fn prepare(self, raw: Band) -> Band {
        match self {
            LabelMode::Igbp => remap_igbp(&raw),
            LabelMode::Vmi | LabelMode::Digitized => raw,
        }
    }
}

/// IGBP land cover → {1 non-wetland, 2 wetland, 3 water}. Masked pixels stay masked.
pub fn remap_igbp(lc: &Band) -> Band {
    let data = lc
        .data
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                return f32::NAN;
            }
            match v as u8 {
                IGBP_PERMANENT_WETLANDS => ClassLabel::Wetland.value() as f32,
                IGBP_WATER_BODIES => ClassLabel::Water.value() as f32,
                _ => ClassLabel::NonWetland.value() as f32,
            }
        })
        .collect();
    Band { name: lc.name.clone(), grid: lc.grid, data }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GridSpec;

    #[test]
    fn from_value_accepts_only_the_domain() {
        assert_eq!(ClassLabel::from_value(0.0), Some(ClassLabel::NoData));
        assert_eq!(ClassLabel::from_value(2.0), Some(ClassLabel::Wetland));
        assert_eq!(ClassLabel::from_value(3.0), Some(ClassLabel::Water));
        assert_eq!(ClassLabel::from_value(4.0), None);
        assert_eq!(ClassLabel::from_value(1.5), None);
        assert_eq!(ClassLabel::from_value(f32::NAN), None);
        assert_eq!(ClassLabel::from_value(-1.0), None);
    }

    #[test]
    fn igbp_remap() {
        let grid = GridSpec::new(4, 1, 0.0, 4.0, 0.0, 1.0);
        let lc = Band::from_data("LC_Type1", grid, vec![11.0, 17.0, 4.0, f32::NAN]).unwrap();
        let out = LabelMode::Igbp.prepare(lc);
        assert_eq!(&out.data[..3], &[2.0, 3.0, 1.0]);
        assert!(out.data[3].is_nan());
    }

    #[test]
    fn modes_carry_their_spacing_and_assets() {
        assert_eq!(LabelMode::Digitized.default_scale_m(), 10.0);
        assert_eq!(LabelMode::Vmi.default_scale_m(), 100.0);
        assert!(LabelMode::Digitized.validation_asset().is_some());
        assert!(LabelMode::Vmi.validation_asset().is_none());
        assert_eq!(LabelMode::default(), LabelMode::Digitized);
    }
}
