//! Error taxonomy shared by every pipeline stage.

use crate::collection::SensorFamily;

/// Canonical error type for the core.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Bad or missing input parameters. Reported before any compute.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No source images survived filtering for a window.
    #[error("no {sensor} images left for window {window} after filtering")]
    EmptyCollection { sensor: SensorFamily, window: String },

    /// The region holds no eligible pixel for any class.
    #[error("region {region} has no eligible pixels for any class")]
    EmptyRegion { region: String },

    /// Two bands resolved to the same name. Indicates a planner/assembler bug.
    #[error("band name collision: {0}")]
    BandCollision(String),

    /// The compute backend refused a request as too large.
    #[error("request too large for the compute backend: {0}")]
    ResourceLimit(String),

    /// Degenerate confusion matrix.
    #[error("undefined metric: {0}")]
    UndefinedMetric(&'static str),

    #[error("band {band} missing from {context}")]
    MissingBand { band: String, context: String },

    #[error("grid mismatch: {0}")]
    GridMismatch(String),

    #[error("interactive job {id} ({description}) did not finish within {secs}s")]
    InteractiveTimeout { id: u64, description: String, secs: u64 },

    #[error("job {0} terminated without reporting a result")]
    JobLost(u64),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn missing_band(band: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingBand { band: band.into(), context: context.into() }
    }

    /// Whether the orchestrator may skip, narrow or retry instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::EmptyCollection { .. } | Self::EmptyRegion { .. } | Self::ResourceLimit(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(PipelineError::ResourceLimit("too many vertices".into()).is_recoverable());
        assert!(PipelineError::EmptyRegion { region: "Gotland".into() }.is_recoverable());
        assert!(PipelineError::EmptyCollection {
            sensor: SensorFamily::Optical,
            window: "winter2020".into(),
        }
        .is_recoverable());
        assert!(!PipelineError::BandCollision("VV_summer2021".into()).is_recoverable());
        assert!(!PipelineError::config("years is empty").is_recoverable());
        assert!(!PipelineError::UndefinedMetric("kappa").is_recoverable());
    }

    #[test]
    fn messages_name_the_subject() {
        let e = PipelineError::EmptyCollection {
            sensor: SensorFamily::Sar,
            window: "fall2021".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("SAR") && msg.contains("fall2021"), "got {msg}");
    }
}
