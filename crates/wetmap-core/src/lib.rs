//! Seasonal wetland mapping: window planning, SAR/optical compositing,
//! feature stack assembly, stratified sampling, classification and accuracy
//! assessment over a pluggable imagery backend.

pub mod backend;
pub mod classifier;
pub mod collection;
pub mod composite;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod export;
pub mod geometry;
pub mod jobs;
pub mod labels;
pub mod pipeline;
pub mod raster;
pub mod regions;
pub mod sampling;
pub mod season;
pub mod stack;

pub use backend::{CollectionQuery, ImageSource, InMemorySource};
pub use classifier::{Classifier, MinimumDistance, TrainedModel};
pub use config::RunConfig;
pub use error::{PipelineError, Result};
pub use evaluation::{AccuracyReport, ConfusionMatrix};
pub use labels::{ClassLabel, LabelMode};
pub use pipeline::{RunFailure, RunOrchestrator, RunReport};
pub use raster::{Band, GridSpec};
pub use season::{Season, TemporalWindow};
