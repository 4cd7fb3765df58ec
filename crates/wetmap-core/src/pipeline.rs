//! Run orchestration.
//!
//! validate → resolve region → plan windows → evaluate stack → sample →
//! train → evaluate → export. Every failure is reported as a [`RunFailure`]
//! naming the stage, the offending window or region, and what had already
//! been produced.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use crate::backend::{CollectionQuery, ImageSource};
use crate::classifier::{classify_samples, classify_stack, Classifier, FeatureImportance, TrainedModel};
use crate::collection::SensorFamily;
use crate::composite::SensorCompositor;
use crate::config::{Partition, RunConfig};
use crate::error::{PipelineError, Result};
use crate::evaluation::{evaluate, AccuracyReport};
use crate::export::LocalExporter;
use crate::geometry::Region;
use crate::jobs::{JobHandle, JobKind, JobRunner};
use crate::labels::{ClassLabel, LabelMode};
use crate::regions;
use crate::sampling::{partition, ClassFill, SamplePartition, StratifiedSampler};
use crate::season::{plan_windows, TemporalWindow};
use crate::stack::{FeatureStack, FeatureStackPlan};

/// Tolerance used for the first retry when the region has none.
const FIRST_RETRY_TOLERANCE_M: f64 = 10.0;

/// `{region}_run{minutes since 2022-03-08}_lm{mode}`.
pub fn run_label(region: &str, mode: LabelMode, now: DateTime<Utc>) -> String {
    let minutes = NaiveDate::from_ymd_opt(2022, 3, 8)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map_or(0, |epoch| (now.naive_utc() - epoch).num_minutes());
    format!("{region}_run{minutes}_lm{}", mode.number())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Configuration,
    Region,
    Planning,
    Compositing,
    Sampling,
    Training,
    Evaluation,
    Export,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Configuration => "configuration",
            Stage::Region => "region resolution",
            Stage::Planning => "planning",
            Stage::Compositing => "compositing",
            Stage::Sampling => "sampling",
            Stage::Training => "training",
            Stage::Evaluation => "evaluation",
            Stage::Export => "export",
        };
        f.write_str(s)
    }
}

/// Terminal run failure.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed for {subject}: {error}; produced so far: {}", produced_list(.produced))]
pub struct RunFailure {
    pub stage: Stage,
    /// Window label or region name the failure concerns.
    pub subject: String,
    #[source]
    pub error: PipelineError,
    pub produced: Vec<String>,
}

fn produced_list(produced: &[String]) -> String {
    if produced.is_empty() {
        "nothing".into()
    } else {
        produced.join(", ")
    }
}

/// Everything a successful run reports.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_label: String,
    pub region: String,
    pub windows: Vec<String>,
    pub band_names: Vec<String>,
    pub training_fill: Vec<ClassFill>,
    pub validation_fill: Vec<ClassFill>,
    pub training_accuracy: AccuracyReport,
    pub validation_accuracy: AccuracyReport,
    pub feature_importance: Vec<FeatureImportance>,
    pub degraded_windows: Vec<(String, SensorFamily)>,
    pub artifacts: Vec<PathBuf>,
}

/// Tracks produced inputs so failures can list them.
#[derive(Default)]
struct Progress {
    produced: Vec<String>,
}

impl Progress {
    fn note(&mut self, what: impl Into<String>) {
        let what = what.into();
        debug!("[run] produced {what}");
        self.produced.push(what);
    }

    fn fail(&self, stage: Stage, fallback: &str, error: PipelineError) -> RunFailure {
        let subject = match &error {
            PipelineError::EmptyCollection { window, .. } => window.clone(),
            PipelineError::EmptyRegion { region } => region.clone(),
            _ => fallback.to_string(),
        };
        RunFailure { stage, subject, error, produced: self.produced.clone() }
    }
}

pub struct RunOrchestrator<C: Classifier> {
    config: RunConfig,
    source: Arc<dyn ImageSource>,
    classifier: C,
    jobs: JobRunner,
    out_dir: PathBuf,
    run_label: String,
}

impl<C: Classifier> RunOrchestrator<C> {
    /// Validates the configuration before anything else happens.
    pub fn new(
        config: RunConfig,
        source: Arc<dyn ImageSource>,
        classifier: C,
        out_dir: impl Into<PathBuf>,
    ) -> std::result::Result<Self, RunFailure> {
        config
            .validate()
            .map_err(|e| Progress::default().fail(Stage::Configuration, &config.region, e))?;
        let label_region = regions::lookup(&config.region).map_or(regions::ALL, |c| c.name);
        let run_label = run_label(label_region, config.label_mode, Utc::now());
        let jobs = JobRunner::new(Duration::from_secs(config.interactive_timeout_secs));
        Ok(Self { config, source, classifier, jobs, out_dir: out_dir.into(), run_label })
    }

    pub fn with_run_label(mut self, label: impl Into<String>) -> Self {
        self.run_label = label.into();
        self
    }

    pub fn run_label(&self) -> &str {
        &self.run_label
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Region from the static table and the backend boundary, simplified by
    /// the table tolerance. Returns the region and that tolerance.
    pub fn resolve_region(&self) -> Result<(Region, f64)> {
        if self.config.region.trim().eq_ignore_ascii_case(regions::ALL) {
            return Ok((Region::new(regions::ALL, 0, regions::NATIONAL_BBOX.to_polygon())?, 0.0));
        }
        let county = regions::lookup(&self.config.region)
            .ok_or_else(|| PipelineError::config(format!("unknown region '{}'", self.config.region)))?;
        let boundary = match self.source.region_boundary(county.code)? {
            Some(b) => b,
            None => {
                debug!("[run] no boundary for {}; using its bounding rectangle", county.name);
                county.bbox.to_polygon()
            }
        };
        let region = Region::new(county.name, county.code, boundary)?;
        if county.simplify_m > 0.0 {
            Ok((region.simplified(county.simplify_m), county.simplify_m))
        } else {
            Ok((region, 0.0))
        }
    }

    /// Run `op` on the region; on `ResourceLimit` simplify the boundary at
    /// double the previous tolerance and try again.
    fn with_geometry_retry<T>(
        &self,
        region: &Region,
        tolerance_m: f64,
        mut op: impl FnMut(&Region) -> Result<T>,
    ) -> Result<(Region, T)> {
        let mut current = region.clone();
        let mut tolerance = tolerance_m;
        let mut attempt = 0;
        loop {
            match op(&current) {
                Ok(v) => return Ok((current, v)),
                Err(PipelineError::ResourceLimit(why)) if attempt < self.config.max_geometry_retries => {
                    attempt += 1;
                    tolerance = if tolerance > 0.0 { tolerance * 2.0 } else { FIRST_RETRY_TOLERANCE_M };
                    current = region.simplified(tolerance);
                    warn!(
                        "[run] {why}; retry {attempt}/{} with boundary simplified at {tolerance} m ({} vertices)",
                        self.config.max_geometry_retries,
                        current.boundary.vertex_count()
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn run(&self) -> std::result::Result<RunReport, RunFailure> {
        let cfg = &self.config;
        let mut progress = Progress::default();
        info!("[run] {} starting", self.run_label);

        // Region.
        let (region, tolerance) = self.resolve_region().map_err(|e| progress.fail(Stage::Region, &cfg.region, e))?;
        let (region, ()) = self
            .with_geometry_retry(&region, tolerance, |r| self.source.admit_region(r))
            .map_err(|e| progress.fail(Stage::Region, &region.name, e))?;
        progress.note(format!("region {} ({} vertices)", region.name, region.boundary.vertex_count()));

        // Plan.
        let windows = plan_windows(&cfg.years, &cfg.seasons).map_err(|e| progress.fail(Stage::Planning, &region.name, e))?;
        let plan = FeatureStackPlan::new(cfg, region.bbox(), windows.clone())
            .map_err(|e| progress.fail(Stage::Planning, &region.name, e))?;
        progress.note(format!("plan of {} bands over {} windows", plan.band_names().len(), windows.len()));

        if cfg.verbose {
            self.log_observation_counts(&region, &windows);
        }

        // Stack.
        let evaluated = {
            let plan = plan.clone();
            let config = cfg.clone();
            let source = Arc::clone(&self.source);
            self.jobs
                .submit(JobKind::Export, "feature stack", move || plan.evaluate(&config, source.as_ref()))
                .and_then(JobHandle::wait)
                .map_err(|e| progress.fail(Stage::Compositing, &region.name, e))?
        };
        progress.note(format!("feature stack ({} bands)", evaluated.stack.bands().len()));
        let stack = Arc::new(
            evaluated
                .usable()
                .map_err(|e| progress.fail(Stage::Compositing, &region.name, e))?,
        );

        let validation_stack = self
            .validation_stack(&stack)
            .map_err(|e| progress.fail(Stage::Sampling, &region.name, e))?;
        if validation_stack.is_some() {
            progress.note("validation label stack");
        }

        // Sample.
        let (region, parts) = self
            .with_geometry_retry(&region, tolerance, |r| {
                self.source.admit_region(r)?;
                self.sample(r, &stack, validation_stack.as_ref())
            })
            .map_err(|e| progress.fail(Stage::Sampling, &region.name, e))?;
        progress.note(format!(
            "{} training / {} validation records",
            parts.training.len(),
            parts.validation.len()
        ));
        if cfg.verbose {
            if let Some(first) = parts.training.records.first() {
                info!("[run] first training record: {first:?}");
            }
        }

        // Train.
        let model = self
            .classifier
            .train(&parts.training)
            .map_err(|e| progress.fail(Stage::Training, &region.name, e))?;
        let model = Arc::new(model);
        let train_pred = classify_samples(model.as_ref(), &parts.training);
        let training_accuracy =
            evaluate(&parts.training, &train_pred).map_err(|e| progress.fail(Stage::Training, &region.name, e))?;
        let importance = model.feature_importance();
        progress.note("trained model");

        // Evaluate.
        let valid_pred = classify_samples(model.as_ref(), &parts.validation);
        let validation_accuracy = evaluate(&parts.validation, &valid_pred)
            .map_err(|e| progress.fail(Stage::Evaluation, &region.name, e))?;
        info!(
            "[run] validation accuracy {:.4}, kappa {}",
            validation_accuracy.overall_accuracy,
            validation_accuracy.kappa.map_or_else(|| "undefined".to_string(), |k| format!("{k:.4}"))
        );
        if cfg.verbose {
            info!("[run] training confusion matrix\n{}", training_accuracy.matrix);
            info!("[run] validation error matrix\n{}", validation_accuracy.matrix);
        }
        progress.note("accuracy reports");

        // Export.
        let artifacts = self
            .export(ExportInputs {
                region: &region,
                stack: &stack,
                model,
                parts: &parts,
                train_pred,
                valid_pred,
                training: &training_accuracy,
                validation: &validation_accuracy,
                importance: &importance,
            })
            .map_err(|e| progress.fail(Stage::Export, &region.name, e))?;

        info!("[run] {} finished: {} artifacts", self.run_label, artifacts.len());
        Ok(RunReport {
            run_label: self.run_label.clone(),
            region: region.name.clone(),
            windows: windows.iter().map(|w| w.label.clone()).collect(),
            band_names: stack.band_names(),
            training_fill: parts.training_fill,
            validation_fill: parts.validation_fill,
            training_accuracy,
            validation_accuracy,
            feature_importance: importance,
            degraded_windows: evaluated.degraded,
            artifacts,
        })
    }

    /// The evaluated stack relabelled with the independent validation raster,
    /// when the partition mode draws from one.
    fn validation_stack(&self, stack: &FeatureStack) -> Result<Option<Arc<FeatureStack>>> {
        if self.config.sampling.partition != Partition::Dual {
            return Ok(None);
        }
        let asset = self.config.label_mode.validation_asset().ok_or_else(|| {
            PipelineError::config(format!("label mode {:?} has no validation raster", self.config.label_mode))
        })?;
        let label = self.config.label_mode.prepare(self.source.label_raster(asset)?);
        Ok(Some(Arc::new(stack.with_target(&label)?)))
    }

    fn sample(
        &self,
        region: &Region,
        stack: &Arc<FeatureStack>,
        validation: Option<&Arc<FeatureStack>>,
    ) -> Result<SamplePartition> {
        let region = region.clone();
        let stack = Arc::clone(stack);
        let validation = validation.cloned();
        let cfg = self.config.sampling.clone();
        let scale = self.config.sampling_scale_m();
        self.jobs
            .submit(JobKind::Export, format!("stratified sample of {}", region.name), move || {
                let sampler = StratifiedSampler::new(&region, scale, cfg.seed);
                partition(&sampler, &stack, validation.as_deref(), &cfg)
            })?
            .wait()
    }

    fn export(&self, inputs: ExportInputs<'_, C::Model>) -> Result<Vec<PathBuf>> {
        let cfg = &self.config;
        let exporter = Arc::new(LocalExporter::new(&self.out_dir, &self.run_label)?);
        let mut handles: Vec<JobHandle<PathBuf>> = Vec::new();

        {
            let ex = Arc::clone(&exporter);
            let importance = inputs.importance.to_vec();
            handles.push(self.jobs.submit(JobKind::Export, "feature importance", move || {
                ex.feature_importance(&importance)
            })?);
        }
        {
            let ex = Arc::clone(&exporter);
            let training = inputs.training.matrix.clone();
            let validation = inputs.validation.matrix.clone();
            handles.push(self.jobs.submit(JobKind::Export, "accuracy matrices", move || {
                ex.accuracy_matrices(&training, &validation)
            })?);
        }
        if cfg.export.classified_samples {
            let keep = cfg.sampling.keep_geometries;
            for (subset, set, pred) in [
                ("training", &inputs.parts.training, inputs.train_pred),
                ("validation", &inputs.parts.validation, inputs.valid_pred),
            ] {
                let ex = Arc::clone(&exporter);
                let set = set.clone();
                handles.push(self.jobs.submit(JobKind::Export, format!("{subset} sample table"), move || {
                    ex.classified_samples(subset, &set, &pred, keep)
                })?);
            }
        }
        {
            let ex = Arc::clone(&exporter);
            let stack = Arc::clone(inputs.stack);
            let region = inputs.region.clone();
            let model = inputs.model;
            let mut export_cfg = cfg.export.clone();
            let retries = cfg.max_geometry_retries;
            handles.push(self.jobs.submit(JobKind::Export, "classified raster", move || {
                let classes = classify_stack(model.as_ref(), &stack, &region);
                let mut attempt = 0;
                loop {
                    match ex.classified_raster(&classes, &region, &export_cfg) {
                        Err(PipelineError::ResourceLimit(why)) if attempt < retries => {
                            attempt += 1;
                            export_cfg.scale_m *= 2.0;
                            warn!("[run] {why}; retry {attempt}/{retries} at {} m", export_cfg.scale_m);
                        }
                        other => return other,
                    }
                }
            })?);
        }

        handles.into_iter().map(JobHandle::wait).collect()
    }

    /// Verbose diagnostics: acquisitions and mean clear observations per
    /// window and branch, bounded by the interactive timeout.
    fn log_observation_counts(&self, region: &Region, windows: &[TemporalWindow]) {
        let config = self.config.clone();
        let source = Arc::clone(&self.source);
        let bounds = region.bbox();
        let windows = windows.to_vec();
        let result = self.jobs.interactive("observation counts", move || {
            let grid = source.working_grid(&bounds)?;
            let compositor = SensorCompositor::new(&config, grid, bounds);
            let mut lines = Vec::new();
            for w in &windows {
                for family in compositor.branches() {
                    let images = source.images(&CollectionQuery { family, bounds, window: w.clone() })?;
                    let count = compositor.observation_count(family, &images, w)?;
                    let mean = count.data.iter().map(|&v| v as f64).sum::<f64>() / count.data.len().max(1) as f64;
                    lines.push(format!("{} {family}: {} images, {mean:.1} clear observations/pixel", w.label, images.len()));
                }
            }
            Ok(lines)
        });
        match result {
            Ok(lines) => lines.iter().for_each(|l| info!("[run] {l}")),
            Err(e) => warn!("[run] diagnostics skipped: {e}"),
        }
    }
}

struct ExportInputs<'a, M> {
    region: &'a Region,
    stack: &'a Arc<FeatureStack>,
    model: Arc<M>,
    parts: &'a SamplePartition,
    train_pred: Vec<ClassLabel>,
    valid_pred: Vec<ClassLabel>,
    training: &'a AccuracyReport,
    validation: &'a AccuracyReport,
    importance: &'a [FeatureImportance],
}
