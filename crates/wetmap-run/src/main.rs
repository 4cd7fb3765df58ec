/// Wetland mapping run: loads a run configuration and a local scene archive,
/// composites the seasonal feature stack, samples, trains, evaluates and
/// writes the run artifacts.
mod archive;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};
use log::info;
use wetmap_core::regions;
use wetmap_core::season::plan_windows;
use wetmap_core::stack::FeatureStackPlan;
use wetmap_core::{MinimumDistance, RunConfig, RunOrchestrator};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "wetmap", about = "Seasonal SAR/optical wetland classification for one region")]
struct Args {
    /// Run configuration JSON (omit for the calibrated defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scene archive directory containing manifest.json
    #[arg(short, long, default_value = "data/archive")]
    archive: PathBuf,

    /// Output directory for artifacts (created if absent)
    #[arg(short, long, default_value = "data/runs")]
    output: PathBuf,

    /// County name or "all"; overrides the configured region
    #[arg(long)]
    region: Option<String>,

    /// Run interactive diagnostics
    #[arg(short, long)]
    verbose: bool,

    /// Validate and print the planned bands without computing anything
    #[arg(long)]
    dry_run: bool,
}

fn load_config(args: &Args) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => RunConfig::load(path).with_context(|| format!("Cannot load {}", path.display()))?,
        None => RunConfig::default(),
    };
    if let Some(region) = &args.region {
        config.region = region.clone();
    }
    config.verbose |= args.verbose;
    config.validate().context("Invalid run configuration")?;
    Ok(config)
}

/// Planned stack layout for the configured region, without touching data.
fn print_plan(config: &RunConfig) -> Result<()> {
    let bounds = regions::bbox_for(&config.region)
        .with_context(|| format!("Unknown region '{}'", config.region))?;
    let windows = plan_windows(&config.years, &config.seasons)?;
    let plan = FeatureStackPlan::new(config, bounds, windows)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "region": config.region,
            "windows": plan.windows().iter().map(|w| &w.label).collect::<Vec<_>>(),
            "bands": plan.band_names(),
        }))?
    );
    Ok(())
}

fn main() -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    builder.init();

    let args = Args::parse();
    let config = load_config(&args)?;

    if args.dry_run {
        return print_plan(&config);
    }

    let source = archive::load(&args.archive)
        .with_context(|| format!("Cannot load scene archive {}", args.archive.display()))?;
    let orchestrator = RunOrchestrator::new(config, Arc::new(source), MinimumDistance, &args.output)?;
    info!("[run] label {}", orchestrator.run_label());

    let report = orchestrator.run()?;

    let report_path = args.output.join(format!("{}_report.json", report.run_label));
    fs::write(&report_path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("Write failed: {}", report_path.display()))?;

    let kappa = report
        .validation_accuracy
        .kappa
        .map_or_else(|| "undefined".to_string(), |k| format!("{k:.4}"));
    info!(
        "[run] {}: validation accuracy {:.4}, kappa {kappa}, {} artifacts, report {}",
        report.run_label,
        report.validation_accuracy.overall_accuracy,
        report.artifacts.len(),
        report_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["wetmap"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn flags_override_the_configuration() {
        let config = load_config(&args(&["--region", "uppsala", "--verbose"])).unwrap();
        assert_eq!(config.region, "uppsala");
        assert!(config.verbose);
    }

    #[test]
    fn unknown_region_is_rejected_before_loading_data() {
        let err = load_config(&args(&["--region", "Atlantis"])).unwrap_err();
        assert!(format!("{err:#}").contains("Atlantis"), "got {err:#}");
    }

    #[test]
    fn config_file_is_read() {
        let path = std::env::temp_dir().join(format!("wetmap-cli-{}.json", std::process::id()));
        fs::write(&path, r#"{ "region": "Gotland", "years": [2019, 2020] }"#).unwrap();
        let config = load_config(&args(&["--config", path.to_str().unwrap()])).unwrap();
        assert_eq!(config.region, "Gotland");
        assert_eq!(config.years, vec![2019, 2020]);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn dry_run_plans_without_an_archive() {
        let config = load_config(&args(&["--dry-run", "--archive", "/nonexistent"])).unwrap();
        print_plan(&config).unwrap();
    }
}
