/// Offline accuracy audit: recomputes the confusion matrix, per-class
/// accuracies and kappa from an exported `*_ss_classified.csv` table.
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};
use log::{info, warn};
use wetmap_core::{AccuracyReport, ClassLabel, ConfusionMatrix};

#[derive(Parser, Debug)]
#[command(name = "accuracy", about = "Recompute accuracy statistics from a classified sample table")]
struct Args {
    /// Classified sample CSV written by a run
    input: PathBuf,

    /// Reference label column
    #[arg(long, default_value = "target")]
    reference: String,

    /// Predicted label column
    #[arg(long, default_value = "classification")]
    predicted: String,

    /// Also print the matrix as a table
    #[arg(long)]
    table: bool,
}

/// Reference and predicted labels of every row. Rows whose values fall
/// outside the class domain are skipped with a warning.
fn read_pairs<R: Read>(reader: R, reference: &str, predicted: &str) -> Result<(Vec<ClassLabel>, Vec<ClassLabel>)> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("Column '{name}' not found"))
    };
    let (ri, pi) = (column(reference)?, column(predicted)?);

    let mut refs = Vec::new();
    let mut preds = Vec::new();
    let mut skipped = 0usize;
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("Bad row {}", line + 2))?;
        let parse = |i: usize| record.get(i).and_then(|v| v.trim().parse::<f32>().ok()).and_then(ClassLabel::from_value);
        match (parse(ri), parse(pi)) {
            (Some(r), Some(p)) => {
                refs.push(r);
                preds.push(p);
            }
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!("[accuracy] skipped {skipped} rows with unparseable or out-of-domain labels");
    }
    Ok((refs, preds))
}

fn audit(refs: &[ClassLabel], preds: &[ClassLabel]) -> Result<AccuracyReport> {
    if refs.is_empty() {
        bail!("No labelled rows");
    }
    let matrix = ConfusionMatrix::from_labels(refs, preds)?;
    Ok(AccuracyReport::from_matrix(matrix)?)
}

fn main() -> Result<()> {
    Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let file = File::open(&args.input).with_context(|| format!("Cannot open {}", args.input.display()))?;
    let (refs, preds) = read_pairs(file, &args.reference, &args.predicted)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    info!("[accuracy] {} rows from {}", refs.len(), args.input.display());

    let report = audit(&refs, &preds)?;
    if args.table {
        eprintln!("{}", report.matrix);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
