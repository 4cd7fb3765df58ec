//! Confusion matrix and accuracy statistics.

use std::fmt;

use log::warn;
use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::labels::ClassLabel;
use crate::sampling::SampleSet;

/// K×K counts indexed by (reference, predicted) over the non-zero classes
/// observed in either column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    classes: Vec<ClassLabel>,
    counts: Vec<Vec<u64>>,
    /// Pairs left out because either side is class 0.
    unscored: u64,
}

impl ConfusionMatrix {
    /// Tally reference/predicted pairs. Pairs involving class 0 are skipped
    /// and counted in [`ConfusionMatrix::unscored`].
    pub fn from_labels(reference: &[ClassLabel], predicted: &[ClassLabel]) -> Result<Self> {
        if reference.len() != predicted.len() {
            return Err(PipelineError::config(format!(
                "{} reference labels but {} predictions",
                reference.len(),
                predicted.len()
            )));
        }
        let mut classes: Vec<ClassLabel> =
            reference.iter().chain(predicted).copied().filter(|c| c.is_scored()).collect();
        classes.sort_unstable();
        classes.dedup();

        let k = classes.len();
        let mut counts = vec![vec![0u64; k]; k];
        let mut unscored = 0u64;
        let mut unpredicted = 0u64;
        for (r, p) in reference.iter().zip(predicted) {
            match (classes.binary_search(r), classes.binary_search(p)) {
                (Ok(i), Ok(j)) => counts[i][j] += 1,
                (Ok(_), Err(_)) => {
                    unscored += 1;
                    unpredicted += 1;
                }
                _ => unscored += 1,
            }
        }
        if unpredicted > 0 {
            warn!(
                "[evaluator] {unpredicted} of {} records predicted as no-data; left out of the matrix",
                reference.len()
            );
        }
        Ok(Self { classes, counts, unscored })
    }

    pub fn from_counts(classes: Vec<ClassLabel>, counts: Vec<Vec<u64>>) -> Result<Self> {
        let k = classes.len();
        if counts.len() != k || counts.iter().any(|row| row.len() != k) {
            return Err(PipelineError::config(format!("confusion matrix must be {k}x{k}")));
        }
        Ok(Self { classes, counts, unscored: 0 })
    }

    pub fn classes(&self) -> &[ClassLabel] {
        &self.classes
    }

    pub fn counts(&self) -> &[Vec<u64>] {
        &self.counts
    }

    /// Pairs skipped for involving class 0.
    pub fn unscored(&self) -> u64 {
        self.unscored
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    pub fn trace(&self) -> u64 {
        (0..self.classes.len()).map(|i| self.counts[i][i]).sum()
    }

    pub fn row_total(&self, i: usize) -> u64 {
        self.counts[i].iter().sum()
    }

    pub fn col_total(&self, j: usize) -> u64 {
        self.counts.iter().map(|row| row[j]).sum()
    }

    pub fn overall_accuracy(&self) -> Result<f64> {
        let total = self.total();
        if total == 0 {
            return Err(PipelineError::UndefinedMetric("overall accuracy of an empty matrix"));
        }
        Ok(self.trace() as f64 / total as f64)
    }

    /// Recall per class; `None` for a class with no reference samples.
    pub fn producers_accuracy(&self) -> Vec<Option<f64>> {
        (0..self.classes.len())
            .map(|i| ratio(self.counts[i][i], self.row_total(i)))
            .collect()
    }

    /// Precision per class; `None` for a class never predicted.
    pub fn consumers_accuracy(&self) -> Vec<Option<f64>> {
        (0..self.classes.len())
            .map(|j| ratio(self.counts[j][j], self.col_total(j)))
            .collect()
    }

    /// Chance agreement Σ row_c · col_c / total².
    pub fn expected_accuracy(&self) -> Result<f64> {
        let total = self.total() as f64;
        if total == 0.0 {
            return Err(PipelineError::UndefinedMetric("expected accuracy of an empty matrix"));
        }
        let chance: f64 = (0..self.classes.len())
            .map(|c| self.row_total(c) as f64 * self.col_total(c) as f64)
            .sum();
        Ok(chance / (total * total))
    }

    /// Cohen's kappa. Undefined for an empty matrix or when chance agreement
    /// is already perfect.
    pub fn kappa(&self) -> Result<f64> {
        let observed = self.overall_accuracy()?;
        let expected = self.expected_accuracy()?;
        if (1.0 - expected).abs() < f64::EPSILON {
            return Err(PipelineError::UndefinedMetric("kappa with expected accuracy 1"));
        }
        Ok((observed - expected) / (1.0 - expected))
    }

    /// Nested-array literal, e.g. `[[8,2],[1,9]]`.
    pub fn to_array_literal(&self) -> String {
        let rows: Vec<String> = self
            .counts
            .iter()
            .map(|row| {
                let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                format!("[{}]", cells.join(","))
            })
            .collect();
        format!("[{}]", rows.join(","))
    }
}

fn ratio(num: u64, den: u64) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>12}", "ref\\pred")?;
        for c in &self.classes {
            write!(f, "{:>12}", c.to_string())?;
        }
        for (c, row) in self.classes.iter().zip(&self.counts) {
            writeln!(f)?;
            write!(f, "{:>12}", c.to_string())?;
            for v in row {
                write!(f, "{v:>12}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassAccuracy {
    pub class: ClassLabel,
    pub producers: Option<f64>,
    pub consumers: Option<f64>,
}

/// Everything derived from one confusion matrix.
#[derive(Debug, Clone, Serialize)]
pub struct AccuracyReport {
    pub samples: u64,
    /// Records left out of the matrix for a class-0 label or prediction.
    pub unscored: u64,
    pub overall_accuracy: f64,
    /// `None` when kappa is undefined for this matrix.
    pub kappa: Option<f64>,
    pub per_class: Vec<ClassAccuracy>,
    pub matrix: ConfusionMatrix,
}

impl AccuracyReport {
    pub fn from_matrix(matrix: ConfusionMatrix) -> Result<Self> {
        let overall_accuracy = matrix.overall_accuracy()?;
        let kappa = match matrix.kappa() {
            Ok(k) => Some(k),
            Err(PipelineError::UndefinedMetric(why)) => {
                warn!("[evaluator] {why}; kappa left undefined");
                None
            }
            Err(e) => return Err(e),
        };
        let per_class = matrix
            .classes()
            .iter()
            .zip(matrix.producers_accuracy())
            .zip(matrix.consumers_accuracy())
            .map(|((&class, producers), consumers)| ClassAccuracy { class, producers, consumers })
            .collect();
        Ok(Self { samples: matrix.total(), unscored: matrix.unscored(), overall_accuracy, kappa, per_class, matrix })
    }
}

/// Score predictions for a sample set, record by record.
pub fn evaluate(reference: &SampleSet, predicted: &[ClassLabel]) -> Result<AccuracyReport> {
    let matrix = ConfusionMatrix::from_labels(&reference.labels(), predicted)?;
    AccuracyReport::from_matrix(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::classifier::{classify_samples, FeatureImportance, TrainedModel};
    use crate::sampling::SampleRecord;
    use crate::labels::ClassLabel::{NonWetland as N, Water as A, Wetland as W};

    fn two_class(counts: [[u64; 2]; 2]) -> ConfusionMatrix {
        ConfusionMatrix::from_counts(vec![N, W], counts.iter().map(|r| r.to_vec()).collect()).unwrap()
    }

    #[test]
    fn reference_scenario() {
        let m = two_class([[8, 2], [1, 9]]);
        assert_eq!(m.total(), 20);
        assert_relative_eq!(m.overall_accuracy().unwrap(), 0.85);
        assert_relative_eq!(m.kappa().unwrap(), 0.7, epsilon = 1e-12);
        assert_eq!(m.to_array_literal(), "[[8,2],[1,9]]");
    }

    #[test]
    fn producers_and_consumers() {
        let m = two_class([[8, 2], [1, 9]]);
        let p = m.producers_accuracy();
        let c = m.consumers_accuracy();
        assert_relative_eq!(p[0].unwrap(), 0.8);
        assert_relative_eq!(p[1].unwrap(), 0.9);
        assert_relative_eq!(c[0].unwrap(), 8.0 / 9.0);
        assert_relative_eq!(c[1].unwrap(), 9.0 / 11.0);

        let weighted: f64 = p.iter().enumerate().map(|(i, a)| a.unwrap() * m.row_total(i) as f64).sum();
        assert_relative_eq!(weighted, m.trace() as f64, epsilon = 1e-9);
    }

    #[test]
    fn perfect_diagonal_has_kappa_one() {
        let m = ConfusionMatrix::from_counts(vec![N, W, A], vec![vec![5, 0, 0], vec![0, 7, 0], vec![0, 0, 3]])
            .unwrap();
        assert_relative_eq!(m.kappa().unwrap(), 1.0);
    }

    #[test]
    fn chance_level_agreement_has_kappa_zero() {
        let m = two_class([[25, 25], [25, 25]]);
        assert_relative_eq!(m.kappa().unwrap(), 0.0);
    }

    #[test]
    fn kappa_stays_in_range() {
        for counts in [[[0, 10], [10, 0]], [[3, 7], [2, 8]], [[50, 1], [0, 1]]] {
            let k = two_class(counts).kappa().unwrap();
            assert!((-1.0..=1.0).contains(&k), "kappa {k} for {counts:?}");
        }
    }

    #[test]
    fn degenerate_matrices_are_undefined() {
        let empty = two_class([[0, 0], [0, 0]]);
        assert!(matches!(empty.kappa(), Err(PipelineError::UndefinedMetric(_))));
        let single = ConfusionMatrix::from_counts(vec![W], vec![vec![12]]).unwrap();
        assert!(matches!(single.kappa(), Err(PipelineError::UndefinedMetric(_))));
        let report = AccuracyReport::from_matrix(single).unwrap();
        assert_eq!(report.kappa, None);
        assert_relative_eq!(report.overall_accuracy, 1.0);
    }

    #[test]
    fn from_labels_counts_every_record() {
        let reference = [N, N, W, W, A, W];
        let predicted = [N, W, W, W, A, A];
        let m = ConfusionMatrix::from_labels(&reference, &predicted).unwrap();
        assert_eq!(m.classes(), &[N, W, A]);
        assert_eq!(m.total(), reference.len() as u64);
        assert_eq!(m.counts()[1], vec![0, 2, 1]);
        assert!(ConfusionMatrix::from_labels(&reference, &predicted[..2]).is_err());
    }

    #[test]
    fn class_zero_never_enters_the_matrix() {
        let m = ConfusionMatrix::from_labels(&[N, W, ClassLabel::NoData], &[N, ClassLabel::NoData, W]).unwrap();
        assert_eq!(m.classes(), &[N, W]);
        assert_eq!(m.total(), 1);
        assert_eq!(m.unscored(), 2);
    }

    /// Predicts no-data for any vector with a negative first feature.
    struct Abstaining;

    impl TrainedModel for Abstaining {
        fn predict(&self, features: &[f32]) -> ClassLabel {
            match features[0] {
                v if v < 0.0 => ClassLabel::NoData,
                v if v < 1.0 => N,
                _ => W,
            }
        }

        fn feature_importance(&self) -> Vec<FeatureImportance> {
            Vec::new()
        }
    }

    #[test]
    fn no_data_predictions_are_counted_as_unscored() {
        let record = |v: f32, label| SampleRecord {
            features: vec![v],
            label,
            region: "Uppsala".into(),
            row: 0,
            col: 0,
            random: 0.5,
        };
        let set = SampleSet {
            band_names: vec!["VV_summer2021".into()],
            records: vec![record(0.5, N), record(2.0, W), record(-1.0, W), record(0.2, N)],
            fills: Vec::new(),
        };
        let predicted = classify_samples(&Abstaining, &set);
        let report = evaluate(&set, &predicted).unwrap();
        assert_eq!(report.samples, 3);
        assert_eq!(report.unscored, 1);
        assert_eq!(report.samples + report.unscored, set.len() as u64);
        assert_relative_eq!(report.overall_accuracy, 1.0);
    }
}
