use serde::{Deserialize, Serialize};
use std::time::Duration;

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn harmonic_mean(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// Binary confusion counts with class 1 as the positive label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub tn: u64,
    pub fp: u64,
    pub fn_: u64,
    pub tp: u64,
}

impl ConfusionMatrix {
    pub fn from_predictions(y_true: &[u8], y_pred: &[u8]) -> Self {
        let mut m = Self::default();
        for (&t, &p) in y_true.iter().zip(y_pred) {
            match (t > 0, p > 0) {
                (false, false) => m.tn += 1,
                (false, true) => m.fp += 1,
                (true, false) => m.fn_ += 1,
                (true, true) => m.tp += 1,
            }
        }
        m
    }

    pub fn total(&self) -> u64 {
        self.tn + self.fp + self.fn_ + self.tp
    }

    /// `[[TN, FP], [FN, TP]]`
    pub fn as_rows(&self) -> [[u64; 2]; 2] {
        [[self.tn, self.fp], [self.fn_, self.tp]]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub confusion: ConfusionMatrix,
    pub negative: ClassMetrics,
    pub positive: ClassMetrics,
}

impl Evaluation {
    pub fn compute(y_true: &[u8], y_pred: &[u8]) -> Self {
        let c = ConfusionMatrix::from_predictions(y_true, y_pred);

        let precision = ratio(c.tp, c.tp + c.fp);
        let recall = ratio(c.tp, c.tp + c.fn_);
        let positive = ClassMetrics {
            precision,
            recall,
            f1: harmonic_mean(precision, recall),
            support: c.tp + c.fn_,
        };

        let neg_precision = ratio(c.tn, c.tn + c.fn_);
        let neg_recall = ratio(c.tn, c.tn + c.fp);
        let negative = ClassMetrics {
            precision: neg_precision,
            recall: neg_recall,
            f1: harmonic_mean(neg_precision, neg_recall),
            support: c.tn + c.fp,
        };

        Self {
            accuracy: ratio(c.tp + c.tn, c.total()),
            precision,
            recall,
            f1: positive.f1,
            confusion: c,
            negative,
            positive,
        }
    }

    /// Per-class table followed by the confusion matrix.
    pub fn format(&self) -> String {
        let mut out = format!(
            "{:>10} {:>9} {:>9} {:>9} {:>9}\n",
            "", "precision", "recall", "f1-score", "support"
        );
        for (name, m) in [("negative", &self.negative), ("positive", &self.positive)] {
            out.push_str(&format!(
                "{:>10} {:>9.3} {:>9.3} {:>9.3} {:>9}\n",
                name, m.precision, m.recall, m.f1, m.support
            ));
        }
        out.push_str(&format!(
            "{:>10} {:>9} {:>9} {:>9.3} {:>9}\n",
            "accuracy",
            "",
            "",
            self.accuracy,
            self.confusion.total()
        ));
        let [[tn, fp], [fn_, tp]] = self.confusion.as_rows();
        out.push_str(&format!("confusion_matrix:\n[[{} {}]\n [{} {}]]\n", tn, fp, fn_, tp));
        out
    }
}

/// Report written next to the artifacts after a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub train_secs: f64,
}

impl MetricsReport {
    pub fn new(evaluation: &Evaluation, train_time: Duration) -> Self {
        Self {
            accuracy: evaluation.accuracy,
            precision: evaluation.precision,
            recall: evaluation.recall,
            f1: evaluation.f1,
            train_secs: (train_time.as_secs_f64() * 100.0).round() / 100.0,
        }
    }
}
