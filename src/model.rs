use crate::{
    error::{AppError, AppResult},
    features::{CsrMatrix, SparseVector},
};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// P(positive) at or above this is labelled positive.
pub const DECISION_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    /// Inverse L2 regularisation strength.
    pub c: f64,
    pub max_iter: usize,
    /// Stop once the largest gradient component falls below this.
    pub tol: f64,
    /// Number of correction pairs kept by L-BFGS.
    pub history: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 2000,
            tol: 1e-4,
            history: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitReport {
    pub iterations: usize,
    pub converged: bool,
    pub loss: f64,
}

/// Binary logistic regression over sparse TF-IDF rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub weights: Vec<f64>,
    pub bias: f64,
}

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

// log(1 + exp(-m)) without overflow
fn log_loss_margin(m: f64) -> f64 {
    if m > 0.0 {
        (-m).exp().ln_1p()
    } else {
        -m + m.exp().ln_1p()
    }
}

struct Objective<'a> {
    x: &'a CsrMatrix,
    targets: Vec<f64>,
    c: f64,
}

impl Objective<'_> {
    /// Regularised loss and gradient at `theta = [w..., b]`. The bias is not penalised.
    fn evaluate(&self, theta: &DVector<f64>) -> (f64, DVector<f64>) {
        let d = self.x.n_cols();
        let params = theta.as_slice();
        let (w, b) = (&params[..d], params[d]);

        let mut grad = DVector::zeros(d + 1);
        let mut data_loss = 0.0;
        for (i, &t) in self.targets.iter().enumerate() {
            let z = self.x.row_dot(i, w) + b;
            let sign = if t > 0.5 { 1.0 } else { -1.0 };
            data_loss += log_loss_margin(sign * z);

            let residual = sigmoid(z) - t;
            let (indices, values) = self.x.row(i);
            for (&j, &v) in indices.iter().zip(values) {
                grad[j] += self.c * residual * v;
            }
            grad[d] += self.c * residual;
        }

        let mut penalty = 0.0;
        for j in 0..d {
            penalty += w[j] * w[j];
            grad[j] += w[j];
        }

        (0.5 * penalty + self.c * data_loss, grad)
    }
}

impl LogisticRegression {
    pub fn zeros(n_features: usize) -> Self {
        Self {
            weights: vec![0.0; n_features],
            bias: 0.0,
        }
    }

    pub fn n_features(&self) -> usize {
        self.weights.len()
    }

    /// Fits weights and bias by L-BFGS on the L2-regularised logistic loss.
    ///
    /// Hitting `max_iter` is not an error: the last iterate is returned and
    /// `FitReport::converged` is false.
    pub fn fit(
        x: &CsrMatrix,
        labels: &[u8],
        options: &SolverOptions,
    ) -> AppResult<(Self, FitReport)> {
        if x.n_rows() != labels.len() {
            return Err(AppError::InvalidConfig(format!(
                "{} rows but {} labels",
                x.n_rows(),
                labels.len()
            )));
        }
        if options.max_iter == 0 {
            return Err(AppError::InvalidConfig("max_iter must be positive".to_string()));
        }

        let d = x.n_cols();
        let objective = Objective {
            x,
            targets: labels.iter().map(|&y| if y > 0 { 1.0 } else { 0.0 }).collect(),
            c: options.c,
        };

        let mut theta = DVector::zeros(d + 1);
        let (mut loss, mut grad) = objective.evaluate(&theta);
        let mut pairs: VecDeque<(DVector<f64>, DVector<f64>, f64)> =
            VecDeque::with_capacity(options.history);

        let mut iterations = 0;
        let mut converged = grad.amax() <= options.tol;

        while !converged && iterations < options.max_iter {
            iterations += 1;

            let mut direction = -two_loop(&grad, &pairs);
            let mut slope = grad.dot(&direction);
            if slope >= 0.0 {
                // Not a descent direction; restart from steepest descent.
                pairs.clear();
                direction = -grad.clone();
                slope = grad.dot(&direction);
            }

            let mut step = if pairs.is_empty() {
                (1.0 / grad.norm()).min(1.0)
            } else {
                1.0
            };

            let mut accepted = None;
            for _ in 0..40 {
                let candidate = &theta + &direction * step;
                let (candidate_loss, candidate_grad) = objective.evaluate(&candidate);
                if candidate_loss <= loss + 1e-4 * step * slope {
                    accepted = Some((candidate, candidate_loss, candidate_grad));
                    break;
                }
                step *= 0.5;
            }

            let Some((next, next_loss, next_grad)) = accepted else {
                debug!("Line search made no progress at iteration {}", iterations);
                break;
            };

            let s = &next - &theta;
            let y = &next_grad - &grad;
            let sy = s.dot(&y);
            if sy > 1e-10 {
                if pairs.len() == options.history {
                    pairs.pop_front();
                }
                pairs.push_back((s, y, 1.0 / sy));
            }

            let relative_drop = (loss - next_loss) / loss.abs().max(next_loss.abs()).max(1.0);
            theta = next;
            loss = next_loss;
            grad = next_grad;

            if grad.amax() <= options.tol || relative_drop <= 64.0 * f64::EPSILON {
                converged = true;
            }
        }

        if converged {
            info!(
                "Logistic regression converged after {} iterations (loss {:.6})",
                iterations, loss
            );
        } else {
            warn!(
                "Logistic regression did not converge ({} of max_iter={} iterations, loss {:.6}, max |grad| {:.3e}); using last iterate",
                iterations,
                options.max_iter,
                loss,
                grad.amax()
            );
        }

        let params = theta.as_slice();
        let model = Self {
            weights: params[..d].to_vec(),
            bias: params[d],
        };

        Ok((
            model,
            FitReport {
                iterations,
                converged,
                loss,
            },
        ))
    }

    pub fn decision_function(&self, x: &SparseVector) -> f64 {
        x.dot(&self.weights) + self.bias
    }

    /// Probability of the positive class.
    pub fn predict_positive(&self, x: &SparseVector) -> f64 {
        sigmoid(self.decision_function(x))
    }

    /// `(P(negative), P(positive))`.
    pub fn predict_proba(&self, x: &SparseVector) -> (f64, f64) {
        let p = self.predict_positive(x);
        (1.0 - p, p)
    }

    pub fn predict(&self, x: &SparseVector) -> u8 {
        u8::from(self.predict_positive(x) >= DECISION_THRESHOLD)
    }

    pub fn predict_batch(&self, x: &CsrMatrix) -> Vec<u8> {
        (0..x.n_rows())
            .map(|i| {
                let p = sigmoid(x.row_dot(i, &self.weights) + self.bias);
                u8::from(p >= DECISION_THRESHOLD)
            })
            .collect()
    }
}

// L-BFGS two-loop recursion: approximates H^-1 * grad from stored (s, y, 1/(s.y)) pairs.
fn two_loop(
    grad: &DVector<f64>,
    pairs: &VecDeque<(DVector<f64>, DVector<f64>, f64)>,
) -> DVector<f64> {
    let mut q = grad.clone();
    let mut alphas = Vec::with_capacity(pairs.len());
    for (s, y, rho) in pairs.iter().rev() {
        let alpha = rho * s.dot(&q);
        q -= y * alpha;
        alphas.push(alpha);
    }

    if let Some((s, y, _)) = pairs.back() {
        let gamma = s.dot(y) / y.dot(y);
        q *= gamma;
    }

    for ((s, y, rho), alpha) in pairs.iter().zip(alphas.into_iter().rev()) {
        let beta = rho * y.dot(&q);
        q += s * (alpha - beta);
    }
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{TfidfVectorizer, VectorizerParams};

    fn toy_corpus(n: usize) -> (Vec<String>, Vec<u8>) {
        let mut docs = Vec::new();
        let mut labels = Vec::new();
        for _ in 0..n {
            docs.push("great product".to_string());
            labels.push(1);
            docs.push("terrible product".to_string());
            labels.push(0);
        }
        (docs, labels)
    }

    fn fit_toy() -> (TfidfVectorizer, LogisticRegression, FitReport) {
        let (docs, labels) = toy_corpus(50);
        let params = VectorizerParams {
            ngram_range: (1, 2),
            min_df: 1,
            max_features: 100,
        };
        let vectorizer = TfidfVectorizer::fit(&docs, &params).unwrap();
        let x = vectorizer.transform_batch(&docs);
        let (clf, report) =
            LogisticRegression::fit(&x, &labels, &SolverOptions::default()).unwrap();
        (vectorizer, clf, report)
    }

    #[test]
    fn test_sigmoid_is_stable() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!((sigmoid(2.0) + sigmoid(-2.0) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_fit_separates_toy_corpus() {
        let (vectorizer, clf, report) = fit_toy();
        assert!(report.converged);
        assert!(clf.predict_positive(&vectorizer.transform("great")) > 0.5);
        assert!(clf.predict_positive(&vectorizer.transform("terrible")) < 0.5);
        assert_eq!(clf.predict(&vectorizer.transform("great product")), 1);
        assert_eq!(clf.predict(&vectorizer.transform("terrible product")), 0);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let (_, a, _) = fit_toy();
        let (_, b, _) = fit_toy();
        assert_eq!(a, b);
    }

    #[test]
    fn test_balanced_corpus_has_near_zero_bias() {
        let (vectorizer, clf, _) = fit_toy();
        let zero = vectorizer.transform("nothing known here");
        assert!(zero.is_zero());
        assert_eq!(clf.decision_function(&zero), clf.bias);
        assert!(clf.bias.abs() < 1e-2);
    }

    #[test]
    fn test_iteration_cap_returns_best_effort() {
        let (docs, labels) = toy_corpus(50);
        let params = VectorizerParams {
            ngram_range: (1, 2),
            min_df: 1,
            max_features: 100,
        };
        let vectorizer = TfidfVectorizer::fit(&docs, &params).unwrap();
        let x = vectorizer.transform_batch(&docs);
        let options = SolverOptions {
            max_iter: 1,
            ..SolverOptions::default()
        };
        let (clf, report) = LogisticRegression::fit(&x, &labels, &options).unwrap();
        assert!(!report.converged);
        assert_eq!(report.iterations, 1);
        assert_eq!(clf.n_features(), vectorizer.vocabulary_size());
        assert!(clf.predict_positive(&vectorizer.transform("great")) > 0.5);
    }

    #[test]
    fn test_fit_rejects_label_mismatch() {
        let x = CsrMatrix::from_rows(&[SparseVector::zeros(3)], 3);
        assert!(matches!(
            LogisticRegression::fit(&x, &[1, 0], &SolverOptions::default()),
            Err(AppError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let (vectorizer, clf, _) = fit_toy();
        for text in ["great", "terrible", "", "great terrible product", "unknown words"] {
            let (neg, pos) = clf.predict_proba(&vectorizer.transform(text));
            assert!((neg + pos - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_threshold_is_closed_at_half() {
        let clf = LogisticRegression::zeros(4);
        let x = SparseVector::zeros(4);
        assert_eq!(clf.predict_positive(&x), 0.5);
        assert_eq!(clf.predict(&x), 1);

        let negative = LogisticRegression {
            weights: vec![0.0; 4],
            bias: -1e-9,
        };
        assert_eq!(negative.predict(&x), 0);
    }
}
