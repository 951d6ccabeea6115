//! Platt scaling of the raw action gap.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// probability = sigmoid(coef * score + intercept)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattCalibration {
    pub coef: f64,
    pub intercept: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct PlattOptions {
    /// Inverse L2 strength on the coefficient; the intercept is not penalised.
    pub c: f64,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for PlattOptions {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 100,
            tol: 1e-10,
        }
    }
}

impl PlattCalibration {
    pub fn probability(&self, score: f64) -> f64 {
        sigmoid(self.coef * score + self.intercept)
    }

    pub fn probabilities(&self, scores: &[f64]) -> Vec<f64> {
        scores.iter().map(|s| self.probability(*s)).collect()
    }

    pub fn fit(scores: &[f64], labels: &[bool]) -> Result<Self> {
        Self::fit_with(scores, labels, PlattOptions::default())
    }

    /// Class-balanced, L2-regularised 1-D logistic regression solved by Newton steps.
    /// A single-class label set is reported as [`Error::DegenerateLabels`].
    pub fn fit_with(scores: &[f64], labels: &[bool], opts: PlattOptions) -> Result<Self> {
        if scores.len() != labels.len() {
            return Err(Error::DimensionMismatch {
                expected: labels.len(),
                actual: scores.len(),
            });
        }
        let n = labels.len();
        let positives = labels.iter().filter(|y| **y).count();
        if positives == 0 || positives == n {
            return Err(Error::DegenerateLabels {
                positives,
                total: n,
            });
        }
        let w_pos = n as f64 / (2.0 * positives as f64);
        let w_neg = n as f64 / (2.0 * (n - positives) as f64);
        let data: Vec<(f64, f64, f64)> = scores
            .iter()
            .zip(labels)
            .map(|(s, y)| {
                let s = if s.is_finite() { *s } else { 0.0 };
                let (y, w) = if *y { (1.0, w_pos) } else { (0.0, w_neg) };
                (s, y, w)
            })
            .collect();

        let objective = |a: f64, b: f64| -> f64 {
            let mut loss = a * a / (2.0 * opts.c);
            for &(s, y, w) in &data {
                let z = a * s + b;
                // log(1 + e^z) - y z, stable for large |z|
                let softplus = if z > 0.0 { z + (-z).exp().ln_1p() } else { z.exp().ln_1p() };
                loss += w * (softplus - y * z);
            }
            loss
        };

        let (mut a, mut b) = (0.0f64, 0.0f64);
        let mut current = objective(a, b);
        for iter in 0..opts.max_iter {
            let (mut ga, mut gb) = (a / opts.c, 0.0);
            let (mut haa, mut hab, mut hbb) = (1.0 / opts.c, 0.0, 0.0);
            for &(s, y, w) in &data {
                let p = sigmoid(a * s + b);
                let r = w * (p - y);
                let h = w * p * (1.0 - p);
                ga += r * s;
                gb += r;
                haa += h * s * s;
                hab += h * s;
                hbb += h;
            }
            let det = haa * hbb - hab * hab;
            if det.abs() < 1e-300 {
                break;
            }
            let da = (hbb * ga - hab * gb) / det;
            let db = (haa * gb - hab * ga) / det;

            // backtrack until the objective does not increase
            let mut step = 1.0;
            let mut next = objective(a - da, b - db);
            while next > current && step > 1e-8 {
                step *= 0.5;
                next = objective(a - step * da, b - step * db);
            }
            a -= step * da;
            b -= step * db;
            current = next;
            if (step * da).abs().max((step * db).abs()) < opts.tol {
                debug!(iter, coef = a, intercept = b, "platt fit converged");
                break;
            }
        }
        Ok(Self {
            coef: a,
            intercept: b,
        })
    }
}
