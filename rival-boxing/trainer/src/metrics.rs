//! Ranking and classification metrics over binary labels.

use serde::{Deserialize, Serialize};

fn class_counts(labels: &[bool]) -> (usize, usize) {
    let pos = labels.iter().filter(|l| **l).count();
    (pos, labels.len() - pos)
}

/// Indices of `scores` sorted by descending score.
fn descending(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order
}

/// Undefined (NaN) metrics become None for reports.
pub fn defined(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}

/// Area under the ROC curve via the rank-sum statistic, ties given average rank.
/// NaN when either class is absent.
pub fn roc_auc(labels: &[bool], scores: &[f64]) -> f64 {
    let (pos, neg) = class_counts(labels);
    if pos == 0 || neg == 0 || labels.len() != scores.len() {
        return f64::NAN;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // ranks are 1-based; tied block i..=j shares the mean rank
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            if labels[k] {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }
    let (p, n) = (pos as f64, neg as f64);
    (rank_sum_pos - p * (p + 1.0) / 2.0) / (p * n)
}

/// Average precision: sum over distinct thresholds of (R_k - R_{k-1}) * P_k.
/// NaN when either class is absent.
pub fn average_precision(labels: &[bool], scores: &[f64]) -> f64 {
    let (pos, neg) = class_counts(labels);
    if pos == 0 || neg == 0 || labels.len() != scores.len() {
        return f64::NAN;
    }
    let order = descending(scores);
    let (mut tp, mut fp) = (0usize, 0usize);
    let mut prev_recall = 0.0;
    let mut ap = 0.0;
    let mut i = 0;
    while i < order.len() {
        let s = scores[order[i]];
        while i < order.len() && scores[order[i]] == s {
            if labels[order[i]] {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        let recall = tp as f64 / pos as f64;
        let precision = tp as f64 / (tp + fp) as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    ap
}

/// Confusion counts for `prob >= threshold`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Confusion {
    pub tp: usize,
    pub fp: usize,
    pub fn_: usize,
    pub tn: usize,
}

impl Confusion {
    pub fn at_threshold(labels: &[bool], probs: &[f64], threshold: f64) -> Self {
        let mut c = Confusion::default();
        for (&y, &p) in labels.iter().zip(probs) {
            match (p >= threshold, y) {
                (true, true) => c.tp += 1,
                (true, false) => c.fp += 1,
                (false, true) => c.fn_ += 1,
                (false, false) => c.tn += 1,
            }
        }
        c
    }

    /// Zero when nothing was predicted positive.
    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    /// Zero when there are no positives.
    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn f_beta(&self, beta: f64) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        let b2 = beta * beta;
        let denom = b2 * p + r;
        if denom == 0.0 {
            0.0
        } else {
            (1.0 + b2) * p * r / denom
        }
    }

    pub fn scores(&self) -> ClassificationScores {
        ClassificationScores {
            precision: self.precision(),
            recall: self.recall(),
            f1: self.f_beta(1.0),
            f2: self.f_beta(2.0),
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub f2: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_and_inverted_ranking() {
        let labels = [false, false, true, true];
        assert_eq!(roc_auc(&labels, &[0.1, 0.2, 0.8, 0.9]), 1.0);
        assert_eq!(roc_auc(&labels, &[0.9, 0.8, 0.2, 0.1]), 0.0);
        assert_eq!(average_precision(&labels, &[0.1, 0.2, 0.8, 0.9]), 1.0);
    }

    #[test]
    fn ties_count_half() {
        let labels = [false, true];
        assert_eq!(roc_auc(&labels, &[0.5, 0.5]), 0.5);
        assert_eq!(average_precision(&labels, &[0.5, 0.5]), 0.5);
    }

    #[test]
    fn average_precision_matches_hand_computation() {
        // ranked: T F T F -> AP = 0.5 * 1 + 0.5 * (2/3)
        let labels = [true, false, true, false];
        let scores = [0.9, 0.8, 0.7, 0.1];
        assert!((average_precision(&labels, &scores) - (0.5 + 1.0 / 3.0)).abs() < 1e-12);
        // pairs (pos > neg): 0.9>0.8, 0.9>0.1, 0.7>0.1 -> 3 of 4
        assert!((roc_auc(&labels, &scores) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn single_class_is_nan() {
        assert!(roc_auc(&[true, true], &[0.1, 0.2]).is_nan());
        assert!(average_precision(&[false, false], &[0.1, 0.2]).is_nan());
        assert_eq!(defined(roc_auc(&[true], &[0.3])), None);
        assert_eq!(defined(0.75), Some(0.75));
    }

    #[test]
    fn confusion_zero_division() {
        let c = Confusion::at_threshold(&[true, false], &[0.1, 0.2], 0.5);
        assert_eq!(c.precision(), 0.0);
        assert_eq!(c.recall(), 0.0);
        assert_eq!(c.f_beta(2.0), 0.0);
    }

    #[test]
    fn f2_weights_recall() {
        let c = Confusion {
            tp: 1,
            fp: 3,
            fn_: 0,
            tn: 0,
        };
        // p = 0.25, r = 1 -> f2 = 5 * 0.25 / (4 * 0.25 + 1) = 0.625
        assert!((c.f_beta(2.0) - 0.625).abs() < 1e-12);
        assert!((c.f_beta(1.0) - 0.4).abs() < 1e-12);
    }
}
