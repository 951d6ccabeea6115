//! Operating threshold selection, recall-weighted.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ThresholdConfig;
use crate::error::{Error, Result};
use crate::metrics::{ClassificationScores, Confusion};

/// The chosen cutoff and the metrics that justified it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdChoice {
    pub threshold: f64,
    #[serde(flatten)]
    pub scores: ClassificationScores,
    /// Recall floor that was requested (0 = none).
    pub target_recall: f64,
    /// False when a floor was requested but no grid point reached it.
    pub floor_met: bool,
}

/// `points` evenly spaced values over [start, end], both ends included.
pub fn threshold_grid(start: f64, end: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..points)
            .map(|i| {
                let t = i as f64 / (points - 1) as f64;
                start * (1.0 - t) + end * t
            })
            .collect(),
    }
}

/// With a recall floor: the most precise grid point meeting it (F2 breaks ties),
/// falling back to best F2 if none does. Without: best F2. Earlier grid points
/// win exact ties. An empty grid is a config error.
pub fn select_threshold(
    probs: &[f64],
    labels: &[bool],
    cfg: &ThresholdConfig,
) -> Result<ThresholdChoice> {
    let grid = threshold_grid(cfg.grid_start, cfg.grid_end, cfg.grid_points);
    if grid.is_empty() {
        return Err(Error::Config("threshold grid is empty".to_string()));
    }
    let evaluated: Vec<(f64, ClassificationScores)> = grid
        .iter()
        .map(|&th| (th, Confusion::at_threshold(labels, probs, th).scores()))
        .collect();

    let best_f2 = || {
        let mut best: Option<(f64, ClassificationScores)> = None;
        for &(th, s) in &evaluated {
            if best.map_or(true, |(_, b)| s.f2 > b.f2) {
                best = Some((th, s));
            }
        }
        best
    };

    let floor = cfg.target_recall;
    let (chosen, floor_met) = if floor > 0.0 {
        let mut best: Option<(f64, ClassificationScores)> = None;
        for &(th, s) in evaluated.iter().filter(|(_, s)| s.recall >= floor) {
            let better = best.map_or(true, |(_, b)| {
                s.precision > b.precision || (s.precision == b.precision && s.f2 > b.f2)
            });
            if better {
                best = Some((th, s));
            }
        }
        match best {
            Some(b) => (Some(b), true),
            None => {
                warn!(target_recall = floor, "no threshold meets the recall floor; maximising F2");
                (best_f2(), false)
            }
        }
    } else {
        (best_f2(), true)
    };

    let (threshold, scores) =
        chosen.ok_or_else(|| Error::Config("threshold grid is empty".to_string()))?;
    info!(
        threshold,
        precision = scores.precision,
        recall = scores.recall,
        f1 = scores.f1,
        f2 = scores.f2,
        "selected operating threshold"
    );
    Ok(ThresholdChoice {
        threshold,
        scores,
        target_recall: floor,
        floor_met,
    })
}
