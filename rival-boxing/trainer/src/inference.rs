//! Serving-side scoring: features -> action gap -> calibrated probability -> alert.

use serde::Serialize;
use tch::Device;

use crate::artifact::{load_model, read_calibration, ArtifactPaths, LoadedModel};
use crate::calibrate::PlattCalibration;
use crate::error::{Error, Result};
use crate::features::FeatureBuilder;
use crate::model::predict_gaps;
use crate::threshold::ThresholdChoice;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HazardScore {
    pub gap: f64,
    /// Probability of boxing within 2 laps.
    pub prob: f64,
    pub alert: bool,
}

/// A loaded artifact ready to score feature vectors.
pub struct HazardModel {
    model: LoadedModel,
    calibration: PlattCalibration,
    threshold: ThresholdChoice,
}

impl HazardModel {
    /// Refuses artifacts without a calibration file.
    pub fn load(paths: &ArtifactPaths, device: Device) -> Result<Self> {
        if !paths.calibration().exists() || !paths.threshold().exists() {
            return Err(Error::MissingCalibration(paths.rl_dir().display().to_string()));
        }
        let model = load_model(paths, device)?;
        let (calibration, threshold) = read_calibration(paths)?;
        Ok(Self {
            model,
            calibration,
            threshold,
        })
    }

    pub fn from_parts(
        model: LoadedModel,
        calibration: PlattCalibration,
        threshold: ThresholdChoice,
    ) -> Self {
        Self {
            model,
            calibration,
            threshold,
        }
    }

    pub fn model(&self) -> &LoadedModel {
        &self.model
    }

    pub fn calibration(&self) -> PlattCalibration {
        self.calibration
    }

    pub fn threshold(&self) -> f64 {
        self.threshold.threshold
    }

    pub fn in_dim(&self) -> usize {
        self.model.layout.dim()
    }

    /// Builder that reproduces the training-time features for this artifact.
    pub fn feature_builder(&self) -> FeatureBuilder {
        FeatureBuilder::new(
            self.model.layout.clone(),
            self.model.priors.clone(),
            self.model.feature_config.clone(),
        )
    }

    fn to_score(&self, gap: f64) -> HazardScore {
        let prob = self.calibration.probability(gap);
        HazardScore {
            gap,
            prob,
            alert: prob >= self.threshold.threshold,
        }
    }

    pub fn score(&self, features: &[f32]) -> Result<HazardScore> {
        self.model.layout.ensure_dim(features.len())?;
        let gaps = predict_gaps(&self.model.net, features, self.model.device)?;
        gaps.first()
            .map(|g| self.to_score(*g))
            .ok_or(Error::EmptyDataset("no feature row to score"))
    }

    /// Scores a row-major `[rows, in_dim]` buffer.
    pub fn score_rows(&self, flat: &[f32]) -> Result<Vec<HazardScore>> {
        let gaps = predict_gaps(&self.model.net, flat, self.model.device)?;
        Ok(gaps.into_iter().map(|g| self.to_score(g)).collect())
    }
}

/// 3-lap horizon from consecutive 2-lap probabilities of one driver's sequence:
/// P3(t) = 1 - (1 - P2(t)) (1 - P2(t+1)). The last lap pairs with itself.
pub fn within_three(p2: &[f64]) -> Vec<f64> {
    (0..p2.len())
        .map(|t| {
            let next = p2.get(t + 1).copied().unwrap_or(p2[t]);
            1.0 - (1.0 - p2[t]) * (1.0 - next)
        })
        .collect()
}
