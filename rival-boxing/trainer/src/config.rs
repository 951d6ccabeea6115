use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{Error, Result};

/// Knobs that change the feature values themselves. Stored in the artifact
/// metadata because serving has to reproduce them exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureConfig {
    /// Upper clip for `age_percentile`.
    pub age_percentile_cap: f64,
    /// Value written in place of NaN / infinite inputs.
    pub numeric_default: f64,
    /// Completed lap times kept per driver (slope uses the last 5).
    pub lap_history: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            age_percentile_cap: 1.4,
            numeric_default: 0.0,
            lap_history: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RewardShaping {
    pub pos_reward: f32,
    pub neg_reward: f32,
    /// Multiplier on `pos_reward` when the stop happens under a non-green track.
    pub cheap_boost: f32,
}

impl Default for RewardShaping {
    fn default() -> Self {
        Self {
            pos_reward: 2.0,
            neg_reward: -0.05,
            cheap_boost: 1.3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub n_quantiles: i64,
    pub hidden: i64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_quantiles: 101,
            hidden: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdConfig {
    pub grid_start: f64,
    pub grid_end: f64,
    pub grid_points: usize,
    /// 0 disables the recall floor.
    pub target_recall: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            grid_start: 0.2,
            grid_end: 0.8,
            grid_points: 121,
            target_recall: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainConfig {
    pub features: FeatureConfig,
    pub rewards: RewardShaping,
    pub model: ModelConfig,
    pub threshold: ThresholdConfig,
    pub gamma: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub lr: f64,
    pub cql_alpha: f64,
    pub kappa: f64,
    pub grad_clip: f64,
    pub target_sync_every: u64,
    pub oversample_pos: usize,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            rewards: RewardShaping::default(),
            model: ModelConfig::default(),
            threshold: ThresholdConfig::default(),
            gamma: 0.98,
            batch_size: 512,
            epochs: 20,
            lr: 1e-3,
            cql_alpha: 0.0,
            kappa: 1.0,
            grad_clip: 5.0,
            target_sync_every: 200,
            oversample_pos: 8,
            seed: 42,
        }
    }
}

impl TrainConfig {
    /// Reads a JSON config; absent fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        let cfg: TrainConfig = serde_json::from_str(&data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: &str| Err(Error::Config(msg.to_string()));
        if self.model.n_quantiles < 1 {
            return bad("model.n_quantiles must be >= 1");
        }
        if self.model.hidden < 1 {
            return bad("model.hidden must be >= 1");
        }
        if self.batch_size == 0 {
            return bad("batch_size must be >= 1");
        }
        if self.oversample_pos == 0 {
            return bad("oversample_pos must be >= 1");
        }
        if self.target_sync_every == 0 {
            return bad("target_sync_every must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return bad("gamma must lie in [0, 1]");
        }
        if self.kappa <= 0.0 {
            return bad("kappa must be > 0");
        }
        let t = &self.threshold;
        if t.grid_points == 0 || t.grid_end < t.grid_start {
            return bad("threshold grid is empty or inverted");
        }
        if !(0.0..=1.0).contains(&t.target_recall) {
            return bad("threshold.target_recall must lie in [0, 1]");
        }
        if !self.features.numeric_default.is_finite() {
            return bad("features.numeric_default must be finite");
        }
        Ok(())
    }
}
