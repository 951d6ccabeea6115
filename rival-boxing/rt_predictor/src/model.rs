use anyhow::{Context, Result};
use pit_hazard::{ArtifactPaths, FeatureBuilder, HazardModel, HazardScore, LapRecord, LiveFeatureState};
use std::path::Path;
use tch::Device;

use crate::types::InputStats;

/// Artifact plus per-driver live feature state.
pub struct Predictor {
    hazard: HazardModel,
    builder: FeatureBuilder,
    live: LiveFeatureState,
    log_inputs: bool,
}

impl Predictor {
    pub fn load(artifacts_dir: impl AsRef<Path>, log_inputs: bool) -> Result<Self> {
        let dir = artifacts_dir.as_ref();
        let hazard = HazardModel::load(&ArtifactPaths::new(dir), Device::Cpu)
            .with_context(|| format!("failed to load artifact at {}", dir.display()))?;
        let builder = hazard.feature_builder();
        let live = LiveFeatureState::new(builder.config().lap_history);

        // Warmup to catch shape problems before the first lap arrives
        hazard
            .score(&vec![0.0; hazard.in_dim()])
            .context("warmup forward failed")?;
        tracing::info!("warmup forward ok");

        Ok(Self {
            hazard,
            builder,
            live,
            log_inputs,
        })
    }

    pub fn feat_list(&self) -> &[String] {
        self.builder.layout().names()
    }

    pub fn threshold(&self) -> f64 {
        self.hazard.threshold()
    }

    /// Advances this driver's state by one lap and scores it.
    pub fn observe(&self, record: &LapRecord) -> Result<HazardScore> {
        let feats = self.live.observe(&self.builder, record)?;
        let x = self.builder.encode(&feats);
        if self.log_inputs {
            self.log_input(record, &x);
        }
        Ok(self.hazard.score(&x)?)
    }

    /// Session boundary: forget every driver of `race_id`.
    pub fn end_race(&self, race_id: &str) {
        self.live.reset_race(race_id);
    }

    fn log_input(&self, record: &LapRecord, x: &[f32]) {
        let s = InputStats::of(x);
        let sample: Vec<String> = self
            .feat_list()
            .iter()
            .zip(x)
            .take(6)
            .map(|(name, v)| format!("{}={:.3}", name, v))
            .collect();
        tracing::info!(
            "recv race={} driver={} lap={} in_dim={} nonzero={} mean={:.3} std={:.3} sample=[{}]",
            record.race_id,
            record.driver,
            record.lap,
            x.len(),
            s.nonzero,
            s.mean,
            s.std,
            sample.join(", ")
        );
    }
}
