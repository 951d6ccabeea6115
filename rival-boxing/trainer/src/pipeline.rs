//! End-to-end offline run: laps -> features -> transitions -> QR-DQN ->
//! Platt calibration -> operating threshold -> artifact.

use tch::Device;
use tracing::{info, warn};

use crate::artifact::{
    write_calibration, write_metrics, write_model, ArtifactPaths, MetricsRecord, ModelMeta,
};
use crate::calibrate::PlattCalibration;
use crate::config::TrainConfig;
use crate::error::{Error, Result};
use crate::features::{FeatureBuilder, FeatureLayout};
use crate::metrics::{average_precision, defined, roc_auc};
use crate::priors::StintPriors;
use crate::records::LapRecord;
use crate::threshold::{select_threshold, ThresholdChoice};
use crate::trainer::Trainer;
use crate::transitions::{build_transitions, split_by_group, Transition};

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub metrics: MetricsRecord,
    /// None when validation labels were single-class. Such an artifact is not servable.
    pub calibration: Option<(PlattCalibration, ThresholdChoice)>,
}

impl PipelineOutcome {
    pub fn is_servable(&self) -> bool {
        self.calibration.is_some()
    }
}

pub fn run(laps: &[LapRecord], cfg: &TrainConfig, out: &ArtifactPaths) -> Result<PipelineOutcome> {
    run_on(laps, cfg, out, Device::cuda_if_available())
}

pub fn run_on(
    laps: &[LapRecord],
    cfg: &TrainConfig,
    out: &ArtifactPaths,
    device: Device,
) -> Result<PipelineOutcome> {
    cfg.validate()?;
    if laps.is_empty() {
        return Err(Error::EmptyDataset("no lap records"));
    }

    let priors = StintPriors::from_laps(laps);
    if priors.is_empty() {
        warn!("no completed stints observed; typical lengths fall back to compound defaults");
    }
    let builder = FeatureBuilder::new(FeatureLayout::canonical(), priors, cfg.features.clone());
    let matrix = builder.build(laps)?;
    info!(laps = laps.len(), dim = matrix.dim(), "built feature matrix");

    let transitions = build_transitions(laps, &matrix, &cfg.rewards)?;
    let positives = transitions.iter().filter(|t| t.reward > 0.0).count();
    info!(transitions = transitions.len(), positives, "built transitions");
    let split = split_by_group(transitions, cfg.seed)?;

    let mut trainer = Trainer::with_device(matrix.dim(), cfg, device)?;
    let epochs = trainer.fit(&split.train, &split.val)?;

    let meta = ModelMeta::new(builder.layout(), trainer.dims(), cfg.gamma, &cfg.features);
    write_model(out, &meta, trainer.online_vs(), builder.priors())?;

    let gaps = trainer.action_gaps(&split.val)?;
    let labels: Vec<bool> = split.val.iter().map(Transition::proxy_label).collect();
    let val_auc = roc_auc(&labels, &gaps);
    let val_ap = average_precision(&labels, &gaps);

    let (calibration, status) = match PlattCalibration::fit(&gaps, &labels) {
        Ok(calib) => {
            let probs = calib.probabilities(&gaps);
            let choice = select_threshold(&probs, &labels, &cfg.threshold)?;
            write_calibration(out, &calib, &choice)?;
            info!(coef = calib.coef, intercept = calib.intercept, "fitted Platt calibration");
            (Some((calib, choice)), "ok".to_string())
        }
        Err(e @ Error::DegenerateLabels { .. }) => {
            warn!(error = %e, "calibration undefined; no calibration or threshold written");
            (None, e.to_string())
        }
        Err(e) => return Err(e),
    };

    let n_val = split.val.len();
    let metrics = MetricsRecord {
        val_auc_proxy: defined(val_auc),
        val_ap_proxy: defined(val_ap),
        calibration: calibration.map(|(c, _)| c),
        calibration_status: status,
        threshold: calibration.map(|(_, t)| t),
        n_train: split.train.len(),
        n_val,
        pos_rate_proxy: labels.iter().filter(|l| **l).count() as f64 / n_val.max(1) as f64,
        held_out_groups: split.held_out,
        replay_dim: matrix.dim(),
        feat_cols: builder.layout().dim(),
        zero_feature_rows: matrix.zero_rows(),
        oversample_pos: cfg.oversample_pos,
        pos_reward: cfg.rewards.pos_reward,
        neg_reward: cfg.rewards.neg_reward,
        cheap_boost: cfg.rewards.cheap_boost,
        target_recall: cfg.threshold.target_recall,
        gamma: cfg.gamma,
        lr: cfg.lr,
        batch_size: cfg.batch_size,
        cql_alpha: cfg.cql_alpha,
        n_quantiles: cfg.model.n_quantiles,
        hidden: cfg.model.hidden,
        epochs,
    };
    write_metrics(out, &metrics)?;
    info!(val_auc, val_ap, path = %out.metrics().display(), "wrote metrics");

    Ok(PipelineOutcome {
        metrics,
        calibration,
    })
}
