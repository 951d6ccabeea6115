//! Exported artifact: model metadata, weights, stint priors, calibration,
//! threshold and the training metrics report.
//!
//! Layout under the artifact root:
//! ```text
//! rl/meta.json  rl/qrdqn.ot  rl/stint_priors.json  rl/calib_platt.json  rl/threshold.json
//! reports/rl_metrics.json
//! ```

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tch::{nn, Device, Tensor};
use tracing::{info, warn};

use crate::calibrate::PlattCalibration;
use crate::config::FeatureConfig;
use crate::error::{Error, Result};
use crate::features::FeatureLayout;
use crate::model::{ModelDims, QuantileNet};
use crate::priors::StintPriors;
use crate::threshold::ThresholdChoice;
use crate::trainer::{EpochReport, N_ACTIONS};

pub const ACTIONS: [&str; 2] = ["NO_BOX", "BOX"];

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    root: PathBuf,
}

impl ArtifactPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn rl_dir(&self) -> PathBuf {
        self.root.join("rl")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn meta(&self) -> PathBuf {
        self.rl_dir().join("meta.json")
    }

    pub fn weights(&self) -> PathBuf {
        self.rl_dir().join("qrdqn.ot")
    }

    pub fn priors(&self) -> PathBuf {
        self.rl_dir().join("stint_priors.json")
    }

    pub fn calibration(&self) -> PathBuf {
        self.rl_dir().join("calib_platt.json")
    }

    pub fn threshold(&self) -> PathBuf {
        self.rl_dir().join("threshold.json")
    }

    pub fn metrics(&self) -> PathBuf {
        self.reports_dir().join("rl_metrics.json")
    }
}

/// meta.json. Older exports name the feature list differently and may omit
/// shape fields; those are then read off the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMeta {
    #[serde(alias = "feature_names", alias = "features")]
    pub feat_list: Vec<String>,
    #[serde(default)]
    pub in_dim: Option<usize>,
    #[serde(default)]
    pub n_actions: Option<i64>,
    #[serde(default)]
    pub n_quantiles: Option<i64>,
    #[serde(default)]
    pub hidden: Option<i64>,
    #[serde(default)]
    pub gamma: Option<f64>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub age_percentile_cap: Option<f64>,
    #[serde(default)]
    pub feature_config: Option<FeatureConfig>,
    #[serde(default)]
    pub note: String,
}

impl ModelMeta {
    /// Feature settings to serve with. A bare `age_percentile_cap` overrides the default cap.
    pub fn features(&self) -> FeatureConfig {
        let mut cfg = self.feature_config.clone().unwrap_or_default();
        if let Some(cap) = self.age_percentile_cap {
            cfg.age_percentile_cap = cap;
        }
        cfg
    }

    pub fn new(layout: &FeatureLayout, dims: ModelDims, gamma: f64, features: &FeatureConfig) -> Self {
        Self {
            feat_list: layout.names().to_vec(),
            in_dim: Some(dims.in_dim as usize),
            n_actions: Some(dims.n_actions),
            n_quantiles: Some(dims.n_quantiles),
            hidden: Some(dims.hidden),
            gamma: Some(gamma),
            actions: ACTIONS.iter().map(|a| a.to_string()).collect(),
            age_percentile_cap: Some(features.age_percentile_cap),
            feature_config: Some(features.clone()),
            note: "Expectation gap (BOX - NO_BOX) -> Platt -> prob".to_string(),
        }
    }
}

/// Training report written next to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    /// None when validation labels are single-class.
    pub val_auc_proxy: Option<f64>,
    pub val_ap_proxy: Option<f64>,
    pub calibration: Option<PlattCalibration>,
    pub calibration_status: String,
    pub threshold: Option<ThresholdChoice>,
    pub n_train: usize,
    pub n_val: usize,
    pub pos_rate_proxy: f64,
    pub held_out_groups: Vec<String>,
    pub replay_dim: usize,
    pub feat_cols: usize,
    pub zero_feature_rows: usize,
    pub oversample_pos: usize,
    pub pos_reward: f32,
    pub neg_reward: f32,
    pub cheap_boost: f32,
    pub target_recall: f64,
    pub gamma: f64,
    pub lr: f64,
    pub batch_size: usize,
    pub cql_alpha: f64,
    pub n_quantiles: i64,
    pub hidden: i64,
    pub epochs: Vec<EpochReport>,
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let txt = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&txt)?)
}

pub fn write_model(
    paths: &ArtifactPaths,
    meta: &ModelMeta,
    vs: &nn::VarStore,
    priors: &StintPriors,
) -> Result<()> {
    fs::create_dir_all(paths.rl_dir())?;
    clear_calibration(paths)?;
    vs.save(paths.weights())?;
    write_json(&paths.meta(), meta)?;
    write_json(&paths.priors(), priors)?;
    info!(dir = %paths.rl_dir().display(), "wrote model, meta and priors");
    Ok(())
}

/// Removes calibration and threshold files. They only hold for the weights they
/// were fitted on, so new weights invalidate them.
pub fn clear_calibration(paths: &ArtifactPaths) -> Result<()> {
    for path in [paths.calibration(), paths.threshold()] {
        match fs::remove_file(&path) {
            Ok(()) => warn!(path = %path.display(), "removed stale calibration file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

pub fn write_calibration(
    paths: &ArtifactPaths,
    calib: &PlattCalibration,
    threshold: &ThresholdChoice,
) -> Result<()> {
    write_json(&paths.calibration(), calib)?;
    write_json(&paths.threshold(), threshold)
}

pub fn write_metrics(paths: &ArtifactPaths, metrics: &MetricsRecord) -> Result<()> {
    write_json(&paths.metrics(), metrics)
}

pub fn read_meta(paths: &ArtifactPaths) -> Result<ModelMeta> {
    read_json(&paths.meta())
}

pub fn read_calibration(paths: &ArtifactPaths) -> Result<(PlattCalibration, ThresholdChoice)> {
    Ok((read_json(&paths.calibration())?, read_json(&paths.threshold())?))
}

/// Known ways weights have been stored: bare parameter names, or the same names
/// nested under a wrapper key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointLayout {
    Raw,
    Wrapped(&'static str),
}

impl CheckpointLayout {
    /// Tried in this order.
    pub const ORDER: [CheckpointLayout; 6] = [
        CheckpointLayout::Raw,
        CheckpointLayout::Wrapped("state_dict"),
        CheckpointLayout::Wrapped("model_state_dict"),
        CheckpointLayout::Wrapped("online"),
        CheckpointLayout::Wrapped("net"),
        CheckpointLayout::Wrapped("model"),
    ];

    pub fn key(self, name: &str) -> String {
        match self {
            CheckpointLayout::Raw => name.to_string(),
            CheckpointLayout::Wrapped(prefix) => format!("{prefix}.{name}"),
        }
    }
}

const FIRST_LAYER: &str = "backbone.0.weight";
const HEAD_LAYER: &str = "head.weight";

/// Named weight tensors with the layout they were found under.
pub struct Checkpoint {
    tensors: HashMap<String, Tensor>,
    layout: CheckpointLayout,
}

impl Checkpoint {
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let named = Tensor::load_multi(path)?;
        Self::from_named(&path.display().to_string(), named)
    }

    pub fn from_named(source: &str, named: Vec<(String, Tensor)>) -> Result<Self> {
        let tensors: HashMap<String, Tensor> = named.into_iter().collect();
        let layout = CheckpointLayout::ORDER
            .into_iter()
            .find(|l| tensors.contains_key(&l.key(FIRST_LAYER)) && tensors.contains_key(&l.key(HEAD_LAYER)))
            .ok_or_else(|| Error::UnknownCheckpoint {
                path: source.to_string(),
                tried: CheckpointLayout::ORDER.iter().map(|l| l.key(FIRST_LAYER)).collect(),
            })?;
        Ok(Self { tensors, layout })
    }

    pub fn layout(&self) -> CheckpointLayout {
        self.layout
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(&self.layout.key(name))
    }

    fn shape(&self, name: &str) -> Result<Vec<i64>> {
        self.get(name)
            .map(|t| t.size())
            .ok_or_else(|| Error::UnknownCheckpoint {
                path: name.to_string(),
                tried: vec![self.layout.key(name)],
            })
    }

    /// Network shape read off the weights. `n_actions` splits the head rows.
    pub fn dims(&self, n_actions: i64) -> Result<ModelDims> {
        let first = self.shape(FIRST_LAYER)?;
        let head = self.shape(HEAD_LAYER)?;
        if first.len() != 2 || head.len() != 2 || n_actions < 1 || head[0] % n_actions != 0 {
            return Err(Error::DimensionMismatch {
                expected: n_actions.max(1) as usize,
                actual: head.first().copied().unwrap_or(0) as usize,
            });
        }
        Ok(ModelDims {
            in_dim: first[1],
            n_actions,
            n_quantiles: head[0] / n_actions,
            hidden: first[0],
        })
    }

    /// Copies every variable of `vs` from the checkpoint. Shapes must match exactly.
    pub fn load_into(&self, vs: &nn::VarStore) -> Result<()> {
        for (name, mut var) in vs.variables() {
            let src = self.get(&name).ok_or_else(|| Error::UnknownCheckpoint {
                path: name.clone(),
                tried: vec![self.layout.key(&name)],
            })?;
            if src.size() != var.size() {
                return Err(Error::DimensionMismatch {
                    expected: var.numel(),
                    actual: src.numel(),
                });
            }
            tch::no_grad(|| var.copy_(src));
        }
        Ok(())
    }
}

/// A trained network plus everything needed to feed it.
pub struct LoadedModel {
    pub meta: ModelMeta,
    pub layout: FeatureLayout,
    pub dims: ModelDims,
    pub priors: StintPriors,
    pub feature_config: FeatureConfig,
    pub device: Device,
    pub net: QuantileNet,
    // owns the variables `net` points into
    _vs: nn::VarStore,
}

/// Loads meta, priors and weights. A weight input width that differs from the
/// declared feature list is fatal.
pub fn load_model(paths: &ArtifactPaths, device: Device) -> Result<LoadedModel> {
    let meta = read_meta(paths)?;
    let layout = FeatureLayout::from_names(&meta.feat_list)?;
    if let Some(declared) = meta.in_dim {
        layout.ensure_dim(declared)?;
    }

    let ckpt = Checkpoint::read(paths.weights())?;
    let dims = ckpt.dims(meta.n_actions.unwrap_or(N_ACTIONS))?;
    layout.ensure_dim(dims.in_dim as usize)?;
    if let Some(q) = meta.n_quantiles {
        if q != dims.n_quantiles {
            return Err(Error::DimensionMismatch {
                expected: q as usize,
                actual: dims.n_quantiles as usize,
            });
        }
    }

    let vs = nn::VarStore::new(device);
    let net = QuantileNet::new(&vs.root(), dims);
    ckpt.load_into(&vs)?;

    let priors = if paths.priors().exists() {
        read_json(&paths.priors())?
    } else {
        warn!(path = %paths.priors().display(), "no stint priors in artifact; using compound defaults");
        StintPriors::default()
    };
    let feature_config = meta.features();
    info!(
        in_dim = dims.in_dim,
        n_quantiles = dims.n_quantiles,
        hidden = dims.hidden,
        layout = ?ckpt.layout(),
        "loaded model"
    );
    Ok(LoadedModel {
        meta,
        layout,
        dims,
        priors,
        feature_config,
        device,
        net,
        _vs: vs,
    })
}
