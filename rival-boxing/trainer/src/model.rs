use serde::{Deserialize, Serialize};
use tch::{nn, nn::Module, Device, Kind, Tensor};

use crate::error::{Error, Result};

/// Rows per forward pass when scoring large state sets.
const SCORE_CHUNK: usize = 4096;

/// Shape of the quantile network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDims {
    pub in_dim: i64,
    pub n_actions: i64,
    pub n_quantiles: i64,
    pub hidden: i64,
}

/// Two ReLU layers and a linear head reshaped to [B, actions, quantiles].
/// Variable names follow `backbone.0`, `backbone.2`, `head`.
#[derive(Debug)]
pub struct QuantileNet {
    backbone: nn::Sequential,
    head: nn::Linear,
    dims: ModelDims,
}

impl QuantileNet {
    pub fn new(p: &nn::Path, dims: ModelDims) -> Self {
        let bb = p / "backbone";
        let backbone = nn::seq()
            .add(nn::linear(&bb / "0", dims.in_dim, dims.hidden, Default::default()))
            .add_fn(|xs| xs.relu())
            .add(nn::linear(&bb / "2", dims.hidden, dims.hidden, Default::default()))
            .add_fn(|xs| xs.relu());
        let head = nn::linear(
            p / "head",
            dims.hidden,
            dims.n_actions * dims.n_quantiles,
            Default::default(),
        );
        Self {
            backbone,
            head,
            dims,
        }
    }

    pub fn dims(&self) -> ModelDims {
        self.dims
    }
}

impl Module for QuantileNet {
    fn forward(&self, xs: &Tensor) -> Tensor {
        self.head
            .forward(&self.backbone.forward(xs))
            .view([-1, self.dims.n_actions, self.dims.n_quantiles])
    }
}

/// Mean over quantiles: [B, A, Q] -> [B, A].
pub fn expected_values(quantiles: &Tensor) -> Tensor {
    quantiles.mean_dim(&[2i64][..], false, Kind::Float)
}

/// Expected-value gap Q(BOX) - Q(NO_BOX): [B, A, Q] -> [B].
pub fn action_gap(quantiles: &Tensor) -> Tensor {
    let ev = expected_values(quantiles);
    ev.select(1, 1) - ev.select(1, 0)
}

/// Action gap for every row of a row-major `[rows, in_dim]` buffer.
pub fn predict_gaps(net: &QuantileNet, flat: &[f32], device: Device) -> Result<Vec<f64>> {
    let in_dim = net.dims().in_dim as usize;
    if in_dim == 0 || flat.len() % in_dim != 0 {
        return Err(Error::DimensionMismatch {
            expected: in_dim,
            actual: flat.len(),
        });
    }
    let mut out = Vec::with_capacity(flat.len() / in_dim);
    for chunk in flat.chunks(in_dim * SCORE_CHUNK) {
        let rows = (chunk.len() / in_dim) as i64;
        let xs = Tensor::from_slice(chunk)
            .reshape([rows, in_dim as i64])
            .to_device(device);
        let gap = tch::no_grad(|| action_gap(&net.forward(&xs)));
        let gap = gap.to_kind(Kind::Float).to_device(Device::Cpu).reshape([-1]);
        out.extend(Vec::<f32>::try_from(&gap)?.into_iter().map(f64::from));
    }
    Ok(out)
}
