//! Offline QR-DQN training loop.
//!
//! An online network is updated every mini-batch; a target network is hard-copied
//! from it every `target_sync_every` optimizer steps. Targets are double-Q:
//! the online net picks the next action, the target net scores it.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tch::nn::{self, Module, OptimizerConfig};
use tch::{Device, Kind, Tensor};
use tracing::{debug, info};

use crate::config::TrainConfig;
use crate::error::{Error, Result};
use crate::loss::{
    conservative_penalty, double_q_targets, quantile_huber_loss, quantile_taus, select_action,
};
use crate::metrics::{average_precision, defined, roc_auc};
use crate::model::{predict_gaps, ModelDims, QuantileNet};
use crate::transitions::{oversample_positive, Transition, N_STEP};

pub const N_ACTIONS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub steps: u64,
    pub mean_loss: f64,
    /// None when the validation labels cannot rank (single-class or empty).
    pub val_auc: Option<f64>,
    pub val_ap: Option<f64>,
}

struct Batch {
    states: Tensor,
    actions: Tensor,
    rewards: Tensor,
    next_states: Tensor,
    not_done: Tensor,
}

fn make_batch(items: &[&Transition], in_dim: usize, device: Device) -> Result<Batch> {
    let b = items.len();
    let mut states = Vec::with_capacity(b * in_dim);
    let mut next_states = Vec::with_capacity(b * in_dim);
    let mut actions = Vec::with_capacity(b);
    let mut rewards = Vec::with_capacity(b);
    let mut not_done = Vec::with_capacity(b);
    for t in items {
        for v in [&t.state, &t.next_state] {
            if v.len() != in_dim {
                return Err(Error::DimensionMismatch {
                    expected: in_dim,
                    actual: v.len(),
                });
            }
        }
        states.extend_from_slice(&t.state);
        next_states.extend_from_slice(&t.next_state);
        actions.push(t.action);
        rewards.push(t.reward);
        not_done.push(if t.terminal { 0.0f32 } else { 1.0 });
    }
    let shape = [b as i64, in_dim as i64];
    Ok(Batch {
        states: Tensor::from_slice(&states).reshape(shape).to_device(device),
        actions: Tensor::from_slice(&actions).to_device(device),
        rewards: Tensor::from_slice(&rewards).to_device(device),
        next_states: Tensor::from_slice(&next_states).reshape(shape).to_device(device),
        not_done: Tensor::from_slice(&not_done).to_device(device),
    })
}

pub struct Trainer {
    cfg: TrainConfig,
    device: Device,
    online_vs: nn::VarStore,
    online: QuantileNet,
    target_vs: nn::VarStore,
    target: QuantileNet,
    opt: nn::Optimizer,
    taus: Tensor,
    steps: u64,
    rng: ChaCha8Rng,
}

impl Trainer {
    pub fn new(in_dim: usize, cfg: &TrainConfig) -> Result<Self> {
        Self::with_device(in_dim, cfg, Device::cuda_if_available())
    }

    pub fn with_device(in_dim: usize, cfg: &TrainConfig, device: Device) -> Result<Self> {
        cfg.validate()?;
        tch::manual_seed(cfg.seed as i64);
        let dims = ModelDims {
            in_dim: in_dim as i64,
            n_actions: N_ACTIONS,
            n_quantiles: cfg.model.n_quantiles,
            hidden: cfg.model.hidden,
        };

        let online_vs = nn::VarStore::new(device);
        let online = QuantileNet::new(&online_vs.root(), dims);
        let mut target_vs = nn::VarStore::new(device);
        let target = QuantileNet::new(&target_vs.root(), dims);
        target_vs.copy(&online_vs)?;
        target_vs.freeze();

        let opt = nn::Adam::default().build(&online_vs, cfg.lr)?;
        info!(?dims, ?device, "initialised online and target networks");

        Ok(Self {
            cfg: cfg.clone(),
            device,
            online_vs,
            online,
            target_vs,
            target,
            opt,
            taus: quantile_taus(dims.n_quantiles, device),
            steps: 0,
            rng: ChaCha8Rng::seed_from_u64(cfg.seed),
        })
    }

    pub fn dims(&self) -> ModelDims {
        self.online.dims()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Optimizer steps taken so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn online(&self) -> &QuantileNet {
        &self.online
    }

    pub fn online_vs(&self) -> &nn::VarStore {
        &self.online_vs
    }

    pub fn target_vs(&self) -> &nn::VarStore {
        &self.target_vs
    }

    pub fn sync_target(&mut self) -> Result<()> {
        self.target_vs.copy(&self.online_vs)?;
        debug!(steps = self.steps, "target network synced");
        Ok(())
    }

    /// One optimizer step on a mini-batch. Returns the batch loss.
    pub fn train_step(&mut self, batch: &[&Transition]) -> Result<f64> {
        if batch.is_empty() {
            return Err(Error::EmptyDataset("empty mini-batch"));
        }
        let in_dim = self.dims().in_dim as usize;
        let b = make_batch(batch, in_dim, self.device)?;
        let discount = self.cfg.gamma.powi(N_STEP as i32);

        let tz = tch::no_grad(|| {
            let online_next = self.online.forward(&b.next_states);
            let target_next = self.target.forward(&b.next_states);
            double_q_targets(&online_next, &target_next, &b.rewards, &b.not_done, discount)
        });

        let qz = self.online.forward(&b.states);
        let qz_a = select_action(&qz, &b.actions);
        let mut loss = quantile_huber_loss(&qz_a, &tz, &self.taus, self.cfg.kappa);
        if self.cfg.cql_alpha > 0.0 {
            loss = loss + conservative_penalty(&qz, &b.actions) * self.cfg.cql_alpha;
        }

        self.opt.backward_step_clip_norm(&loss, self.cfg.grad_clip);
        self.steps += 1;
        if self.steps % self.cfg.target_sync_every == 0 {
            self.sync_target()?;
        }
        Ok(loss.to_kind(Kind::Double).double_value(&[]))
    }

    /// Raw action gap Q(BOX) - Q(NO_BOX) for each transition's state.
    pub fn action_gaps(&self, items: &[Transition]) -> Result<Vec<f64>> {
        let flat: Vec<f32> = items.iter().flat_map(|t| t.state.iter().copied()).collect();
        predict_gaps(&self.online, &flat, self.device)
    }

    /// Ranking quality of the action gap against `reward > 0.5` on `val`.
    pub fn validation_ranking(&self, val: &[Transition]) -> Result<(f64, f64)> {
        let scores = self.action_gaps(val)?;
        let labels: Vec<bool> = val.iter().map(Transition::proxy_label).collect();
        Ok((roc_auc(&labels, &scores), average_precision(&labels, &scores)))
    }

    /// Full run: oversample positives in `train`, then `epochs` shuffled passes.
    /// `val` is only scored, never trained on or oversampled.
    pub fn fit(&mut self, train: &[Transition], val: &[Transition]) -> Result<Vec<EpochReport>> {
        if train.is_empty() {
            return Err(Error::EmptyDataset("no training transitions"));
        }
        let mut order = oversample_positive(train, self.cfg.oversample_pos);
        let positives = train.iter().filter(|t| t.reward > 0.0).count();
        info!(
            train = train.len(),
            oversampled = order.len(),
            positives,
            factor = self.cfg.oversample_pos,
            "built training buffer"
        );

        let bs = self.cfg.batch_size;
        let mut reports = Vec::with_capacity(self.cfg.epochs);
        for epoch in 1..=self.cfg.epochs {
            order.shuffle(&mut self.rng);
            // drop the ragged tail unless it is all there is
            let usable = if order.len() >= bs {
                order.len() - order.len() % bs
            } else {
                order.len()
            };

            let (mut loss_sum, mut batches) = (0.0, 0usize);
            for chunk in order[..usable].chunks(bs) {
                let items: Vec<&Transition> = chunk.iter().map(|&i| &train[i]).collect();
                loss_sum += self.train_step(&items)?;
                batches += 1;
            }

            let (val_auc, val_ap) = if val.is_empty() {
                (f64::NAN, f64::NAN)
            } else {
                self.validation_ranking(val)?
            };
            let report = EpochReport {
                epoch,
                steps: self.steps,
                mean_loss: loss_sum / batches.max(1) as f64,
                val_auc: defined(val_auc),
                val_ap: defined(val_ap),
            };
            info!(
                "[epoch {}/{}] loss={:.4} val AUC={:.3} AP={:.3}",
                epoch, self.cfg.epochs, report.mean_loss, val_auc, val_ap
            );
            reports.push(report);
        }
        Ok(reports)
    }
}
