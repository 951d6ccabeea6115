//! Distributional losses and targets as pure tensor functions.
//!
//! Nothing here owns a network; callers pass in forward outputs.

use tch::{Device, Kind, Tensor};

use crate::model::expected_values;

/// Quantile midpoints (i + 0.5) / Q.
pub fn quantile_taus(n_quantiles: i64, device: Device) -> Tensor {
    let taus: Vec<f32> = (0..n_quantiles)
        .map(|i| (i as f32 + 0.5) / n_quantiles as f32)
        .collect();
    Tensor::from_slice(&taus).to_device(device)
}

/// Quantile Huber loss between predicted [B, Q] and target [B, Q] quantiles.
///
/// For every (predicted i, target j) pair, u = t_j - p_i, weighted by
/// |1[u < 0] - tau_i|, averaged over B * Q * Q pairs.
pub fn quantile_huber_loss(pred: &Tensor, target: &Tensor, taus: &Tensor, kappa: f64) -> Tensor {
    // [B, Q_pred, Q_target]
    let u = target.unsqueeze(1) - pred.unsqueeze(2);
    let abs_u = u.abs();
    // 0.5 u^2 inside the kappa band, kappa (|u| - kappa/2) outside
    let clipped = abs_u.clamp_max(kappa);
    let huber = &clipped * &clipped * 0.5 + (&abs_u - &clipped) * kappa;
    let tau = taus.view([1, -1, 1]);
    let below = u.detach().lt(0.0).to_kind(Kind::Float);
    let weight = (below - tau).abs();
    (weight * huber).mean(Kind::Float)
}

/// Picks each row's quantiles for the given actions: [B, A, Q], [B] -> [B, Q].
pub fn select_action(quantiles: &Tensor, actions: &Tensor) -> Tensor {
    let size = quantiles.size();
    let (b, q) = (size[0], size[2]);
    let idx = actions.view([-1, 1, 1]).expand([b, 1, q], false);
    quantiles.gather(1, &idx, false).squeeze_dim(1)
}

/// Double-Q bootstrapped targets for n-step transitions.
///
/// The online network's next-state quantiles pick the greedy action by mean;
/// the target network's quantiles at that action are discounted by
/// `discount` (gamma^n) and added to the reward unless the transition is terminal.
pub fn double_q_targets(
    online_next: &Tensor,
    target_next: &Tensor,
    rewards: &Tensor,
    not_done: &Tensor,
    discount: f64,
) -> Tensor {
    let greedy = expected_values(online_next).argmax(1, false);
    let target_z = select_action(target_next, &greedy);
    rewards.unsqueeze(1) + not_done.unsqueeze(1) * target_z * discount
}

/// Conservative penalty: mean over the batch of
/// logsumexp_a E[Z(s, a)] - E[Z(s, a_observed)].
pub fn conservative_penalty(quantiles: &Tensor, actions: &Tensor) -> Tensor {
    let ev = expected_values(quantiles);
    let logsum = ev.logsumexp([1], false);
    let observed = ev.gather(1, &actions.view([-1, 1]), false).squeeze_dim(1);
    (logsum - observed).mean(Kind::Float)
}
