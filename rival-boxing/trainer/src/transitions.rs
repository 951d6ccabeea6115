//! 2-step transitions with shaped rewards.
//!
//! Tuples are (s_t, a_t, r_t, s_{t+2}, done). The action is whatever the team
//! actually did on that lap.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use tracing::info;

use crate::config::RewardShaping;
use crate::error::{Error, Result};
use crate::features::FeatureMatrix;
use crate::records::{grouped_indices, GroupKey, LapRecord};

pub const NO_BOX: i64 = 0;
pub const BOX: i64 = 1;

/// How many raw laps separate `state` from `next_state`.
pub const N_STEP: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: Vec<f32>,
    pub action: i64,
    pub reward: f32,
    pub next_state: Vec<f32>,
    pub terminal: bool,
    pub group: GroupKey,
}

impl Transition {
    /// Binary label used for ranking diagnostics and calibration.
    pub fn proxy_label(&self) -> bool {
        self.reward > 0.5
    }
}

pub fn shaped_reward(record: &LapRecord, shaping: &RewardShaping) -> f32 {
    match (record.pitted_this_lap, record.pit_within_horizon) {
        (false, _) => 0.0,
        (true, true) => {
            let boost = if record.is_non_green() {
                shaping.cheap_boost
            } else {
                1.0
            };
            shaping.pos_reward * boost
        }
        (true, false) => shaping.neg_reward,
    }
}

/// One transition per lap, grouped by (race, driver) and sorted by lap.
/// `features` must be index-aligned with `laps`.
pub fn build_transitions(
    laps: &[LapRecord],
    features: &FeatureMatrix,
    shaping: &RewardShaping,
) -> Result<Vec<Transition>> {
    if features.rows() != laps.len() {
        return Err(Error::DimensionMismatch {
            expected: laps.len(),
            actual: features.rows(),
        });
    }
    let zero = vec![0.0f32; features.dim()];
    let mut out = Vec::with_capacity(laps.len());

    for (group, idx) in grouped_indices(laps) {
        let n = idx.len();
        for (k, &i) in idx.iter().enumerate() {
            let terminal = k + N_STEP >= n;
            let next_state = if terminal {
                zero.clone()
            } else {
                features.row(idx[k + N_STEP]).to_vec()
            };
            let record = &laps[i];
            out.push(Transition {
                state: features.row(i).to_vec(),
                action: if record.pitted_this_lap { BOX } else { NO_BOX },
                reward: shaped_reward(record, shaping),
                next_state,
                terminal,
                group: group.clone(),
            });
        }
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct Split {
    pub train: Vec<Transition>,
    pub val: Vec<Transition>,
    /// Groups (as `race/driver`) that went to validation.
    pub held_out: Vec<String>,
}

const FALLBACK_VAL_FRACTION: f64 = 0.2;

/// Splits by group, never by transition. With two or more races the last race id
/// is held out whole; with a single race a seeded fraction of driver sequences is.
pub fn split_by_group(transitions: Vec<Transition>, seed: u64) -> Result<Split> {
    let races: BTreeSet<&str> = transitions.iter().map(|t| t.group.race_id.as_str()).collect();

    let val_groups: BTreeSet<GroupKey> = if races.len() >= 2 {
        let last = races.iter().next_back().copied().unwrap_or_default().to_string();
        transitions
            .iter()
            .filter(|t| t.group.race_id == last)
            .map(|t| t.group.clone())
            .collect()
    } else {
        let mut groups: Vec<GroupKey> = transitions
            .iter()
            .map(|t| t.group.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if groups.len() < 2 {
            return Err(Error::EmptyDataset(
                "need at least two (race, driver) groups for a grouped split",
            ));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        groups.shuffle(&mut rng);
        let n_val = ((groups.len() as f64 * FALLBACK_VAL_FRACTION).round() as usize)
            .clamp(1, groups.len() - 1);
        groups.into_iter().take(n_val).collect()
    };

    let (val, train): (Vec<_>, Vec<_>) = transitions
        .into_iter()
        .partition(|t| val_groups.contains(&t.group));
    if train.is_empty() || val.is_empty() {
        return Err(Error::EmptyDataset("grouped split left one side empty"));
    }
    info!(
        train = train.len(),
        val = val.len(),
        val_groups = val_groups.len(),
        "grouped train/validation split"
    );
    Ok(Split {
        train,
        val,
        held_out: val_groups.iter().map(|g| g.to_string()).collect(),
    })
}

/// Indices into `items`: every non-positive once, every positive (reward > 0)
/// `factor` times.
pub fn oversample_positive(items: &[Transition], factor: usize) -> Vec<usize> {
    let factor = factor.max(1);
    let mut out: Vec<usize> = (0..items.len()).filter(|&i| items[i].reward <= 0.0).collect();
    let pos: Vec<usize> = (0..items.len()).filter(|&i| items[i].reward > 0.0).collect();
    for _ in 0..factor {
        out.extend_from_slice(&pos);
    }
    out
}
