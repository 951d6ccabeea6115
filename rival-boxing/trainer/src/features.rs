//! Lap records -> fixed-order state vectors.
//!
//! Two groups of features are computed per lap:
//! - hazard: tire age against the typical stint length for the track/compound
//! - tactical: recent track status and how many cars pitted on the previous laps
//!
//! The vector layout is a list of names. Position defines the contract, so a
//! layout may repeat a name (the deployed 26-wide layout does).

use std::collections::HashMap;
use tracing::warn;

use crate::config::FeatureConfig;
use crate::error::{Error, Result};
use crate::priors::StintPriors;
use crate::records::{grouped_indices, Compound, LapRecord};
use crate::rolling::DriverRollingState;

const PRIOR_EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKey {
    TireAge,
    StintNo,
    Compound(Compound),
    Last3Avg,
    Last5Slope,
    Last3Var,
    TypicalStintLen,
    AgeVsTypical,
    AgePercentile,
    Overshoot,
    CheapStopFlag,
    CheapPrev1,
    CheapPrev2,
    NonGreenRunLen,
    PitsPrev1,
    PitsPrev2,
}

impl FeatureKey {
    pub fn name(self) -> &'static str {
        match self {
            FeatureKey::TireAge => "tire_age_laps",
            FeatureKey::StintNo => "stint_no",
            FeatureKey::Compound(Compound::Soft) => "compound_SOFT",
            FeatureKey::Compound(Compound::Medium) => "compound_MED",
            FeatureKey::Compound(Compound::Hard) => "compound_HARD",
            FeatureKey::Compound(Compound::Intermediate) => "compound_INTERMEDIATE",
            FeatureKey::Compound(Compound::Wet) => "compound_WET",
            FeatureKey::Last3Avg => "last3_avg",
            FeatureKey::Last5Slope => "last5_slope",
            FeatureKey::Last3Var => "last3_var",
            FeatureKey::TypicalStintLen => "typical_stint_len",
            FeatureKey::AgeVsTypical => "age_vs_typical",
            FeatureKey::AgePercentile => "age_percentile",
            FeatureKey::Overshoot => "overshoot",
            FeatureKey::CheapStopFlag => "cheap_stop_flag",
            FeatureKey::CheapPrev1 => "cheap_prev1",
            FeatureKey::CheapPrev2 => "cheap_prev2",
            FeatureKey::NonGreenRunLen => "non_green_runlen",
            FeatureKey::PitsPrev1 => "pits_prev1",
            FeatureKey::PitsPrev2 => "pits_prev2",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        const ALL: [FeatureKey; 20] = [
            FeatureKey::TireAge,
            FeatureKey::StintNo,
            FeatureKey::Compound(Compound::Soft),
            FeatureKey::Compound(Compound::Medium),
            FeatureKey::Compound(Compound::Hard),
            FeatureKey::Compound(Compound::Intermediate),
            FeatureKey::Compound(Compound::Wet),
            FeatureKey::Last3Avg,
            FeatureKey::Last5Slope,
            FeatureKey::Last3Var,
            FeatureKey::TypicalStintLen,
            FeatureKey::AgeVsTypical,
            FeatureKey::AgePercentile,
            FeatureKey::Overshoot,
            FeatureKey::CheapStopFlag,
            FeatureKey::CheapPrev1,
            FeatureKey::CheapPrev2,
            FeatureKey::NonGreenRunLen,
            FeatureKey::PitsPrev1,
            FeatureKey::PitsPrev2,
        ];
        ALL.into_iter().find(|k| k.name() == name)
    }
}

/// Ordered feature names plus their resolved keys.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureLayout {
    names: Vec<String>,
    keys: Vec<FeatureKey>,
}

impl FeatureLayout {
    /// The 26-wide layout: hazard group, tactical group, then the tire-age and
    /// compound markers repeated at the end.
    pub fn canonical() -> Self {
        let mut keys = vec![FeatureKey::TireAge, FeatureKey::StintNo];
        keys.extend(Compound::ALL.map(FeatureKey::Compound));
        keys.extend([
            FeatureKey::Last3Avg,
            FeatureKey::Last5Slope,
            FeatureKey::Last3Var,
            FeatureKey::TypicalStintLen,
            FeatureKey::AgeVsTypical,
            FeatureKey::AgePercentile,
            FeatureKey::Overshoot,
            FeatureKey::CheapStopFlag,
            FeatureKey::CheapPrev1,
            FeatureKey::CheapPrev2,
            FeatureKey::NonGreenRunLen,
            FeatureKey::PitsPrev1,
            FeatureKey::PitsPrev2,
            FeatureKey::TireAge,
        ]);
        keys.extend(Compound::ALL.map(FeatureKey::Compound));
        Self {
            names: keys.iter().map(|k| k.name().to_string()).collect(),
            keys,
        }
    }

    /// Layout declared by an artifact. Any unknown name is fatal.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let keys = names
            .iter()
            .map(|n| {
                FeatureKey::from_name(n.as_ref())
                    .ok_or_else(|| Error::UnknownFeature(n.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            names: names.iter().map(|n| n.as_ref().to_string()).collect(),
            keys,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn keys(&self) -> &[FeatureKey] {
        &self.keys
    }

    pub fn dim(&self) -> usize {
        self.keys.len()
    }

    pub fn ensure_dim(&self, actual: usize) -> Result<()> {
        if actual != self.dim() {
            return Err(Error::DimensionMismatch {
                expected: self.dim(),
                actual,
            });
        }
        Ok(())
    }
}

/// Count of cars (any driver) that pitted one and two laps earlier in the race.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PitLags {
    pub prev1: u32,
    pub prev2: u32,
}

/// Per (race, lap number) pit counts over a complete race history.
#[derive(Debug, Default)]
pub struct PitLedger {
    counts: HashMap<(String, u32), u32>,
}

impl PitLedger {
    pub fn from_laps(laps: &[LapRecord]) -> Self {
        let mut counts = HashMap::new();
        for r in laps.iter().filter(|r| r.pitted_this_lap) {
            *counts.entry((r.race_id.clone(), r.lap)).or_default() += 1;
        }
        Self { counts }
    }

    pub fn count(&self, race_id: &str, lap: u32) -> u32 {
        self.counts
            .get(&(race_id.to_string(), lap))
            .copied()
            .unwrap_or(0)
    }

    pub fn lags(&self, race_id: &str, lap: u32) -> PitLags {
        let at = |l: Option<u32>| l.map_or(0, |l| self.count(race_id, l));
        PitLags {
            prev1: at(lap.checked_sub(1)),
            prev2: at(lap.checked_sub(2)),
        }
    }
}

/// Every feature for one lap, by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LapFeatures {
    pub tire_age_laps: f64,
    pub stint_no: f64,
    pub compound: [f64; 5],
    pub last3_avg: f64,
    pub last5_slope: f64,
    pub last3_var: f64,
    pub typical_stint_len: f64,
    pub age_vs_typical: f64,
    pub age_percentile: f64,
    pub overshoot: f64,
    pub cheap_stop_flag: f64,
    pub cheap_prev1: f64,
    pub cheap_prev2: f64,
    pub non_green_runlen: f64,
    pub pits_prev1: f64,
    pub pits_prev2: f64,
}

impl LapFeatures {
    pub fn get(&self, key: FeatureKey) -> f64 {
        match key {
            FeatureKey::TireAge => self.tire_age_laps,
            FeatureKey::StintNo => self.stint_no,
            FeatureKey::Compound(c) => self.compound[c.index()],
            FeatureKey::Last3Avg => self.last3_avg,
            FeatureKey::Last5Slope => self.last5_slope,
            FeatureKey::Last3Var => self.last3_var,
            FeatureKey::TypicalStintLen => self.typical_stint_len,
            FeatureKey::AgeVsTypical => self.age_vs_typical,
            FeatureKey::AgePercentile => self.age_percentile,
            FeatureKey::Overshoot => self.overshoot,
            FeatureKey::CheapStopFlag => self.cheap_stop_flag,
            FeatureKey::CheapPrev1 => self.cheap_prev1,
            FeatureKey::CheapPrev2 => self.cheap_prev2,
            FeatureKey::NonGreenRunLen => self.non_green_runlen,
            FeatureKey::PitsPrev1 => self.pits_prev1,
            FeatureKey::PitsPrev2 => self.pits_prev2,
        }
    }
}

/// Row-major feature matrix, row `i` belonging to input lap `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    names: Vec<String>,
    dim: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Rows with every entry exactly zero. Usually means upstream data was missing.
    pub fn zero_rows(&self) -> usize {
        (0..self.rows())
            .filter(|&i| self.row(i).iter().all(|x| *x == 0.0))
            .count()
    }
}

pub struct FeatureBuilder {
    layout: FeatureLayout,
    priors: StintPriors,
    cfg: FeatureConfig,
}

impl FeatureBuilder {
    pub fn new(layout: FeatureLayout, priors: StintPriors, cfg: FeatureConfig) -> Self {
        Self { layout, priors, cfg }
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    pub fn priors(&self) -> &StintPriors {
        &self.priors
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.cfg
    }

    fn finite_or_default(&self, v: Option<f64>) -> f64 {
        v.filter(|x| x.is_finite()).unwrap_or(self.cfg.numeric_default)
    }

    /// Features for one lap. Advances `state`, which must belong to this lap's driver.
    pub fn lap_features(
        &self,
        state: &mut DriverRollingState,
        record: &LapRecord,
        pits: PitLags,
    ) -> Result<LapFeatures> {
        let roll = state.advance(record)?;
        let compound = record.compound();

        let tire_age = self.finite_or_default(record.tyre_age).max(0.0);
        let typical = self.priors.typical_len(&record.track, compound);
        let age_vs_typical = tire_age - typical;
        let age_percentile = (tire_age / (typical + PRIOR_EPS)).min(self.cfg.age_percentile_cap);

        let mut one_hot = [0.0; 5];
        if let Some(c) = compound {
            one_hot[c.index()] = 1.0;
        }
        let flag = |b: bool| if b { 1.0 } else { 0.0 };

        Ok(LapFeatures {
            tire_age_laps: tire_age,
            stint_no: f64::from(record.stint),
            compound: one_hot,
            last3_avg: roll.last3_avg,
            last5_slope: roll.last5_slope,
            last3_var: roll.last3_var,
            typical_stint_len: typical,
            age_vs_typical,
            age_percentile,
            overshoot: age_vs_typical.max(0.0),
            cheap_stop_flag: flag(roll.non_green),
            cheap_prev1: flag(roll.non_green_prev1),
            cheap_prev2: flag(roll.non_green_prev2),
            non_green_runlen: f64::from(roll.non_green_run),
            pits_prev1: f64::from(pits.prev1),
            pits_prev2: f64::from(pits.prev2),
        })
    }

    /// Lays `feats` out in layout order. NaN/inf become the configured default.
    pub fn encode(&self, feats: &LapFeatures) -> Vec<f32> {
        self.layout
            .keys()
            .iter()
            .map(|k| {
                let v = feats.get(*k);
                let v = if v.is_finite() { v } else { self.cfg.numeric_default };
                v as f32
            })
            .collect()
    }

    /// One row per lap of a full race history, index-aligned with `laps`.
    pub fn build(&self, laps: &[LapRecord]) -> Result<FeatureMatrix> {
        let dim = self.layout.dim();
        let ledger = PitLedger::from_laps(laps);
        let mut data = vec![0.0f32; laps.len() * dim];

        for (_, idx) in grouped_indices(laps) {
            let mut state = DriverRollingState::new(self.cfg.lap_history);
            for i in idx {
                let r = &laps[i];
                let feats = self.lap_features(&mut state, r, ledger.lags(&r.race_id, r.lap))?;
                data[i * dim..(i + 1) * dim].copy_from_slice(&self.encode(&feats));
            }
        }

        let m = FeatureMatrix {
            names: self.layout.names().to_vec(),
            dim,
            data,
        };
        let zeros = m.zero_rows();
        if zeros > 0 {
            warn!(zero_rows = zeros, total = m.rows(), "all-zero feature vectors in matrix");
        }
        Ok(m)
    }
}
