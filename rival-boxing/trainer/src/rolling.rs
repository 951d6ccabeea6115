//! Per-driver rolling state for lag and rolling-window features.
//!
//! Offline, the feature builder owns one [`DriverRollingState`] per (race, driver)
//! sequence. At the serving boundary, [`LiveFeatureState`] keeps one slot per
//! driver behind its own lock so drivers update independently while each
//! driver's laps stay strictly ordered.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::features::{FeatureBuilder, LapFeatures, PitLags};
use crate::records::{GroupKey, LapRecord};

/// Rolling-window and lag statistics produced for one lap, computed from the
/// laps *before* it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RollingSnapshot {
    pub last3_avg: f64,
    pub last5_slope: f64,
    pub last3_var: f64,
    pub non_green: bool,
    pub non_green_prev1: bool,
    pub non_green_prev2: bool,
    pub non_green_run: u32,
}

#[derive(Debug, Clone)]
pub struct DriverRollingState {
    lap_times: VecDeque<f64>,
    capacity: usize,
    // [lap-1, lap-2]
    prev_non_green: [bool; 2],
    non_green_run: u32,
    last_lap: Option<u32>,
}

impl DriverRollingState {
    pub fn new(history: usize) -> Self {
        let capacity = history.max(5);
        Self {
            lap_times: VecDeque::with_capacity(capacity),
            capacity,
            prev_non_green: [false; 2],
            non_green_run: 0,
            last_lap: None,
        }
    }

    /// Consume one lap. Laps must arrive with strictly increasing lap numbers.
    pub fn advance(&mut self, record: &LapRecord) -> Result<RollingSnapshot> {
        if let Some(last) = self.last_lap {
            if record.lap <= last {
                return Err(Error::OutOfOrderLap {
                    race_id: record.race_id.clone(),
                    driver: record.driver.clone(),
                    lap: record.lap,
                    last,
                });
            }
        }

        let times: Vec<f64> = self.lap_times.iter().copied().collect();
        let non_green = record.is_non_green();
        self.non_green_run = if non_green { self.non_green_run + 1 } else { 0 };

        let snap = RollingSnapshot {
            last3_avg: mean(tail(&times, 3)),
            last5_slope: slope(tail(&times, 5)),
            last3_var: if times.len() >= 3 { variance(tail(&times, 3)) } else { 0.0 },
            non_green,
            non_green_prev1: self.prev_non_green[0],
            non_green_prev2: self.prev_non_green[1],
            non_green_run: self.non_green_run,
        };

        self.prev_non_green = [non_green, self.prev_non_green[0]];
        if let Some(t) = record.lap_time.filter(|t| t.is_finite()) {
            if self.lap_times.len() == self.capacity {
                self.lap_times.pop_front();
            }
            self.lap_times.push_back(t);
        }
        self.last_lap = Some(record.lap);
        Ok(snap)
    }
}

fn tail(v: &[f64], k: usize) -> &[f64] {
    &v[v.len().saturating_sub(k)..]
}

fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        0.0
    } else {
        v.iter().sum::<f64>() / v.len() as f64
    }
}

fn variance(v: &[f64]) -> f64 {
    let m = mean(v);
    mean(&v.iter().map(|x| (x - m) * (x - m)).collect::<Vec<_>>())
}

/// Least-squares slope of `v` against 0..n. Zero with fewer than two points or a
/// degenerate x spread.
pub(crate) fn slope(v: &[f64]) -> f64 {
    if v.len() < 2 || v.iter().any(|y| !y.is_finite()) {
        return 0.0;
    }
    let n = v.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(v);
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in v.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }
    if sxx == 0.0 {
        0.0
    } else {
        sxy / sxx
    }
}

/// Live per-driver state for the serving path.
pub struct LiveFeatureState {
    history: usize,
    drivers: Mutex<HashMap<GroupKey, Arc<Mutex<DriverRollingState>>>>,
    // race -> lap -> number of drivers that pitted on that lap
    pits: Mutex<HashMap<String, BTreeMap<u32, u32>>>,
}

impl LiveFeatureState {
    pub fn new(history: usize) -> Self {
        Self {
            history,
            drivers: Mutex::new(HashMap::new()),
            pits: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: GroupKey) -> Arc<Mutex<DriverRollingState>> {
        let mut drivers = self.drivers.lock();
        drivers
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(DriverRollingState::new(self.history))))
            .clone()
    }

    fn pit_lags(&self, race_id: &str, lap: u32) -> PitLags {
        let pits = self.pits.lock();
        let count = |l: Option<u32>| {
            l.and_then(|l| pits.get(race_id).and_then(|m| m.get(&l)).copied())
                .unwrap_or(0)
        };
        PitLags {
            prev1: count(lap.checked_sub(1)),
            prev2: count(lap.checked_sub(2)),
        }
    }

    /// Update this driver's state with one lap and return its features.
    /// Only this driver's slot is held for the duration of the update.
    pub fn observe(&self, builder: &FeatureBuilder, record: &LapRecord) -> Result<LapFeatures> {
        let slot = self.slot(record.group_key());
        let mut state = slot.lock();
        let lags = self.pit_lags(&record.race_id, record.lap);
        let feats = builder.lap_features(&mut state, record, lags)?;
        if record.pitted_this_lap {
            let mut pits = self.pits.lock();
            *pits
                .entry(record.race_id.clone())
                .or_default()
                .entry(record.lap)
                .or_default() += 1;
        }
        Ok(feats)
    }

    /// Drop every slot that belongs to `race_id`.
    pub fn reset_race(&self, race_id: &str) {
        self.drivers.lock().retain(|k, _| k.race_id != race_id);
        self.pits.lock().remove(race_id);
    }

    pub fn drivers(&self) -> usize {
        self.drivers.lock().len()
    }
}
