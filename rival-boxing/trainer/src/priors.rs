use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::records::{grouped_indices, Compound, LapRecord};

/// Median tire age at stint end, per track and compound label.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StintPriors {
    by_track: BTreeMap<String, BTreeMap<String, f64>>,
}

fn track_key(track: &str) -> String {
    track.trim().to_ascii_uppercase()
}

impl StintPriors {
    pub fn from_laps(laps: &[LapRecord]) -> Self {
        // (race, driver, stint) -> (track, last compound, max age)
        let mut stints: HashMap<(String, String, u32), (String, Option<Compound>, f64)> =
            HashMap::new();
        for (_, idx) in grouped_indices(laps) {
            for i in idx {
                let r = &laps[i];
                let age = r.tyre_age.filter(|a| a.is_finite()).unwrap_or(0.0).max(0.0);
                let entry = stints
                    .entry((r.race_id.clone(), r.driver.clone(), r.stint))
                    .or_insert_with(|| (track_key(&r.track), r.compound(), age));
                entry.1 = r.compound();
                entry.2 = entry.2.max(age);
            }
        }

        let mut lengths: BTreeMap<(String, Compound), Vec<f64>> = BTreeMap::new();
        for (track, compound, len) in stints.into_values() {
            if let Some(c) = compound {
                lengths.entry((track, c)).or_default().push(len);
            }
        }

        let mut by_track: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for ((track, c), mut v) in lengths {
            by_track
                .entry(track)
                .or_default()
                .insert(c.label().to_string(), median(&mut v));
        }
        Self { by_track }
    }

    pub fn insert(&mut self, track: &str, compound: Compound, typical_len: f64) {
        self.by_track
            .entry(track_key(track))
            .or_default()
            .insert(compound.label().to_string(), typical_len);
    }

    pub fn observed(&self, track: &str, compound: Compound) -> Option<f64> {
        self.by_track
            .get(&track_key(track))
            .and_then(|m| m.get(compound.label()))
            .copied()
    }

    /// Observed median, or the compound's fixed default.
    pub fn typical_len(&self, track: &str, compound: Option<Compound>) -> f64 {
        compound
            .and_then(|c| self.observed(track, c))
            .unwrap_or_else(|| Compound::default_stint_len(compound))
    }

    pub fn is_empty(&self) -> bool {
        self.by_track.is_empty()
    }
}

fn median(v: &mut [f64]) -> f64 {
    v.sort_by(|a, b| a.total_cmp(b));
    let n = v.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => v[n / 2],
        _ => 0.5 * (v[n / 2 - 1] + v[n / 2]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lap(driver: &str, lap: u32, stint: u32, compound: &str, age: f64) -> LapRecord {
        LapRecord {
            race_id: "2023_Monza".into(),
            track: "Monza".into(),
            driver: driver.into(),
            lap,
            stint,
            compound: compound.into(),
            tyre_age: Some(age),
            lap_time: None,
            sector_times: [None; 3],
            track_status_code: None,
            non_green: false,
            pitted_this_lap: false,
            pit_within_horizon: false,
        }
    }

    #[test]
    fn median_of_stint_ends() {
        let mut laps = Vec::new();
        // three soft stints ending at ages 10, 14, 20
        for (d, end) in [("AAA", 10), ("BBB", 14), ("CCC", 20)] {
            for a in 0..=end {
                laps.push(lap(d, a + 1, 1, "SOFT", a as f64));
            }
        }
        let p = StintPriors::from_laps(&laps);
        assert_eq!(p.observed("MONZA", Compound::Soft), Some(14.0));
        assert_eq!(p.typical_len("monza", Some(Compound::Soft)), 14.0);
    }

    #[test]
    fn falls_back_to_compound_default() {
        let p = StintPriors::default();
        assert_eq!(p.typical_len("Monaco", Some(Compound::Hard)), 30.0);
        assert_eq!(p.typical_len("Monaco", None), 20.0);
    }

    #[test]
    fn even_count_median_averages() {
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
    }
}
