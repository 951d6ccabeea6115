use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Compound {
    Soft,
    Medium,
    Hard,
    Intermediate,
    Wet,
}

impl Compound {
    /// One-hot order used by the feature layout.
    pub const ALL: [Compound; 5] = [
        Compound::Soft,
        Compound::Medium,
        Compound::Hard,
        Compound::Intermediate,
        Compound::Wet,
    ];

    /// Empty input means HARD; anything unrecognised is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "" | "HARD" => Some(Compound::Hard),
            "SOFT" => Some(Compound::Soft),
            "MED" | "MEDIUM" => Some(Compound::Medium),
            "INTERMEDIATE" | "INT" => Some(Compound::Intermediate),
            "WET" => Some(Compound::Wet),
            _ => None,
        }
    }

    /// Position in [`Compound::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Compound::Soft => "SOFT",
            Compound::Medium => "MED",
            Compound::Hard => "HARD",
            Compound::Intermediate => "INTERMEDIATE",
            Compound::Wet => "WET",
        }
    }

    /// Typical stint length used when a track has no observed stints on this compound.
    pub fn default_stint_len(compound: Option<Compound>) -> f64 {
        match compound {
            Some(Compound::Soft) => 15.0,
            Some(Compound::Medium) => 22.0,
            Some(Compound::Hard) => 30.0,
            Some(Compound::Intermediate) => 35.0,
            Some(Compound::Wet) => 45.0,
            None => 20.0,
        }
    }
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One lap of one driver, as handed over by the telemetry source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LapRecord {
    pub race_id: String,
    #[serde(default)]
    pub track: String,
    pub driver: String,
    pub lap: u32,
    #[serde(default)]
    pub stint: u32,
    #[serde(default)]
    pub compound: String,
    /// Tire age in laps.
    #[serde(default)]
    pub tyre_age: Option<f64>,
    /// Time of this lap in seconds, if it was completed and timed.
    #[serde(default)]
    pub lap_time: Option<f64>,
    #[serde(default)]
    pub sector_times: [Option<f64>; 3],
    /// 1 = green, anything else is non-green.
    #[serde(default)]
    pub track_status_code: Option<i32>,
    #[serde(default)]
    pub non_green: bool,
    #[serde(default)]
    pub pitted_this_lap: bool,
    /// Ground truth: the driver pits within the prediction horizon.
    #[serde(default)]
    pub pit_within_horizon: bool,
}

impl LapRecord {
    pub fn compound(&self) -> Option<Compound> {
        Compound::parse(&self.compound)
    }

    pub fn is_non_green(&self) -> bool {
        self.non_green || self.track_status_code.is_some_and(|c| c != 1)
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            race_id: self.race_id.clone(),
            driver: self.driver.clone(),
        }
    }
}

/// A (race, driver) lap sequence. Used for grouping and splitting, never as a feature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub race_id: String,
    pub driver: String,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.race_id, self.driver)
    }
}

/// Reads lap records from a JSON array or a JSON-lines file.
pub fn read_laps(path: impl AsRef<Path>) -> Result<Vec<LapRecord>> {
    let txt = fs::read_to_string(path.as_ref())?;
    parse_laps(&txt)
}

pub fn parse_laps(txt: &str) -> Result<Vec<LapRecord>> {
    if txt.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(txt)?);
    }
    let mut out = Vec::new();
    for line in txt.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        out.push(serde_json::from_str(line)?);
    }
    Ok(out)
}

/// Indices of `laps` grouped by (race, driver), each group sorted by lap number.
/// Groups come out in key order so the result is independent of input order.
pub fn grouped_indices(laps: &[LapRecord]) -> Vec<(GroupKey, Vec<usize>)> {
    let mut groups: std::collections::BTreeMap<GroupKey, Vec<usize>> = Default::default();
    for (i, r) in laps.iter().enumerate() {
        groups.entry(r.group_key()).or_default().push(i);
    }
    groups
        .into_iter()
        .map(|(k, mut idx)| {
            idx.sort_by_key(|&i| laps[i].lap);
            (k, idx)
        })
        .collect()
}
