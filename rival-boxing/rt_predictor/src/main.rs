use anyhow::{Context, Result};
use pit_hazard::{read_laps, within_three, Error as HazardError, GroupKey, LapRecord};
use std::collections::BTreeMap;
use std::io::{self, BufWriter, Write};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

mod model;
mod types;

use types::PredictionOut;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Scores laps in arrival order. Laps that arrive out of order for their driver
/// are skipped. When the race id changes the previous race's state is dropped.
fn replay(pred: &model::Predictor, laps: &[LapRecord]) -> Result<Vec<PredictionOut>> {
    let mut out = Vec::with_capacity(laps.len());
    let mut current_race: Option<&str> = None;
    for r in laps {
        if let Some(prev) = current_race.filter(|prev| *prev != r.race_id) {
            pred.end_race(prev);
        }
        current_race = Some(r.race_id.as_str());

        let score = match pred.observe(r) {
            Ok(s) => s,
            Err(e) => match e.downcast_ref::<HazardError>() {
                Some(HazardError::OutOfOrderLap { .. }) => {
                    tracing::warn!("skipping lap: {}", e);
                    continue;
                }
                _ => return Err(e),
            },
        };
        out.push(PredictionOut {
            race_id: r.race_id.clone(),
            driver: r.driver.clone(),
            lap: r.lap,
            prob_box_within2: score.prob,
            prob_box_within3: None,
            alert: score.alert,
            ts_ms: now_ms(),
        });
    }
    fill_within_three(&mut out);
    Ok(out)
}

/// Fills the 3-lap probability from each driver's consecutive 2-lap probabilities.
fn fill_within_three(preds: &mut [PredictionOut]) {
    let mut by_driver: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
    for (i, p) in preds.iter().enumerate() {
        let key = GroupKey {
            race_id: p.race_id.clone(),
            driver: p.driver.clone(),
        };
        by_driver.entry(key).or_default().push(i);
    }
    for idx in by_driver.values() {
        let p2: Vec<f64> = idx.iter().map(|&i| preds[i].prob_box_within2).collect();
        for (&i, p3) in idx.iter().zip(within_three(&p2)) {
            preds[i].prob_box_within3 = Some(p3);
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let artifacts_dir = std::env::var("ARTIFACTS_DIR").unwrap_or_else(|_| "artifacts".to_string());
    let laps_path = std::env::var("LAPS_PATH").context("LAPS_PATH not set")?;
    let log_pred = std::env::var("LOG_PRED").ok().as_deref() == Some("1");

    let pred = model::Predictor::load(&artifacts_dir, log_pred)?;
    tracing::info!(
        "loaded model; threshold={:.3} feat_list[{}]: {:?}",
        pred.threshold(),
        pred.feat_list().len(),
        pred.feat_list()
    );

    let laps = read_laps(&laps_path).with_context(|| format!("failed to read laps at {}", laps_path))?;
    let preds = replay(&pred, &laps)?;
    let alerts = preds.iter().filter(|p| p.alert).count();

    let stdout = io::stdout();
    let mut w = BufWriter::new(stdout.lock());
    for p in &preds {
        serde_json::to_writer(&mut w, p)?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    tracing::info!("scored {} laps, {} alerts", preds.len(), alerts);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(race: &str, driver: &str, lap: u32, p2: f64) -> PredictionOut {
        PredictionOut {
            race_id: race.into(),
            driver: driver.into(),
            lap,
            prob_box_within2: p2,
            prob_box_within3: None,
            alert: false,
            ts_ms: 0,
        }
    }

    #[test]
    fn within_three_is_per_driver() {
        let mut preds = vec![
            out("r1", "A", 1, 0.1),
            out("r1", "B", 1, 0.9),
            out("r1", "A", 2, 0.5),
            out("r1", "B", 2, 0.0),
        ];
        fill_within_three(&mut preds);
        let p3: Vec<f64> = preds.iter().map(|p| p.prob_box_within3.unwrap()).collect();
        assert!((p3[0] - 0.55).abs() < 1e-12);
        assert!((p3[1] - 0.9).abs() < 1e-12);
        assert!((p3[2] - 0.75).abs() < 1e-12);
        assert!((p3[3] - 0.0).abs() < 1e-12);
    }
}
