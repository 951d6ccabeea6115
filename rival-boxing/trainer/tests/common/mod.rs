#![allow(dead_code)]

use pit_hazard::LapRecord;

pub fn lap(race: &str, driver: &str, lap: u32) -> LapRecord {
    LapRecord {
        race_id: race.to_string(),
        track: "MONZA".to_string(),
        driver: driver.to_string(),
        lap,
        stint: 1,
        compound: "MEDIUM".to_string(),
        tyre_age: Some(f64::from(lap)),
        lap_time: Some(82.0 + 0.05 * f64::from(lap)),
        sector_times: [None; 3],
        track_status_code: Some(1),
        non_green: false,
        pitted_this_lap: false,
        pit_within_horizon: false,
    }
}

/// `n` laps for one driver; the driver boxes on `pit_lap` (if any) and the
/// horizon label is set on the two laps before it and the pit lap itself.
pub fn stint_race(race: &str, driver: &str, n: u32, pit_lap: Option<u32>) -> Vec<LapRecord> {
    let mut age = 0.0;
    let mut stint = 1;
    (1..=n)
        .map(|l| {
            let mut r = lap(race, driver, l);
            age += 1.0;
            r.tyre_age = Some(age);
            r.stint = stint;
            if let Some(p) = pit_lap {
                r.pit_within_horizon = l + 2 >= p && l <= p;
                if l == p {
                    r.pitted_this_lap = true;
                    stint += 1;
                    age = 0.0;
                }
                if l > p {
                    r.compound = "HARD".to_string();
                }
            }
            r
        })
        .collect()
}
