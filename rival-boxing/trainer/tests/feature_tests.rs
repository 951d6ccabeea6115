/// Feature builder and rolling state tests
///
/// Run with: cargo test --test feature_tests -- --nocapture

mod common;

use common::{lap, stint_race};
use pit_hazard::features::{FeatureBuilder, FeatureLayout};
use pit_hazard::priors::StintPriors;
use pit_hazard::{config::FeatureConfig, Compound, Error, LapRecord, LiveFeatureState};

fn builder(priors: StintPriors) -> FeatureBuilder {
    FeatureBuilder::new(FeatureLayout::canonical(), priors, FeatureConfig::default())
}

fn column(layout: &FeatureLayout, name: &str) -> usize {
    layout.names().iter().position(|n| n == name).unwrap()
}

#[test]
fn test_canonical_layout_keeps_duplicates() {
    println!("\n=== Test: Canonical Layout ===");
    let layout = FeatureLayout::canonical();
    assert_eq!(layout.dim(), 26);
    assert_eq!(layout.names()[0], "tire_age_laps");
    assert_eq!(layout.names()[20], "tire_age_laps");
    assert_eq!(layout.names()[2], "compound_SOFT");
    assert_eq!(layout.names()[21], "compound_SOFT");

    let again = FeatureLayout::from_names(layout.names()).unwrap();
    assert_eq!(again, layout);
    println!("✓ 26 positions, duplicates preserved");

    let laps = stint_race("r1", "HAM", 6, None);
    let m = builder(StintPriors::default()).build(&laps).unwrap();
    for i in 0..m.rows() {
        let row = m.row(i);
        assert_eq!(row[0], row[20]);
        assert_eq!(&row[2..7], &row[21..26]);
    }
    println!("✓ Repeated names carry identical values");
}

#[test]
fn test_unknown_feature_name_is_fatal() {
    println!("\n=== Test: Unknown Feature Name ===");
    let err = FeatureLayout::from_names(&["tire_age_laps", "gap_front"]).unwrap_err();
    assert!(matches!(err, Error::UnknownFeature(ref n) if n == "gap_front"));
    println!("✓ Rejected: {}", err);
}

#[test]
fn test_builder_is_deterministic() {
    println!("\n=== Test: Determinism ===");
    let mut laps = stint_race("r1", "VER", 12, Some(7));
    laps.extend(stint_race("r1", "LEC", 12, Some(5)));
    let priors = StintPriors::from_laps(&laps);

    let a = builder(priors.clone()).build(&laps).unwrap();
    let b = builder(priors).build(&laps).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.rows(), laps.len());
    println!("✓ {} rows identical across runs", a.rows());
}

#[test]
fn test_non_green_run_length() {
    println!("\n=== Test: Non-green Run Length ===");
    let flags = [false, true, true, false, true];
    let laps: Vec<LapRecord> = flags
        .iter()
        .enumerate()
        .map(|(i, &ng)| {
            let mut r = lap("r1", "NOR", i as u32 + 1);
            r.non_green = ng;
            r
        })
        .collect();

    let b = builder(StintPriors::default());
    let m = b.build(&laps).unwrap();
    let run = column(b.layout(), "non_green_runlen");
    let prev1 = column(b.layout(), "cheap_prev1");
    let prev2 = column(b.layout(), "cheap_prev2");

    let runs: Vec<f32> = (0..5).map(|i| m.row(i)[run]).collect();
    assert_eq!(runs, vec![0.0, 1.0, 2.0, 0.0, 1.0]);
    let lag1: Vec<f32> = (0..5).map(|i| m.row(i)[prev1]).collect();
    assert_eq!(lag1, vec![0.0, 0.0, 1.0, 1.0, 0.0]);
    let lag2: Vec<f32> = (0..5).map(|i| m.row(i)[prev2]).collect();
    assert_eq!(lag2, vec![0.0, 0.0, 0.0, 1.0, 1.0]);
    println!("✓ run lengths {:?}", runs);
}

#[test]
fn test_rolling_lap_time_stats() {
    println!("\n=== Test: Rolling Lap Time Stats ===");
    let times = [90.0, 91.0, 92.0, 93.0, f64::NAN, 94.0];
    let laps: Vec<LapRecord> = times
        .iter()
        .enumerate()
        .map(|(i, &t)| {
            let mut r = lap("r1", "SAI", i as u32 + 1);
            r.lap_time = Some(t);
            r
        })
        .collect();
    let b = builder(StintPriors::default());
    let m = b.build(&laps).unwrap();
    let avg = column(b.layout(), "last3_avg");
    let var = column(b.layout(), "last3_var");
    let slope = column(b.layout(), "last5_slope");

    // first lap has no history
    assert_eq!(m.row(0)[avg], 0.0);
    assert_eq!(m.row(0)[slope], 0.0);
    // two laps of history: slope defined, variance not yet
    assert!((m.row(2)[slope] - 1.0).abs() < 1e-5);
    assert_eq!(m.row(2)[var], 0.0);
    // lap 4 sees 90, 91, 92
    assert!((m.row(3)[avg] - 91.0).abs() < 1e-4);
    assert!((m.row(3)[var] - 2.0 / 3.0).abs() < 1e-4);
    // NaN lap time is left out of the history
    assert_eq!(m.row(4)[avg], m.row(5)[avg]);
    assert!(m.as_slice().iter().all(|x| x.is_finite()));
    println!("✓ avg/var/slope computed from completed laps only");
}

#[test]
fn test_zero_prior_keeps_percentile_finite() {
    println!("\n=== Test: Zero Prior ===");
    let mut priors = StintPriors::default();
    priors.insert("monza", Compound::Medium, 0.0);
    let b = builder(priors);
    let m = b.build(&[lap("r1", "PIA", 10)]).unwrap();
    let pct = m.row(0)[column(b.layout(), "age_percentile")];
    assert!(pct.is_finite());
    assert!((pct - 1.4).abs() < 1e-6);
    let over = m.row(0)[column(b.layout(), "overshoot")];
    assert!((over - 10.0).abs() < 1e-6);
    println!("✓ age_percentile clipped to {}", pct);
}

#[test]
fn test_missing_inputs_default_to_zero() {
    println!("\n=== Test: Missing Inputs ===");
    let mut r = lap("r1", "ALO", 1);
    r.tyre_age = Some(f64::INFINITY);
    r.lap_time = None;
    r.compound = "C9".to_string();
    let b = builder(StintPriors::default());
    let m = b.build(&[r]).unwrap();
    let row = m.row(0);
    assert_eq!(row[column(b.layout(), "tire_age_laps")], 0.0);
    assert_eq!(&row[2..7], &[0.0; 5]);
    // unknown compound falls back to the compound-agnostic prior
    assert_eq!(row[column(b.layout(), "typical_stint_len")], 20.0);
    println!("✓ non-finite and unknown inputs recovered");
}

#[test]
fn test_all_zero_rows_are_counted() {
    println!("\n=== Test: All-zero Feature Rows ===");
    let layout = FeatureLayout::from_names(&[
        "tire_age_laps",
        "stint_no",
        "typical_stint_len",
        "age_vs_typical",
        "overshoot",
        "cheap_stop_flag",
        "pits_prev1",
    ])
    .unwrap();
    let mut priors = StintPriors::default();
    priors.insert("monza", Compound::Medium, 0.0);
    let b = FeatureBuilder::new(layout, priors, FeatureConfig::default());

    let mut blank = lap("r1", "SAR", 1);
    blank.stint = 0;
    blank.tyre_age = Some(0.0);
    let m = b.build(&[blank, lap("r1", "SAR", 2)]).unwrap();
    assert!(m.row(0).iter().all(|x| *x == 0.0), "row 0 = {:?}", m.row(0));
    assert!(m.row(1).iter().any(|x| *x != 0.0));
    assert_eq!(m.zero_rows(), 1);

    let full = builder(StintPriors::default()).build(&stint_race("r1", "SAR", 4, Some(2))).unwrap();
    assert_eq!(full.zero_rows(), 0);
    println!("✓ {} of {} rows all-zero", m.zero_rows(), m.rows());
}

#[test]
fn test_priors_from_stint_ends() {
    println!("\n=== Test: Stint Priors ===");
    let mut laps = stint_race("r1", "A", 30, Some(18));
    laps.extend(stint_race("r1", "B", 30, Some(20)));
    laps.extend(stint_race("r1", "C", 30, Some(25)));
    let priors = StintPriors::from_laps(&laps);
    // first stints end at 18, 20, 25 laps on MEDIUM
    assert_eq!(priors.observed("Monza", Compound::Medium), Some(20.0));
    assert_eq!(priors.typical_len("monza", Some(Compound::Soft)), 15.0);
    println!("✓ median stint length {:?}", priors.observed("monza", Compound::Medium));
}

#[test]
fn test_pit_counts_cross_drivers() {
    println!("\n=== Test: Pit Count Lags ===");
    let mut laps = stint_race("r1", "A", 6, Some(3));
    laps.extend(stint_race("r1", "B", 6, None));
    laps.extend(stint_race("r1", "C", 6, Some(3)));
    let b = builder(StintPriors::default());
    let m = b.build(&laps).unwrap();
    let p1 = column(b.layout(), "pits_prev1");
    let p2 = column(b.layout(), "pits_prev2");
    // B is laps[6..12]; lap 4 is index 9
    assert_eq!(m.row(9)[p1], 2.0);
    assert_eq!(m.row(9)[p2], 0.0);
    assert_eq!(m.row(10)[p1], 0.0);
    assert_eq!(m.row(10)[p2], 2.0);
    assert_eq!(m.row(6)[p1], 0.0);
    println!("✓ two cars pitted on lap 3, seen by B on laps 4 and 5");
}

#[test]
fn test_live_state_matches_offline() {
    println!("\n=== Test: Live State Matches Offline Build ===");
    let mut laps = stint_race("r1", "A", 8, Some(4));
    laps.extend(stint_race("r1", "B", 8, Some(5)));
    let b = builder(StintPriors::from_laps(&laps));
    let offline = b.build(&laps).unwrap();

    // feed in race order: all drivers of lap 1, then lap 2, ...
    let mut order: Vec<usize> = (0..laps.len()).collect();
    order.sort_by_key(|&i| (laps[i].lap, laps[i].driver.clone()));
    let live = LiveFeatureState::new(b.config().lap_history);
    for i in order {
        let feats = live.observe(&b, &laps[i]).unwrap();
        assert_eq!(b.encode(&feats).as_slice(), offline.row(i), "row {}", i);
    }
    assert_eq!(live.drivers(), 2);
    println!("✓ live vectors equal offline rows");
}

#[test]
fn test_live_state_rejects_out_of_order() {
    println!("\n=== Test: Out-of-order Laps ===");
    let b = builder(StintPriors::default());
    let live = LiveFeatureState::new(10);
    live.observe(&b, &lap("r1", "A", 3)).unwrap();
    let err = live.observe(&b, &lap("r1", "A", 2)).unwrap_err();
    assert!(matches!(err, Error::OutOfOrderLap { lap: 2, last: 3, .. }));
    assert!(live.observe(&b, &lap("r1", "A", 3)).is_err());
    // other drivers are unaffected
    live.observe(&b, &lap("r1", "B", 1)).unwrap();

    live.reset_race("r1");
    assert_eq!(live.drivers(), 0);
    live.observe(&b, &lap("r1", "A", 2)).unwrap();
    println!("✓ out-of-order rejected, reset starts fresh");
}

#[test]
fn test_live_state_concurrent_drivers() {
    println!("\n=== Test: Concurrent Drivers ===");
    let b = builder(StintPriors::default());
    let live = LiveFeatureState::new(10);
    let drivers = ["A", "B", "C", "D"];
    std::thread::scope(|s| {
        for d in drivers {
            let (b, live) = (&b, &live);
            s.spawn(move || {
                for l in 1..=20 {
                    live.observe(b, &lap("r1", d, l)).unwrap();
                }
            });
        }
    });
    assert_eq!(live.drivers(), 4);
    println!("✓ {} drivers updated in parallel", live.drivers());
}
