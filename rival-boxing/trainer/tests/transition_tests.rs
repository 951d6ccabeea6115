/// Transition builder, grouped split and oversampling tests
///
/// Run with: cargo test --test transition_tests -- --nocapture

mod common;

use common::{lap, stint_race};
use pit_hazard::config::{FeatureConfig, RewardShaping};
use pit_hazard::features::{FeatureBuilder, FeatureLayout};
use pit_hazard::priors::StintPriors;
use pit_hazard::transitions::{
    build_transitions, oversample_positive, split_by_group, BOX, NO_BOX,
};
use pit_hazard::{Error, LapRecord, Transition};
use proptest::prelude::*;

fn transitions_for(laps: &[LapRecord], shaping: &RewardShaping) -> Vec<Transition> {
    let b = FeatureBuilder::new(
        FeatureLayout::canonical(),
        StintPriors::from_laps(laps),
        FeatureConfig::default(),
    );
    let m = b.build(laps).unwrap();
    build_transitions(laps, &m, shaping).unwrap()
}

#[test]
fn test_five_lap_scenario() {
    println!("\n=== Test: Five Lap Scenario ===");
    let label = [false, false, true, true, false];
    let pit = [false, false, false, true, false];
    let laps: Vec<LapRecord> = (0..5)
        .map(|i| {
            let mut r = lap("r1", "VER", i as u32 + 1);
            r.pit_within_horizon = label[i];
            r.pitted_this_lap = pit[i];
            r
        })
        .collect();
    let shaping = RewardShaping {
        pos_reward: 2.0,
        neg_reward: -0.05,
        cheap_boost: 1.0,
    };
    let ts = transitions_for(&laps, &shaping);

    let rewards: Vec<f32> = ts.iter().map(|t| t.reward).collect();
    let terminals: Vec<bool> = ts.iter().map(|t| t.terminal).collect();
    let actions: Vec<i64> = ts.iter().map(|t| t.action).collect();
    println!("  rewards={:?} terminals={:?}", rewards, terminals);
    assert_eq!(rewards, vec![0.0, 0.0, 0.0, 2.0, 0.0]);
    assert_eq!(terminals, vec![false, false, false, true, true]);
    assert_eq!(actions, vec![NO_BOX, NO_BOX, NO_BOX, BOX, NO_BOX]);

    // 2-step lookahead, zero vector when terminal
    assert_eq!(ts[0].next_state, ts[2].state);
    assert_eq!(ts[2].next_state, ts[4].state);
    assert!(ts[3].next_state.iter().all(|x| *x == 0.0));
    assert_eq!(ts[3].next_state.len(), 26);
    assert!(ts[3].proxy_label());
    println!("✓ rewards and terminal flags match");
}

#[test]
fn test_non_green_boost_and_false_stop() {
    println!("\n=== Test: Reward Shaping ===");
    let mut laps = stint_race("r1", "A", 4, None);
    laps[1].pitted_this_lap = true;
    laps[1].pit_within_horizon = true;
    laps[1].track_status_code = Some(4);
    laps[3].pitted_this_lap = true;
    let ts = transitions_for(&laps, &RewardShaping::default());
    assert!((ts[1].reward - 2.0 * 1.3).abs() < 1e-6);
    assert!((ts[3].reward + 0.05).abs() < 1e-6);
    assert!(!ts[3].proxy_label());
    println!("✓ cheap stop boosted, unlabeled stop penalised");
}

#[test]
fn test_transitions_follow_lap_order() {
    println!("\n=== Test: Sorted By Lap ===");
    let mut laps = stint_race("r1", "A", 6, Some(3));
    laps.reverse();
    let ts = transitions_for(&laps, &RewardShaping::default());
    // laps[3] is lap 3 after the reverse; its transition is third in lap order
    assert_eq!(ts[2].action, BOX);
    assert_eq!(ts.iter().filter(|t| t.terminal).count(), 2);
    assert!(ts[4].terminal && ts[5].terminal);
    println!("✓ reversed input handled");
}

#[test]
fn test_split_holds_out_last_race() {
    println!("\n=== Test: Split By Race ===");
    let mut laps = stint_race("2023_monza", "A", 5, None);
    laps.extend(stint_race("2023_monza", "B", 5, None));
    laps.extend(stint_race("2024_monza", "A", 5, None));
    let ts = transitions_for(&laps, &RewardShaping::default());
    let split = split_by_group(ts, 42).unwrap();
    assert_eq!(split.train.len(), 10);
    assert_eq!(split.val.len(), 5);
    assert!(split.val.iter().all(|t| t.group.race_id == "2024_monza"));
    assert_eq!(split.held_out, vec!["2024_monza/A".to_string()]);
    println!("✓ held out {:?}", split.held_out);
}

#[test]
fn test_split_single_race_by_driver() {
    println!("\n=== Test: Split By Driver ===");
    let mut laps = Vec::new();
    for d in ["A", "B", "C", "D", "E"] {
        laps.extend(stint_race("r1", d, 4, None));
    }
    let ts = transitions_for(&laps, &RewardShaping::default());
    let split = split_by_group(ts.clone(), 7).unwrap();
    assert_eq!(split.held_out.len(), 1);
    assert_eq!(split.val.len(), 4);
    assert_eq!(split.train.len(), 16);
    // no group on both sides
    for t in &split.val {
        assert!(split.train.iter().all(|u| u.group != t.group));
    }
    // seeded
    let again = split_by_group(ts, 7).unwrap();
    assert_eq!(again.held_out, split.held_out);

    let single = transitions_for(&stint_race("r1", "A", 4, None), &RewardShaping::default());
    assert!(matches!(split_by_group(single, 7), Err(Error::EmptyDataset(_))));
    println!("✓ held out {:?}", split.held_out);
}

#[test]
fn test_oversample_positive() {
    println!("\n=== Test: Oversampling ===");
    let mut laps = stint_race("r1", "A", 5, None);
    laps[1].pitted_this_lap = true;
    laps[1].pit_within_horizon = true;
    laps[3].pitted_this_lap = true;
    laps[3].pit_within_horizon = true;
    let ts = transitions_for(&laps, &RewardShaping::default());
    let idx = oversample_positive(&ts, 4);
    assert_eq!(idx.len(), 3 + 2 * 4);
    assert_eq!(idx.iter().filter(|&&i| i == 1).count(), 4);
    assert_eq!(idx.iter().filter(|&&i| i == 0).count(), 1);
    println!("✓ {} indices", idx.len());
}

proptest! {
    #[test]
    fn prop_group_size_and_terminals(sizes in prop::collection::vec(1u32..12, 1..5)) {
        let mut laps = Vec::new();
        for (d, &n) in sizes.iter().enumerate() {
            laps.extend(stint_race("r1", &format!("D{d}"), n, None));
        }
        let ts = transitions_for(&laps, &RewardShaping::default());
        prop_assert_eq!(ts.len(), laps.len());
        for (d, &n) in sizes.iter().enumerate() {
            let driver = format!("D{d}");
            let group: Vec<&Transition> = ts.iter().filter(|t| t.group.driver == driver).collect();
            prop_assert_eq!(group.len(), n as usize);
            for (k, t) in group.iter().enumerate() {
                prop_assert_eq!(t.terminal, k + 2 >= n as usize);
            }
            prop_assert_eq!(group.iter().filter(|t| t.terminal).count(), n.min(2) as usize);
        }
    }

    #[test]
    fn prop_reward_law(
        flags in prop::collection::vec((any::<bool>(), any::<bool>(), any::<bool>()), 1..20),
        pos in 0.5f32..5.0,
        neg in -1.0f32..0.0,
        boost in 1.0f32..2.0,
    ) {
        let laps: Vec<LapRecord> = flags
            .iter()
            .enumerate()
            .map(|(i, &(pit, label, ng))| {
                let mut r = lap("r1", "A", i as u32 + 1);
                r.pitted_this_lap = pit;
                r.pit_within_horizon = label;
                r.non_green = ng;
                r
            })
            .collect();
        let shaping = RewardShaping { pos_reward: pos, neg_reward: neg, cheap_boost: boost };
        let ts = transitions_for(&laps, &shaping);
        for (t, &(pit, label, ng)) in ts.iter().zip(&flags) {
            let expected = match (pit, label) {
                (false, _) => 0.0,
                (true, true) => pos * if ng { boost } else { 1.0 },
                (true, false) => neg,
            };
            prop_assert_eq!(t.action, if pit { BOX } else { NO_BOX });
            prop_assert_eq!(t.reward, expected);
        }
    }
}
