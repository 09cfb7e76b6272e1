use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::DetectorConfig;
use crate::stats::{Device, KeywordSummary};

/// Persisted per-device streak entry. Field names match the state file
/// layout: `{"streak": n, "last_avgRnk": r, "last_imp": i}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStreak {
    #[serde(default)]
    pub streak: u32,
    #[serde(rename = "last_avgRnk", default)]
    pub last_avg_rank: Option<f64>,
    #[serde(rename = "last_imp", default)]
    pub last_impressions: u64,
}

/// Streak entries for one keyword, keyed `"PC"`/`"MOBILE"` on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordStreaks {
    #[serde(rename = "PC", default)]
    pub pc: DeviceStreak,
    #[serde(rename = "MOBILE", default)]
    pub mobile: DeviceStreak,
}

impl KeywordStreaks {
    pub fn device_mut(&mut self, device: Device) -> &mut DeviceStreak {
        match device {
            Device::Pc => &mut self.pc,
            Device::Mobile => &mut self.mobile,
        }
    }
}

/// The whole state file: keyword text → streaks. Keyed by text, not platform
/// ID, so history survives a keyword being remapped to a different ID.
pub type StateFile = BTreeMap<String, KeywordStreaks>;

/// One streak alert, emitted when a (keyword, device) pair stays top-like for
/// the configured number of consecutive runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub keyword: String,
    pub device: Device,
    pub streak: u32,
    pub avg_rank: Option<f64>,
    pub impressions: u64,
}

/// Whether an observation qualifies as top-like: rank defined, impressions at
/// the configured minimum, rank at or below the threshold.
pub fn is_top_like(config: &DetectorConfig, impressions: u64, avg_rank: Option<f64>) -> bool {
    let Some(rank) = avg_rank else {
        return false;
    };
    if impressions < config.min_impressions {
        return false;
    }
    rank <= config.rank_threshold
}

/// Apply one run's aggregates to the persisted state, returning the alerts
/// to deliver.
///
/// Per (keyword, device): a qualifying observation increments the streak, a
/// non-qualifying one resets it to zero, and last-observed rank/impressions
/// update either way. Reaching the streak threshold emits an alert and resets
/// the counter to zero — one alert per sustained episode, not one per run
/// thereafter.
pub fn observe_run(
    state: &mut StateFile,
    summary: &BTreeMap<String, KeywordSummary>,
    config: &DetectorConfig,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    for (keyword, devices) in summary {
        let entry = state.entry(keyword.clone()).or_default();

        for device in Device::ALL {
            let agg = devices.device(device);
            let slot = entry.device_mut(device);

            if is_top_like(config, agg.impressions, agg.avg_rank) {
                slot.streak += 1;
            } else {
                slot.streak = 0;
            }
            slot.last_avg_rank = agg.avg_rank;
            slot.last_impressions = agg.impressions;

            if slot.streak >= config.streak_threshold {
                alerts.push(Alert {
                    keyword: keyword.clone(),
                    device,
                    streak: slot.streak,
                    avg_rank: agg.avg_rank,
                    impressions: agg.impressions,
                });
                slot.streak = 0;
            }
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::DeviceAggregate;

    fn config() -> DetectorConfig {
        DetectorConfig {
            rank_threshold: 1.5,
            min_impressions: 30,
            streak_threshold: 2,
        }
    }

    fn pc_summary(avg_rank: Option<f64>, impressions: u64) -> BTreeMap<String, KeywordSummary> {
        let mut summary = BTreeMap::new();
        summary.insert(
            "X".to_string(),
            KeywordSummary {
                pc: DeviceAggregate {
                    avg_rank,
                    impressions,
                    clicks: 0,
                },
                mobile: DeviceAggregate::default(),
            },
        );
        summary
    }

    // ── is_top_like ────────────────────────────────────────────────

    #[test]
    fn undefined_rank_is_never_top_like() {
        assert!(!is_top_like(&config(), 1000, None));
    }

    #[test]
    fn impressions_below_minimum_disqualify() {
        assert!(!is_top_like(&config(), 29, Some(1.0)));
        assert!(is_top_like(&config(), 30, Some(1.0)));
    }

    #[test]
    fn rank_boundary_is_inclusive() {
        assert!(is_top_like(&config(), 50, Some(1.5)));
        assert!(!is_top_like(&config(), 50, Some(1.500001)));
    }

    #[test]
    fn monotonic_in_impressions_and_rank() {
        // More impressions past the minimum never flips true -> false.
        for imp in [30, 100, 10_000] {
            assert!(is_top_like(&config(), imp, Some(1.2)));
        }
        // Raising rank past the threshold always flips true -> false.
        assert!(is_top_like(&config(), 100, Some(1.5)));
        assert!(!is_top_like(&config(), 100, Some(1.6)));
    }

    // ── transitions ────────────────────────────────────────────────

    #[test]
    fn reference_scenario_alert_then_reset() {
        let mut state = StateFile::new();
        let cfg = config();

        // rank 1.2 / imp 50 -> streak 1, no alert
        let alerts = observe_run(&mut state, &pc_summary(Some(1.2), 50), &cfg);
        assert!(alerts.is_empty());
        assert_eq!(state["X"].pc.streak, 1);

        // rank 1.1 / imp 40 -> streak 2, alert fires, streak resets
        let alerts = observe_run(&mut state, &pc_summary(Some(1.1), 40), &cfg);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].keyword, "X");
        assert_eq!(alerts[0].device, Device::Pc);
        assert_eq!(alerts[0].streak, 2);
        assert_eq!(alerts[0].impressions, 40);
        assert_eq!(state["X"].pc.streak, 0);

        // rank 5.0 / imp 40 -> stays 0
        let alerts = observe_run(&mut state, &pc_summary(Some(5.0), 40), &cfg);
        assert!(alerts.is_empty());
        assert_eq!(state["X"].pc.streak, 0);
    }

    #[test]
    fn repeated_non_qualifying_observations_stay_at_zero() {
        let mut state = StateFile::new();
        for _ in 0..5 {
            let alerts = observe_run(&mut state, &pc_summary(Some(9.0), 100), &config());
            assert!(alerts.is_empty());
            assert_eq!(state["X"].pc.streak, 0);
        }
    }

    #[test]
    fn counter_never_rests_at_or_above_threshold() {
        let mut state = StateFile::new();
        let cfg = config();
        for _ in 0..10 {
            observe_run(&mut state, &pc_summary(Some(1.0), 100), &cfg);
            assert!(state["X"].pc.streak < cfg.streak_threshold);
        }
    }

    #[test]
    fn sustained_episode_realerts_after_reaccumulating() {
        let mut state = StateFile::new();
        let cfg = config();
        let mut total_alerts = 0;
        // 6 consecutive qualifying runs with threshold 2: alerts on runs 2, 4, 6.
        for _ in 0..6 {
            total_alerts += observe_run(&mut state, &pc_summary(Some(1.0), 100), &cfg).len();
        }
        assert_eq!(total_alerts, 3);
    }

    #[test]
    fn last_observed_updates_regardless_of_outcome() {
        let mut state = StateFile::new();
        observe_run(&mut state, &pc_summary(Some(7.7), 12), &config());
        assert_eq!(state["X"].pc.last_avg_rank, Some(7.7));
        assert_eq!(state["X"].pc.last_impressions, 12);
        observe_run(&mut state, &pc_summary(None, 0), &config());
        assert_eq!(state["X"].pc.last_avg_rank, None);
        assert_eq!(state["X"].pc.last_impressions, 0);
    }

    #[test]
    fn devices_track_independently() {
        let mut state = StateFile::new();
        let cfg = config();
        let mut summary = BTreeMap::new();
        summary.insert(
            "X".to_string(),
            KeywordSummary {
                pc: DeviceAggregate {
                    avg_rank: Some(1.0),
                    impressions: 100,
                    clicks: 0,
                },
                mobile: DeviceAggregate {
                    avg_rank: Some(8.0),
                    impressions: 100,
                    clicks: 0,
                },
            },
        );
        observe_run(&mut state, &summary, &cfg);
        assert_eq!(state["X"].pc.streak, 1);
        assert_eq!(state["X"].mobile.streak, 0);
    }

    // ── state file format ──────────────────────────────────────────

    #[test]
    fn state_serializes_with_wire_field_names() {
        let mut state = StateFile::new();
        state.insert(
            "인터넷".to_string(),
            KeywordStreaks {
                pc: DeviceStreak {
                    streak: 1,
                    last_avg_rank: Some(1.2),
                    last_impressions: 50,
                },
                mobile: DeviceStreak::default(),
            },
        );
        let json = serde_json::to_value(&state).expect("serialize");
        assert_eq!(json["인터넷"]["PC"]["streak"], 1);
        assert_eq!(json["인터넷"]["PC"]["last_avgRnk"], 1.2);
        assert_eq!(json["인터넷"]["PC"]["last_imp"], 50);
        assert_eq!(json["인터넷"]["MOBILE"]["streak"], 0);

        let back: StateFile = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, state);
    }
}
