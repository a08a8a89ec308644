//! Bookkeeping for pre-emptive swaps.
//!
//! A swap sheds one or more less important devices (victims) so that a more
//! important device (the beneficiary, or swap target) can be restored. The
//! entry lives until new telemetry reports the beneficiary on, or until it
//! goes stale.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Pending swaps and per-candidate swap attempt history.
///
/// A device is never both a victim and a pending target; every mutating
/// method preserves that.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapState {
    pending_swap_targets: BTreeSet<String>,
    swapped_out_for: BTreeMap<String, String>,
    pending_swap_timestamps: BTreeMap<String, i64>,
    last_swap_plan_measurement_ts: BTreeMap<String, i64>,
}

impl SwapState {
    /// Registers an approved swap of `victims` in favor of `beneficiary`.
    pub fn approve_swap(&mut self, beneficiary: &str, victims: &[String], now_ms: i64) {
        self.swapped_out_for.remove(beneficiary);
        for victim in victims {
            if victim == beneficiary {
                continue;
            }
            if self.pending_swap_targets.contains(victim) {
                self.drop_target(victim);
            }
            self.swapped_out_for
                .insert(victim.clone(), beneficiary.to_string());
        }
        self.pending_swap_targets.insert(beneficiary.to_string());
        self.pending_swap_timestamps
            .insert(beneficiary.to_string(), now_ms);
        debug_assert!(self.invariant_holds());
    }

    /// Closes the swap for a beneficiary that telemetry now reports on.
    ///
    /// Returns the released victims, which become ordinary restore
    /// candidates again.
    pub fn confirm_complete(&mut self, beneficiary: &str) -> Vec<String> {
        if !self.pending_swap_targets.contains(beneficiary) {
            return Vec::new();
        }
        self.drop_target(beneficiary)
    }

    /// Drops pending targets older than `timeout_ms`.
    ///
    /// Returns the expired targets.
    pub fn expire_stale(&mut self, now_ms: i64, timeout_ms: i64) -> Vec<String> {
        let stale: Vec<String> = self
            .pending_swap_targets
            .iter()
            .filter(|id| {
                self.pending_swap_timestamps
                    .get(*id)
                    .is_none_or(|ts| now_ms - ts > timeout_ms)
            })
            .cloned()
            .collect();
        for id in &stale {
            self.drop_target(id);
        }
        stale
    }

    /// Repairs state loaded from storage: victims that are also pending
    /// targets lose their victim entry.
    pub fn repair(&mut self) {
        let targets = &self.pending_swap_targets;
        self.swapped_out_for.retain(|victim, _| !targets.contains(victim));
        debug_assert!(self.invariant_holds());
    }

    pub fn is_pending_target(&self, id: &str) -> bool {
        self.pending_swap_targets.contains(id)
    }

    pub fn pending_targets(&self) -> impl Iterator<Item = &str> {
        self.pending_swap_targets.iter().map(String::as_str)
    }

    /// The beneficiary a victim was shed for, if any.
    pub fn beneficiary_of(&self, victim: &str) -> Option<&str> {
        self.swapped_out_for.get(victim).map(String::as_str)
    }

    pub fn victims(&self) -> impl Iterator<Item = (&str, &str)> {
        self.swapped_out_for
            .iter()
            .map(|(v, b)| (v.as_str(), b.as_str()))
    }

    /// `true` if `candidate` already had a swap attempt for this measurement.
    pub fn swap_attempted(&self, candidate: &str, measurement_ts: i64) -> bool {
        self.last_swap_plan_measurement_ts.get(candidate) == Some(&measurement_ts)
    }

    pub fn record_swap_attempt(&mut self, candidate: &str, measurement_ts: i64) {
        self.last_swap_plan_measurement_ts
            .insert(candidate.to_string(), measurement_ts);
    }

    fn drop_target(&mut self, target: &str) -> Vec<String> {
        self.pending_swap_targets.remove(target);
        self.pending_swap_timestamps.remove(target);
        let released: Vec<String> = self
            .swapped_out_for
            .iter()
            .filter(|(_, b)| b.as_str() == target)
            .map(|(v, _)| v.clone())
            .collect();
        for victim in &released {
            self.swapped_out_for.remove(victim);
        }
        released
    }

    fn invariant_holds(&self) -> bool {
        self.swapped_out_for
            .keys()
            .all(|victim| !self.pending_swap_targets.contains(victim))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn approve_then_confirm_releases_victims() {
        let mut swap = SwapState::default();
        swap.approve_swap("x", &ids(&["y", "z"]), 1_000);
        assert!(swap.is_pending_target("x"));
        assert_eq!(swap.beneficiary_of("y"), Some("x"));
        assert_eq!(swap.beneficiary_of("z"), Some("x"));

        let mut released = swap.confirm_complete("x");
        released.sort();
        assert_eq!(released, ids(&["y", "z"]));
        assert!(!swap.is_pending_target("x"));
        assert_eq!(swap.beneficiary_of("y"), None);
    }

    #[test]
    fn confirm_of_unknown_target_is_noop() {
        let mut swap = SwapState::default();
        swap.approve_swap("x", &ids(&["y"]), 0);
        assert!(swap.confirm_complete("y").is_empty());
        assert_eq!(swap.beneficiary_of("y"), Some("x"));
    }

    #[test]
    fn stale_targets_expire() {
        let mut swap = SwapState::default();
        swap.approve_swap("x", &ids(&["y"]), 0);
        swap.approve_swap("a", &ids(&["b"]), 50_000);

        assert!(swap.expire_stale(60_000, 60_000).is_empty());
        assert_eq!(swap.expire_stale(60_001, 60_000), ids(&["x"]));
        assert_eq!(swap.beneficiary_of("y"), None);
        assert!(swap.is_pending_target("a"));
    }

    #[test]
    fn no_device_is_both_victim_and_target() {
        let mut swap = SwapState::default();
        swap.approve_swap("x", &ids(&["y"]), 0);
        // y now pre-empts someone else: it stops being a victim
        swap.approve_swap("y", &ids(&["z"]), 1);
        assert!(swap.is_pending_target("y"));
        assert_eq!(swap.beneficiary_of("y"), None);

        // a pending target picked as a victim loses its pending swap
        swap.approve_swap("w", &ids(&["y"]), 2);
        assert!(!swap.is_pending_target("y"));
        assert_eq!(swap.beneficiary_of("z"), None);
        assert!(swap.invariant_holds());
    }

    #[test]
    fn swap_attempts_are_tracked_per_measurement() {
        let mut swap = SwapState::default();
        assert!(!swap.swap_attempted("x", 10));
        swap.record_swap_attempt("x", 10);
        assert!(swap.swap_attempted("x", 10));
        assert!(!swap.swap_attempted("x", 11));
    }

    #[test]
    fn repair_removes_dual_membership() {
        let json = r#"{
            "pending_swap_targets": ["x"],
            "swapped_out_for": {"x": "a", "y": "x"},
            "pending_swap_timestamps": {"x": 5}
        }"#;
        let mut swap: SwapState = serde_json::from_str(json).unwrap();
        swap.repair();
        assert_eq!(swap.beneficiary_of("x"), None);
        assert_eq!(swap.beneficiary_of("y"), Some("x"));
    }
}
