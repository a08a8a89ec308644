//! End-to-end guard and planner scenarios without the async loop.

mod common;

use rand::{Rng, SeedableRng, rngs::StdRng};

use capacity_planner::guard::{CapacityGuard, Desired, GuardEvent, GuardSettings};
use capacity_planner::order::Priority;
use capacity_planner::plan::{PlanInput, PlannedState, PlannerSettings, RestorePlanner};

use common::{T0, snapshot};

fn five_kw_guard() -> CapacityGuard {
    CapacityGuard::new(GuardSettings {
        limit_kw: 5.0,
        soft_margin_kw: 0.2,
        ..GuardSettings::default()
    })
}

#[test]
fn overload_sheds_only_the_least_important_load() {
    let mut guard = five_kw_guard();
    assert!((guard.soft_limit() - 4.8).abs() < 1e-9);

    guard.sync_loads(&[snapshot("a", true, 10, 3.0), snapshot("b", true, 1, 2.0)]);
    guard.report_total_power(7.0);
    let events = guard.tick(T0);

    let shed: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            GuardEvent::DeviceShed { id, .. } => Some(id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(shed, vec!["a"]);
    let b = guard.loads().iter().find(|l| l.id == "b").unwrap();
    assert_eq!(b.desired, Desired::On);
    assert!((guard.headroom().unwrap() - 0.8).abs() < 1e-9);
}

#[test]
fn second_request_over_plan_max_is_denied() {
    let mut guard = five_kw_guard();
    assert!(guard.request_on("a", "A", 3.0, Priority::new(10)));
    assert!(!guard.request_on("b", "B", 2.0, Priority::new(1)));
    assert!((guard.allocated_kw() - 3.0).abs() < 1e-9);
    assert!(guard.loads().iter().all(|l| l.id != "b"));
}

#[test]
fn allocation_never_exceeds_plan_max() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut guard = CapacityGuard::new(GuardSettings {
        limit_kw: 11.0,
        soft_margin_kw: 0.5,
        plan_reserve_kw: 0.5,
        ..GuardSettings::default()
    });

    for i in 0..500 {
        let id = format!("dev{}", rng.random_range(0..20));
        let kw = rng.random_range(0.0..4.0);
        if rng.random_bool(0.2) {
            guard.force_off(&id);
        } else {
            let priority = Priority::new(rng.random_range(1..50));
            guard.request_on(&id, &id, kw, priority);
        }
        assert!(
            guard.allocated_kw() <= guard.plan_max_kw() + 1e-9,
            "allocation {} over plan max at request {i}",
            guard.allocated_kw()
        );
    }
}

#[test]
fn shortfall_clears_after_sustained_recovery() {
    let mut guard = five_kw_guard();
    guard.sync_loads(&[snapshot("a", true, 3, 1.0)]);
    guard.report_total_power(9.0);
    let events = guard.tick(T0);
    assert!(events.iter().any(|e| matches!(e, GuardEvent::ShortfallDetected { .. })));
    assert!(guard.is_in_shortfall());

    guard.report_total_power(3.0);
    assert!(guard.tick(T0 + 1_000).is_empty());
    assert!(guard.tick(T0 + 30_000).is_empty());
    let events = guard.tick(T0 + 61_000);
    assert!(events.contains(&GuardEvent::ShortfallCleared));
    assert!(events.iter().any(|e| matches!(e, GuardEvent::SheddingEnded { .. })));
    assert!(!guard.is_in_shortfall());
    assert!(!guard.is_shedding());
}

fn input<'a>(
    devices: &'a [capacity_planner::devices::DeviceSnapshot],
    headroom: f64,
    guard_shed: &'a [String],
    now: i64,
    measurement_ts: i64,
) -> PlanInput<'a> {
    PlanInput {
        devices,
        headroom_kw: Some(headroom),
        restore_margin_kw: 0.1,
        shedding_active: false,
        in_shortfall: false,
        guard_shed,
        measurement_ts: Some(measurement_ts),
        now_ms: now,
    }
}

#[test]
fn recently_shed_device_needs_extra_headroom() {
    let mut planner = RestorePlanner::new(PlannerSettings::default());
    let shed = vec!["heater".to_string()];

    let running = vec![snapshot("heater", true, 4, 1.8)];
    let plan = planner.plan_cycle(&input(&running, 0.5, &shed, T0, T0));
    assert!(plan.entry("heater").unwrap().needs_shed());

    let stopped = vec![snapshot("heater", false, 4, 1.8)];
    // need 2.0 kW, raised to 2.14 kW within the backoff window
    let plan = planner.plan_cycle(&input(&stopped, 2.05, &[], T0 + 90_000, T0 + 90_000));
    let entry = plan.entry("heater").unwrap();
    assert_eq!(entry.planned_state, PlannedState::Shed);
    assert_eq!(
        entry.reason.as_deref(),
        Some("insufficient headroom (need 2.14 kW, available 2.05 kW)")
    );

    let plan = planner.plan_cycle(&input(&stopped, 2.05, &[], T0 + 181_000, T0 + 181_000));
    assert_eq!(plan.planned_state("heater"), Some(PlannedState::Keep));
    assert!(plan.meta.restored_this_cycle);
}

#[test]
fn swap_pre_empts_less_important_device_once() {
    let mut planner = RestorePlanner::new(PlannerSettings::default());
    let devices = vec![snapshot("x", false, 5, 2.8), snapshot("y", true, 20, 2.5)];

    let first = planner.plan_cycle(&input(&devices, 1.0, &[], T0, T0));
    assert_eq!(first.planned_state("x"), Some(PlannedState::Keep));
    assert_eq!(first.planned_state("y"), Some(PlannedState::Shed));
    assert_eq!(
        first.entry("y").and_then(|e| e.reason.as_deref()),
        Some("swapped out for x")
    );
    assert_eq!(first.meta.swapped_out, vec!["y"]);
    assert!(planner.state().swap.is_pending_target("x"));

    // same inputs at the same instant: the swap is reported, not repeated
    let second = planner.plan_cycle(&input(&devices, 1.0, &[], T0, T0));
    assert_eq!(second, first);
    assert_eq!(planner.state().swap.victims().count(), 1);

    // a moment later, same measurement: no new swap attempt
    let third = planner.plan_cycle(&input(&devices, 1.0, &[], T0 + 3_000, T0));
    assert_eq!(third.devices, first.devices);
    assert!(third.meta.swapped_out.is_empty());
    assert!(!third.meta.restored_this_cycle);
}

#[test]
fn repeated_cycles_are_idempotent() {
    let mut planner = RestorePlanner::new(PlannerSettings::default());
    let shed = vec!["c".to_string()];
    let devices = vec![
        snapshot("a", false, 2, 1.0),
        snapshot("b", false, 7, 0.5),
        snapshot("c", true, 9, 2.0),
    ];

    let first = planner.plan_cycle(&input(&devices, 3.0, &shed, T0, T0));
    let second = planner.plan_cycle(&input(&devices, 3.0, &shed, T0, T0));
    let third = planner.plan_cycle(&input(&devices, 3.0, &shed, T0, T0));
    assert_eq!(second, first);
    assert_eq!(third, first);
}
