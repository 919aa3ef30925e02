use canline_core::model::{AlarmOutcome, DriftDirection, Recipe, SpcReport, SpcStateKind};
use canline_core::store::{CycleLedger, LineStateStore, QualityStore, RecipeSource};
use canline_store::SqliteStore;

fn store() -> SqliteStore {
    SqliteStore::open_in_memory().unwrap()
}

fn report(state: SpcStateKind, drift: Option<DriftDirection>) -> SpcReport {
    SpcReport {
        state,
        drift,
        mean: 1.5,
        stddev: 0.8,
        cusum_pos: 2.3,
        cusum_neg: -0.1,
        samples: 40,
    }
}

#[test]
fn arrival_then_result_builds_one_complete_row() {
    let mut s = store();
    let arrived = s.upsert_on_arrival("CIDER_500", 1, 500.0, 0.0).unwrap();
    s.set_valve_ms(arrived.id, 1480.0).unwrap();
    let done = s
        .upsert_on_result("CIDER_500", 1, 497.0, 1480.0, None)
        .unwrap();

    assert_eq!(done.id, arrived.id);
    assert_eq!(done.target_ml, 500.0);
    assert_eq!(done.actual_ml, Some(497.0));
    assert_eq!(done.error_ml, Some(-3.0));
    assert_eq!(s.recent_cycles("CIDER_500", 10).unwrap().len(), 1);
}

#[test]
fn replayed_messages_converge_to_the_same_row() {
    let mut s = store();
    for _ in 0..3 {
        s.upsert_on_arrival("CIDER_500", 7, 500.0, 0.0).unwrap();
    }
    for _ in 0..3 {
        s.upsert_on_result("CIDER_500", 7, 495.0, 1450.0, Some(500.0))
            .unwrap();
    }
    let rows = s.recent_cycles("CIDER_500", 100).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].error_ml, Some(-5.0));
}

#[test]
fn result_before_arrival_still_yields_one_row() {
    let mut s = store();
    let first = s
        .upsert_on_result("CIDER_500", 2, 498.0, 1450.0, None)
        .unwrap();
    // Without a target the measured value stands in for it.
    assert_eq!(first.target_ml, 498.0);

    let refined = s.upsert_on_arrival("CIDER_500", 2, 500.0, 0.0).unwrap();
    assert_eq!(refined.id, first.id);
    assert_eq!(refined.target_ml, 500.0);
    // The late target refresh recomputes the error against it.
    assert_eq!(refined.error_ml, Some(-2.0));
}

#[test]
fn zero_target_never_produces_an_error_value() {
    let mut s = store();
    let c = s
        .upsert_on_result("MYSTERY", 1, 330.0, 900.0, Some(0.0))
        .unwrap();
    assert_eq!(c.error_ml, None);
}

#[test]
fn recent_views_are_windowed_and_oldest_first() {
    let mut s = store();
    for seq in 1..=20 {
        s.upsert_on_result("CIDER_500", seq, 500.0 + seq as f64, 1480.0, Some(500.0))
            .unwrap();
    }
    let cycles = s.recent_cycles("CIDER_500", 5).unwrap();
    assert_eq!(cycles.len(), 5);
    assert_eq!(cycles.first().map(|c| c.seq), Some(16));
    assert_eq!(cycles.last().map(|c| c.seq), Some(20));

    let errors = s.recent_errors("CIDER_500", 3).unwrap();
    assert_eq!(errors, vec![18.0, 19.0, 20.0]);

    assert_eq!(s.last_seq("CIDER_500").unwrap(), 20);
    assert_eq!(s.last_seq("NOPE").unwrap(), 0);
}

#[test]
fn quality_state_is_written_back_to_the_cycle() {
    let mut s = store();
    let c = s.upsert_on_arrival("CIDER_500", 1, 500.0, 0.0).unwrap();
    s.set_quality_state(c.id, SpcStateKind::Warn).unwrap();
    let last = s.last_cycle("CIDER_500").unwrap().unwrap();
    assert_eq!(last.quality_state, Some(SpcStateKind::Warn));
}

#[test]
fn spc_state_updates_in_place_per_reference_cycle() {
    let mut s = store();
    let first = s
        .upsert_spc_state("CIDER_500", &report(SpcStateKind::Warn, None), 11)
        .unwrap();
    let second = s
        .upsert_spc_state(
            "CIDER_500",
            &report(SpcStateKind::Alarm, Some(DriftDirection::Positive)),
            11,
        )
        .unwrap();
    assert_eq!(first, second);

    let other = s
        .upsert_spc_state("CIDER_500", &report(SpcStateKind::Ok, None), 12)
        .unwrap();
    assert_ne!(first, other);
}

#[test]
fn alarm_dedup_keys_on_sku_level_drift_and_cycle() {
    let mut s = store();
    let first = s
        .upsert_alarm(
            "CIDER_500",
            SpcStateKind::Alarm,
            Some(DriftDirection::Positive),
            "overfill drift",
            5,
            1,
        )
        .unwrap();
    assert!(matches!(first, AlarmOutcome::Inserted(_)));

    // Same key, fresher SPC snapshot: updated, not duplicated.
    let again = s
        .upsert_alarm(
            "CIDER_500",
            SpcStateKind::Alarm,
            Some(DriftDirection::Positive),
            "overfill drift",
            5,
            2,
        )
        .unwrap();
    assert_eq!(again, AlarmOutcome::Updated(first.id()));

    // Missing drift dedups as its own key, repeatedly.
    let a = s
        .upsert_alarm("CIDER_500", SpcStateKind::Warn, None, "warn", 5, 2)
        .unwrap();
    let b = s
        .upsert_alarm("CIDER_500", SpcStateKind::Warn, None, "warn", 5, 3)
        .unwrap();
    assert!(matches!(a, AlarmOutcome::Inserted(_)));
    assert_eq!(b, AlarmOutcome::Updated(a.id()));

    // A different cycle re-arms the key.
    let fresh = s
        .upsert_alarm(
            "CIDER_500",
            SpcStateKind::Alarm,
            Some(DriftDirection::Positive),
            "overfill drift",
            6,
            3,
        )
        .unwrap();
    assert!(matches!(fresh, AlarmOutcome::Inserted(_)));
}

#[test]
fn line_state_is_last_write_wins() {
    let mut s = store();
    assert_eq!(s.current_sku("line1").unwrap(), None);
    s.set_current_sku("line1", "CIDER_500").unwrap();
    s.set_current_sku("line1", "COKE_355").unwrap();
    s.set_current_sku("line2", "CIDER_500").unwrap();
    assert_eq!(s.current_sku("line1").unwrap().as_deref(), Some("COKE_355"));
    assert_eq!(s.current_sku("line2").unwrap().as_deref(), Some("CIDER_500"));
}

#[test]
fn inactive_recipes_are_invisible() {
    let mut s = store();
    s.put_recipe(&Recipe {
        sku: "CIDER_500".into(),
        name: "Dry Cider".into(),
        target_ml: 500.0,
        base_valve_ms: 1500.0,
        fixed_dose: false,
        active: true,
    })
    .unwrap();
    s.put_recipe(&Recipe {
        sku: "RETIRED_330".into(),
        name: "".into(),
        target_ml: 330.0,
        base_valve_ms: 900.0,
        fixed_dose: true,
        active: false,
    })
    .unwrap();

    let r = s.recipe_for("CIDER_500").unwrap().unwrap();
    assert_eq!((r.target_ml, r.base_valve_ms, r.fixed_dose), (500.0, 1500.0, false));
    assert_eq!(s.recipe_for("RETIRED_330").unwrap(), None);
    assert_eq!(s.recipe_for("UNKNOWN").unwrap(), None);
}

#[test]
fn reseeding_a_recipe_overwrites_it() {
    let mut s = store();
    let mut recipe = Recipe {
        sku: "CIDER_500".into(),
        name: "Dry Cider".into(),
        target_ml: 500.0,
        base_valve_ms: 1500.0,
        fixed_dose: false,
        active: true,
    };
    s.put_recipe(&recipe).unwrap();
    recipe.base_valve_ms = 1550.0;
    s.put_recipe(&recipe).unwrap();
    let r = s.recipe_for("CIDER_500").unwrap().unwrap();
    assert_eq!(r.base_valve_ms, 1550.0);
}

#[test]
fn data_survives_reopening_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("line.db");
    {
        let mut s = SqliteStore::open(&path).unwrap();
        s.upsert_on_result("CIDER_500", 1, 497.0, 1480.0, Some(500.0))
            .unwrap();
    }
    let mut s = SqliteStore::open(&path).unwrap();
    let last = s.last_cycle("CIDER_500").unwrap().unwrap();
    assert_eq!(last.error_ml, Some(-3.0));
}
