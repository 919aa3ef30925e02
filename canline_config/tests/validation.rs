use canline_config::load_toml;

const FULL: &str = r#"
[line]
line_id = "line1"
fill_mode = "SIM"

[database]
path = ":memory:"

[control]
gain = 0.3
window = 10
min_history = 5
correction_weight = 0.9
min_valve_ms = 100.0
max_valve_ms = 5000.0

[spc]
k = 0.5
h_warn = 1.0
h_alarm = 2.0
window = 100

[logging]
level = "debug"

[simulator]
cans = 20
flow_ml_per_ms = 0.3
noise_sigma_ml = 1.5
bias_ml = 0.0
seed = 7
can_interval_ms = 10

[[recipe]]
sku = "CIDER_500"
name = "Dry Cider 500ml"
target_ml = 500.0
base_valve_ms = 1480.0

[[recipe]]
sku_id = "COKE_355"
target_amount = 355.0
base_valve_ms = 1200.0
fixed_dose = true
active = false
"#;

#[test]
fn accepts_a_full_config() {
    let cfg = load_toml(FULL).expect("parse TOML");
    cfg.validate().expect("valid config");

    assert_eq!(cfg.line.line_id, "line1");
    assert_eq!(cfg.recipes.len(), 2);
    // Wire aliases from the admin surface map onto the canonical fields.
    assert_eq!(cfg.recipes[1].sku, "COKE_355");
    assert_eq!(cfg.recipes[1].target_ml, 355.0);
    assert!(cfg.recipes[1].fixed_dose);
    assert!(!cfg.recipes[1].active);
    // `active` defaults to true when unspecified.
    assert!(cfg.recipes[0].active);
}

#[test]
fn empty_input_yields_all_defaults() {
    let cfg = load_toml("").expect("parse TOML");
    cfg.validate().expect("defaults are valid");

    assert_eq!(cfg.line.line_id, "line1");
    assert_eq!(cfg.database.path, "canline.db");
    assert_eq!(cfg.control.gain, 0.3);
    assert_eq!(cfg.control.window, 10);
    assert_eq!(cfg.control.min_history, 5);
    assert_eq!((cfg.control.min_valve_ms, cfg.control.max_valve_ms), (100.0, 5000.0));
    assert_eq!((cfg.spc.k, cfg.spc.h_warn, cfg.spc.h_alarm), (0.5, 1.0, 2.0));
    assert_eq!(cfg.spc.window, 100);
    assert!(cfg.recipes.is_empty());
}

fn rejects(toml: &str, needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    assert!(
        format!("{err}").contains(needle),
        "error {err} does not mention {needle}"
    );
}

#[test]
fn rejects_empty_line_id() {
    rejects("[line]\nline_id = \"  \"\n", "line.line_id");
}

#[test]
fn rejects_negative_gain() {
    rejects("[control]\ngain = -0.1\n", "control.gain");
}

#[test]
fn rejects_zero_windows() {
    rejects("[control]\nwindow = 0\n", "control.window");
    rejects("[control]\nmin_history = 0\n", "control.min_history");
    rejects("[spc]\nwindow = 0\n", "spc.window");
}

#[test]
fn rejects_inverted_safety_band() {
    rejects(
        "[control]\nmin_valve_ms = 2000.0\nmax_valve_ms = 1000.0\n",
        "control.max_valve_ms",
    );
    rejects("[control]\nmin_valve_ms = 0.0\n", "control.min_valve_ms");
}

#[test]
fn rejects_alarm_threshold_below_warn() {
    rejects("[spc]\nh_warn = 2.0\nh_alarm = 1.5\n", "spc.h_alarm");
}

#[test]
fn rejects_recipe_outside_safety_band() {
    rejects(
        "[[recipe]]\nsku = \"A_100\"\ntarget_ml = 100.0\nbase_valve_ms = 9000.0\n",
        "safety band",
    );
}

#[test]
fn rejects_recipe_without_target() {
    rejects(
        "[[recipe]]\nsku = \"A_100\"\ntarget_ml = 0.0\nbase_valve_ms = 1000.0\n",
        "target_ml",
    );
}

#[test]
fn rejects_duplicate_recipe_skus() {
    rejects(
        "[[recipe]]\nsku = \"A_100\"\ntarget_ml = 100.0\nbase_valve_ms = 1000.0\n\
         [[recipe]]\nsku = \"A_100\"\ntarget_ml = 100.0\nbase_valve_ms = 1000.0\n",
        "more than once",
    );
}

#[test]
fn rejects_nonpositive_simulator_flow() {
    rejects("[simulator]\nflow_ml_per_ms = 0.0\n", "flow_ml_per_ms");
}
