#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas for the fill-line server.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Recipes are declared as a `[[recipe]]` array and seeded into the store
//!   at startup; runtime recipe management belongs to the admin surface.
use serde::Deserialize;

/// Line identity and outbound command defaults.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LineCfg {
    /// Logical line identifier used for the current-product pointer.
    pub line_id: String,
    /// Mode stamped onto outbound fill commands ("SIM" or "RUN").
    pub fill_mode: String,
}

impl Default for LineCfg {
    fn default() -> Self {
        Self {
            line_id: "line1".into(),
            fill_mode: "SIM".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseCfg {
    /// SQLite database path. ":memory:" keeps everything ephemeral.
    pub path: String,
}

impl Default for DatabaseCfg {
    fn default() -> Self {
        Self {
            path: "canline.db".into(),
        }
    }
}

/// Run-to-run controller tuning.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlCfg {
    /// Correction gain applied to the mean recent error.
    pub gain: f64,
    /// Number of recent cycles considered for the mean error.
    pub window: usize,
    /// Below this many prior cycles the controller returns the recipe base.
    pub min_history: usize,
    /// Weight of the last observed error when blending a predictor estimate.
    pub correction_weight: f64,
    /// Actuator safety band (ms). Hard limits, not tuning parameters.
    pub min_valve_ms: f64,
    pub max_valve_ms: f64,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            gain: 0.3,
            window: 10,
            min_history: 5,
            correction_weight: 0.9,
            min_valve_ms: 100.0,
            max_valve_ms: 5000.0,
        }
    }
}

/// SPC/CUSUM monitor tuning.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SpcCfg {
    /// CUSUM reference value (allowed standardized slack per sample).
    pub k: f64,
    /// WARN threshold on either CUSUM arm.
    pub h_warn: f64,
    /// ALARM threshold on either CUSUM arm.
    pub h_alarm: f64,
    /// Maximum number of recent errors fed into one evaluation.
    pub window: usize,
}

impl Default for SpcCfg {
    fn default() -> Self {
        Self {
            k: 0.5,
            h_warn: 1.0,
            h_alarm: 2.0,
            window: 100,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// Built-in line simulator used when no hardware bridge is attached.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatorCfg {
    /// Number of cans to run before exiting (0 = run until interrupted).
    pub cans: u64,
    /// Millilitres dispensed per valve-open millisecond.
    pub flow_ml_per_ms: f64,
    /// Gaussian noise sigma on the measured volume (ml).
    pub noise_sigma_ml: f64,
    /// Constant process bias added to every fill (ml), for drift scenarios.
    pub bias_ml: f64,
    /// PRNG seed for reproducible runs.
    pub seed: u32,
    /// Delay between cans (ms).
    pub can_interval_ms: u64,
}

impl Default for SimulatorCfg {
    fn default() -> Self {
        Self {
            cans: 50,
            flow_ml_per_ms: 0.3,
            noise_sigma_ml: 1.5,
            bias_ml: 0.0,
            seed: 7,
            can_interval_ms: 10,
        }
    }
}

/// One seeded recipe row. Accepts the wire aliases used by the admin surface.
#[derive(Debug, Deserialize, Clone)]
pub struct RecipeCfg {
    #[serde(alias = "sku_id")]
    pub sku: String,
    #[serde(default)]
    pub name: String,
    #[serde(alias = "target_amount")]
    pub target_ml: f64,
    pub base_valve_ms: f64,
    /// Fixed-dose products never receive adaptive correction.
    #[serde(default)]
    pub fixed_dose: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub line: LineCfg,
    #[serde(default)]
    pub database: DatabaseCfg,
    #[serde(default)]
    pub control: ControlCfg,
    #[serde(default)]
    pub spc: SpcCfg,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub simulator: SimulatorCfg,
    /// Seeded recipes; `[[recipe]]` tables in TOML.
    #[serde(default, rename = "recipe")]
    pub recipes: Vec<RecipeCfg>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Line
        if self.line.line_id.trim().is_empty() {
            eyre::bail!("line.line_id must not be empty");
        }

        // Control
        if !self.control.gain.is_finite() || self.control.gain < 0.0 {
            eyre::bail!("control.gain must be finite and >= 0");
        }
        if self.control.window == 0 {
            eyre::bail!("control.window must be >= 1");
        }
        if self.control.min_history == 0 {
            eyre::bail!("control.min_history must be >= 1");
        }
        if !self.control.correction_weight.is_finite() || self.control.correction_weight < 0.0 {
            eyre::bail!("control.correction_weight must be finite and >= 0");
        }
        if self.control.min_valve_ms <= 0.0 {
            eyre::bail!("control.min_valve_ms must be > 0");
        }
        if self.control.max_valve_ms <= self.control.min_valve_ms {
            eyre::bail!("control.max_valve_ms must be > control.min_valve_ms");
        }

        // SPC
        if !self.spc.k.is_finite() || self.spc.k < 0.0 {
            eyre::bail!("spc.k must be finite and >= 0");
        }
        if self.spc.h_warn <= 0.0 {
            eyre::bail!("spc.h_warn must be > 0");
        }
        if self.spc.h_alarm <= self.spc.h_warn {
            eyre::bail!("spc.h_alarm must be > spc.h_warn");
        }
        if self.spc.window == 0 {
            eyre::bail!("spc.window must be >= 1");
        }

        // Simulator
        if self.simulator.flow_ml_per_ms <= 0.0 {
            eyre::bail!("simulator.flow_ml_per_ms must be > 0");
        }
        if self.simulator.noise_sigma_ml < 0.0 {
            eyre::bail!("simulator.noise_sigma_ml must be >= 0");
        }

        // Recipes
        for r in &self.recipes {
            if r.sku.trim().is_empty() {
                eyre::bail!("recipe.sku must not be empty");
            }
            if r.target_ml <= 0.0 {
                eyre::bail!("recipe '{}': target_ml must be > 0", r.sku);
            }
            if r.base_valve_ms < self.control.min_valve_ms
                || r.base_valve_ms > self.control.max_valve_ms
            {
                eyre::bail!(
                    "recipe '{}': base_valve_ms must lie within the safety band [{}, {}]",
                    r.sku,
                    self.control.min_valve_ms,
                    self.control.max_valve_ms
                );
            }
        }
        let mut seen = std::collections::HashSet::new();
        for r in &self.recipes {
            if !seen.insert(r.sku.as_str()) {
                eyre::bail!("recipe '{}' declared more than once", r.sku);
            }
        }

        Ok(())
    }
}
