//! `From` implementations bridging `canline_config` types to `canline_core`
//! types, so the CLI never maps fields by hand.

use crate::control::ControlCfg;
use crate::model::Recipe;
use crate::spc::SpcCfg;

// ── ControlCfg ───────────────────────────────────────────────────────────────

impl From<&canline_config::ControlCfg> for ControlCfg {
    fn from(c: &canline_config::ControlCfg) -> Self {
        Self {
            gain: c.gain,
            window: c.window,
            min_history: c.min_history,
            correction_weight: c.correction_weight,
            min_valve_ms: c.min_valve_ms,
            max_valve_ms: c.max_valve_ms,
        }
    }
}

// ── SpcCfg ───────────────────────────────────────────────────────────────────

impl From<&canline_config::SpcCfg> for SpcCfg {
    fn from(c: &canline_config::SpcCfg) -> Self {
        Self {
            k: c.k,
            h_warn: c.h_warn,
            h_alarm: c.h_alarm,
            window: c.window,
        }
    }
}

// ── Recipe ───────────────────────────────────────────────────────────────────

impl From<&canline_config::RecipeCfg> for Recipe {
    fn from(c: &canline_config::RecipeCfg) -> Self {
        Self {
            sku: c.sku.clone(),
            name: c.name.clone(),
            target_ml: c.target_ml,
            base_valve_ms: c.base_valve_ms,
            fixed_dose: c.fixed_dose,
            active: c.active,
        }
    }
}
